//! Page sources the sampler reads visible text from.
//!
//! - `StaticPage`: text held in memory and replaced by the embedder
//! - `HtmlPage`: a URL fetched over HTTP and rendered to body text

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Node, Selector};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Elements whose text is never shown to the user
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Elements that start a new line when rendered
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Failed to fetch page: {0}")]
    Fetch(String),
    #[error("Page unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the rendered, human-visible text of the current page
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn visible_text(&self) -> Result<String, PageError>;
}

/// Page text kept in memory
pub struct StaticPage {
    text: RwLock<String>,
}

impl StaticPage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: RwLock::new(text.into()),
        }
    }

    /// Replace the page text (e.g. after a DOM mutation)
    pub fn set_text(&self, text: impl Into<String>) {
        match self.text.write() {
            Ok(mut guard) => *guard = text.into(),
            Err(poisoned) => *poisoned.into_inner() = text.into(),
        }
    }
}

#[async_trait]
impl PageSource for StaticPage {
    async fn visible_text(&self) -> Result<String, PageError> {
        self.text
            .read()
            .map(|text| text.clone())
            .map_err(|e| PageError::Unavailable(e.to_string()))
    }
}

/// A page fetched from its URL on every sample
pub struct HtmlPage {
    url: String,
    client: Client,
}

impl HtmlPage {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PageError::Unavailable(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PageSource for HtmlPage {
    async fn visible_text(&self) -> Result<String, PageError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PageError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PageError::Fetch(format!(
                "{} returned status {}",
                self.url,
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PageError::Fetch(e.to_string()))?;
        debug!("Fetched {} ({} bytes)", self.url, html.len());

        Ok(html_to_visible_text(&html))
    }
}

/// Render the `<body>` of an HTML document to the text a reader would see.
///
/// Script-like and `hidden` subtrees are dropped; block elements are
/// separated by line breaks so adjacent paragraphs never fuse.
pub fn html_to_visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = match Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
    {
        Some(body) => body,
        None => return String::new(),
    };

    let mut out = String::new();
    for node in body.descendants() {
        match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|ancestor| {
                    ancestor.value().as_element().is_some_and(|el| {
                        HIDDEN_TAGS.contains(&el.name()) || el.attr("hidden").is_some()
                    })
                });
                if !hidden {
                    out.push_str(text);
                }
            }
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => out.push('\n'),
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::normalize_text;

    #[test]
    fn test_html_skips_hidden_content() {
        let html = r#"
            <html><head><title>Title</title><style>p { color: red }</style></head>
            <body>
              <script>var secret = 1;</script>
              <h1>Headline</h1>
              <p>First paragraph</p><p>Second</p>
              <div hidden><span>invisible</span></div>
              <noscript>enable js</noscript>
            </body></html>
        "#;

        let text = normalize_text(&html_to_visible_text(html), 3000);
        assert_eq!(text, "Headline First paragraph Second");
    }

    #[test]
    fn test_html_blocks_do_not_fuse() {
        let text = html_to_visible_text("<body><div>a</div><div>b</div></body>");
        assert_eq!(normalize_text(&text, 100), "a b");
    }

    #[test]
    fn test_html_fragment_without_body() {
        let text = html_to_visible_text("just text");
        assert_eq!(normalize_text(&text, 100), "just text");
    }

    #[tokio::test]
    async fn test_static_page() {
        let page = StaticPage::new("one");
        assert_eq!(page.visible_text().await.unwrap(), "one");
        page.set_text("two");
        assert_eq!(page.visible_text().await.unwrap(), "two");
    }
}
