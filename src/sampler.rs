//! Page text sampling and change fingerprints.
//!
//! A sample is the page's visible text with whitespace collapsed, trimmed and
//! capped in length. Its fingerprint is a cheap 32-bit rolling hash used only
//! to notice that the text changed between cycles.

use crate::page::PageSource;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Default cap on characters sent for analysis
pub const DEFAULT_MAX_SAMPLE_CHARS: usize = 3000;

/// djb2 seed
const HASH_SEED: i32 = 5381;

lazy_static! {
    // Unicode whitespace plus U+FEFF, which browsers also treat as `\s`
    static ref WHITESPACE: Regex = Regex::new(r"[\s\x{FEFF}]+").unwrap();
}

/// Digest of a sample, compared by equality only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(i32);

impl Fingerprint {
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the change fingerprint of a sample.
///
/// djb2 (`hash * 33 + unit`) over UTF-16 code units with wrapping 32-bit
/// arithmetic. Collisions only cost a skipped re-analysis.
pub fn fingerprint(text: &str) -> Fingerprint {
    let hash = text.encode_utf16().fold(HASH_SEED, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(i32::from(unit))
    });
    Fingerprint(hash)
}

/// Collapse whitespace runs, trim, and keep at most `max_chars` characters
pub fn normalize_text(raw: &str, max_chars: usize) -> String {
    let collapsed = WHITESPACE.replace_all(raw, " ");
    let trimmed = collapsed.trim();

    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Reads a page and produces normalized samples
pub struct ContentSampler {
    source: Arc<dyn PageSource>,
    max_chars: usize,
}

impl ContentSampler {
    pub fn new(source: Arc<dyn PageSource>, max_chars: usize) -> Self {
        Self { source, max_chars }
    }

    /// Current normalized sample; empty when the page has no text or cannot
    /// be read
    pub async fn sample(&self) -> String {
        let raw = match self.source.visible_text().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read page text: {}", e);
                return String::new();
            }
        };

        let text = normalize_text(&raw, self.max_chars);
        trace!("Sampled {} chars", text.chars().count());
        text
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::StaticPage;

    #[test]
    fn test_fingerprint_known_values() {
        assert_eq!(fingerprint("").value(), 5381);
        assert_eq!(fingerprint("a").value(), 5381 * 33 + 97);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let text = "Breaking news ബ്രേക്കിങ് ന്യൂസ്".repeat(200);
        assert_eq!(fingerprint(&text), fingerprint(&text));
        assert_ne!(fingerprint("hello world"), fingerprint("hello world!"));
    }

    #[test]
    fn test_fingerprint_wraps_on_long_input() {
        // Must not overflow-panic in debug builds
        let text = "z".repeat(10_000);
        let _ = fingerprint(&text);
    }

    #[test]
    fn test_fingerprint_uses_utf16_units() {
        // U+1F436 is a surrogate pair: two units, hashed one after the other
        let expected = fingerprint_units(&[0xD83D, 0xDC36]);
        assert_eq!(fingerprint("\u{1F436}").value(), expected);
    }

    fn fingerprint_units(units: &[u16]) -> i32 {
        let mut hash: i64 = 5381;
        for &u in units {
            hash = ((hash << 5) + hash + i64::from(u)) as i32 as i64;
        }
        hash as i32
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  a \n\n b\t\tc  ", 100), "a b c");
        assert_eq!(normalize_text(" \n\t ", 100), "");
    }

    #[test]
    fn test_normalize_treats_bom_as_whitespace() {
        assert_eq!(normalize_text("\u{FEFF}Hello\u{FEFF}\u{FEFF}world\u{FEFF}", 100), "Hello world");
        assert_eq!(normalize_text("a\u{00A0}\u{2003}b", 100), "a b");
    }

    #[test]
    fn test_normalize_truncates_by_chars() {
        let long = "ab ".repeat(2000);
        let text = normalize_text(&long, DEFAULT_MAX_SAMPLE_CHARS);
        assert_eq!(text.chars().count(), DEFAULT_MAX_SAMPLE_CHARS);

        // Multi-byte characters are never split
        let text = normalize_text("ക്ക്ക്ക്", 3);
        assert_eq!(text.chars().count(), 3);
    }

    #[tokio::test]
    async fn test_sampler_reads_page() {
        let page = Arc::new(StaticPage::new("  Hello\n   world  "));
        let sampler = ContentSampler::new(page.clone(), 8);

        assert_eq!(sampler.sample().await, "Hello wo");

        page.set_text("");
        assert_eq!(sampler.sample().await, "");
    }
}
