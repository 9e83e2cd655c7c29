//! Site allowlist pattern matching.
//!
//! An allowlist entry is free text in one of three forms:
//! - `example.com`: the host itself and any of its subdomains
//! - `*.example.com`: subdomains only, never the bare host
//! - anything containing `/`: a case-sensitive substring of the page URL
//!
//! Malformed or empty entries never match and never raise errors.

use tracing::trace;

/// How an allowlist entry is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Blank after trimming
    Empty,
    /// Contains `/`, matched against the full URL
    UrlSubstring,
    /// Starts with `*.`, matched as a dot-prefixed host suffix
    Wildcard,
    /// Bare host, matched exactly or as a parent domain
    Host,
}

impl PatternKind {
    /// Classify an entry (surrounding whitespace is ignored)
    pub fn classify(pattern: &str) -> Self {
        let pattern = normalize(pattern);
        if pattern.is_empty() {
            PatternKind::Empty
        } else if pattern.contains('/') {
            PatternKind::UrlSubstring
        } else if pattern.starts_with("*.") {
            PatternKind::Wildcard
        } else {
            PatternKind::Host
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Empty => "empty",
            PatternKind::UrlSubstring => "url",
            PatternKind::Wildcard => "wildcard",
            PatternKind::Host => "host",
        }
    }
}

/// Trim an entry the way it is stored and compared
pub fn normalize(pattern: &str) -> &str {
    pattern.trim()
}

/// Check one allowlist entry against the current page
pub fn matches(hostname: &str, current_url: &str, pattern: &str) -> bool {
    let pattern = normalize(pattern);

    let matched = match PatternKind::classify(pattern) {
        PatternKind::Empty => false,
        PatternKind::UrlSubstring => current_url.contains(pattern),
        // Keep the dot so `*.example.com` rejects `notexample.com` and `example.com`
        PatternKind::Wildcard => hostname.ends_with(&pattern[1..]),
        PatternKind::Host => {
            hostname == pattern || hostname.ends_with(&format!(".{}", pattern))
        }
    };

    if matched {
        trace!("Host '{}' matched pattern '{}'", hostname, pattern);
    }
    matched
}

/// True iff any entry matches the current page
pub fn matches_any<S: AsRef<str>>(hostname: &str, current_url: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .any(|p| matches(hostname, current_url, p.as_ref()))
}

/// The entry "enable on this site" inserts for a host.
///
/// Hosts with more than two labels get a wildcard over their last two labels
/// (`news.example.com` -> `*.example.com`); shorter hosts are used verbatim.
pub fn quick_enable_candidate(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() > 2 {
        format!("*.{}", labels[labels.len() - 2..].join("."))
    } else {
        hostname.to_string()
    }
}
