//! URL patterns for request routing.

use url::Url;

/// Substring pattern over a serialized URL.
///
/// Matching runs on the whole URL, so host, path and query all count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    substring: String,
}

impl UrlPattern {
    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            substring: substring.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        url.as_str().contains(&self.substring)
    }

    /// True if any pattern in `patterns` matches `url`.
    pub fn any_matches(patterns: &[UrlPattern], url: &Url) -> bool {
        patterns.iter().any(|p| p.matches(url))
    }
}
