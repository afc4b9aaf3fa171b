//! Paths forwarded without authentication.

/// Matches request paths against operator-configured passthrough patterns.
///
/// A pattern ending in `/` covers its whole subtree; any other pattern
/// matches only itself. When several patterns match, the longest wins.
#[derive(Debug, Clone, Default)]
pub struct PassthroughMatcher {
    // Longest first.
    patterns: Vec<String>,
}

impl PassthroughMatcher {
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        patterns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        patterns.dedup();
        Self { patterns }
    }

    /// Returns the pattern `path` falls under, if any.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| {
                if pattern.ends_with('/') {
                    path.starts_with(pattern.as_str())
                } else {
                    path == pattern.as_str()
                }
            })
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
