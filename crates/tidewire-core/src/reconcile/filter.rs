// ── Tag filter for conversation lists ──
//
// Lets a view restrict realtime additions to channels carrying at least
// one of a set of tags without re-querying the API.

use std::collections::BTreeSet;

/// Matches tag lists that share at least one tag with the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: BTreeSet<String>,
}

impl TagFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty filter matches everything and is treated as no filter.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn matches(&self, tags: &[String]) -> bool {
        self.is_empty() || tags.iter().any(|t| self.tags.contains(t))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_shared_tag_matches() {
        let filter = TagFilter::new(["vip", "sales"]);
        assert!(filter.matches(&["support".into(), "vip".into()]));
        assert!(!filter.matches(&["support".into()]));
        assert!(!filter.matches(&[]));
    }

    #[test]
    fn empty_filter_matches_all() {
        let filter = TagFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&[]));
    }
}
