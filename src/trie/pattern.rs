//! Wildcard name patterns
//!
//! A [`Pattern`] is either an exact name (`Orders.submit`) or a prefix
//! wildcard (`Orders.*`), optionally carrying tags (`Orders.*=slow,db`).
//! Patterns are organised in a trie where wildcards own the patterns they
//! cover, so the most specific pattern for a name is the deepest match.
//!
//! ```text
//! *
//! └── Orders.*
//!     ├── Orders.sub*
//!     │   └── Orders.submit
//!     └── Orders.cancel
//! ```

use super::builder::TrieBuilder;
use super::node::TrieNode;
use super::shared::SharedTrie;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternParseError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern '{0}' has '*' before the end")]
    MisplacedWildcard(String),

    #[error("pattern '{0}' has an empty tag")]
    EmptyTag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    key: String,
    wildcard: bool,
    tags: BTreeSet<String>,
}

impl Pattern {
    pub fn exact(key: impl Into<String>) -> Self {
        Pattern {
            key: key.into(),
            wildcard: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn prefix(key: impl Into<String>) -> Self {
        Pattern {
            key: key.into(),
            wildcard: true,
            tags: BTreeSet::new(),
        }
    }

    /// The wildcard that matches every name
    pub fn any() -> Self {
        Pattern::prefix("")
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.wildcard {
            name.starts_with(&self.key)
        } else {
            name == self.key
        }
    }

    /// Ordinal by key; on equal keys the wildcard sorts first
    pub fn compare(&self, other: &Pattern) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.wildcard.cmp(&self.wildcard))
    }

    /// FNV-1a over the rendered key, so `a*` and `a` land in different buckets
    pub fn fnv_hash(&self) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(self.key.as_bytes());
        if self.wildcard {
            hasher.write(b"*");
        }
        hasher.finish()
    }

    /// Only wildcards own other patterns, and only those they cover
    pub fn can_accept_child(&self, child: &Pattern) -> bool {
        self.wildcard && child.key.starts_with(&self.key)
    }

    /// Union of tags; key and wildcard come from the first pattern
    pub fn merge(group: Vec<Pattern>) -> Pattern {
        let mut patterns = group.into_iter();
        let Some(mut merged) = patterns.next() else {
            return Pattern::any();
        };
        for pattern in patterns {
            merged.tags.extend(pattern.tags);
        }
        merged
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if self.wildcard {
            write!(f, "*")?;
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            write!(f, "={}", tags.join(","))?;
        }
        Ok(())
    }
}

/// `KEY[*][=TAG[,TAG...]]`
impl FromStr for Pattern {
    type Err = PatternParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PatternParseError::Empty);
        }
        let (body, tags) = match s.split_once('=') {
            Some((body, tags)) => (body.trim(), Some(tags)),
            None => (s, None),
        };

        let (key, wildcard) = match body.strip_suffix('*') {
            Some(key) => (key, true),
            None => (body, false),
        };
        if key.contains('*') {
            return Err(PatternParseError::MisplacedWildcard(s.to_string()));
        }
        if key.is_empty() && !wildcard {
            return Err(PatternParseError::Empty);
        }

        let mut pattern = Pattern {
            key: key.to_string(),
            wildcard,
            tags: BTreeSet::new(),
        };
        if let Some(tags) = tags {
            for tag in tags.split(',').map(str::trim) {
                if tag.is_empty() {
                    return Err(PatternParseError::EmptyTag(s.to_string()));
                }
                pattern.tags.insert(tag.to_string());
            }
        }
        Ok(pattern)
    }
}

/// Builder configured with the pattern comparison, hashing, nesting and merge rules
pub fn pattern_builder() -> TrieBuilder<Pattern> {
    TrieBuilder::new(
        Pattern::compare,
        Pattern::fnv_hash,
        Pattern::can_accept_child,
        Pattern::merge,
    )
    .with_child_capability(Pattern::is_wildcard)
}

/// Parse newline-separated patterns, skipping blank lines and `#` comments
pub fn parse_patterns(text: &str) -> Result<Vec<Pattern>, PatternParseError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

/// A published pattern trie answering "which patterns cover this name"
pub struct PatternSet {
    builder: TrieBuilder<Pattern>,
    trie: SharedTrie<Pattern>,
}

impl PatternSet {
    pub fn new(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        let builder = pattern_builder();
        let trie = SharedTrie::new(builder.build(Pattern::any(), patterns));
        PatternSet { builder, trie }
    }

    /// Rebuild from a new pattern list and publish it atomically
    pub fn replace(&self, patterns: impl IntoIterator<Item = Pattern>) {
        self.trie.rebuild(&self.builder, Pattern::any(), patterns);
    }

    /// Current tree; the root is the match-everything wildcard
    pub fn snapshot(&self) -> Arc<TrieNode<Pattern>> {
        self.trie.load()
    }

    /// Number of distinct patterns
    pub fn len(&self) -> usize {
        self.snapshot().node_count() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_leaf()
    }

    /// The most specific pattern covering `name`
    pub fn best_match(&self, name: &str) -> Option<Pattern> {
        self.snapshot()
            .find_best_match(|pattern| pattern.matches(name))
            .map(|node| node.data().clone())
    }

    /// Every pattern covering `name`, least specific first
    pub fn matches(&self, name: &str) -> Vec<Pattern> {
        self.snapshot()
            .path_matching(|pattern| pattern.matches(name))
            .into_iter()
            .map(|node| node.data().clone())
            .collect()
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.best_match(name).is_some()
    }
}

impl fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternSet")
            .field("patterns", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Pattern {
        s.parse().expect("valid pattern")
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(p("Orders.submit"), Pattern::exact("Orders.submit"));
        assert_eq!(p("Orders.*"), Pattern::prefix("Orders."));
        assert_eq!(
            p("Orders.* = slow, db"),
            Pattern::prefix("Orders.").with_tag("db").with_tag("slow")
        );
        assert_eq!(p("*"), Pattern::any());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Pattern>(), Err(PatternParseError::Empty));
        assert!(matches!(
            "a*b".parse::<Pattern>(),
            Err(PatternParseError::MisplacedWildcard(_))
        ));
        assert!(matches!(
            "a=x,,y".parse::<Pattern>(),
            Err(PatternParseError::EmptyTag(_))
        ));
    }

    #[test]
    fn test_display_round_trips_text() {
        assert_eq!(p("a.b*=y,x").to_string(), "a.b*=x,y");
        assert_eq!(p("a.b").to_string(), "a.b");
    }

    #[test]
    fn test_wildcard_sorts_first_on_equal_key() {
        assert_eq!(p("a*").compare(&p("a")), Ordering::Less);
        assert_eq!(p("a").compare(&p("a*")), Ordering::Greater);
        assert_eq!(p("a=x").compare(&p("a=y")), Ordering::Equal);
        assert_eq!(p("a*").compare(&p("b")), Ordering::Less);
    }

    #[test]
    fn test_hash_distinguishes_wildcard() {
        assert_ne!(p("a*").fnv_hash(), p("a").fnv_hash());
        assert_eq!(p("a=x").fnv_hash(), p("a=y").fnv_hash());
    }

    #[test]
    fn test_only_wildcards_accept_children() {
        assert!(p("a*").can_accept_child(&p("ab")));
        assert!(p("a*").can_accept_child(&p("a")));
        assert!(!p("a").can_accept_child(&p("ab")));
        assert!(!p("b*").can_accept_child(&p("ab")));
    }

    #[test]
    fn test_merge_unions_tags() {
        let merged = Pattern::merge(vec![p("a*=x"), p("a*=y"), p("a*=x")]);
        assert_eq!(merged, p("a*=x,y"));
    }

    #[test]
    fn test_trie_shape() {
        let set = PatternSet::new(vec![
            p("Orders.submit"),
            p("Orders.cancel"),
            p("Orders.sub*"),
            p("Orders.*"),
            p("Billing.charge"),
        ]);
        let root = set.snapshot();
        let top: Vec<String> = root.children().iter().map(|n| n.data().to_string()).collect();
        assert_eq!(top, vec!["Billing.charge", "Orders.*"]);

        let orders = &root.children()[1];
        let nested: Vec<String> = orders.children().iter().map(|n| n.data().to_string()).collect();
        assert_eq!(nested, vec!["Orders.cancel", "Orders.sub*"]);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_best_match_prefers_most_specific() {
        let set = PatternSet::new(vec![p("Orders.*"), p("Orders.sub*"), p("Orders.submit=slow")]);

        assert_eq!(set.best_match("Orders.submit"), Some(p("Orders.submit=slow")));
        assert_eq!(set.best_match("Orders.subscribe"), Some(p("Orders.sub*")));
        assert_eq!(set.best_match("Orders.cancel"), Some(p("Orders.*")));
        assert_eq!(set.best_match("Billing.charge"), None);
        assert_eq!(
            set.matches("Orders.submit"),
            vec![p("Orders.*"), p("Orders.sub*"), p("Orders.submit=slow")]
        );
    }

    #[test]
    fn test_exact_and_wildcard_with_same_key() {
        let set = PatternSet::new(vec![p("a"), p("a*")]);
        assert_eq!(set.best_match("a"), Some(p("a")));
        assert_eq!(set.best_match("ab"), Some(p("a*")));
    }

    #[test]
    fn test_duplicates_merge_tags() {
        let set = PatternSet::new(vec![p("a*=x"), p("a*=y")]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.best_match("abc"), Some(p("a*=x,y")));
    }

    #[test]
    fn test_replace_publishes_new_tree() {
        let set = PatternSet::new(vec![p("a*")]);
        assert!(set.is_match("abc"));
        set.replace(vec![p("b*")]);
        assert!(!set.is_match("abc"));
        assert!(set.is_match("bcd"));
    }

    #[test]
    fn test_parse_patterns_skips_comments() {
        let parsed =
            parse_patterns("# header\nOrders.*\n\n  Billing.charge=db \n").expect("parses");
        assert_eq!(parsed, vec![p("Orders.*"), p("Billing.charge=db")]);
        assert!(parse_patterns("ok\na*b").is_err());
    }
}
