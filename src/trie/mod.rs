//! Pattern trie
//!
//! Organises overlapping, prefix-like items into a tree so that the most
//! specific item for a lookup is the deepest matching node. The payload type
//! is opaque: ordering, hashing, nesting and merging are injected through
//! [`TrieBuilder`]. [`pattern`] supplies the wildcard name patterns used by
//! the dispatch layer.

pub mod builder;
pub mod node;
pub mod pattern;
pub mod shared;

pub use builder::TrieBuilder;
pub use node::{DepthFirst, TrieNode};
pub use pattern::{parse_patterns, pattern_builder, Pattern, PatternParseError, PatternSet};
pub use shared::SharedTrie;
