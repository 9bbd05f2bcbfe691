//! Atomically published trie root
//!
//! Readers take a snapshot (`Arc` clone) and keep using it for as long as
//! they like. A rebuild constructs the new tree with no lock held and then
//! swaps the root pointer, so a reader sees either the old tree or the new
//! one, never a partial build.

use super::builder::TrieBuilder;
use super::node::TrieNode;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub struct SharedTrie<T> {
    root: RwLock<Arc<TrieNode<T>>>,
}

impl<T> SharedTrie<T> {
    pub fn new(root: TrieNode<T>) -> Self {
        SharedTrie {
            root: RwLock::new(Arc::new(root)),
        }
    }

    /// Snapshot of the currently published tree
    pub fn load(&self) -> Arc<TrieNode<T>> {
        let root = self.root.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&root)
    }

    /// Publish a fully built tree, returning the one it replaced
    pub fn publish(&self, root: TrieNode<T>) -> Arc<TrieNode<T>> {
        let fresh = Arc::new(root);
        let mut slot = self.root.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, fresh)
    }

    /// Build from `items` off to the side, then publish
    pub fn rebuild(
        &self,
        builder: &TrieBuilder<T>,
        root: T,
        items: impl IntoIterator<Item = T>,
    ) -> Arc<TrieNode<T>> {
        let tree = builder.build(root, items);
        debug!(nodes = tree.node_count(), "publishing rebuilt trie");
        self.publish(tree)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedTrie<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTrie")
            .field("root", &self.load())
            .finish()
    }
}
