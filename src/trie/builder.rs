//! Trie construction
//!
//! The trie knows nothing about its payload. Callers inject four functions:
//!
//! - `compare`: total order used to sort siblings; `Equal` means "same node"
//! - `hash`: bucket key used to find duplicates before insertion
//! - `can_parent_accept_child(parent, child)`: whether `child` belongs below `parent`
//! - `merge`: folds a group of equal items into one payload
//!
//! and optionally `can_node_have_children`, which defaults to "always".
//!
//! Each item is inserted starting at the root. At every level the first rule
//! that applies wins:
//!
//! 1. a child compares equal: merge the item into it
//! 2. the item accepts one or more children: detach all of them, hang them
//!    under a new node for the item, attach that node here
//! 3. a child accepts the item: descend into the first such child
//! 4. otherwise: attach the item as a leaf here
//!
//! Siblings stay sorted by `compare`, and every scan is in that order, so an
//! ambiguous (non-transitive) acceptance predicate still places items
//! deterministically. With a transitive predicate the resulting shape does
//! not depend on insertion order.

use super::node::TrieNode;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

type Compare<T> = dyn Fn(&T, &T) -> Ordering + Send + Sync;
type HashFn<T> = dyn Fn(&T) -> u64 + Send + Sync;
type Accept<T> = dyn Fn(&T, &T) -> bool + Send + Sync;
type Merge<T> = dyn Fn(Vec<T>) -> T + Send + Sync;
type Capability<T> = dyn Fn(&T) -> bool + Send + Sync;

pub struct TrieBuilder<T> {
    compare: Box<Compare<T>>,
    hash: Box<HashFn<T>>,
    can_parent_accept_child: Box<Accept<T>>,
    merge: Box<Merge<T>>,
    can_node_have_children: Option<Box<Capability<T>>>,
}

impl<T> TrieBuilder<T> {
    pub fn new<C, H, A, M>(compare: C, hash: H, can_parent_accept_child: A, merge: M) -> Self
    where
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
        H: Fn(&T) -> u64 + Send + Sync + 'static,
        A: Fn(&T, &T) -> bool + Send + Sync + 'static,
        M: Fn(Vec<T>) -> T + Send + Sync + 'static,
    {
        TrieBuilder {
            compare: Box::new(compare),
            hash: Box::new(hash),
            can_parent_accept_child: Box::new(can_parent_accept_child),
            merge: Box::new(merge),
            can_node_have_children: None,
        }
    }

    /// Restrict which payloads may have children
    ///
    /// A node that cannot have children never adopts siblings and is never
    /// descended into. The root is exempt.
    #[must_use]
    pub fn with_child_capability<F>(mut self, can_node_have_children: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.can_node_have_children = Some(Box::new(can_node_have_children));
        self
    }

    /// Build a fresh tree rooted at `root`
    ///
    /// Duplicates are merged up front, so each distinct item is inserted once.
    pub fn build(&self, root: T, items: impl IntoIterator<Item = T>) -> TrieNode<T> {
        let mut tree = TrieNode::new(root);
        for item in self.merge_duplicates(items) {
            self.insert(&mut tree, item);
        }
        trace!(nodes = tree.node_count(), depth = tree.depth(), "trie built");
        tree
    }

    /// Insert one item below `root`
    pub fn insert(&self, root: &mut TrieNode<T>, item: T) {
        let mut current = root;
        loop {
            let children = current.children();

            if let Some(index) = children
                .iter()
                .position(|child| (self.compare)(child.data(), &item) == Ordering::Equal)
            {
                self.merge_into(current, index, item);
                return;
            }

            if self.can_have_children(&item)
                && children
                    .iter()
                    .any(|child| (self.can_parent_accept_child)(&item, child.data()))
            {
                self.adopt(current, item);
                return;
            }

            let parent = children.iter().position(|child| {
                self.can_have_children(child.data())
                    && (self.can_parent_accept_child)(child.data(), &item)
            });
            match parent {
                Some(index) => current = &mut current.children_mut()[index],
                None => {
                    self.attach(current, TrieNode::new(item));
                    return;
                }
            }
        }
    }

    fn can_have_children(&self, data: &T) -> bool {
        self.can_node_have_children
            .as_ref()
            .map_or(true, |capable| capable(data))
    }

    /// Fold `item` into the child at `index`, keeping its subtree
    fn merge_into(&self, parent: &mut TrieNode<T>, index: usize, item: T) {
        let (data, children) = parent.children_mut().remove(index).into_parts();
        let merged = (self.merge)(vec![data, item]);
        self.attach(parent, TrieNode::with_children(merged, children));
    }

    /// Move every child `item` accepts under a new node for `item`
    fn adopt(&self, parent: &mut TrieNode<T>, item: T) {
        let (adopted, kept): (Vec<_>, Vec<_>) = std::mem::take(parent.children_mut())
            .into_iter()
            .partition(|child| (self.can_parent_accept_child)(&item, child.data()));
        *parent.children_mut() = kept;
        self.attach(parent, TrieNode::with_children(item, adopted));
    }

    /// Insert `node` among `parent`'s children at its sorted position
    fn attach(&self, parent: &mut TrieNode<T>, node: TrieNode<T>) {
        let at = parent
            .children()
            .partition_point(|child| (self.compare)(child.data(), node.data()) == Ordering::Less);
        parent.children_mut().insert(at, node);
    }

    /// Group items that hash alike and compare equal, merging each group once
    ///
    /// Groups keep the order in which their first member was seen.
    fn merge_duplicates(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut groups: Vec<Vec<T>> = Vec::new();
        let mut buckets: HashMap<u64, Vec<usize>> = HashMap::new();

        for item in items {
            let bucket = buckets.entry((self.hash)(&item)).or_default();
            let existing = bucket
                .iter()
                .copied()
                .find(|&group| (self.compare)(&groups[group][0], &item) == Ordering::Equal);
            match existing {
                Some(group) => groups[group].push(item),
                None => {
                    bucket.push(groups.len());
                    groups.push(vec![item]);
                }
            }
        }

        groups
            .into_iter()
            .filter_map(|mut group| match group.len() {
                0 => None,
                1 => group.pop(),
                _ => Some((self.merge)(group)),
            })
            .collect()
    }
}

impl<T> std::fmt::Debug for TrieBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieBuilder")
            .field("child_capability", &self.can_node_have_children.is_some())
            .finish_non_exhaustive()
    }
}
