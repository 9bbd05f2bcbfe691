//! Trie nodes and read-only traversal
//!
//! Nodes own their children; there are no parent back-pointers. Callers get
//! shared references only. Structural changes go through
//! [`TrieBuilder`](super::builder::TrieBuilder).

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrieNode<T> {
    data: T,
    children: Vec<TrieNode<T>>,
}

impl<T> TrieNode<T> {
    pub(crate) fn new(data: T) -> Self {
        TrieNode {
            data,
            children: Vec::new(),
        }
    }

    pub(crate) fn with_children(data: T, children: Vec<TrieNode<T>>) -> Self {
        TrieNode { data, children }
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<TrieNode<T>> {
        &mut self.children
    }

    pub(crate) fn into_parts(self) -> (T, Vec<TrieNode<T>>) {
        (self.data, self.children)
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn children(&self) -> &[TrieNode<T>] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// Longest root-to-leaf path, counted in edges
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Direct children whose data satisfies `predicate`
    pub fn find_children_matching<P>(&self, predicate: P) -> Vec<&TrieNode<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.children
            .iter()
            .filter(|child| predicate(&child.data))
            .collect()
    }

    /// Every descendant (not this node) whose data satisfies `predicate`,
    /// in depth-first pre-order
    pub fn find_descendants<P>(&self, predicate: P) -> Vec<&TrieNode<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.iter()
            .skip(1)
            .filter(|node| predicate(&node.data))
            .collect()
    }

    /// Walk down while some child matches, returning the deepest match
    ///
    /// At each level the first matching child (in child order) is taken.
    /// Returns `None` when no direct child of this node matches.
    pub fn find_best_match<P>(&self, matches: P) -> Option<&TrieNode<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.path_matching(matches).pop()
    }

    /// Every node visited by [`find_best_match`](Self::find_best_match),
    /// shallowest first
    pub fn path_matching<P>(&self, matches: P) -> Vec<&TrieNode<T>>
    where
        P: Fn(&T) -> bool,
    {
        let mut path = Vec::new();
        let mut level = self;
        while let Some(child) = level.children.iter().find(|child| matches(&child.data)) {
            path.push(child);
            level = child;
        }
        path
    }

    /// Depth-first pre-order traversal starting at this node
    pub fn iter(&self) -> DepthFirst<'_, T> {
        DepthFirst { stack: vec![self] }
    }

    /// Depth-first pre-order traversal with each node's depth below this one
    pub fn iter_with_depth(&self) -> impl Iterator<Item = (usize, &TrieNode<T>)> {
        let mut stack = vec![(0usize, self)];
        std::iter::from_fn(move || {
            let (depth, node) = stack.pop()?;
            stack.extend(node.children.iter().rev().map(|child| (depth + 1, child)));
            Some((depth, node))
        })
    }

    /// Visit every node depth-first, pre-order
    pub fn for_each_depth_first<F>(&self, mut visit: F)
    where
        F: FnMut(&TrieNode<T>),
    {
        for node in self.iter() {
            visit(node);
        }
    }
}

/// Depth-first pre-order iterator over a subtree
pub struct DepthFirst<'a, T> {
    stack: Vec<&'a TrieNode<T>>,
}

impl<'a, T> Iterator for DepthFirst<'a, T> {
    type Item = &'a TrieNode<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

impl<'a, T> IntoIterator for &'a TrieNode<T> {
    type Item = &'a TrieNode<T>;
    type IntoIter = DepthFirst<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
