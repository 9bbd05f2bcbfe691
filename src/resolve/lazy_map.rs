//! Memoizing resolution cache
//!
//! `LazyMap` answers "which candidate matches this key" once per key and
//! remembers the answer, including the answer "nothing matches". Each key
//! moves through three states:
//!
//! ```text
//! unresolved ──scan──> Resolved(v)
//!      │                   ▲
//!      └──scan──> NoMatch  │ override_value()
//! ```
//!
//! The candidate list is captured at construction and never changes, so a
//! scan is referentially transparent for a key. The scan runs without any
//! lock held; the result is committed with the map's atomic get-or-insert,
//! so concurrent first lookups may both scan but every caller observes the
//! single committed answer from then on.

use crate::error::panic_message;
use dashmap::DashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Committed state of a cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    Resolved(V),
    /// Scanned, and no candidate matched
    NoMatch,
}

impl<V> Resolution<V> {
    pub fn into_option(self) -> Option<V> {
        match self {
            Resolution::Resolved(value) => Some(value),
            Resolution::NoMatch => None,
        }
    }
}

type Predicate<K, V> = dyn Fn(&K, &V) -> bool + Send + Sync;

pub struct LazyMap<K, V> {
    entries: DashMap<K, Resolution<V>>,
    candidates: Arc<[V]>,
    predicate: Box<Predicate<K, V>>,
}

impl<K, V> LazyMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Capture `candidates` (in order) and the matching predicate
    pub fn new<P>(candidates: impl IntoIterator<Item = V>, predicate: P) -> Self
    where
        P: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        LazyMap {
            entries: DashMap::new(),
            candidates: candidates.into_iter().collect(),
            predicate: Box::new(predicate),
        }
    }

    /// First matching candidate for `key`, resolved at most once per key
    pub fn get(&self, key: &K) -> Option<V> {
        let cached = self.entries.get(key).map(|entry| entry.value().clone());
        if let Some(resolution) = cached {
            return resolution.into_option();
        }

        let scanned = self.scan(key);
        let committed = self
            .entries
            .entry(key.clone())
            .or_insert(scanned)
            .value()
            .clone();
        committed.into_option()
    }

    /// Replace the entry for `key`, bypassing the scan
    pub fn override_value(&self, key: K, value: V) {
        self.entries.insert(key, Resolution::Resolved(value));
    }

    /// Committed state for `key` without resolving; `None` means unresolved
    pub fn resolution(&self, key: &K) -> Option<Resolution<V>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn is_resolved(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys with a committed state
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn candidates(&self) -> &[V] {
        &self.candidates
    }

    fn scan(&self, key: &K) -> Resolution<V> {
        for (index, candidate) in self.candidates.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(key, candidate))) {
                Ok(true) => return Resolution::Resolved(candidate.clone()),
                Ok(false) => {}
                Err(payload) => {
                    warn!(
                        candidate = index,
                        message = %panic_message(payload.as_ref()),
                        "match predicate panicked, treating as no match"
                    );
                }
            }
        }
        Resolution::NoMatch
    }
}

impl<K, V> std::fmt::Debug for LazyMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyMap")
            .field("candidates", &self.candidates.len())
            .finish_non_exhaustive()
    }
}
