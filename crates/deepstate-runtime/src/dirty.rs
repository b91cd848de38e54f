#![forbid(unsafe_code)]

//! Dirty tracking.
//!
//! A change at `a.b.c` marks `a`, `a.b` and `a.b.c`. Only dirty paths are
//! stored, so "anything dirty" is simply "map non-empty". The map is
//! cleared as a whole (reset, a rollback that moved, a successful action);
//! single paths never become clean again on their own.

use std::collections::BTreeMap;

use deepstate_core::path;

/// Set of dirty paths, presented as `path -> true`.
///
/// # Invariants
///
/// 1. No entry is ever `false`.
/// 2. If a path is present, each of its ancestors is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyMap {
    entries: BTreeMap<String, bool>,
}

impl DirtyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` and every ancestor. Returns whether anything was added.
    pub fn mark(&mut self, changed: &str) -> bool {
        let mut added = false;
        for prefix in path::ancestors(changed) {
            if !self.entries.contains_key(prefix) {
                self.entries.insert(prefix.to_owned(), true);
                added = true;
            }
        }
        added
    }

    #[must_use]
    pub fn is_dirty(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Dirty paths in lexical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// The `path -> true` view.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, bool> {
        &self.entries
    }
}
