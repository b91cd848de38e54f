#![forbid(unsafe_code)]

//! Named snapshot history.
//!
//! [`SnapshotHistory`] keeps an ordered list of titled copies of the whole
//! state. Each entry holds its data behind an [`Rc`], so publishing the list
//! to the snapshot view or handing abandoned entries to plugins copies
//! pointers, not trees.
//!
//! # Architecture
//!
//! ```text
//! record("Edit name")  record("Edit name")       record("Edit age", replace=false)
//! [Initial, Edit name] [Initial, Edit name']     [Initial, Edit name', Edit age]
//!                        ^ same title: replaced
//!
//! truncate_to(1)  -> [Initial, Edit name']   abandoned: [Edit age]
//! collapse(data)  -> [Initial(data)]
//! ```
//!
//! # Invariants
//!
//! 1. The list is never empty and index 0 is titled [`INITIAL_TITLE`].
//! 2. Trimming never drops index 0.
//! 3. With a non-zero limit, `len() <= max(limit, 1)` after any append.
//! 4. A replace only ever touches the last entry, and never the initial one
//!    unless it is the only entry and carries the same title.

use std::fmt;
use std::rc::Rc;

use deepstate_core::Value;

/// Title of the baseline entry.
pub const INITIAL_TITLE: &str = "Initial";

/// One named copy of the state.
#[derive(Clone, PartialEq)]
pub struct Snapshot {
    pub title: String,
    pub data: Rc<Value>,
}

impl Snapshot {
    pub fn new(title: impl Into<String>, data: Value) -> Self {
        Self {
            title: title.into(),
            data: Rc::new(data),
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("title", &self.title)
            .field("data", &self.data)
            .finish()
    }
}

/// What [`SnapshotHistory::record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The last entry had the same title and was overwritten.
    Replaced,
    /// A new entry was appended; `trimmed` old entries were dropped.
    Appended { trimmed: usize },
}

/// Ordered snapshot list with an initial baseline.
#[derive(Clone)]
pub struct SnapshotHistory {
    entries: Vec<Snapshot>,
    /// Maximum length including the initial entry; `0` means unlimited.
    max_snapshots: usize,
}

impl fmt::Debug for SnapshotHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotHistory")
            .field("titles", &self.titles())
            .field("max_snapshots", &self.max_snapshots)
            .finish()
    }
}

impl SnapshotHistory {
    /// History holding only the initial snapshot of `initial`.
    #[must_use]
    pub fn new(initial: Value, max_snapshots: usize) -> Self {
        Self {
            entries: vec![Snapshot::new(INITIAL_TITLE, initial)],
            max_snapshots,
        }
    }

    // ====================================================================
    // Recording
    // ====================================================================

    /// Store `data` under `title`.
    ///
    /// With `replace` and a last entry titled `title`, that entry's data is
    /// overwritten. Otherwise a new entry is appended and the oldest
    /// non-initial entries are trimmed to fit the limit.
    pub fn record(&mut self, title: &str, data: Value, replace: bool) -> RecordOutcome {
        if replace
            && let Some(last) = self.entries.last_mut()
            && last.title == title
        {
            last.data = Rc::new(data);
            return RecordOutcome::Replaced;
        }
        self.entries.push(Snapshot::new(title, data));
        RecordOutcome::Appended {
            trimmed: self.enforce_limit(),
        }
    }

    fn enforce_limit(&mut self) -> usize {
        if self.max_snapshots == 0 || self.entries.len() <= self.max_snapshots {
            return 0;
        }
        let keep = self.max_snapshots.max(1);
        let excess = self.entries.len() - keep;
        self.entries.drain(1..1 + excess);
        excess
    }

    // ====================================================================
    // Navigation
    // ====================================================================

    /// Index reached by stepping back `steps` entries from the end, clamped
    /// at the initial entry. `None` when the step would not move.
    #[must_use]
    pub fn step_back(&self, steps: usize) -> Option<usize> {
        let last = self.entries.len() - 1;
        if steps == 0 || last == 0 {
            return None;
        }
        Some(last - steps.min(last))
    }

    /// Index of the most recent entry titled `title`.
    #[must_use]
    pub fn find_last(&self, title: &str) -> Option<usize> {
        self.entries.iter().rposition(|s| s.title == title)
    }

    /// Drop every entry after `index`, returning them oldest first.
    ///
    /// Out-of-range indices leave the history untouched.
    pub fn truncate_to(&mut self, index: usize) -> Vec<Snapshot> {
        if index + 1 >= self.entries.len() {
            return Vec::new();
        }
        self.entries.split_off(index + 1)
    }

    /// Replace the whole history with a single initial entry of `data`.
    /// Returns the dropped entries, oldest first.
    pub fn collapse(&mut self, data: Value) -> Vec<Snapshot> {
        std::mem::replace(
            &mut self.entries,
            vec![Snapshot::new(INITIAL_TITLE, data)],
        )
    }

    // ====================================================================
    // Query
    // ====================================================================

    #[must_use]
    pub fn entries(&self) -> &[Snapshot] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn initial(&self) -> &Snapshot {
        &self.entries[0]
    }

    #[must_use]
    pub fn last(&self) -> &Snapshot {
        &self.entries[self.entries.len() - 1]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the initial entry is never removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn titles(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.title.as_str()).collect()
    }

    #[must_use]
    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepstate_core::map;

    fn history(max: usize) -> SnapshotHistory {
        SnapshotHistory::new(map! { "a" => 0 }, max)
    }

    #[test]
    fn starts_with_initial() {
        let h = history(50);
        assert_eq!(h.titles(), vec![INITIAL_TITLE]);
        assert_eq!(h.initial().data.get("a"), Some(&Value::from(0)));
        assert!(!h.is_empty());
    }

    #[test]
    fn same_title_replaces_tail() {
        let mut h = history(50);
        assert_eq!(
            h.record("Changed a", map! { "a" => 1 }, true),
            RecordOutcome::Appended { trimmed: 0 }
        );
        assert_eq!(h.record("Changed a", map! { "a" => 2 }, true), RecordOutcome::Replaced);
        assert_eq!(h.len(), 2);
        assert_eq!(h.last().data.get("a"), Some(&Value::from(2)));
    }

    #[test]
    fn replace_false_always_appends() {
        let mut h = history(50);
        h.record("x", Value::Null, false);
        h.record("x", Value::Null, false);
        assert_eq!(h.titles(), vec![INITIAL_TITLE, "x", "x"]);
    }

    #[test]
    fn different_title_appends() {
        let mut h = history(50);
        h.record("Changed a", map! { "a" => 2 }, true);
        h.record("Changed b", map! { "a" => 2, "b" => 1 }, true);
        assert_eq!(h.titles(), vec![INITIAL_TITLE, "Changed a", "Changed b"]);
    }

    #[test]
    fn trimming_keeps_initial_and_newest() {
        let mut h = history(4);
        for i in 0..5 {
            h.record(&format!("change {i}"), Value::from(i), false);
        }
        assert_eq!(
            h.titles(),
            vec![INITIAL_TITLE, "change 2", "change 3", "change 4"]
        );
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let mut h = history(0);
        for i in 0..200 {
            h.record(&format!("c{i}"), Value::Null, false);
        }
        assert_eq!(h.len(), 201);
    }

    #[test]
    fn limit_of_one_keeps_only_initial() {
        let mut h = history(1);
        let outcome = h.record("x", Value::Null, false);
        assert_eq!(outcome, RecordOutcome::Appended { trimmed: 1 });
        assert_eq!(h.titles(), vec![INITIAL_TITLE]);
    }

    #[test]
    fn step_back_clamps_at_initial() {
        let mut h = history(50);
        assert_eq!(h.step_back(1), None);
        h.record("a", Value::Null, false);
        h.record("b", Value::Null, false);
        assert_eq!(h.step_back(0), None);
        assert_eq!(h.step_back(1), Some(1));
        assert_eq!(h.step_back(2), Some(0));
        assert_eq!(h.step_back(usize::MAX), Some(0));
    }

    #[test]
    fn find_last_prefers_newest() {
        let mut h = history(50);
        h.record("save", Value::from(1), false);
        h.record("other", Value::from(2), false);
        h.record("save", Value::from(3), false);
        assert_eq!(h.find_last("save"), Some(3));
        assert_eq!(h.find_last(INITIAL_TITLE), Some(0));
        assert_eq!(h.find_last("missing"), None);
    }

    #[test]
    fn truncate_returns_abandoned_in_order() {
        let mut h = history(50);
        h.record("a", Value::Null, false);
        h.record("b", Value::Null, false);
        h.record("c", Value::Null, false);
        let abandoned = h.truncate_to(1);
        let titles: Vec<_> = abandoned.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c"]);
        assert_eq!(h.titles(), vec![INITIAL_TITLE, "a"]);
        assert!(h.truncate_to(5).is_empty());
    }

    #[test]
    fn collapse_makes_new_baseline() {
        let mut h = history(50);
        h.record("a", Value::Null, false);
        let dropped = h.collapse(map! { "a" => 9 });
        assert_eq!(dropped.len(), 2);
        assert_eq!(h.titles(), vec![INITIAL_TITLE]);
        assert_eq!(h.initial().data.get("a"), Some(&Value::from(9)));
    }

    #[test]
    fn snapshots_share_data_when_cloned() {
        let mut h = history(50);
        h.record("a", map! { "big" => "payload" }, false);
        let copy = h.entries().to_vec();
        assert!(Rc::ptr_eq(&copy[1].data, &h.entries()[1].data));
    }
}
