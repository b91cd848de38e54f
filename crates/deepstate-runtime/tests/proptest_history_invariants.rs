#![forbid(unsafe_code)]

//! Property tests for snapshot history and dirty tracking.
//!
//! Validates:
//! - The first entry is always the initial snapshot.
//! - The history never exceeds its limit (when one is set).
//! - The newest appended entry survives trimming.
//! - Rollback always lands on an entry that existed and truncates after it.
//! - Every ancestor of a dirty path is dirty.

use deepstate_core::{Value, map, path};
use deepstate_runtime::{
    Actuators, DirtyMap, INITIAL_TITLE, RecordOutcome, SnapshotHistory, StateOptions, Store,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Record { title: String, replace: bool },
    Truncate(usize),
    StepBack(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => ("[abc]", any::<bool>()).prop_map(|(title, replace)| Op::Record { title, replace }),
        1 => (0usize..8).prop_map(Op::Truncate),
        1 => (0usize..8).prop_map(Op::StepBack),
    ]
}

fn dot_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-d]", 1..5).prop_map(|segments| segments.join("."))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn history_shape_holds(limit in 0usize..6, ops in prop::collection::vec(op(), 1..40)) {
        let mut history = SnapshotHistory::new(Value::Null, limit);
        for (n, op) in ops.iter().enumerate() {
            match op {
                Op::Record { title, replace } => {
                    let before = history.len();
                    let same_title = history.last().title == *title;
                    let outcome = history.record(title, Value::from(n), *replace);
                    if *replace && same_title {
                        prop_assert_eq!(outcome, RecordOutcome::Replaced);
                        prop_assert_eq!(history.len(), before);
                    }
                    if limit != 1 {
                        prop_assert_eq!(&history.last().title, title);
                        prop_assert_eq!(&*history.last().data, &Value::from(n));
                    }
                }
                Op::Truncate(index) => {
                    let before = history.len();
                    let dropped = history.truncate_to(*index);
                    prop_assert_eq!(history.len() + dropped.len(), before);
                }
                Op::StepBack(steps) => {
                    if let Some(index) = history.step_back(*steps) {
                        prop_assert!(index < history.len() - 1);
                    }
                }
            }
            prop_assert_eq!(history.initial().title.as_str(), INITIAL_TITLE);
            prop_assert!(history.len() >= 1);
            if limit > 0 {
                prop_assert!(history.len() <= limit.max(1));
            }
        }
    }

    #[test]
    fn rollback_restores_a_recorded_state(
        values in prop::collection::vec(0i32..100, 1..10),
        steps in 1usize..12,
    ) {
        let store = Store::new(map! { "v" => -1 }, Actuators::new(), StateOptions::new());
        for (n, v) in values.iter().enumerate() {
            store.data().set("v", *v).unwrap();
            store.snapshot_with(&format!("s{n}"), false);
        }
        let recorded: Vec<Value> = store
            .views()
            .snapshots
            .get()
            .iter()
            .map(|s| (*s.data).clone())
            .collect();

        prop_assert!(store.rollback(steps));
        let expected_len = recorded.len() - steps.min(recorded.len() - 1);
        prop_assert_eq!(store.views().snapshots.get().len(), expected_len);
        prop_assert_eq!(store.value(), recorded[expected_len - 1].clone());
        prop_assert!(!store.views().is_dirty.get());
    }

    #[test]
    fn dirty_paths_are_closed_under_ancestors(paths in prop::collection::vec(dot_path(), 1..20)) {
        let mut dirty = DirtyMap::new();
        for p in &paths {
            dirty.mark(p);
        }
        for p in dirty.paths() {
            for ancestor in path::ancestors(p) {
                prop_assert!(dirty.is_dirty(ancestor));
            }
        }
        for p in &paths {
            prop_assert!(!dirty.mark(p), "marking twice adds nothing");
        }
    }
}
