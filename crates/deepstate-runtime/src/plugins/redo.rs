#![forbid(unsafe_code)]

//! Redo on top of rollback.
//!
//! Rollback drops the snapshots after its target and hands them to
//! `on_rollback` as `abandoned`. [`RedoStack`] keeps them and
//! [`redo`](RedoStack::redo) replays the oldest one: its top-level fields
//! are written back through the store (so effects, dirty tracking and
//! validation see ordinary changes) and a snapshot with its title is
//! recorded again.
//!
//! Any snapshot recorded outside a redo starts a new branch and empties the
//! stack, as do `reset` and a successful action (which collapses the
//! history the stack was taken from).

use std::cell::{Cell, RefCell};

use deepstate_core::StateError;

use crate::history::Snapshot;
use crate::plugin::{ActionEvent, ActionPhase, Plugin, PluginContext, PluginResult, RollbackEvent};

/// Redo support fed by rollback events.
#[derive(Default)]
pub struct RedoStack {
    ctx: RefCell<Option<PluginContext>>,
    /// Next redo target on top.
    stack: RefCell<Vec<Snapshot>>,
    replaying: Cell<bool>,
}

impl RedoStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.stack.borrow().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.borrow().is_empty()
    }

    /// Titles in redo order.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.stack
            .borrow()
            .iter()
            .rev()
            .map(|s| s.title.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.stack.borrow_mut().clear();
    }

    /// Re-apply the most recently undone snapshot.
    ///
    /// Returns `Ok(false)` when there is nothing to redo or the store is
    /// gone. A failing write puts the snapshot back on the stack. Fields
    /// absent from the snapshot are left as they are.
    pub fn redo(&self) -> Result<bool, StateError> {
        let Some(ctx) = self.ctx.borrow().clone().filter(PluginContext::is_alive) else {
            return Ok(false);
        };
        let Some(next) = self.stack.borrow_mut().pop() else {
            return Ok(false);
        };

        self.replaying.set(true);
        let written = next.data.fields().map_or(Ok(()), |fields| {
            fields
                .iter()
                .try_for_each(|(key, value)| ctx.data.set(key, value.clone()).map(drop))
        });
        if written.is_ok() {
            ctx.snapshot(&next.title);
        }
        self.replaying.set(false);

        match written {
            Ok(()) => {
                tracing::debug!(target: "deepstate.plugin", title = %next.title, left = self.len(), "redo applied");
                Ok(true)
            }
            Err(err) => {
                self.stack.borrow_mut().push(next);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for RedoStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedoStack")
            .field("titles", &self.titles())
            .finish_non_exhaustive()
    }
}

impl Plugin for RedoStack {
    fn name(&self) -> &str {
        "redo-stack"
    }

    fn on_init(&self, ctx: &PluginContext) -> PluginResult {
        *self.ctx.borrow_mut() = Some(ctx.clone());
        Ok(())
    }

    fn on_snapshot(&self, _snapshot: &Snapshot) -> PluginResult {
        if !self.replaying.get() {
            self.clear();
        }
        Ok(())
    }

    fn on_action(&self, event: &ActionEvent) -> PluginResult {
        if event.phase == ActionPhase::After && event.succeeded {
            self.clear();
        }
        Ok(())
    }

    fn on_rollback(&self, event: &RollbackEvent) -> PluginResult {
        // Abandoned is oldest first; the oldest must be redone first.
        self.stack
            .borrow_mut()
            .extend(event.abandoned.iter().rev().cloned());
        Ok(())
    }

    fn on_reset(&self) -> PluginResult {
        self.clear();
        Ok(())
    }

    fn destroy(&self) -> PluginResult {
        self.clear();
        self.ctx.borrow_mut().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionFailure, Actuators, StateOptions, Store};
    use deepstate_core::{Value, map};
    use std::rc::Rc;

    fn store_with_redo() -> (Store, Rc<RedoStack>) {
        let redo = Rc::new(RedoStack::new());
        let store = Store::new(
            map! { "a" => 0 },
            Actuators::new(),
            StateOptions::new().with_plugin(redo.clone()),
        );
        (store, redo)
    }

    fn write(store: &Store, v: i32) {
        store.data().set("a", v).expect("write");
        store.snapshot_with(&format!("a={v}"), false);
    }

    #[test]
    fn rollback_then_redo_restores_in_order() {
        let (store, redo) = store_with_redo();
        write(&store, 1);
        write(&store, 2);
        write(&store, 3);
        assert!(store.rollback(2));
        assert_eq!(redo.titles(), vec!["a=2", "a=3"]);

        assert!(redo.redo().expect("redo"));
        assert_eq!(store.value().get("a"), Some(&Value::from(2)));
        assert_eq!(store.views().snapshot_titles(), vec!["Initial", "a=1", "a=2"]);

        assert!(redo.redo().expect("redo"));
        assert_eq!(store.value().get("a"), Some(&Value::from(3)));
        assert!(!redo.can_redo());
        assert!(!redo.redo().expect("nothing left"));
    }

    #[test]
    fn new_snapshot_starts_new_branch() {
        let (store, redo) = store_with_redo();
        write(&store, 1);
        write(&store, 2);
        store.rollback(1);
        assert!(redo.can_redo());
        write(&store, 9);
        assert!(redo.is_empty());
    }

    #[tokio::test]
    async fn successful_action_clears_but_failed_one_keeps() {
        let redo = Rc::new(RedoStack::new());
        let store = Store::new(
            map! { "a" => 0 },
            Actuators::new().action(|params: Value| async move {
                if params.as_str() == Some("fail") {
                    return Err(ActionFailure::Raw(params));
                }
                Ok(())
            }),
            StateOptions::new().with_plugin(redo.clone()),
        );
        write(&store, 1);
        write(&store, 2);
        store.rollback(1);
        assert!(redo.can_redo());

        store.execute("fail").await;
        assert!(redo.can_redo(), "history untouched by a failed action");

        store.execute(Value::Null).await;
        assert!(redo.is_empty());
        assert_eq!(store.views().snapshot_titles(), vec!["Initial"]);
    }

    #[test]
    fn reset_and_destroy_clear() {
        let (store, redo) = store_with_redo();
        write(&store, 1);
        store.rollback(1);
        store.reset();
        assert!(redo.is_empty());

        write(&store, 2);
        store.rollback(1);
        store.destroy();
        assert!(redo.is_empty());
        assert!(!redo.redo().expect("store destroyed"));
    }
}
