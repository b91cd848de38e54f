#![forbid(unsafe_code)]

//! Plugin hooks.
//!
//! A [`Plugin`] observes a store's lifecycle through optional hooks. Hooks
//! run in registration order, except [`destroy`](Plugin::destroy) which runs
//! in reverse so later plugins unwind before the ones they may build on.
//!
//! | hook          | fired                                                    |
//! |---------------|----------------------------------------------------------|
//! | `on_init`     | once, after construction and the first validation pass   |
//! | `on_change`   | after each reported change, after the effect              |
//! | `on_validation` | after each sync validation pass except the first       |
//! | `on_snapshot` | after a snapshot is recorded (appended or replaced)       |
//! | `on_action`   | before and after each admitted `execute`                  |
//! | `on_rollback` | after `rollback` / `rollback_to` moved the state          |
//! | `on_reset`    | after `reset`                                             |
//! | `destroy`     | once, from `Store::destroy`                               |
//!
//! # Failure Modes
//!
//! - **Hook returns `Err`**: the error is logged at `warn` with the plugin
//!   name and hook; the remaining plugins and the core operation continue.
//! - **Hook panics**: not caught; the panic unwinds through the operation.

use std::rc::Rc;

use deepstate_core::{Change, ErrorTree, Tracked, Value};

use crate::action::ActionError;
use crate::history::{RecordOutcome, Snapshot};
use crate::options::StateOptions;
use crate::store::{StoreViews, WeakStore};

/// A hook failure. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type PluginResult = Result<(), PluginError>;

/// What a plugin gets at `on_init`.
///
/// Holds the store weakly: a plugin may keep its context without keeping
/// the store alive.
#[derive(Clone)]
pub struct PluginContext {
    /// Root view of the live state.
    pub data: Tracked,
    /// The store's status views.
    pub state: StoreViews,
    store: WeakStore,
}

impl PluginContext {
    pub(crate) fn new(data: Tracked, state: StoreViews, store: WeakStore) -> Self {
        Self { data, state, store }
    }

    /// Active options, while the store is alive.
    #[must_use]
    pub fn options(&self) -> Option<Rc<StateOptions>> {
        self.store.upgrade().map(|s| s.options_rc())
    }

    /// Record a snapshot with the usual same-title replacement.
    pub fn snapshot(&self, title: &str) -> Option<RecordOutcome> {
        self.snapshot_with(title, true)
    }

    /// Record a snapshot. `None` once the store is gone.
    pub fn snapshot_with(&self, title: &str, replace: bool) -> Option<RecordOutcome> {
        self.store.upgrade().map(|s| s.snapshot_with(title, replace))
    }

    /// Deep copy of the current state, or `None` once the store is gone.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.data.to_value().ok()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.store.upgrade().is_some_and(|s| !s.is_destroyed())
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Which side of an action an [`ActionEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub phase: ActionPhase,
    pub params: Value,
    /// Stored error of a finished action. Always `None` before.
    pub error: Option<ActionError>,
    /// The action finished without any failure, raw ones included, and
    /// the history was collapsed. Always `false` before.
    pub succeeded: bool,
}

/// How a rollback picked its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackKind {
    Steps(usize),
    Title(String),
}

/// Payload of `on_rollback`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackEvent {
    /// Snapshot the state now matches; the new tail of the history.
    pub target: Snapshot,
    /// Snapshots dropped from the tail, oldest first.
    pub abandoned: Vec<Snapshot>,
    pub kind: RollbackKind,
}

/// A store collaborator. Every hook is optional.
pub trait Plugin {
    /// Name used in diagnostics. Need not be unique.
    fn name(&self) -> &str;

    fn on_init(&self, _ctx: &PluginContext) -> PluginResult {
        Ok(())
    }

    fn on_change(&self, _change: &Change) -> PluginResult {
        Ok(())
    }

    fn on_validation(&self, _errors: &ErrorTree) -> PluginResult {
        Ok(())
    }

    fn on_snapshot(&self, _snapshot: &Snapshot) -> PluginResult {
        Ok(())
    }

    fn on_action(&self, _event: &ActionEvent) -> PluginResult {
        Ok(())
    }

    fn on_rollback(&self, _event: &RollbackEvent) -> PluginResult {
        Ok(())
    }

    fn on_reset(&self) -> PluginResult {
        Ok(())
    }

    fn destroy(&self) -> PluginResult {
        Ok(())
    }
}

/// Calls one hook on every plugin, isolating failures.
pub(crate) struct Dispatcher<'a> {
    plugins: &'a [Rc<dyn Plugin>],
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(plugins: &'a [Rc<dyn Plugin>]) -> Self {
        Self { plugins }
    }

    /// Registration order.
    pub(crate) fn each(&self, hook: &'static str, mut call: impl FnMut(&dyn Plugin) -> PluginResult) {
        for plugin in self.plugins {
            report(plugin.as_ref(), hook, call(plugin.as_ref()));
        }
    }

    /// Reverse registration order.
    pub(crate) fn each_rev(&self, hook: &'static str, mut call: impl FnMut(&dyn Plugin) -> PluginResult) {
        for plugin in self.plugins.iter().rev() {
            report(plugin.as_ref(), hook, call(plugin.as_ref()));
        }
    }
}

fn report(plugin: &dyn Plugin, hook: &'static str, result: PluginResult) {
    if let Err(err) = result {
        tracing::warn!(
            target: "deepstate.plugin",
            plugin = plugin.name(),
            hook,
            error = %err,
            "plugin hook failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_reset(&self) -> PluginResult {
            self.log.borrow_mut().push(format!("{}:reset", self.name));
            if self.fail {
                return Err(PluginError::new("refused"));
            }
            Ok(())
        }

        fn destroy(&self) -> PluginResult {
            self.log.borrow_mut().push(format!("{}:destroy", self.name));
            Ok(())
        }
    }

    fn plugins(log: &Rc<RefCell<Vec<String>>>, fail_first: bool) -> Vec<Rc<dyn Plugin>> {
        vec![
            Rc::new(Recorder {
                name: "a",
                log: Rc::clone(log),
                fail: fail_first,
            }),
            Rc::new(Recorder {
                name: "b",
                log: Rc::clone(log),
                fail: false,
            }),
        ]
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list = plugins(&log, false);
        Dispatcher::new(&list).each("on_reset", |p| p.on_reset());
        assert_eq!(*log.borrow(), vec!["a:reset", "b:reset"]);
    }

    #[test]
    fn destroy_runs_in_reverse() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list = plugins(&log, false);
        Dispatcher::new(&list).each_rev("destroy", |p| p.destroy());
        assert_eq!(*log.borrow(), vec!["b:destroy", "a:destroy"]);
    }

    #[test]
    fn failing_hook_does_not_stop_the_rest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let list = plugins(&log, true);
        Dispatcher::new(&list).each("on_reset", |p| p.on_reset());
        assert_eq!(*log.borrow(), vec!["a:reset", "b:reset"]);
    }

    #[test]
    fn default_hooks_are_no_ops() {
        struct Quiet;
        impl Plugin for Quiet {
            fn name(&self) -> &str {
                "quiet"
            }
        }
        let quiet = Quiet;
        assert!(quiet.on_reset().is_ok());
        assert!(quiet.on_validation(&ErrorTree::new()).is_ok());
        assert!(quiet.destroy().is_ok());
    }
}
