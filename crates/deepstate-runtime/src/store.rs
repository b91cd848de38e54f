#![forbid(unsafe_code)]

//! The state orchestrator.
//!
//! A [`Store`] owns one state tree and wires every subsystem to it:
//!
//! ```text
//!  write through Tracked ──▶ handle_change
//!                              ├─ dirty.mark(path + ancestors)
//!                              ├─ clear action error / async error at path
//!                              ├─ effect(change, store)   (may snapshot)
//!                              ├─ schedule sync pass      (SyncBatch)
//!                              ├─ schedule async checks   (AsyncQueue)
//!                              └─ plugins.on_change
//! ```
//!
//! `execute`, `rollback`, `rollback_to`, `reset` and `destroy` are called
//! from outside that flow.
//!
//! # Runtime
//!
//! Scheduled validation passes, debounce timers and async validator futures
//! are `tokio::task::spawn_local` tasks, spawned only inside a
//! [`run_local`](crate::run_local) scope. Outside one (no runtime, or a
//! runtime without the scope) sync validation runs immediately on every
//! change and async validators are skipped with a warning.
//!
//! An async check never runs against a value the sync validator rejects.
//! While a sync pass is pending its task is parked and released or dropped
//! by that pass.
//!
//! # Invariants
//!
//! 1. No `RefCell` borrow is held while user code (effects, validators,
//!    plugins, view subscribers) runs, so all of them may call back into
//!    the store.
//! 2. Rollback and reset publish every view change in one batch.
//! 3. Background tasks hold the store weakly; dropping the last handle stops
//!    all scheduled work.
//!
//! # Failure Modes
//!
//! - **Effect fails**: the write stays applied, the rest of the change
//!   pipeline (validation, async checks, `on_change`) is skipped and the
//!   writer gets [`StateError::Effect`].
//! - **Validator writes to the store**: the tree is borrowed while a sync
//!   validator runs; a write from inside it panics.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use deepstate_core::{Change, ChangeSink, ErrorTree, StateError, Tracked, Value, path};
use futures::FutureExt;
use tracing::{debug, error, info, trace, warn};
use web_time::Instant;

use crate::action::{Action, ActionCompleted, ActionError, ActionFailure, ActionGate};
use crate::cancellation::CancellationToken;
use crate::dirty::DirtyMap;
use crate::history::{RecordOutcome, Snapshot, SnapshotHistory};
use crate::local;
use crate::options::StateOptions;
use crate::plugin::{
    ActionEvent, ActionPhase, Dispatcher, PluginContext, RollbackEvent, RollbackKind,
};
use crate::reactive::{BatchScope, Computed, Observable};
use crate::validation::{
    self, AsyncErrors, AsyncQueue, AsyncValidator, SyncBatch, SyncValidator, ValidatorFailure,
};

/// Synchronous reaction to a change. May write, snapshot or fail.
pub type Effect = Rc<dyn Fn(&Change, &Store) -> Result<(), StateError>>;

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// User callbacks driving a store.
#[derive(Clone, Default)]
pub struct Actuators {
    pub validator: Option<SyncValidator>,
    pub effect: Option<Effect>,
    pub action: Option<Action>,
    pub action_completed: Option<ActionCompleted>,
    /// Async validators keyed by the path they check.
    pub async_validators: BTreeMap<String, AsyncValidator>,
}

impl Actuators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn validator(mut self, validator: impl Fn(&Value) -> ErrorTree + 'static) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    #[must_use]
    pub fn effect(
        mut self,
        effect: impl Fn(&Change, &Store) -> Result<(), StateError> + 'static,
    ) -> Self {
        self.effect = Some(Rc::new(effect));
        self
    }

    #[must_use]
    pub fn action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(Value) -> Fut + 'static,
        Fut: Future<Output = Result<(), ActionFailure>> + 'static,
    {
        self.action = Some(Rc::new(move |params| action(params).boxed_local()));
        self
    }

    /// Completion callback, awaited after every admitted action.
    #[must_use]
    pub fn on_complete<F, Fut>(mut self, completed: F) -> Self
    where
        F: Fn(Option<ActionFailure>) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.action_completed = Some(Rc::new(move |failure| completed(failure).boxed_local()));
        self
    }

    /// Register the async validator for `path`, replacing any previous one.
    #[must_use]
    pub fn async_validator<F, Fut>(mut self, path: impl Into<String>, validator: F) -> Self
    where
        F: Fn(Value, Value, CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<String, ValidatorFailure>> + 'static,
    {
        self.async_validators.insert(
            path.into(),
            Rc::new(move |value, state, token| validator(value, state, token).boxed_local()),
        );
        self
    }
}

impl fmt::Debug for Actuators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actuators")
            .field("validator", &self.validator.is_some())
            .field("effect", &self.effect.is_some())
            .field("action", &self.action.is_some())
            .field("action_completed", &self.action_completed.is_some())
            .field(
                "async_validators",
                &self.async_validators.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Reactive status of a store. Clones share the same views.
#[derive(Clone)]
pub struct StoreViews {
    /// Latest sync validation result.
    pub errors: Observable<ErrorTree>,
    pub has_errors: Rc<Computed<bool>>,
    pub dirty: Observable<DirtyMap>,
    pub is_dirty: Rc<Computed<bool>>,
    pub action_in_progress: Observable<bool>,
    /// Error of the last failed action, until cleared.
    pub action_error: Observable<Option<ActionError>>,
    pub snapshots: Observable<Vec<Snapshot>>,
    pub async_errors: Observable<AsyncErrors>,
    pub has_async_errors: Rc<Computed<bool>>,
    /// Paths with an async check queued or running.
    pub validating: Observable<BTreeSet<String>>,
    /// Sync or async.
    pub has_any_errors: Rc<Computed<bool>>,
    /// Async validators that broke (not ones that reported a message).
    pub async_failures: Observable<AsyncErrors>,
}

impl StoreViews {
    fn new(snapshots: Vec<Snapshot>) -> Self {
        let errors = Observable::new(ErrorTree::new());
        let has_errors = Rc::new(Computed::new(&errors, ErrorTree::has_errors));
        let dirty = Observable::new(DirtyMap::new());
        let is_dirty = Rc::new(Computed::new(&dirty, |d: &DirtyMap| !d.is_empty()));
        let async_errors = Observable::new(AsyncErrors::new());
        let has_async_errors = Rc::new(Computed::new(&async_errors, validation::has_async_errors));
        let has_any_errors = Rc::new(Computed::new2(
            has_errors.observable(),
            has_async_errors.observable(),
            |sync, pending| *sync || *pending,
        ));
        Self {
            errors,
            has_errors,
            dirty,
            is_dirty,
            action_in_progress: Observable::new(false),
            action_error: Observable::new(None),
            snapshots: Observable::new(snapshots),
            async_errors,
            has_async_errors,
            validating: Observable::new(BTreeSet::new()),
            has_any_errors,
            async_failures: Observable::new(AsyncErrors::new()),
        }
    }

    /// Snapshot titles, oldest first.
    #[must_use]
    pub fn snapshot_titles(&self) -> Vec<String> {
        self.snapshots
            .with(|list| list.iter().map(|s| s.title.clone()).collect())
    }
}

impl fmt::Debug for StoreViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreViews")
            .field("has_errors", &self.has_errors.get())
            .field("is_dirty", &self.is_dirty.get())
            .field("action_in_progress", &self.action_in_progress.get())
            .field("snapshots", &self.snapshot_titles())
            .field("validating", &self.validating.get())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Core {
    history: SnapshotHistory,
    sync: SyncBatch,
    queue: AsyncQueue,
}

struct Shared {
    data: Rc<RefCell<Value>>,
    root: Tracked,
    actuators: Actuators,
    options: Rc<StateOptions>,
    views: StoreViews,
    gate: ActionGate,
    core: RefCell<Core>,
    destroyed: Cell<bool>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        core.sync.cancel();
        core.queue.cancel_all();
    }
}

/// A reactive, change-tracked state container.
///
/// Cheap to clone; clones are handles onto the same store.
#[derive(Clone)]
pub struct Store {
    shared: Rc<Shared>,
}

/// Non-owning store handle, used by background tasks and plugin contexts.
#[derive(Clone)]
pub struct WeakStore(Weak<Shared>);

impl WeakStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|shared| Store { shared })
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

impl Store {
    /// Build a store around `initial`.
    ///
    /// Runs the sync validator once before returning, then `on_init` for
    /// each plugin, then (if enabled) queues every async validator.
    pub fn new(initial: impl Into<Value>, actuators: Actuators, options: StateOptions) -> Self {
        let initial = initial.into();
        for problem in options.validate() {
            warn!(target: "deepstate.store", %problem, "questionable store option");
        }

        let history = SnapshotHistory::new(initial.clone(), options.max_snapshots);
        let views = StoreViews::new(history.entries().to_vec());
        let gate = ActionGate::new(
            views.action_in_progress.clone(),
            options.allow_concurrent_actions,
        );
        let core = Core {
            history,
            sync: SyncBatch::new(),
            queue: AsyncQueue::new(options.max_concurrent_async_validations),
        };
        let data = Rc::new(RefCell::new(initial));
        let options = Rc::new(options);

        let shared = Rc::new_cyclic(|weak: &Weak<Shared>| {
            let owner = weak.clone();
            let sink: ChangeSink = Rc::new(move |change: Change| match owner.upgrade() {
                Some(shared) => Store { shared }.handle_change(change),
                None => Ok(()),
            });
            Shared {
                root: Tracked::new(Rc::clone(&data), sink),
                data,
                actuators,
                options,
                views,
                gate,
                core: RefCell::new(core),
                destroyed: Cell::new(false),
            }
        });

        let store = Self { shared };
        store.initialize();
        store
    }

    /// Build a store from a factory, called exactly once.
    pub fn from_fn(
        factory: impl FnOnce() -> Value,
        actuators: Actuators,
        options: StateOptions,
    ) -> Self {
        Self::new(factory(), actuators, options)
    }

    fn initialize(&self) {
        let started = Instant::now();
        self.validate_now(false);

        let ctx = PluginContext::new(self.data(), self.shared.views.clone(), self.downgrade());
        self.plugins().each("on_init", |p| p.on_init(&ctx));

        if self.shared.options.run_async_validation_on_init {
            let keys: Vec<String> = self.shared.actuators.async_validators.keys().cloned().collect();
            for key in keys {
                self.schedule_async(&key, false);
            }
        }

        debug!(
            target: "deepstate.store",
            validator = self.shared.actuators.validator.is_some(),
            async_validators = self.shared.actuators.async_validators.len(),
            plugins = self.shared.options.plugins.len(),
            duration_us = started.elapsed().as_micros() as u64,
            "store initialized"
        );
    }

    // ====================================================================
    // Accessors
    // ====================================================================

    /// Root view of the live state. Writes through it are tracked.
    #[must_use]
    pub fn data(&self) -> Tracked {
        self.shared.root.clone()
    }

    /// Deep copy of the current state.
    #[must_use]
    pub fn value(&self) -> Value {
        self.shared.data.borrow().clone()
    }

    #[must_use]
    pub fn views(&self) -> &StoreViews {
        &self.shared.views
    }

    #[must_use]
    pub fn options(&self) -> &StateOptions {
        &self.shared.options
    }

    pub(crate) fn options_rc(&self) -> Rc<StateOptions> {
        Rc::clone(&self.shared.options)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Rc::downgrade(&self.shared))
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.get()
    }

    /// Sync validation passes run so far, including the one at construction.
    #[must_use]
    pub fn validation_passes(&self) -> u64 {
        self.shared.core.borrow().sync.passes()
    }

    fn plugins(&self) -> Dispatcher<'_> {
        if self.shared.destroyed.get() {
            return Dispatcher::new(&[]);
        }
        Dispatcher::new(&self.shared.options.plugins)
    }

    // ====================================================================
    // Change pipeline
    // ====================================================================

    fn handle_change(&self, change: Change) -> Result<(), StateError> {
        let shared = &self.shared;
        if shared.destroyed.get() {
            trace!(target: "deepstate.store", path = %change.path, "change after destroy not processed");
            return Ok(());
        }
        if shared.options.diagnostics {
            debug!(
                target: "deepstate.store",
                path = %change.path,
                new = ?change.new_value,
                old = ?change.old_value,
                "change"
            );
        }

        shared.views.dirty.update(|dirty| {
            dirty.mark(&change.path);
        });
        if !shared.options.persist_action_error {
            shared.views.action_error.set(None);
        }
        if shared.options.clear_async_errors_on_change {
            shared.views.async_errors.update(|errors| {
                if let Some(message) = errors.get_mut(&change.path) {
                    message.clear();
                }
            });
        }

        if let Some(effect) = &shared.actuators.effect {
            effect(&change, self).map_err(|err| match err {
                StateError::Effect { .. } => err,
                other => StateError::Effect {
                    path: change.path.clone(),
                    message: other.to_string(),
                },
            })?;
        }

        self.schedule_validation();
        let keys: Vec<String> = shared
            .actuators
            .async_validators
            .keys()
            .filter(|key| path::related(key, &change.path))
            .cloned()
            .collect();
        for key in keys {
            self.schedule_async(&key, true);
        }

        self.plugins().each("on_change", |p| p.on_change(&change));
        Ok(())
    }

    // ====================================================================
    // Sync validation
    // ====================================================================

    fn schedule_validation(&self) {
        if self.shared.actuators.validator.is_none() {
            return;
        }
        if !local::can_spawn() {
            self.validate_now(true);
            return;
        }

        let delay = self.shared.options.validation_delay();
        let mut core = self.shared.core.borrow_mut();
        if !core.sync.needs_task(delay) {
            return;
        }
        let owner = self.downgrade();
        let task = tokio::task::spawn_local(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(store) = owner.upgrade() {
                store.run_scheduled_validation();
            }
        });
        core.sync.arm(task.abort_handle());
    }

    fn run_scheduled_validation(&self) {
        let fired = self.shared.core.borrow_mut().sync.fired();
        if fired {
            self.validate_now(true);
        }
    }

    /// Run a pending sync validation pass now instead of on the next tick.
    ///
    /// Returns whether a pass was pending.
    pub fn flush_validation(&self) -> bool {
        let pending = self.shared.core.borrow_mut().sync.cancel();
        if pending {
            self.validate_now(true);
        }
        pending
    }

    fn validate_now(&self, notify_plugins: bool) {
        let Some(validator) = self.shared.actuators.validator.clone() else {
            return;
        };
        let started = Instant::now();
        let errors = {
            let data = self.shared.data.borrow();
            validator(&data)
        };
        let pass = self.shared.core.borrow_mut().sync.record_pass();
        if self.shared.options.diagnostics {
            debug!(
                target: "deepstate.validation",
                pass,
                failures = errors.failures().len(),
                duration_us = started.elapsed().as_micros() as u64,
                "sync validation pass"
            );
        }
        self.shared.views.errors.set(errors.clone());
        self.release_deferred(&errors);
        if notify_plugins {
            self.plugins().each("on_validation", |p| p.on_validation(&errors));
        }
    }

    // ====================================================================
    // Async validation
    // ====================================================================

    fn schedule_async(&self, key: &str, debounce: bool) {
        if !local::can_spawn() {
            warn!(target: "deepstate.validation", path = key, "async validation needs a run_local scope; skipped");
            return;
        }
        let blocked = self.shared.views.errors.with(|errors| errors.has_error_at(key));
        let delay = self.shared.options.async_validation_delay();
        {
            let mut core = self.shared.core.borrow_mut();
            core.queue.supersede(key);
            let sync_pending = core.sync.is_pending();
            if blocked && !sync_pending {
                trace!(target: "deepstate.validation", path = key, "sync error present; async check skipped");
            } else {
                let id = core.queue.next_id();
                if debounce && !delay.is_zero() {
                    let owner = self.downgrade();
                    let path = key.to_owned();
                    let timer = tokio::task::spawn_local(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(store) = owner.upgrade() {
                            store.fire_async(&path, id);
                        }
                    });
                    core.queue.arm(key, id, timer.abort_handle());
                } else if sync_pending {
                    core.queue.defer(key, id);
                } else {
                    core.queue.enqueue(key, id);
                }
            }
        }
        self.pump_async();
    }

    fn fire_async(&self, path: &str, id: u64) {
        let blocked = self.shared.views.errors.with(|errors| errors.has_error_at(path));
        let fired = {
            let mut core = self.shared.core.borrow_mut();
            if core.sync.is_pending() {
                if core.queue.defer_fired(path, id) {
                    trace!(target: "deepstate.validation", path, "sync pass pending; async check parked");
                }
                false
            } else if blocked {
                if core.queue.drop_pending(path, id) {
                    trace!(target: "deepstate.validation", path, "sync error present; async check dropped");
                }
                false
            } else {
                core.queue.fire(path, id)
            }
        };
        if fired {
            self.pump_async();
        }
    }

    /// Queue the checks parked behind the pass that produced `errors`,
    /// dropping those whose path it rejected.
    fn release_deferred(&self, errors: &ErrorTree) {
        let released = {
            let mut core = self.shared.core.borrow_mut();
            let mut released = 0usize;
            for (path, id) in core.queue.take_deferred() {
                if errors.has_error_at(&path) {
                    trace!(target: "deepstate.validation", path = %path, "sync error present; async check dropped");
                } else {
                    core.queue.enqueue(&path, id);
                    released += 1;
                }
            }
            released
        };
        if released > 0 {
            self.pump_async();
        }
    }

    /// Start queued async tasks while slots are free.
    fn pump_async(&self) {
        let started = self.shared.core.borrow_mut().queue.start_ready();
        for task in started {
            let Some(validator) = self.shared.actuators.async_validators.get(&task.path).cloned()
            else {
                self.shared.core.borrow_mut().queue.finish(&task.path, task.id);
                continue;
            };
            let (value, state) = {
                let data = self.shared.data.borrow();
                (data.lookup(&task.path).unwrap_or(Value::Null), data.clone())
            };
            trace!(target: "deepstate.validation", path = %task.path, id = task.id, "async validation started");

            let future = validator(value, state, task.token);
            let owner = self.downgrade();
            let path = task.path.clone();
            let id = task.id;
            let handle = tokio::task::spawn_local(async move {
                let outcome = future.await;
                if let Some(store) = owner.upgrade() {
                    store.finish_async(&path, id, outcome);
                }
            });
            self.shared
                .core
                .borrow_mut()
                .queue
                .attach(&task.path, task.id, handle.abort_handle());
        }
        self.publish_validating();
    }

    fn finish_async(&self, path: &str, id: u64, outcome: Result<String, ValidatorFailure>) {
        let elapsed = self.shared.core.borrow_mut().queue.finish(path, id);
        let Some(elapsed) = elapsed else {
            trace!(target: "deepstate.validation", path, id, "late async result discarded");
            return;
        };
        let duration_us = elapsed.as_micros() as u64;
        match outcome {
            Ok(message) => {
                debug!(
                    target: "deepstate.validation",
                    path,
                    valid = message.is_empty(),
                    duration_us,
                    "async validation settled"
                );
                self.shared.views.async_failures.update(|failures| {
                    failures.remove(path);
                });
                self.shared.views.async_errors.update(|errors| {
                    errors.insert(path.to_owned(), message);
                });
            }
            Err(ValidatorFailure::Cancelled) => {
                trace!(target: "deepstate.validation", path, "async validator observed cancellation");
            }
            Err(ValidatorFailure::Failed(message)) => {
                error!(
                    target: "deepstate.validation",
                    path,
                    duration_us,
                    error = %message,
                    "async validator failed"
                );
                self.shared.views.async_failures.update(|failures| {
                    failures.insert(path.to_owned(), message);
                });
            }
        }
        self.pump_async();
    }

    fn publish_validating(&self) {
        let in_flight = self.shared.core.borrow().queue.in_flight();
        self.shared.views.validating.set(in_flight);
    }

    fn clear_async_views(&self) {
        self.shared.views.async_errors.set(AsyncErrors::new());
        self.shared.views.async_failures.set(AsyncErrors::new());
        self.shared.views.validating.set(BTreeSet::new());
    }

    // ====================================================================
    // Snapshots
    // ====================================================================

    /// Record the current state under `title`, replacing the last entry if
    /// it has the same title.
    pub fn snapshot(&self, title: &str) -> RecordOutcome {
        self.snapshot_with(title, true)
    }

    /// Record the current state under `title`. With `replace == false` a
    /// new entry is always appended.
    pub fn snapshot_with(&self, title: &str, replace: bool) -> RecordOutcome {
        let data = self.shared.data.borrow().clone();
        let (outcome, recorded, entries) = {
            let mut core = self.shared.core.borrow_mut();
            let outcome = core.history.record(title, data, replace);
            (
                outcome,
                core.history.last().clone(),
                core.history.entries().to_vec(),
            )
        };
        if let RecordOutcome::Appended { trimmed } = outcome
            && trimmed > 0
        {
            debug!(target: "deepstate.history", trimmed, len = entries.len(), "history trimmed");
        }
        self.shared.views.snapshots.set(entries);
        self.plugins().each("on_snapshot", |p| p.on_snapshot(&recorded));
        outcome
    }

    /// Step back `steps` snapshots (clamped at the initial one) and restore
    /// that state.
    ///
    /// Returns `false` without touching anything when there is nothing to
    /// step back to (`steps == 0`, or only the initial snapshot exists).
    pub fn rollback(&self, steps: usize) -> bool {
        let index = self.shared.core.borrow().history.step_back(steps);
        match index {
            Some(index) => {
                self.restore(index, RollbackKind::Steps(steps));
                true
            }
            None => {
                debug!(target: "deepstate.history", steps, "nothing to roll back");
                false
            }
        }
    }

    /// Restore the most recent snapshot titled `title`, dropping everything
    /// after it. Returns `false`, changing nothing, when no entry matches or
    /// the history holds only the initial snapshot.
    pub fn rollback_to(&self, title: &str) -> bool {
        let index = {
            let core = self.shared.core.borrow();
            if core.history.len() <= 1 {
                None
            } else {
                core.history.find_last(title)
            }
        };
        match index {
            Some(index) => {
                self.restore(index, RollbackKind::Title(title.to_owned()));
                true
            }
            None => {
                debug!(target: "deepstate.history", title, "no snapshot to roll back to");
                false
            }
        }
    }

    fn restore(&self, index: usize, kind: RollbackKind) {
        let started = Instant::now();
        let (target, abandoned) = {
            let _batch = BatchScope::new();
            let (target, abandoned, entries) = {
                let mut core = self.shared.core.borrow_mut();
                let abandoned = core.history.truncate_to(index);
                core.sync.cancel();
                core.queue.cancel_all();
                (
                    core.history.last().clone(),
                    abandoned,
                    core.history.entries().to_vec(),
                )
            };
            *self.shared.data.borrow_mut() = Value::clone(&target.data);
            self.shared.views.snapshots.set(entries);
            self.shared.views.dirty.set(DirtyMap::new());
            self.clear_async_views();
            self.validate_now(true);
            (target, abandoned)
        };

        info!(
            target: "deepstate.history",
            title = %target.title,
            abandoned = abandoned.len(),
            duration_us = started.elapsed().as_micros() as u64,
            "rolled back"
        );
        let event = RollbackEvent {
            target,
            abandoned,
            kind,
        };
        self.plugins().each("on_rollback", |p| p.on_rollback(&event));
    }

    /// Restore the initial snapshot and drop the rest of the history.
    ///
    /// Clears dirty flags, async state and the action error.
    pub fn reset(&self) {
        {
            let _batch = BatchScope::new();
            let (initial, entries) = {
                let mut core = self.shared.core.borrow_mut();
                core.history.truncate_to(0);
                core.sync.cancel();
                core.queue.cancel_all();
                (
                    Rc::clone(&core.history.initial().data),
                    core.history.entries().to_vec(),
                )
            };
            *self.shared.data.borrow_mut() = Value::clone(&initial);
            self.shared.views.snapshots.set(entries);
            self.shared.views.dirty.set(DirtyMap::new());
            self.shared.views.action_error.set(None);
            self.clear_async_views();
            self.validate_now(true);
        }
        info!(target: "deepstate.history", "store reset");
        self.plugins().each("on_reset", |p| p.on_reset());
    }

    // ====================================================================
    // Actions
    // ====================================================================

    /// Run the action with `params`.
    ///
    /// A no-op while another action runs, unless concurrent actions are
    /// allowed. On success the dirty map is cleared (if enabled) and the
    /// history collapses to a new initial snapshot of the current state.
    pub async fn execute(&self, params: impl Into<Value>) {
        let params = params.into();
        if self.is_destroyed() {
            return;
        }
        let Some(_permit) = self.shared.gate.try_enter() else {
            debug!(target: "deepstate.action", "action already running; execute ignored");
            return;
        };
        let started = Instant::now();

        self.shared.views.action_error.set(None);
        let before = ActionEvent {
            phase: ActionPhase::Before,
            params: params.clone(),
            error: None,
            succeeded: false,
        };
        self.plugins().each("on_action", |p| p.on_action(&before));

        let action = self.shared.actuators.action.clone();
        let outcome = match action {
            Some(action) => action(params.clone()).await,
            None => Ok(()),
        };
        let failure = outcome.err();
        let error = failure.as_ref().and_then(ActionFailure::as_error).cloned();
        if let Some(ActionFailure::Raw(raw)) = &failure {
            warn!(target: "deepstate.action", value = ?raw, "action failed with a non-error value; not stored");
        }
        self.shared.views.action_error.set(error.clone());

        let completed = self.shared.actuators.action_completed.clone();
        if let Some(completed) = completed {
            completed(failure.clone()).await;
        }

        if failure.is_none() {
            self.settle_successful_action();
        }

        info!(
            target: "deepstate.action",
            ok = failure.is_none(),
            duration_us = started.elapsed().as_micros() as u64,
            "action finished"
        );
        let after = ActionEvent {
            phase: ActionPhase::After,
            params,
            error,
            succeeded: failure.is_none(),
        };
        self.plugins().each("on_action", |p| p.on_action(&after));
    }

    fn settle_successful_action(&self) {
        let _batch = BatchScope::new();
        if self.shared.options.reset_dirty_on_action {
            self.shared.views.dirty.set(DirtyMap::new());
        }
        let data = self.shared.data.borrow().clone();
        let entries = {
            let mut core = self.shared.core.borrow_mut();
            core.history.collapse(data);
            core.history.entries().to_vec()
        };
        self.shared.views.snapshots.set(entries);
    }

    // ====================================================================
    // Teardown
    // ====================================================================

    /// Cancel all scheduled work and run plugin `destroy` hooks in reverse
    /// order. Later changes are still written but no longer processed.
    pub fn destroy(&self) {
        if self.shared.destroyed.replace(true) {
            return;
        }
        let cancelled = {
            let mut core = self.shared.core.borrow_mut();
            core.sync.cancel();
            core.queue.cancel_all()
        };
        self.shared.views.validating.set(BTreeSet::new());
        Dispatcher::new(&self.shared.options.plugins).each_rev("destroy", |p| p.destroy());
        info!(target: "deepstate.store", cancelled, "store destroyed");
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("data", &self.shared.data.borrow())
            .field("views", &self.shared.views)
            .field("options", &self.shared.options)
            .field("destroyed", &self.shared.destroyed.get())
            .finish()
    }
}
