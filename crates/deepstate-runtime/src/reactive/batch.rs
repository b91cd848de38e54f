#![forbid(unsafe_code)]

//! Coalescing of view notifications.
//!
//! A rollback replaces the error tree, the dirty map, the async error map,
//! the in-flight list and the snapshot list in one go. Without batching, a
//! subscriber to two of those views would run between the two updates and
//! observe a half-restored store. Inside a [`BatchScope`] every
//! [`Observable`](super::Observable) still updates its value immediately but
//! defers notifications; when the outermost scope drops, each subscriber
//! runs at most once with the latest value.
//!
//! ```ignore
//! let errors = Observable::new(0);
//! let dirty = Observable::new(false);
//! {
//!     let _batch = BatchScope::new();
//!     errors.set(1); // deferred
//!     dirty.set(true); // deferred
//!     errors.set(2); // coalesced with the first errors.set
//! } // subscribers run here, errors subscribers once with 2
//! ```
//!
//! # Invariants
//!
//! 1. Only the outermost of nested scopes flushes.
//! 2. Reads inside a batch return the latest value.
//! 3. Flush runs deferred callbacks in first-enqueue order.
//!
//! # Failure Modes
//!
//! - **Callback panics during flush**: the remaining callbacks still run and
//!   the first panic is re-raised afterwards.

use std::cell::RefCell;
use tracing::debug_span;
use web_time::Instant;

type DeferredNotify = Box<dyn FnOnce()>;

struct DeferredEntry {
    key: Option<usize>,
    notify: DeferredNotify,
}

struct BatchContext {
    depth: u32,
    deferred: Vec<DeferredEntry>,
    /// Value updates absorbed by this batch.
    updates: u64,
}

thread_local! {
    static BATCH_CTX: RefCell<Option<BatchContext>> = const { RefCell::new(None) };
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    BATCH_CTX.with(|ctx| ctx.borrow().is_some())
}

/// Run `f` now, or queue it until the open batch closes.
///
/// Returns `true` if `f` was deferred.
pub fn defer_or_run(f: impl FnOnce() + 'static) -> bool {
    enqueue(None, Box::new(f))
}

/// Like [`defer_or_run`], but a later entry with the same `key` replaces the
/// queued one while keeping its queue position.
pub fn defer_or_run_keyed(key: usize, f: impl FnOnce() + 'static) -> bool {
    enqueue(Some(key), Box::new(f))
}

fn enqueue(key: Option<usize>, notify: DeferredNotify) -> bool {
    let immediate = BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        let Some(batch) = guard.as_mut() else {
            return Some(notify);
        };
        batch.updates = batch.updates.saturating_add(1);
        match key.and_then(|k| batch.deferred.iter_mut().find(|e| e.key == Some(k))) {
            Some(entry) => entry.notify = notify,
            None => batch.deferred.push(DeferredEntry { key, notify }),
        }
        None
    });
    match immediate {
        Some(notify) => {
            notify();
            false
        }
        None => true,
    }
}

fn flush() {
    let (updates, deferred): (u64, Vec<DeferredNotify>) = BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        match guard.as_mut() {
            Some(batch) => (
                std::mem::take(&mut batch.updates),
                std::mem::take(&mut batch.deferred)
                    .into_iter()
                    .map(|entry| entry.notify)
                    .collect(),
            ),
            None => (0, Vec::new()),
        }
    });

    if deferred.is_empty() {
        return;
    }

    let started = Instant::now();
    let _span = debug_span!(
        "deepstate.batch_flush",
        updates,
        notifications = deferred.len() as u64,
        duration_us = tracing::field::Empty
    )
    .entered();

    let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
    for notify in deferred {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(notify));
        if let Err(payload) = result
            && first_panic.is_none()
        {
            first_panic = Some(payload);
        }
    }

    tracing::Span::current().record("duration_us", started.elapsed().as_micros() as u64);

    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }
}

/// RAII guard deferring view notifications until it drops.
pub struct BatchScope {
    is_root: bool,
}

impl BatchScope {
    /// Open a batch, or nest inside the open one.
    #[must_use]
    pub fn new() -> Self {
        let is_root = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            match guard.as_mut() {
                Some(batch) => {
                    batch.depth += 1;
                    false
                }
                None => {
                    *guard = Some(BatchContext {
                        depth: 1,
                        deferred: Vec::new(),
                        updates: 0,
                    });
                    true
                }
            }
        });
        Self { is_root }
    }

    /// Notifications queued so far.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        BATCH_CTX.with(|ctx| ctx.borrow().as_ref().map_or(0, |b| b.deferred.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let should_flush = BATCH_CTX.with(|ctx| match ctx.borrow_mut().as_mut() {
            Some(batch) => {
                batch.depth -= 1;
                batch.depth == 0
            }
            None => false,
        });

        if should_flush {
            // Callbacks may queue further notifications; drain until quiet.
            flush();
            while BATCH_CTX.with(|ctx| ctx.borrow().as_ref().is_some_and(|b| !b.deferred.is_empty())) {
                flush();
            }
            BATCH_CTX.with(|ctx| *ctx.borrow_mut() = None);
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("is_root", &self.is_root)
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter<T: Clone + PartialEq + 'static>(
        obs: &Observable<T>,
    ) -> (Rc<Cell<u32>>, crate::reactive::Subscription) {
        let count = Rc::new(Cell::new(0u32));
        let hits = Rc::clone(&count);
        let sub = obs.subscribe(move |_| hits.set(hits.get() + 1));
        (count, sub)
    }

    #[test]
    fn batch_defers_and_coalesces() {
        let errors = Observable::new(0);
        let (count, _sub) = counter(&errors);
        {
            let _batch = BatchScope::new();
            errors.set(1);
            errors.set(2);
            errors.set(3);
            assert_eq!(count.get(), 0);
            assert_eq!(errors.get(), 3, "values update inside the batch");
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn nested_batch_only_outermost_flushes() {
        let dirty = Observable::new(false);
        let (count, _sub) = counter(&dirty);
        {
            let _outer = BatchScope::new();
            {
                let _inner = BatchScope::new();
                dirty.set(true);
            }
            assert_eq!(count.get(), 0);
        }
        assert_eq!(count.get(), 1);
        assert!(!is_batching());
    }

    #[test]
    fn subscribers_see_consistent_state_across_views() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let seen = Rc::new(Cell::new((0, 0)));
        let (b2, seen2) = (b.clone(), Rc::clone(&seen));
        let _sub = a.subscribe(move |a_val| seen2.set((*a_val, b2.get())));
        {
            let _batch = BatchScope::new();
            a.set(1);
            b.set(1);
        }
        assert_eq!(seen.get(), (1, 1));
    }

    #[test]
    fn defer_or_run_without_batch_runs_now() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        assert!(!defer_or_run(move || flag.set(true)));
        assert!(ran.get());
    }

    #[test]
    fn keyed_entries_keep_first_position_and_latest_callback() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let (o1, o2, o3) = (Rc::clone(&order), Rc::clone(&order), Rc::clone(&order));
        {
            let batch = BatchScope::new();
            defer_or_run_keyed(1, move || o1.borrow_mut().push("first-old"));
            defer_or_run_keyed(2, move || o2.borrow_mut().push("second"));
            defer_or_run_keyed(1, move || o3.borrow_mut().push("first-new"));
            assert_eq!(batch.pending_count(), 2);
        }
        assert_eq!(*order.borrow(), vec!["first-new", "second"]);
    }

    #[test]
    fn no_subscribers_nothing_queued() {
        let obs = Observable::new(0);
        let batch = BatchScope::new();
        obs.set(42);
        assert_eq!(batch.pending_count(), 0);
    }
}
