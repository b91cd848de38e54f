#![forbid(unsafe_code)]

//! Shared, version-tracked values with change notification.
//!
//! Every status view a [`Store`](crate::Store) exposes (errors, dirty map,
//! snapshot list, ...) is an [`Observable<T>`]: a handle onto
//! `Rc<RefCell<..>>` storage. Setting a value that differs (by `PartialEq`)
//! bumps the version and notifies live subscribers in registration order.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: callbacks live as long as their [`Subscription`]
//!   guard. Dead weak entries are pruned lazily on the next notify.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug_span;
use web_time::Instant;

type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<CallbackWeak<T>>,
}

/// A shared value with change notification.
///
/// Clones are handles onto the **same** value and subscriber list.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 per value-changing mutation.
/// 2. `set(v)` with `v == current` is a no-op.
/// 3. Subscribers are notified in registration order.
/// 4. The storage is never borrowed while subscribers run, so they may read
///    or write any observable, including this one.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value, notifying subscribers if it changed.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Mutate in place, notifying subscribers if the value changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let old = inner.value.clone();
            f(&mut inner.value);
            let changed = inner.value != old;
            if changed {
                inner.version += 1;
            }
            changed
        };
        if changed {
            self.notify();
        }
    }

    /// Register `callback` for changes. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        self.inner.borrow_mut().subscribers.push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Registered subscribers, including dead ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    fn notify(&self) {
        let callbacks: Vec<CallbackRc<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        if callbacks.is_empty() {
            return;
        }

        if super::batch::is_batching() {
            for cb in callbacks {
                let key = Rc::as_ptr(&cb) as *const () as usize;
                let source = self.clone();
                super::batch::defer_or_run_keyed(key, move || {
                    let latest = source.get();
                    cb(&latest);
                });
            }
            return;
        }

        let value = self.get();
        let started = Instant::now();
        let _span = debug_span!(
            "deepstate.notify",
            subscribers = callbacks.len() as u64,
            duration_us = tracing::field::Empty
        )
        .entered();
        for cb in &callbacks {
            cb(&value);
        }
        tracing::Span::current().record("duration_us", started.elapsed().as_micros() as u64);
    }
}

/// RAII guard keeping a subscriber callback alive.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};

    #[derive(Default)]
    struct SubscriberCountVisitor {
        subscribers: Option<u64>,
    }

    impl Visit for SubscriberCountVisitor {
        fn record_u64(&mut self, field: &Field, value: u64) {
            if field.name() == "subscribers" {
                self.subscribers = Some(value);
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
    }

    struct NotifySpanCapture {
        next_id: AtomicU64,
        spans: Arc<Mutex<Vec<u64>>>,
    }

    impl tracing::Subscriber for NotifySpanCapture {
        fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            if attrs.metadata().name() == "deepstate.notify" {
                let mut visitor = SubscriberCountVisitor::default();
                attrs.record(&mut visitor);
                self.spans
                    .lock()
                    .expect("span capture lock")
                    .push(visitor.subscribers.unwrap_or(0));
            }
            tracing::span::Id::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

        fn event(&self, _event: &tracing::Event<'_>) {}

        fn enter(&self, _span: &tracing::span::Id) {}

        fn exit(&self, _span: &tracing::span::Id) {}
    }

    fn capture_notify_spans(run: impl FnOnce()) -> Vec<u64> {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let subscriber = NotifySpanCapture {
            next_id: AtomicU64::new(1),
            spans: Arc::clone(&spans),
        };
        let _guard = tracing::subscriber::set_default(subscriber);
        run();
        spans.lock().expect("span capture lock").clone()
    }

    #[test]
    fn set_bumps_version_only_on_change() {
        let obs = Observable::new(42);
        obs.set(42);
        assert_eq!(obs.version(), 0);
        obs.set(7);
        assert_eq!(obs.get(), 7);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn update_in_place() {
        let obs = Observable::new(vec![1, 2]);
        obs.update(|v| v.push(3));
        assert_eq!(obs.get(), vec![1, 2, 3]);
        obs.update(|v| v[0] = 1);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let obs = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2) = (Rc::clone(&log), Rc::clone(&log));
        let _s1 = obs.subscribe(move |v| l1.borrow_mut().push(("a", *v)));
        let _s2 = obs.subscribe(move |v| l2.borrow_mut().push(("b", *v)));
        obs.set(1);
        assert_eq!(*log.borrow(), vec![("a", 1), ("b", 1)]);
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let obs = Observable::new(0);
        let count = Rc::new(Cell::new(0));
        let hits = Rc::clone(&count);
        let sub = obs.subscribe(move |_| hits.set(hits.get() + 1));
        obs.set(1);
        drop(sub);
        obs.set(2);
        assert_eq!(count.get(), 1);
        assert_eq!(obs.subscriber_count(), 0, "pruned during the second notify");
    }

    #[test]
    fn subscriber_may_write_back() {
        let obs = Observable::new(0);
        let handle = obs.clone();
        let _sub = obs.subscribe(move |v| {
            if *v == 1 {
                handle.set(2);
            }
        });
        obs.set(1);
        assert_eq!(obs.get(), 2);
    }

    #[test]
    fn clones_share_state() {
        let a = Observable::new(String::new());
        let b = a.clone();
        a.set("x".into());
        assert_eq!(b.get(), "x");
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn notify_span_reports_subscriber_count() {
        let obs = Observable::new(0);
        let _a = obs.subscribe(|_| {});
        let _b = obs.subscribe(|_| {});
        let spans = capture_notify_spans(|| obs.set(1));
        assert_eq!(spans, vec![2]);
    }

    #[test]
    fn unobserved_updates_emit_no_span() {
        let obs = Observable::new(0);
        let spans = capture_notify_spans(|| obs.set(1));
        assert!(spans.is_empty());
    }
}
