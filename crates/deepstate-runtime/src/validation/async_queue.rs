#![forbid(unsafe_code)]

//! Per-path async validation tasks with a global running limit.
//!
//! A task moves through these stages:
//!
//! ```text
//!   arm(path, id)          fire(path, id)          start_ready()
//! ───────────────▶ debouncing ───────────▶ queued ───────────────▶ running ──▶ finish(path, id)
//!                      │                    ▲
//!      defer_fired()   ▼                    │ take_deferred()
//!                   deferred ───────────────┘ (sync pass ran, no error at path)
//!
//!   supersede(path) / cancel_all() drop a task from any stage.
//! ```
//!
//! A task is deferred while a sync validation pass is pending, because that
//! pass decides whether the path has a sync error and the check is skipped.
//!
//! # Invariants
//!
//! 1. At most one task per path across all stages.
//! 2. `running.len() <= limit` at all times.
//! 3. Queued tasks start in the order they were queued.
//! 4. Cancelling a running task frees its slot at once; its eventual
//!    `finish` carries a stale id and is ignored.
//! 5. A task cancelled before it started never reaches its validator.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use tokio::task::AbortHandle;
use web_time::Instant;

use crate::cancellation::{CancellationSource, CancellationToken};

/// A task promoted to running; the caller spawns its validator future.
#[derive(Debug)]
pub struct StartedTask {
    pub path: String,
    pub id: u64,
    pub token: CancellationToken,
}

#[derive(Debug)]
struct Debouncing {
    id: u64,
    timer: Option<AbortHandle>,
}

#[derive(Debug)]
struct Running {
    id: u64,
    cancel: CancellationSource,
    task: Option<AbortHandle>,
    started_at: Instant,
}

impl Running {
    fn cancel(self) {
        self.cancel.cancel();
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Bookkeeping for async validation tasks.
#[derive(Debug)]
pub struct AsyncQueue {
    limit: usize,
    next_id: u64,
    debouncing: HashMap<String, Debouncing>,
    deferred: Vec<(String, u64)>,
    queued: VecDeque<(String, u64)>,
    running: BTreeMap<String, Running>,
}

impl AsyncQueue {
    /// Queue allowing `limit` running tasks. A limit of zero acts as one.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            next_id: 0,
            debouncing: HashMap::new(),
            deferred: Vec::new(),
            queued: VecDeque::new(),
            running: BTreeMap::new(),
        }
    }

    /// Fresh task id.
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Drop whatever task `path` has in any stage.
    ///
    /// Returns `true` when a running slot was freed.
    pub fn supersede(&mut self, path: &str) -> bool {
        if let Some(pending) = self.debouncing.remove(path)
            && let Some(timer) = pending.timer
        {
            timer.abort();
        }
        self.deferred.retain(|(p, _)| p != path);
        self.queued.retain(|(p, _)| p != path);
        match self.running.remove(path) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Start debouncing task `id` for `path`; `timer` fires [`fire`](Self::fire).
    pub fn arm(&mut self, path: &str, id: u64, timer: AbortHandle) {
        self.debouncing.insert(
            path.to_owned(),
            Debouncing {
                id,
                timer: Some(timer),
            },
        );
    }

    /// Debounce elapsed: move the task to the queue if it is still current.
    pub fn fire(&mut self, path: &str, id: u64) -> bool {
        match self.debouncing.get(path) {
            Some(pending) if pending.id == id => {
                self.debouncing.remove(path);
                self.queued.push_back((path.to_owned(), id));
                true
            }
            _ => false,
        }
    }

    /// Debounce elapsed but the task is no longer wanted.
    pub fn drop_pending(&mut self, path: &str, id: u64) -> bool {
        match self.debouncing.get(path) {
            Some(pending) if pending.id == id => {
                self.debouncing.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Debounce elapsed while a sync pass is pending: park the task until
    /// [`take_deferred`](Self::take_deferred).
    pub fn defer_fired(&mut self, path: &str, id: u64) -> bool {
        match self.debouncing.get(path) {
            Some(pending) if pending.id == id => {
                self.debouncing.remove(path);
                self.deferred.push((path.to_owned(), id));
                true
            }
            _ => false,
        }
    }

    /// Park task `id` for `path` until the pending sync pass has run.
    pub fn defer(&mut self, path: &str, id: u64) {
        self.deferred.push((path.to_owned(), id));
    }

    /// Hand back every parked task, oldest first. The caller queues or
    /// drops each one.
    pub fn take_deferred(&mut self) -> Vec<(String, u64)> {
        std::mem::take(&mut self.deferred)
    }

    /// Queue task `id` for `path` without debouncing.
    pub fn enqueue(&mut self, path: &str, id: u64) {
        self.queued.push_back((path.to_owned(), id));
    }

    /// Promote queued tasks while running slots are free.
    pub fn start_ready(&mut self) -> Vec<StartedTask> {
        let mut started = Vec::new();
        while self.running.len() < self.limit {
            let Some((path, id)) = self.queued.pop_front() else {
                break;
            };
            let cancel = CancellationSource::new();
            let token = cancel.token();
            self.running.insert(
                path.clone(),
                Running {
                    id,
                    cancel,
                    task: None,
                    started_at: Instant::now(),
                },
            );
            started.push(StartedTask { path, id, token });
        }
        started
    }

    /// Remember the spawned future of a running task so cancelling drops it.
    pub fn attach(&mut self, path: &str, id: u64, task: AbortHandle) {
        match self.running.get_mut(path) {
            Some(running) if running.id == id => running.task = Some(task),
            // Superseded before it was attached.
            _ => task.abort(),
        }
    }

    /// A running task settled. Returns its run time if it was still current,
    /// `None` for a late result of a cancelled task.
    pub fn finish(&mut self, path: &str, id: u64) -> Option<Duration> {
        match self.running.get(path) {
            Some(running) if running.id == id => self
                .running
                .remove(path)
                .map(|r| r.started_at.elapsed()),
            _ => None,
        }
    }

    /// Cancel every task in every stage.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = self.queued.len() + self.deferred.len();
        self.queued.clear();
        self.deferred.clear();
        for (_, pending) in self.debouncing.drain() {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            cancelled += 1;
        }
        for (_, task) in std::mem::take(&mut self.running) {
            task.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Paths queued or running; what the store shows as "validating".
    #[must_use]
    pub fn in_flight(&self) -> BTreeSet<String> {
        self.queued
            .iter()
            .map(|(p, _)| p.clone())
            .chain(self.running.keys().cloned())
            .collect()
    }

    #[must_use]
    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    #[must_use]
    pub fn is_debouncing(&self, path: &str) -> bool {
        self.debouncing.contains_key(path)
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.debouncing.is_empty()
            && self.deferred.is_empty()
            && self.queued.is_empty()
            && self.running.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_paths(q: &mut AsyncQueue, paths: &[&str]) {
        for p in paths {
            let id = q.next_id();
            q.enqueue(p, id);
        }
    }

    #[test]
    fn starts_up_to_limit_in_fifo_order() {
        let mut q = AsyncQueue::new(2);
        queue_paths(&mut q, &["a", "b", "c", "d"]);
        let started: Vec<_> = q.start_ready().into_iter().map(|t| t.path).collect();
        assert_eq!(started, vec!["a", "b"]);
        assert_eq!(q.running_len(), 2);
        assert_eq!(q.queued_len(), 2);
        assert!(q.start_ready().is_empty(), "no free slot");
    }

    #[test]
    fn finishing_frees_slot_for_next_in_line() {
        let mut q = AsyncQueue::new(1);
        queue_paths(&mut q, &["a", "b", "c"]);
        let a = q.start_ready().remove(0);
        assert!(q.finish(&a.path, a.id).is_some());
        let next: Vec<_> = q.start_ready().into_iter().map(|t| t.path).collect();
        assert_eq!(next, vec!["b"]);
    }

    #[test]
    fn superseding_running_task_cancels_token_and_frees_slot() {
        let mut q = AsyncQueue::new(1);
        queue_paths(&mut q, &["name", "email"]);
        let name = q.start_ready().remove(0);
        assert!(q.supersede("name"));
        assert!(name.token.is_cancelled());
        assert_eq!(q.running_len(), 0);
        assert_eq!(q.finish("name", name.id), None, "late result is discarded");
        let next = q.start_ready();
        assert_eq!(next[0].path, "email");
    }

    #[test]
    fn superseding_queued_task_removes_it() {
        let mut q = AsyncQueue::new(1);
        queue_paths(&mut q, &["a", "b"]);
        let _a = q.start_ready();
        assert!(!q.supersede("b"));
        assert_eq!(q.queued_len(), 0);
        assert_eq!(q.in_flight(), BTreeSet::from(["a".to_owned()]));
    }

    #[test]
    fn stale_fire_is_ignored() {
        let mut q = AsyncQueue::new(4);
        q.debouncing.insert("a".into(), Debouncing { id: 2, timer: None });
        assert!(!q.fire("a", 1));
        assert!(q.fire("a", 2));
        assert!(!q.is_debouncing("a"));
        assert_eq!(q.queued_len(), 1);
    }

    #[test]
    fn drop_pending_only_matches_current_id() {
        let mut q = AsyncQueue::new(4);
        q.debouncing.insert("a".into(), Debouncing { id: 5, timer: None });
        assert!(!q.drop_pending("a", 4));
        assert!(q.drop_pending("a", 5));
        assert!(q.is_idle());
    }

    #[test]
    fn deferred_tasks_wait_for_take() {
        let mut q = AsyncQueue::new(4);
        q.debouncing.insert("a".into(), Debouncing { id: 3, timer: None });
        assert!(!q.defer_fired("a", 2), "stale timer");
        assert!(q.defer_fired("a", 3));
        q.defer("b", 4);
        assert!(q.in_flight().is_empty(), "parked tasks are not validating");
        assert!(!q.is_idle());

        assert_eq!(q.take_deferred(), vec![("a".to_owned(), 3), ("b".to_owned(), 4)]);
        assert!(q.take_deferred().is_empty());
        assert!(q.is_idle());
    }

    #[test]
    fn superseding_drops_a_deferred_task() {
        let mut q = AsyncQueue::new(4);
        q.defer("a", 1);
        q.defer("b", 2);
        assert!(!q.supersede("a"));
        assert_eq!(q.take_deferred(), vec![("b".to_owned(), 2)]);
    }

    #[test]
    fn zero_limit_acts_as_one() {
        let mut q = AsyncQueue::new(0);
        assert_eq!(q.limit(), 1);
        queue_paths(&mut q, &["a", "b"]);
        assert_eq!(q.start_ready().len(), 1);
    }

    #[test]
    fn cancel_all_clears_every_stage() {
        let mut q = AsyncQueue::new(1);
        queue_paths(&mut q, &["a", "b"]);
        let a = q.start_ready().remove(0);
        q.debouncing.insert("c".into(), Debouncing { id: 99, timer: None });
        q.defer("d", 100);
        assert_eq!(q.cancel_all(), 4);
        assert!(a.token.is_cancelled());
        assert!(q.is_idle());
        assert!(q.in_flight().is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let mut q = AsyncQueue::new(1);
        let a = q.next_id();
        let b = q.next_id();
        assert_ne!(a, b);
    }
}
