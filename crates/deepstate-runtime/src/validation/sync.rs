#![forbid(unsafe_code)]

//! Batching of synchronous validation passes.
//!
//! With no delay, the first change of a tick arms a task and later changes
//! of the same tick ride along. With a delay, every change re-arms the timer
//! so the pass runs once the writes stop for that long.

use std::time::Duration;

use tokio::task::AbortHandle;

/// Pending-pass bookkeeping for the sync validator.
#[derive(Debug, Default)]
pub struct SyncBatch {
    pending: Option<AbortHandle>,
    passes: u64,
}

impl SyncBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a change with this `delay` needs a new task armed.
    ///
    /// Aborts the pending task when it is being replaced.
    pub fn needs_task(&mut self, delay: Duration) -> bool {
        match &self.pending {
            Some(_) if delay.is_zero() => false,
            Some(_) => {
                self.cancel();
                true
            }
            None => true,
        }
    }

    pub fn arm(&mut self, task: AbortHandle) {
        self.pending = Some(task);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Forget the pending task without aborting it; called by the task
    /// itself when it fires.
    pub fn fired(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Abort the pending task, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Count a completed pass.
    pub fn record_pass(&mut self) -> u64 {
        self.passes += 1;
        self.passes
    }

    /// Validation passes run so far, including the one at construction.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes
    }
}
