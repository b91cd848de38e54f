//! Cooperative cancellation for async validators.
//!
//! Every async validation task gets a [`CancellationToken`] from its own
//! [`CancellationSource`]. The scheduler cancels the source when the task is
//! superseded by a newer change to the same path, or when the store rolls
//! back, resets or is destroyed. Validators either poll
//! [`is_cancelled`](CancellationToken::is_cancelled) or race their work
//! against [`cancelled`](CancellationToken::cancelled):
//!
//! ```ignore
//! tokio::select! {
//!     _ = token.cancelled() => Err(ValidatorFailure::Cancelled),
//!     taken = lookup(name) => Ok(if taken { "taken".into() } else { String::new() }),
//! }
//! ```
//!
//! A result that arrives after cancellation is discarded by the scheduler
//! whether or not the validator noticed.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Cloneable view of a cancellation signal.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

/// Control side of a cancellation signal.
///
/// Dropping the source does **not** cancel its tokens.
pub struct CancellationSource {
    inner: Arc<CancellationInner>,
}

struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Signal cancellation and wake every pending `cancelled()` future.
    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once cancellation is requested (immediately if it already was).
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
