#![forbid(unsafe_code)]

//! Validation scheduling.
//!
//! Two independent protocols feed the store's error views:
//!
//! - **Sync**: one [`SyncValidator`] maps the whole state to an
//!   [`ErrorTree`]. Changes are coalesced by [`SyncBatch`] into one pass per
//!   scheduler tick (or per debounce window); the result replaces the
//!   published tree wholesale.
//! - **Async**: one [`AsyncValidator`] per registered path. [`AsyncQueue`]
//!   keeps at most one debouncing, queued or running task per path and at
//!   most `limit` running tasks overall, starting queued tasks in arrival
//!   order as slots free up.
//!
//! Both structures only keep books. The [`Store`](crate::Store) owns the
//! timers and validator futures and reports back into them.

pub mod async_queue;
pub mod sync;

use std::collections::BTreeMap;
use std::rc::Rc;

use deepstate_core::{ErrorTree, Value};
use futures::future::LocalBoxFuture;

use crate::cancellation::CancellationToken;

pub use async_queue::{AsyncQueue, StartedTask};
pub use sync::SyncBatch;

/// Pure function from the current state to its validation result.
///
/// Called with the live tree borrowed; it must not write to the store.
pub type SyncValidator = Rc<dyn Fn(&Value) -> ErrorTree>;

/// Async check for one path: `(value at path, whole state, token)` to an
/// error message (empty = valid).
pub type AsyncValidator = Rc<
    dyn Fn(Value, Value, CancellationToken) -> LocalBoxFuture<'static, Result<String, ValidatorFailure>>,
>;

/// Flat `path -> message` map written by async validators.
pub type AsyncErrors = BTreeMap<String, String>;

/// Why an async validator produced no message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorFailure {
    /// The validator observed its token and gave up. Not an error.
    #[error("validation cancelled")]
    Cancelled,

    /// The validator itself broke (network down, bad response, ...).
    #[error("validator failed: {0}")]
    Failed(String),
}

impl ValidatorFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Whether any async validator currently reports a message.
#[must_use]
pub fn has_async_errors(errors: &AsyncErrors) -> bool {
    errors.values().any(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_messages_are_not_errors() {
        let mut errors = AsyncErrors::new();
        errors.insert("username".into(), String::new());
        assert!(!has_async_errors(&errors));
        errors.insert("email".into(), "taken".into());
        assert!(has_async_errors(&errors));
    }

    #[test]
    fn failure_display() {
        assert_eq!(ValidatorFailure::Cancelled.to_string(), "validation cancelled");
        assert_eq!(
            ValidatorFailure::failed("timeout").to_string(),
            "validator failed: timeout"
        );
        assert!(ValidatorFailure::Cancelled.is_cancelled());
    }
}
