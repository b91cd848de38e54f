#![forbid(unsafe_code)]

//! The store's action (typically "submit" or "save").
//!
//! An action is an async closure over a parameter [`Value`]. It fails with
//! an [`ActionFailure`]: either an error-shaped [`ActionError`], which the
//! store keeps in its action-error view, or a raw [`Value`], which is only
//! handed to the completion callback. Any `std::error::Error` converts with
//! `?`:
//!
//! ```ignore
//! Actuators::new().action(|params| async move {
//!     let id = params.get("id").and_then(Value::as_f64).ok_or_else(|| ActionError::new("missing id"))?;
//!     save(id).await?; // io::Error -> ActionFailure::Error
//!     Ok(())
//! })
//! ```
//!
//! The [`ActionGate`] enforces "one action at a time" unless concurrent
//! actions are allowed; the in-progress view flips back only when the last
//! [`ActionPermit`] drops, even if the `execute` future is dropped midway.

use std::cell::Cell;
use std::rc::Rc;

use deepstate_core::Value;
use futures::future::LocalBoxFuture;

use crate::reactive::Observable;

/// Error-shaped action failure, kept in the action-error view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// How an action failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionFailure {
    /// Recognised error; stored and reported to plugins.
    Error(ActionError),
    /// Anything else. Not stored, only passed to the completion callback.
    Raw(Value),
}

impl ActionFailure {
    pub fn raw(value: impl Into<Value>) -> Self {
        Self::Raw(value.into())
    }

    /// The storable error, if this failure is error-shaped.
    #[must_use]
    pub fn as_error(&self) -> Option<&ActionError> {
        match self {
            Self::Error(e) => Some(e),
            Self::Raw(_) => None,
        }
    }
}

impl<E: std::error::Error + 'static> From<E> for ActionFailure {
    fn from(err: E) -> Self {
        Self::Error(ActionError::new(err.to_string()))
    }
}

/// The user action.
pub type Action = Rc<dyn Fn(Value) -> LocalBoxFuture<'static, Result<(), ActionFailure>>>;

/// Called once per execution with the failure, if any; awaited before the
/// action counts as finished.
pub type ActionCompleted = Rc<dyn Fn(Option<ActionFailure>) -> LocalBoxFuture<'static, ()>>;

/// Admission control for `execute`.
#[derive(Debug)]
pub struct ActionGate {
    running: Rc<Cell<usize>>,
    in_progress: Observable<bool>,
    allow_concurrent: bool,
}

impl ActionGate {
    #[must_use]
    pub fn new(in_progress: Observable<bool>, allow_concurrent: bool) -> Self {
        Self {
            running: Rc::new(Cell::new(0)),
            in_progress,
            allow_concurrent,
        }
    }

    /// Admit one execution, or `None` if one is running and concurrency is
    /// not allowed.
    pub fn try_enter(&self) -> Option<ActionPermit> {
        let running = self.running.get();
        if running > 0 && !self.allow_concurrent {
            return None;
        }
        self.running.set(running + 1);
        self.in_progress.set(true);
        Some(ActionPermit {
            running: Rc::clone(&self.running),
            in_progress: self.in_progress.clone(),
        })
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.running.get()
    }
}

/// One admitted execution; dropping it releases the gate.
#[derive(Debug)]
pub struct ActionPermit {
    running: Rc<Cell<usize>>,
    in_progress: Observable<bool>,
}

impl Drop for ActionPermit {
    fn drop(&mut self) {
        let left = self.running.get().saturating_sub(1);
        self.running.set(left);
        if left == 0 {
            self.in_progress.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    fn fails() -> Result<(), ActionFailure> {
        let written: Result<(), DiskFull> = Err(DiskFull);
        written?;
        Ok(())
    }

    #[test]
    fn std_errors_convert_with_question_mark() {
        assert_eq!(
            fails(),
            Err(ActionFailure::Error(ActionError::new("disk full")))
        );
    }

    #[test]
    fn raw_failures_are_not_storable() {
        let failure = ActionFailure::raw(42);
        assert!(failure.as_error().is_none());
        let failure = ActionFailure::from(ActionError::new("boom"));
        assert_eq!(failure.as_error().map(|e| e.message.as_str()), Some("boom"));
    }

    #[test]
    fn gate_excludes_second_entry() {
        let view = Observable::new(false);
        let gate = ActionGate::new(view.clone(), false);
        let permit = gate.try_enter().expect("first entry");
        assert!(view.get());
        assert!(gate.try_enter().is_none());
        drop(permit);
        assert!(!view.get());
        assert!(gate.try_enter().is_some());
    }

    #[test]
    fn concurrent_gate_stays_busy_until_last_permit() {
        let view = Observable::new(false);
        let gate = ActionGate::new(view.clone(), true);
        let a = gate.try_enter().expect("a");
        let b = gate.try_enter().expect("b");
        assert_eq!(gate.running(), 2);
        drop(a);
        assert!(view.get());
        drop(b);
        assert!(!view.get());
    }
}
