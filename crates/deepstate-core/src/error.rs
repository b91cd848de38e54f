#![forbid(unsafe_code)]

//! Errors raised by tracked reads and writes.

use thiserror::Error;

/// Failure of a tracked operation.
///
/// Structural errors describe a misuse of a view (writing into a string,
/// indexing past the end). [`StateError::Effect`] carries a failure raised
/// by the change pipeline after the write already happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The view's target is not a map, object or list.
    #[error("`{path}` is a {kind}, not a container")]
    NotAContainer { path: String, kind: &'static str },

    /// List operation on something that is not a list.
    #[error("`{path}` is a {kind}, not a list")]
    NotAList { path: String, kind: &'static str },

    /// Nested view requested for a field that holds no container.
    #[error("no trackable value at `{path}`")]
    NotTrackable { path: String },

    #[error("index {index} out of range for `{path}` (len {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// The location a view was created for no longer exists.
    #[error("view at `{path}` no longer resolves")]
    StaleView { path: String },

    #[error("`{path}` has no method `{method}`")]
    NoSuchMethod { path: String, method: String },

    /// The effect callback failed; the write itself was applied.
    #[error("effect failed after write to `{path}`: {message}")]
    Effect { path: String, message: String },

    /// A method implementation reported a failure.
    #[error("{0}")]
    Method(String),
}

impl StateError {
    /// Convenience constructor for method bodies.
    pub fn method(message: impl Into<String>) -> Self {
        Self::Method(message.into())
    }
}
