#![forbid(unsafe_code)]

//! deepstate public facade crate.
//!
//! Re-exports the value model and tracked views from `deepstate-core` and
//! the [`Store`] with its views, options and plugin protocol from
//! `deepstate-runtime`. Most users only need the [`prelude`].
//!
//! ```
//! use deepstate::prelude::*;
//!
//! let store = Store::new(map! { "count" => 0 }, Actuators::new(), StateOptions::new());
//! store.data().set("count", 0)?; // same value: nothing happens
//! assert!(!store.views().is_dirty.get());
//! store.data().set("count", 1)?;
//! assert!(store.views().is_dirty.get());
//! # Ok::<(), deepstate::Error>(())
//! ```

// --- Core re-exports -------------------------------------------------------

pub use deepstate_core::{
    Change, ChangeSink, Class, ErrorTree, Fields, Method, Object, Opaque, Slot, StateError,
    Tracked, Value, deep_clone, list, map,
};

// --- Runtime re-exports ----------------------------------------------------

pub use deepstate_runtime::{
    ActionError, ActionEvent, ActionFailure, ActionPhase, Actuators, AsyncErrors,
    CancellationToken, DirtyMap, Effect, INITIAL_TITLE, Plugin, PluginContext, PluginError,
    PluginResult, RecordOutcome, RollbackEvent, RollbackKind, Snapshot, StateOptions, Store,
    StoreViews, ValidatorFailure, WeakStore, run_local, run_local_on,
};
pub use deepstate_runtime::plugins::RedoStack;

// --- Errors ---------------------------------------------------------------

/// Top-level error type for deepstate users.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A tracked write or read failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// Options could not be loaded.
    #[cfg(feature = "config")]
    #[error(transparent)]
    Config(#[from] deepstate_runtime::ConfigError),
}

/// Standard result type for deepstate APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ActionFailure, Actuators, Change, ErrorTree, Plugin, PluginContext, PluginResult,
        StateOptions, Store, Tracked, Value, ValidatorFailure, run_local,
    };
    pub use crate::{list, map};

    pub use crate::{core, runtime};
}

pub use deepstate_core as core;
pub use deepstate_runtime as runtime;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn state_errors_convert() {
        fn write(store: &Store) -> crate::Result<bool> {
            Ok(store.data().set("missing", 1)?)
        }
        let store = Store::new(Value::from(3), Actuators::new(), StateOptions::new());
        assert!(matches!(write(&store), Err(crate::Error::State(_))));
    }

    #[test]
    fn prelude_covers_a_round_trip() {
        let store = Store::new(map! { "tags" => list!["a"] }, Actuators::new(), StateOptions::new());
        let tags = store.data().view("tags").expect("list view");
        tags.push("b").expect("push");
        assert_eq!(tags.len().expect("len"), 2);
        assert!(store.views().dirty.get().is_dirty("tags"));
    }
}
