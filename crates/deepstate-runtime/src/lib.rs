#![forbid(unsafe_code)]

//! deepstate runtime
//!
//! The orchestration half of deepstate: a [`Store`] wraps a state tree from
//! `deepstate-core`, tracks dirtiness, batches sync validation, schedules
//! debounced and cancellable async validation under a concurrency limit,
//! keeps a named snapshot history with rollback, runs the store action and
//! dispatches plugin hooks. Status is published through [`reactive`] views.
//!
//! ```
//! use deepstate_core::{map, ErrorTree, Value};
//! use deepstate_runtime::{Actuators, StateOptions, Store};
//!
//! let store = Store::new(
//!     map! { "name" => "" },
//!     Actuators::new().validator(|state: &Value| {
//!         let missing = state.get("name").and_then(Value::as_str) == Some("");
//!         ErrorTree::new().with("name", if missing { "Required" } else { "" })
//!     }),
//!     StateOptions::new(),
//! );
//! assert!(store.views().has_errors.get());
//!
//! store.data().set("name", "ada").unwrap();
//! store.snapshot("Edit name");
//! assert!(store.views().is_dirty.get());
//! assert!(store.rollback(1));
//! assert_eq!(store.value().get("name"), Some(&Value::from("")));
//! ```

pub mod action;
pub mod cancellation;
pub mod dirty;
pub mod history;
pub mod local;
pub mod options;
pub mod plugin;
pub mod plugins;
pub mod reactive;
pub mod store;
pub mod validation;

pub use action::{Action, ActionCompleted, ActionError, ActionFailure};
pub use cancellation::{CancellationSource, CancellationToken};
pub use dirty::DirtyMap;
pub use history::{INITIAL_TITLE, RecordOutcome, Snapshot, SnapshotHistory};
pub use local::{run_local, run_local_on};
#[cfg(feature = "config")]
pub use options::ConfigError;
pub use options::StateOptions;
pub use plugin::{
    ActionEvent, ActionPhase, Plugin, PluginContext, PluginError, PluginResult, RollbackEvent,
    RollbackKind,
};
pub use reactive::{BatchScope, Computed, Observable, Subscription};
pub use store::{Actuators, Effect, Store, StoreViews, WeakStore};
pub use validation::{AsyncErrors, AsyncValidator, SyncValidator, ValidatorFailure};
