#![forbid(unsafe_code)]

//! Store options.
//!
//! [`StateOptions`] gathers every tunable of a [`Store`](crate::Store). The
//! defaults are the behaviour most forms want: validation batched to the
//! next scheduler tick, async checks debounced by 300 ms, four async checks
//! at a time, fifty snapshots of history.
//!
//! With the `config` feature the scalar options can also be loaded as data:
//!
//! ```toml
//! debounce_async_validation_ms = 500
//! max_snapshots = 20
//! persist_action_error = true
//! ```
//!
//! ```rust,ignore
//! let options = StateOptions::from_toml_str(text)?.with_plugin(Rc::new(RedoStack::new()));
//! ```
//!
//! Plugins are code and never part of the loaded data.

#[cfg(feature = "config")]
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::plugin::Plugin;

/// Configuration of a [`Store`](crate::Store).
#[derive(Clone)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct StateOptions {
    /// Clear the dirty map after an action succeeds.
    pub reset_dirty_on_action: bool,

    /// Sync validation delay. `0` batches to the next scheduler tick.
    pub debounce_validation_ms: u64,

    /// Let `execute` start while another action is still running.
    pub allow_concurrent_actions: bool,

    /// Keep the last action error across field changes.
    pub persist_action_error: bool,

    /// Delay between a change and the async validators it triggers.
    pub debounce_async_validation_ms: u64,

    /// Run every async validator once after construction.
    pub run_async_validation_on_init: bool,

    /// Blank the async error of a path as soon as that path changes.
    pub clear_async_errors_on_change: bool,

    /// Async validators allowed to run at the same time.
    pub max_concurrent_async_validations: usize,

    /// History length including the initial snapshot. `0` keeps everything.
    pub max_snapshots: usize,

    /// Emit a debug event for every change and validation pass.
    pub diagnostics: bool,

    /// Plugins, in the order their hooks run.
    #[cfg_attr(feature = "config", serde(skip))]
    pub plugins: Vec<Rc<dyn Plugin>>,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            reset_dirty_on_action: true,
            debounce_validation_ms: 0,
            allow_concurrent_actions: false,
            persist_action_error: false,
            debounce_async_validation_ms: 300,
            run_async_validation_on_init: false,
            clear_async_errors_on_change: true,
            max_concurrent_async_validations: 4,
            max_snapshots: 50,
            diagnostics: false,
            plugins: Vec::new(),
        }
    }
}

impl std::fmt::Debug for StateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugins: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("StateOptions")
            .field("reset_dirty_on_action", &self.reset_dirty_on_action)
            .field("debounce_validation_ms", &self.debounce_validation_ms)
            .field("allow_concurrent_actions", &self.allow_concurrent_actions)
            .field("persist_action_error", &self.persist_action_error)
            .field("debounce_async_validation_ms", &self.debounce_async_validation_ms)
            .field("run_async_validation_on_init", &self.run_async_validation_on_init)
            .field("clear_async_errors_on_change", &self.clear_async_errors_on_change)
            .field(
                "max_concurrent_async_validations",
                &self.max_concurrent_async_validations,
            )
            .field("max_snapshots", &self.max_snapshots)
            .field("diagnostics", &self.diagnostics)
            .field("plugins", &plugins)
            .finish()
    }
}

impl StateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reset_dirty_on_action(mut self, enabled: bool) -> Self {
        self.reset_dirty_on_action = enabled;
        self
    }

    #[must_use]
    pub fn debounce_validation(mut self, delay: Duration) -> Self {
        self.debounce_validation_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn allow_concurrent_actions(mut self, enabled: bool) -> Self {
        self.allow_concurrent_actions = enabled;
        self
    }

    #[must_use]
    pub fn persist_action_error(mut self, enabled: bool) -> Self {
        self.persist_action_error = enabled;
        self
    }

    #[must_use]
    pub fn debounce_async_validation(mut self, delay: Duration) -> Self {
        self.debounce_async_validation_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn run_async_validation_on_init(mut self, enabled: bool) -> Self {
        self.run_async_validation_on_init = enabled;
        self
    }

    #[must_use]
    pub fn clear_async_errors_on_change(mut self, enabled: bool) -> Self {
        self.clear_async_errors_on_change = enabled;
        self
    }

    #[must_use]
    pub fn max_concurrent_async_validations(mut self, limit: usize) -> Self {
        self.max_concurrent_async_validations = limit;
        self
    }

    #[must_use]
    pub fn max_snapshots(mut self, limit: usize) -> Self {
        self.max_snapshots = limit;
        self
    }

    #[must_use]
    pub fn diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Append a plugin; hooks run in the order plugins were added.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Rc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn validation_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_validation_ms)
    }

    pub fn async_validation_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_async_validation_ms)
    }

    /// Problems with the current values. An empty list means usable as-is.
    ///
    /// A concurrency limit of zero would never start a task; the store
    /// treats it as one.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_concurrent_async_validations == 0 {
            problems.push("max_concurrent_async_validations must be at least 1".to_owned());
        }
        if self.max_snapshots == 1 {
            problems.push("max_snapshots = 1 keeps only the initial snapshot".to_owned());
        }
        problems
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(feature = "config")]
impl StateOptions {
    /// Parse from a TOML string. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse from a JSON string. Missing keys keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Failure to load [`StateOptions`] from data.
#[cfg(feature = "config")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
