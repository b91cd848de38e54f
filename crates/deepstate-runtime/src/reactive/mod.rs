#![forbid(unsafe_code)]

//! Reactive status views.
//!
//! - [`Observable`]: shared, version-tracked value with subscribers.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Computed`]: eagerly derived view over one or two observables.
//! - [`BatchScope`]: defers notifications until the outermost scope exits.
//!
//! All of it is single-threaded (`Rc<RefCell<..>>`); a store and its views
//! live on one thread.

pub mod batch;
pub mod computed;
pub mod observable;

pub use batch::BatchScope;
pub use computed::Computed;
pub use observable::{Observable, Subscription};
