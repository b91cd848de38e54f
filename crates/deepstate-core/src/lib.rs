#![forbid(unsafe_code)]

//! deepstate core
//!
//! Leaf crate of the deepstate workspace: the dynamic [`Value`] model, canonical
//! dot [`path`]s, deep cloning, the [`Tracked`] change-tracking view, and the
//! [`ErrorTree`] produced by synchronous validators.
//!
//! Nothing here schedules, validates or snapshots. A [`Tracked`] view only
//! reports `(path, new, old)` to the sink it was built with; the runtime crate
//! decides what a change means.
//!
//! ```
//! use std::{cell::RefCell, rc::Rc};
//! use deepstate_core::{map, Change, ChangeSink, Tracked, Value};
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = Rc::clone(&seen);
//! let sink: ChangeSink = Rc::new(move |c: Change| {
//!     log.borrow_mut().push(c.path);
//!     Ok(())
//! });
//! let root = Tracked::new(Rc::new(RefCell::new(map! { "user" => map! { "name" => "" } })), sink);
//!
//! root.view("user").unwrap().set("name", "ada").unwrap();
//! root.view("user").unwrap().set("name", "ada").unwrap(); // unchanged: not reported
//! assert_eq!(*seen.borrow(), vec!["user.name".to_string()]);
//! ```

pub mod clone;
pub mod error;
pub mod error_tree;
pub mod path;
pub mod tracked;
pub mod value;

pub use clone::deep_clone;
pub use error::StateError;
pub use error_tree::ErrorTree;
pub use tracked::{Change, ChangeSink, Slot, Tracked};
pub use value::{Class, Fields, Method, Object, Opaque, Value};
