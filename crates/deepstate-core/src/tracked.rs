#![forbid(unsafe_code)]

//! Change-tracking views over a shared state tree.
//!
//! A [`Tracked`] is a cheap handle onto one location inside a tree held in
//! `Rc<RefCell<Value>>`. Reads hand out raw values for primitives and opaque
//! kinds and fresh nested views for containers. Every write compares the
//! incoming value with the stored one and, only when they differ, reports a
//! [`Change`] to the shared [`ChangeSink`].
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one performs the write and
//!    reports nothing. This is what stops cascades of effects that re-assign
//!    the values they observe.
//! 2. A change is reported synchronously, after the write and before the
//!    writing call returns. Sequential writes report in write order.
//! 3. Reported paths carry field names only: an element write inside
//!    `items` reports `items`, a field of an element reports `items.name`.
//! 4. The tree is never borrowed while the sink runs, so sinks may read and
//!    write through any view.
//!
//! # Failure Modes
//!
//! - **Write inside [`Tracked::with`]**: the closure holds a shared borrow of
//!   the tree; writing from inside it panics (`RefCell` rules).
//! - **Stale view**: a view onto a list element outlives the element. Later
//!   operations return [`StateError::StaleView`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::StateError;
use crate::path;
use crate::value::{Fields, Value};

/// One reported mutation.
#[derive(Clone)]
pub struct Change {
    /// Canonical path of the written location.
    pub path: String,
    pub new_value: Value,
    pub old_value: Value,
    /// Root view of the tree the change happened in.
    pub root: Tracked,
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("path", &self.path)
            .field("new_value", &self.new_value)
            .field("old_value", &self.old_value)
            .finish_non_exhaustive()
    }
}

/// Receiver of changes. An `Err` is handed back to the writer.
pub type ChangeSink = Rc<dyn Fn(Change) -> Result<(), StateError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(usize),
}

/// Result of reading one field through a view.
#[derive(Debug, Clone)]
pub enum Slot {
    /// Primitive, null or opaque value, returned as-is.
    Raw(Value),
    /// Nested container, wrapped so writes through it are tracked.
    View(Tracked),
}

impl Slot {
    /// Raw value, or `None` for a nested view.
    #[must_use]
    pub fn into_raw(self) -> Option<Value> {
        match self {
            Self::Raw(v) => Some(v),
            Self::View(_) => None,
        }
    }

    #[must_use]
    pub fn into_view(self) -> Option<Tracked> {
        match self {
            Self::View(v) => Some(v),
            Self::Raw(_) => None,
        }
    }
}

/// A tracked view onto one container inside a shared state tree.
#[derive(Clone)]
pub struct Tracked {
    root: Rc<RefCell<Value>>,
    sink: ChangeSink,
    location: Rc<[Step]>,
    path: String,
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("path", &self.path)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Tracked {
    /// Root view over `root`, reporting to `sink`.
    pub fn new(root: Rc<RefCell<Value>>, sink: ChangeSink) -> Self {
        Self {
            root,
            sink,
            location: Rc::from(Vec::new()),
            path: String::new(),
        }
    }

    /// Canonical path of this view (empty for the root).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A root view sharing this view's tree and sink.
    #[must_use]
    pub fn root(&self) -> Tracked {
        Self::new(Rc::clone(&self.root), Rc::clone(&self.sink))
    }

    /// Whether two views share the same underlying tree.
    #[must_use]
    pub fn same_tree(&self, other: &Tracked) -> bool {
        Rc::ptr_eq(&self.root, &other.root)
    }

    /// Borrow this view's value without cloning.
    ///
    /// Writing through any view from inside `f` panics.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> Result<R, StateError> {
        let root = self.root.borrow();
        let value = resolve(&root, &self.location).ok_or_else(|| self.stale())?;
        Ok(f(value))
    }

    /// Clone of this view's value.
    pub fn to_value(&self) -> Result<Value, StateError> {
        self.with(Value::clone)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read a field of a map or object view.
    ///
    /// Returns `None` when the field is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Slot> {
        let trackable = self
            .with(|v| v.get(key).map(|child| (child.is_trackable(), child.clone())))
            .ok()
            .flatten()?;
        Some(match trackable {
            (true, _) => Slot::View(self.child(Step::Field(key.to_owned()), path::join(&self.path, key))),
            (false, raw) => Slot::Raw(raw),
        })
    }

    /// Raw clone of a field, whatever its kind.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        self.with(|v| v.get(key).cloned()).ok().flatten()
    }

    /// Nested view for a container field.
    pub fn view(&self, key: &str) -> Result<Tracked, StateError> {
        self.get(key)
            .and_then(Slot::into_view)
            .ok_or_else(|| StateError::NotTrackable {
                path: path::join(&self.path, key),
            })
    }

    /// Read an element of a list view.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<Slot> {
        let (trackable, raw) = self
            .with(|v| {
                v.as_list()
                    .and_then(|items| items.get(index))
                    .map(|item| (item.is_trackable(), item.clone()))
            })
            .ok()
            .flatten()?;
        Some(if trackable {
            // Elements share the list's path.
            Slot::View(self.child(Step::Index(index), self.path.clone()))
        } else {
            Slot::Raw(raw)
        })
    }

    /// Nested view for a container element of a list view.
    pub fn item_view(&self, index: usize) -> Result<Tracked, StateError> {
        self.item(index)
            .and_then(Slot::into_view)
            .ok_or_else(|| StateError::NotTrackable {
                path: self.path.clone(),
            })
    }

    /// Length of a list view.
    pub fn len(&self) -> Result<usize, StateError> {
        self.with(|v| v.as_list().map(<[Value]>::len))?
            .ok_or_else(|| self.not_a_list())
    }

    /// Whether a list view is empty.
    pub fn is_empty(&self) -> Result<bool, StateError> {
        self.len().map(|n| n == 0)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write a field of a map or object view.
    ///
    /// Returns `Ok(true)` when the value changed and was reported,
    /// `Ok(false)` when it was equal to the stored value.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool, StateError> {
        let new_value = value.into();
        let old_value = {
            let mut root = self.root.borrow_mut();
            let target = resolve_mut(&mut root, &self.location).ok_or_else(|| self.stale())?;
            let kind = target.kind();
            let fields: &mut Fields = target.fields_mut().ok_or_else(|| StateError::NotAContainer {
                path: self.path.clone(),
                kind,
            })?;
            let slot = fields.entry(key.to_owned()).or_default();
            let old = std::mem::replace(slot, new_value.clone());
            if old == new_value {
                return Ok(false);
            }
            old
        };
        self.report(path::join(&self.path, key), new_value, old_value)?;
        Ok(true)
    }

    /// Replace an element of a list view. Reports under the list's path.
    pub fn set_item(&self, index: usize, value: impl Into<Value>) -> Result<bool, StateError> {
        let new_value = value.into();
        let old_value = {
            let mut root = self.root.borrow_mut();
            let items = self.list_mut(&mut root)?;
            let len = items.len();
            let slot = items.get_mut(index).ok_or_else(|| StateError::IndexOutOfRange {
                path: self.path.clone(),
                index,
                len,
            })?;
            let old = std::mem::replace(slot, new_value.clone());
            if old == new_value {
                return Ok(false);
            }
            old
        };
        self.report(self.path.clone(), new_value, old_value)?;
        Ok(true)
    }

    /// Append to a list view. Reports the whole list before and after.
    pub fn push(&self, value: impl Into<Value>) -> Result<(), StateError> {
        let value = value.into();
        self.splice_list(|items| {
            items.push(value);
            Ok(())
        })
    }

    /// Insert into a list view at `index` (`index <= len`).
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), StateError> {
        let value = value.into();
        let path = self.path.clone();
        self.splice_list(move |items| {
            if index > items.len() {
                return Err(StateError::IndexOutOfRange {
                    path,
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, value);
            Ok(())
        })
    }

    /// Remove and return the element at `index` of a list view.
    pub fn remove(&self, index: usize) -> Result<Value, StateError> {
        let path = self.path.clone();
        let mut removed = Value::Null;
        self.splice_list(|items| {
            if index >= items.len() {
                return Err(StateError::IndexOutOfRange {
                    path,
                    index,
                    len: items.len(),
                });
            }
            removed = items.remove(index);
            Ok(())
        })?;
        Ok(removed)
    }

    /// Call a method of an object view with this view as the receiver.
    ///
    /// Writes the method performs through the receiver are tracked exactly
    /// like writes made directly.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value, StateError> {
        let found = self
            .with(|v| match v {
                Value::Object(obj) => obj.class.lookup(method),
                _ => None,
            })?
            .ok_or_else(|| StateError::NoSuchMethod {
                path: self.path.clone(),
                method: method.to_owned(),
            })?;
        found(self, args)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn child(&self, step: Step, path: String) -> Tracked {
        let mut location = self.location.to_vec();
        location.push(step);
        Tracked {
            root: Rc::clone(&self.root),
            sink: Rc::clone(&self.sink),
            location: Rc::from(location),
            path,
        }
    }

    fn report(&self, path: String, new_value: Value, old_value: Value) -> Result<(), StateError> {
        tracing::trace!(target: "deepstate.tracked", path = %path, "change");
        (self.sink)(Change {
            path,
            new_value,
            old_value,
            root: self.root(),
        })
    }

    fn list_mut<'a>(&self, root: &'a mut Value) -> Result<&'a mut Vec<Value>, StateError> {
        let target = resolve_mut(root, &self.location).ok_or_else(|| self.stale())?;
        let kind = target.kind();
        match target {
            Value::List(items) => Ok(items),
            _ => Err(StateError::NotAList {
                path: self.path.clone(),
                kind,
            }),
        }
    }

    /// Apply a structural list edit and report the list as a whole.
    fn splice_list(
        &self,
        edit: impl FnOnce(&mut Vec<Value>) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        let (old_value, new_value) = {
            let mut root = self.root.borrow_mut();
            let items = self.list_mut(&mut root)?;
            let before = Value::List(items.clone());
            edit(items)?;
            (before, Value::List(items.clone()))
        };
        if old_value != new_value {
            self.report(self.path.clone(), new_value, old_value)?;
        }
        Ok(())
    }

    fn stale(&self) -> StateError {
        StateError::StaleView {
            path: self.path.clone(),
        }
    }

    fn not_a_list(&self) -> StateError {
        StateError::NotAList {
            path: self.path.clone(),
            kind: self.with(Value::kind).unwrap_or("missing"),
        }
    }
}

fn resolve<'a>(mut value: &'a Value, location: &[Step]) -> Option<&'a Value> {
    for step in location {
        value = match (step, value) {
            (Step::Field(key), _) => value.get(key)?,
            (Step::Index(i), Value::List(items)) => items.get(*i)?,
            (Step::Index(_), _) => return None,
        };
    }
    Some(value)
}

fn resolve_mut<'a>(mut value: &'a mut Value, location: &[Step]) -> Option<&'a mut Value> {
    for step in location {
        value = match step {
            Step::Field(key) => value.fields_mut()?.get_mut(key)?,
            Step::Index(i) => match value {
                Value::List(items) => items.get_mut(*i)?,
                _ => return None,
            },
        };
    }
    Some(value)
}
