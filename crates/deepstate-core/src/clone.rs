#![forbid(unsafe_code)]

//! Deep cloning of state trees.
//!
//! `Clone for Value` produces a structurally independent copy:
//!
//! - maps, lists and object fields are cloned recursively (order and length
//!   of lists preserved);
//! - objects keep the *same* `Rc<Class>`, so a clone is an instance of the
//!   original class and answers the same methods;
//! - `Date` is copied by value into a new instance;
//! - `Opaque` payloads are shared by reference. The state system never
//!   observes their internal mutation, so sharing is indistinguishable from
//!   copying for every consumer of snapshots.
//!
//! Owned `Value` trees cannot form cycles, so cloning always terminates.

use std::rc::Rc;

use crate::value::{Object, Value};

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Number(n) => Self::Number(*n),
            Self::String(s) => Self::String(s.clone()),
            Self::List(items) => Self::List(items.iter().map(Value::clone).collect()),
            Self::Map(fields) => Self::Map(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Self::Object(obj) => Self::Object(obj.clone()),
            Self::Date(t) => Self::Date(*t),
            Self::Opaque(op) => Self::Opaque(op.clone()),
        }
    }
}

impl Clone for Object {
    fn clone(&self) -> Self {
        Self {
            class: Rc::clone(&self.class),
            fields: self
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Structurally independent copy of `value`. See the module docs for how
/// each kind is treated.
#[must_use]
pub fn deep_clone(value: &Value) -> Value {
    value.clone()
}
