#![forbid(unsafe_code)]

//! Dynamic value model for tracked state.
//!
//! A state tree is a [`Value`]: primitives, ordered lists, string-keyed maps,
//! class-backed [`Object`]s, and two opaque kinds ([`Value::Date`] and
//! [`Value::Opaque`]) that the proxy never descends into.
//!
//! # Equality
//!
//! `PartialEq` for `Value` is the proxy's strict equality:
//!
//! | Kind          | Compared by                                 |
//! |---------------|---------------------------------------------|
//! | `Number`      | IEEE `==` (`NaN` is never equal to itself)  |
//! | `Opaque`      | pointer identity of the shared payload      |
//! | `Object`      | class identity, then fields                 |
//! | containers    | structurally                                |
//!
//! Writing `NaN` over `NaN` therefore reports a change. This follows the
//! language's own float equality and is intentional.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use web_time::SystemTime;

use crate::error::StateError;
use crate::path;
use crate::tracked::Tracked;

/// String-keyed fields of a map or object.
pub type Fields = BTreeMap<String, Value>;

/// A dynamically typed node in a state tree.
#[derive(Default)]
pub enum Value {
    /// Absent or explicitly empty.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Ordered sequence. Indices never appear in change paths.
    List(Vec<Value>),
    /// Plain mapping of named fields.
    Map(Fields),
    /// Fields plus behaviour (methods) from a shared [`Class`].
    Object(Object),
    /// Point in time. Opaque: cloned by value, never wrapped.
    Date(SystemTime),
    /// Arbitrary host payload. Opaque: shared by reference, never wrapped.
    Opaque(Opaque),
}

impl Value {
    /// Build a map value from `(key, value)` pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value.
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a class-backed object.
    pub fn object<K, V>(class: &Rc<Class>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Object(Object {
            class: Rc::clone(class),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    /// Wrap an arbitrary payload as an opaque value.
    pub fn opaque<T: Any>(payload: T) -> Self {
        Self::Opaque(Opaque::new(payload))
    }

    /// Short name of this value's kind, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
            Self::Date(_) => "date",
            Self::Opaque(_) => "opaque",
        }
    }

    /// Whether the proxy hands out a nested view for this value.
    ///
    /// Lists, maps and objects are trackable; everything else is returned raw.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_) | Self::Object(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Named fields of a map or object.
    #[must_use]
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Self::Map(fields) => Some(fields),
            Self::Object(obj) => Some(&obj.fields),
            _ => None,
        }
    }

    pub(crate) fn fields_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Self::Map(fields) => Some(fields),
            Self::Object(obj) => Some(&mut obj.fields),
            _ => None,
        }
    }

    /// Field of a map or object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields().and_then(|f| f.get(key))
    }

    /// Downcast an opaque payload.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(op) => op.downcast_ref(),
            _ => None,
        }
    }

    /// Resolve a canonical dot path.
    ///
    /// Paths carry no indices, so crossing a list fans out over every
    /// element and the result is a `List` of the per-element values
    /// (elements lacking the remainder are skipped). The empty path
    /// resolves to `self`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return Some(self.clone());
        }
        let segments: Vec<&str> = path::segments(path).collect();
        lookup_segments(self, &segments)
    }
}

fn lookup_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::List(items) => Some(Value::List(
            items
                .iter()
                .filter_map(|item| lookup_segments(item, segments))
                .collect(),
        )),
        _ => lookup_segments(value.get(head)?, rest),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(fields) => f.debug_map().entries(fields).finish(),
            Self::Object(obj) => fmt::Debug::fmt(obj, f),
            Self::Date(t) => write!(f, "Date({t:?})"),
            Self::Opaque(op) => fmt::Debug::fmt(op, f),
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(n: $ty) -> Self {
                Self::Number(n as f64)
            }
        })*
    };
}

impl_from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<SystemTime> for Value {
    fn from(t: SystemTime) -> Self {
        Self::Date(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Fields> for Value {
    fn from(fields: Fields) -> Self {
        Self::Map(fields)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Build a [`Value::Map`]: `map! { "name" => "", "age" => 3 }`.
#[macro_export]
macro_rules! map {
    () => {
        $crate::Value::Map(::std::collections::BTreeMap::new())
    };
    ($($key:expr => $val:expr),+ $(,)?) => {
        $crate::Value::Map(::std::collections::BTreeMap::from([
            $((::std::string::String::from($key), $crate::Value::from($val))),+
        ]))
    };
}

/// Build a [`Value::List`]: `list![1, 2, 3]`.
#[macro_export]
macro_rules! list {
    ($($val:expr),* $(,)?) => {
        $crate::Value::List(::std::vec![$($crate::Value::from($val)),*])
    };
}

// ---------------------------------------------------------------------------
// Objects and classes
// ---------------------------------------------------------------------------

/// A method invoked with the tracked receiver, so field writes it performs
/// are observed like any other write.
pub type Method = Rc<dyn Fn(&Tracked, &[Value]) -> Result<Value, StateError>>;

/// Behaviour shared by every object of one kind.
///
/// Objects hold their class by `Rc`, and cloning an object keeps the same
/// `Rc`: a clone is the same class by identity and answers the same methods.
pub struct Class {
    name: String,
    methods: BTreeMap<String, Method>,
}

impl Class {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Register a method.
    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Tracked, &[Value]) -> Result<Value, StateError> + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Rc::new(f));
        self
    }

    /// Finish building and share the class.
    #[must_use]
    pub fn build(self) -> Rc<Self> {
        Rc::new(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn lookup(&self, method: &str) -> Option<Method> {
        self.methods.get(method).cloned()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A class-backed record.
pub struct Object {
    pub class: Rc<Class>,
    pub fields: Fields,
}

impl Object {
    #[must_use]
    pub fn is_instance_of(&self, class: &Rc<Class>) -> bool {
        Rc::ptr_eq(&self.class, class)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.class, &other.class) && self.fields == other.fields
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.class.name)?;
        f.debug_map().entries(&self.fields).finish()
    }
}

// ---------------------------------------------------------------------------
// Opaque payloads
// ---------------------------------------------------------------------------

/// A shared payload the state system never looks inside.
///
/// Internal mutation of the payload is invisible; only replacing the whole
/// field is observed.
#[derive(Clone)]
pub struct Opaque {
    payload: Rc<dyn Any>,
    type_name: &'static str,
}

impl Opaque {
    pub fn new<T: Any>(payload: T) -> Self {
        Self {
            payload: Rc::new(payload),
            type_name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque<{}>", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_never_equal_to_itself() {
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_eq!(Value::Number(1.0), Value::from(1));
    }

    #[test]
    fn opaque_compares_by_identity() {
        let a = Value::opaque(vec![1u8, 2, 3]);
        let b = Value::opaque(vec![1u8, 2, 3]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn objects_of_different_classes_differ() {
        let a = Class::new("A").build();
        let b = Class::new("B").build();
        let x = Value::object(&a, [("n", 1)]);
        let y = Value::object(&b, [("n", 1)]);
        assert_ne!(x, y);
        assert_eq!(x, Value::object(&a, [("n", 1)]));
    }

    #[test]
    fn macros_build_nested_values() {
        let v = map! { "user" => map! { "name" => "ada" }, "tags" => list!["a", "b"] };
        assert_eq!(v.lookup("user.name"), Some(Value::from("ada")));
        assert_eq!(v.lookup("tags"), Some(list!["a", "b"]));
        assert_eq!(v.lookup("missing"), None);
    }

    #[test]
    fn lookup_fans_out_across_lists() {
        let v = map! {
            "items" => list![map! { "name" => "a" }, map! { "qty" => 2 }, map! { "name" => "c" }],
        };
        assert_eq!(v.lookup("items.name"), Some(list!["a", "c"]));
    }

    #[test]
    fn trackable_kinds() {
        assert!(map! {}.is_trackable());
        assert!(list![].is_trackable());
        assert!(!Value::from(SystemTime::UNIX_EPOCH).is_trackable());
        assert!(!Value::opaque(3u8).is_trackable());
        assert!(!Value::Null.is_trackable());
    }
}
