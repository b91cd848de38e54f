#![forbid(unsafe_code)]

//! Nested validation results.
//!
//! A synchronous validator returns an [`ErrorTree`] shaped like the fields
//! it checks. Leaves are always strings: empty means valid, anything else is
//! the message to show.

use std::collections::BTreeMap;

use crate::path;

/// Recursive validation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTree {
    Leaf(String),
    Node(BTreeMap<String, ErrorTree>),
}

impl Default for ErrorTree {
    fn default() -> Self {
        Self::Node(BTreeMap::new())
    }
}

impl ErrorTree {
    /// Empty node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A passing leaf.
    #[must_use]
    pub fn valid() -> Self {
        Self::Leaf(String::new())
    }

    /// A leaf carrying `message` (empty = valid).
    pub fn leaf(message: impl Into<String>) -> Self {
        Self::Leaf(message.into())
    }

    /// Add a child under `field`, turning a leaf into a node if needed.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, child: impl Into<ErrorTree>) -> Self {
        self.insert(field, child);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, child: impl Into<ErrorTree>) {
        if let Self::Leaf(_) = self {
            *self = Self::default();
        }
        if let Self::Node(children) = self {
            children.insert(field.into(), child.into());
        }
    }

    /// Subtree at a dot path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ErrorTree> {
        path::segments(path).try_fold(self, |node, segment| match node {
            Self::Node(children) => children.get(segment),
            Self::Leaf(_) => None,
        })
    }

    /// Message of the leaf at `path`, if the path ends on a leaf.
    #[must_use]
    pub fn message_at(&self, path: &str) -> Option<&str> {
        match self.get(path)? {
            Self::Leaf(msg) => Some(msg),
            Self::Node(_) => None,
        }
    }

    /// Whether the leaf at `path` holds a non-empty message.
    #[must_use]
    pub fn has_error_at(&self, path: &str) -> bool {
        self.message_at(path).is_some_and(|m| !m.is_empty())
    }

    /// Whether any leaf anywhere holds a non-empty message.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        match self {
            Self::Leaf(msg) => !msg.is_empty(),
            Self::Node(children) => children.values().any(Self::has_errors),
        }
    }

    /// `(path, message)` for every failing leaf, in path order.
    #[must_use]
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_failures("", &mut out);
        out
    }

    fn collect_failures(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        match self {
            Self::Leaf(msg) if !msg.is_empty() => out.push((prefix.to_owned(), msg.clone())),
            Self::Leaf(_) => {}
            Self::Node(children) => {
                for (field, child) in children {
                    child.collect_failures(&path::join(prefix, field), out);
                }
            }
        }
    }
}

impl From<&str> for ErrorTree {
    fn from(msg: &str) -> Self {
        Self::Leaf(msg.to_owned())
    }
}

impl From<String> for ErrorTree {
    fn from(msg: String) -> Self {
        Self::Leaf(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ErrorTree {
        ErrorTree::new()
            .with("name", "Required")
            .with("address", ErrorTree::new().with("city", "").with("zip", "Bad zip"))
    }

    #[test]
    fn message_lookup_by_path() {
        let tree = sample();
        assert_eq!(tree.message_at("name"), Some("Required"));
        assert_eq!(tree.message_at("address.city"), Some(""));
        assert_eq!(tree.message_at("address"), None);
        assert_eq!(tree.message_at("name.first"), None);
        assert!(tree.has_error_at("address.zip"));
        assert!(!tree.has_error_at("address.city"));
    }

    #[test]
    fn has_errors_ignores_empty_leaves() {
        assert!(sample().has_errors());
        let ok = ErrorTree::new().with("name", "").with("x", ErrorTree::new().with("y", ""));
        assert!(!ok.has_errors());
        assert!(!ErrorTree::default().has_errors());
    }

    #[test]
    fn failures_are_flattened_in_order() {
        assert_eq!(
            sample().failures(),
            vec![
                ("address.zip".to_owned(), "Bad zip".to_owned()),
                ("name".to_owned(), "Required".to_owned()),
            ]
        );
    }

    #[test]
    fn insert_into_leaf_promotes_to_node() {
        let mut tree = ErrorTree::leaf("x");
        tree.insert("a", "b");
        assert_eq!(tree.message_at("a"), Some("b"));
    }
}
