#![forbid(unsafe_code)]

//! Canonical dot paths.
//!
//! A path names a location by field names only: `user.address.city`.
//! List indices are never part of a path, so every element of `items`
//! reports under `items` and a field of an element under `items.name`.

/// Append `field` to `prefix`.
#[must_use]
pub fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_owned()
    } else {
        format!("{prefix}.{field}")
    }
}

/// Field names of a path, outermost first.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// Every prefix of `path`, including `path` itself, shortest first.
///
/// `ancestors("a.b.c")` yields `a`, `a.b`, `a.b.c`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('.')
        .map(move |(i, _)| &path[..i])
        .chain((!path.is_empty()).then_some(path))
}

/// Whether `ancestor` is a strict prefix of `path` on a segment boundary.
#[must_use]
pub fn is_strict_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

/// Whether a change at `changed` concerns a watcher registered at `key`:
/// same path, a parent of it, or a child of it.
#[must_use]
pub fn related(key: &str, changed: &str) -> bool {
    key == changed || is_strict_ancestor(key, changed) || is_strict_ancestor(changed, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_skips_empty_prefix() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a.b", "c"), "a.b.c");
    }

    #[test]
    fn ancestors_shortest_first() {
        assert_eq!(ancestors("a.b.c").collect::<Vec<_>>(), vec!["a", "a.b", "a.b.c"]);
        assert_eq!(ancestors("a").collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(ancestors("").count(), 0);
    }

    #[test]
    fn ancestry_respects_segment_boundaries() {
        assert!(is_strict_ancestor("user", "user.name"));
        assert!(!is_strict_ancestor("user", "username"));
        assert!(!is_strict_ancestor("user", "user"));
        assert!(is_strict_ancestor("", "user"));
    }

    #[test]
    fn related_matches_both_directions() {
        assert!(related("user", "user.name"));
        assert!(related("user.name", "user"));
        assert!(related("user", "user"));
        assert!(!related("user.name", "user.age"));
        assert!(!related("user", "username"));
    }
}
