//! Namespace prefixes and composed capability ids.
//!
//! A prefix is any user-supplied string.  It normalizes to a sequence of
//! lowercase ASCII-alphanumeric segments: every other character is a
//! boundary and is dropped, and empty segments disappear.  So
//! `"/Users/Profile-v1/"` becomes `["users", "profile", "v1"]`.
//!
//! Composed ids are the coordinator-visible contract, so they depend only
//! on the declared prefixes and the leaf name, never on registration order.

use std::fmt;

/// Canonical separator between segments of a composed id.
pub const SEPARATOR: char = '_';

/// Normalize a prefix into its segments.
///
/// Idempotent: normalizing the joined output yields the same segments.
pub fn normalize(prefix: &str) -> Vec<String> {
    prefix
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

/// Concatenate segment sequences, outer first.
pub fn compose(outer: &[String], inner: &[String]) -> Vec<String> {
    outer.iter().chain(inner.iter()).cloned().collect()
}

/// Join segments and the leaf name with [`SEPARATOR`].  With no segments
/// the leaf is returned unqualified.
pub fn to_id(segments: &[String], leaf: &str) -> String {
    if segments.is_empty() {
        return leaf.to_string();
    }
    let mut id = segments.join("_");
    id.push(SEPARATOR);
    id.push_str(leaf);
    id
}

/// Map an invocation path tail (`"demo/hello"`) to a capability id
/// (`"demo_hello"`).
pub fn id_from_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// A normalized namespace prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Namespace {
    segments: Vec<String>,
}

impl Namespace {
    /// The empty namespace: ids are used unqualified.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(prefix: &str) -> Self {
        Self {
            segments: normalize(prefix),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// `self` followed by `inner`.
    pub fn nest(&self, inner: &Namespace) -> Namespace {
        Namespace {
            segments: compose(&self.segments, &inner.segments),
        }
    }

    /// Composed id of `leaf` under this namespace.
    pub fn qualify(&self, leaf: &str) -> String {
        to_id(&self.segments, leaf)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("_"))
    }
}
