//! Dot-path prop names.
//!
//! Partial reloads address props by dot path (`auth.user.permissions`);
//! the same notation appears in `only` / `except` / `reset` lists and the
//! partial-reload wire headers.

use std::fmt;

/// A validated dot-path prop name.
///
/// Invariants: non-empty, no empty segments (`a..b` and leading/trailing
/// dots are rejected).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct PropPath(String);

impl PropPath {
    /// Parse a dot path, validating segment shape.
    pub fn parse(raw: &str) -> Result<Self, InvalidPropPath> {
        if raw.is_empty() || raw.split('.').any(str::is_empty) {
            return Err(InvalidPropPath {
                raw: raw.to_owned(),
            });
        }
        Ok(Self(raw.to_owned()))
    }

    /// The full dotted form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path's segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The first segment: the top-level prop name this path addresses.
    #[must_use]
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Whether `self` equals `prefix` or descends from it.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0 == prefix.0
            || (self.0.len() > prefix.0.len()
                && self.0.starts_with(&prefix.0)
                && self.0.as_bytes()[prefix.0.len()] == b'.')
    }
}

impl fmt::Display for PropPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for PropPath {
    type Error = InvalidPropPath;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// Error returned when a dot path is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPropPath {
    raw: String,
}

impl fmt::Display for InvalidPropPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid prop path: '{}'", self.raw)
    }
}

impl std::error::Error for InvalidPropPath {}
