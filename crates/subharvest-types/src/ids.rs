//! Identifier newtypes.
//!
//! An [`Endpoint`] is an opaque subgraph deployment id; the transport turns
//! it into a gateway URL. A [`QueryKind`] names a logical entity type
//! (`tokens`, `swaps`, ...) and doubles as the top-level response field, a
//! cursor-key component, and a topic segment.

use serde::{Deserialize, Serialize};

/// Opaque subgraph deployment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// Create a new endpoint identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for Endpoint {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Logical entity type extracted from a subgraph (e.g. `"tokens"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKind(String);

impl QueryKind {
    /// Create a new query kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for QueryKind {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}
