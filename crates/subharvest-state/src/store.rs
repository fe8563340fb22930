//! Cursor store trait definition.

use subharvest_types::{Endpoint, QueryKind};

use crate::error;

/// Storage contract for pagination resume markers.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn CursorStore>`. The engine guarantees at most one writer per
/// (kind, endpoint) key within a run, but reads and writes for distinct
/// keys happen concurrently.
pub trait CursorStore: Send + Sync {
    /// Read the last persisted cursor for a (kind, endpoint) pair.
    ///
    /// Returns `Ok(None)` when no cursor has been persisted yet; an empty
    /// string is a legitimate stored value and means "from the beginning".
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn get_cursor(&self, kind: &QueryKind, endpoint: &Endpoint) -> error::Result<Option<String>>;

    /// Upsert the cursor for a (kind, endpoint) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn set_cursor(
        &self,
        kind: &QueryKind,
        endpoint: &Endpoint,
        cursor: &str,
    ) -> error::Result<()>;
}

/// Canonical store key for a (kind, endpoint) pair.
#[must_use]
pub fn cursor_key(kind: &QueryKind, endpoint: &Endpoint) -> String {
    format!("{}_{}", kind.as_str(), endpoint.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn CursorStore) {}
    }

    #[test]
    fn cursor_key_layout() {
        let key = cursor_key(&QueryKind::new("tokens"), &Endpoint::new("E1"));
        assert_eq!(key, "tokens_E1");
    }
}
