//! In-memory cursor store for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::Mutex;

use subharvest_types::{Endpoint, QueryKind};

use crate::error::{Result, StateError};
use crate::store::{cursor_key, CursorStore};

/// Hash-map backed store; nothing survives process exit.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, String>>,
}

impl MemoryCursorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn get_cursor(&self, kind: &QueryKind, endpoint: &Endpoint) -> Result<Option<String>> {
        let cursors = self.cursors.lock().map_err(|_| StateError::LockPoisoned)?;
        Ok(cursors.get(&cursor_key(kind, endpoint)).cloned())
    }

    fn set_cursor(&self, kind: &QueryKind, endpoint: &Endpoint, cursor: &str) -> Result<()> {
        let mut cursors = self.cursors.lock().map_err(|_| StateError::LockPoisoned)?;
        cursors.insert(cursor_key(kind, endpoint), cursor.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_before_first_set() {
        let store = MemoryCursorStore::new();
        let got = store
            .get_cursor(&QueryKind::new("tokens"), &Endpoint::new("E1"))
            .unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn set_then_get_roundtrips() {
        let store = MemoryCursorStore::new();
        let kind = QueryKind::new("tokens");
        let ep = Endpoint::new("E1");
        store.set_cursor(&kind, &ep, "0xabc").unwrap();
        assert_eq!(store.get_cursor(&kind, &ep).unwrap().as_deref(), Some("0xabc"));

        store.set_cursor(&kind, &ep, "0xdef").unwrap();
        assert_eq!(store.get_cursor(&kind, &ep).unwrap().as_deref(), Some("0xdef"));
    }

    #[test]
    fn keys_are_isolated() {
        let store = MemoryCursorStore::new();
        store
            .set_cursor(&QueryKind::new("tokens"), &Endpoint::new("E1"), "a")
            .unwrap();
        let other = store
            .get_cursor(&QueryKind::new("swaps"), &Endpoint::new("E1"))
            .unwrap();
        assert!(other.is_none());
    }
}
