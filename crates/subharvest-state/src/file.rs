//! File-based cursor store.
//!
//! Layout: `<root>/metadata/<kind>_<endpoint>.cursor`, each file holding the
//! raw cursor string. A read-through cache keeps hot keys off the disk;
//! existing cursor files are loaded into the cache at construction so a
//! restarted extractor resumes where it left off.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use subharvest_types::{Endpoint, QueryKind};

use crate::error::{Result, StateError};
use crate::store::{cursor_key, CursorStore};

const CURSOR_EXT: &str = "cursor";

/// Cursor store persisting one file per (kind, endpoint) key.
#[derive(Debug)]
pub struct FileCursorStore {
    metadata_dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FileCursorStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the metadata directory cannot be
    /// created or scanned.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let metadata_dir = root.as_ref().join("metadata");
        fs::create_dir_all(&metadata_dir)?;

        let store = Self {
            metadata_dir,
            cache: RwLock::new(HashMap::new()),
        };
        store.load_existing()?;
        Ok(store)
    }

    fn load_existing(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| StateError::LockPoisoned)?;
        for entry in fs::read_dir(&self.metadata_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CURSOR_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(cursor) => {
                    tracing::debug!(key, cursor, "loaded cursor from file");
                    cache.insert(key.to_owned(), cursor);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable cursor file");
                }
            }
        }
        Ok(())
    }

    fn cursor_path(&self, key: &str) -> PathBuf {
        self.metadata_dir.join(format!("{key}.{CURSOR_EXT}"))
    }
}

impl CursorStore for FileCursorStore {
    fn get_cursor(&self, kind: &QueryKind, endpoint: &Endpoint) -> Result<Option<String>> {
        let key = cursor_key(kind, endpoint);
        {
            let cache = self.cache.read().map_err(|_| StateError::LockPoisoned)?;
            if let Some(cursor) = cache.get(&key) {
                return Ok(Some(cursor.clone()));
            }
        }

        match fs::read_to_string(self.cursor_path(&key)) {
            Ok(cursor) => {
                let mut cache = self.cache.write().map_err(|_| StateError::LockPoisoned)?;
                cache.insert(key, cursor.clone());
                Ok(Some(cursor))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_cursor(&self, kind: &QueryKind, endpoint: &Endpoint, cursor: &str) -> Result<()> {
        let key = cursor_key(kind, endpoint);
        fs::write(self.cursor_path(&key), cursor)?;
        let mut cache = self.cache.write().map_err(|_| StateError::LockPoisoned)?;
        cache.insert(key, cursor.to_owned());
        Ok(())
    }
}
