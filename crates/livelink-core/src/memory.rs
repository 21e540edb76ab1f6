//! Long-term companion memory: a single persisted text record.
//!
//! The engine treats memory as one opaque blob: read whole, write whole,
//! occasionally append a line (voice-profile identities). Backed by Sled for
//! durability with a DashMap hot cache in front, same layering as the rest of
//! the data we keep on disk.

use dashmap::DashMap;
use sled::Db;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Key under which the companion's long-term memory record lives.
pub const MEMORY_KEY: &str = "companion/long_term_memory";

/// Key holding the RFC 3339 timestamp of the last memory sync.
pub const LAST_SYNC_KEY: &str = "companion/last_sync";

/// Errors from the memory layer.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("memory record is not valid UTF-8")]
    Encoding,
}

/// Persistence port for the memory record. The engine only ever needs
/// whole-record get/set/remove; `append_line` is a convenience built on them.
pub trait MemoryStore: Send + Sync {
    /// Read the record at `key`, or `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;

    /// Replace the record at `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), MemoryError>;

    /// Remove the record at `key`. Removing an absent record is not an error.
    fn remove(&self, key: &str) -> Result<(), MemoryError>;

    /// Append a line to the record at `key`, creating it when absent.
    fn append_line(&self, key: &str, line: &str) -> Result<(), MemoryError> {
        let current = self.get(key)?.unwrap_or_default();
        let updated = if current.is_empty() {
            line.to_string()
        } else {
            format!("{current}\n{line}")
        };
        self.set(key, &updated)
    }
}

/// Sled-backed store with an in-memory hot cache. Reads hit the cache first;
/// writes go to both.
pub struct SledMemoryStore {
    db: Db,
    cache: DashMap<String, String>,
}

impl SledMemoryStore {
    /// Opens or creates a Sled database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MemoryError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            cache: DashMap::new(),
        })
    }
}

impl MemoryStore for SledMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        if let Some(v) = self.cache.get(key) {
            return Ok(Some(v.clone()));
        }
        let value = match self.db.get(key.as_bytes())? {
            Some(iv) => {
                let text = String::from_utf8(iv.to_vec()).map_err(|_| MemoryError::Encoding)?;
                self.cache.insert(key.to_string(), text.clone());
                Some(text)
            }
            None => None,
        };
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        self.cache.insert(key.to_string(), value.to_string());
        debug!(key, bytes = value.len(), "memory record written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MemoryError> {
        self.db.remove(key.as_bytes())?;
        self.cache.remove(key);
        debug!(key, "memory record removed");
        Ok(())
    }
}

/// Volatile store for tests and demos; same contract, no disk.
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<String, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        Ok(self.records.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        self.records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MemoryError> {
        self.records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.get(MEMORY_KEY).unwrap().is_none());

        store.set(MEMORY_KEY, "likes chai").unwrap();
        assert_eq!(store.get(MEMORY_KEY).unwrap().as_deref(), Some("likes chai"));

        store.remove(MEMORY_KEY).unwrap();
        assert!(store.get(MEMORY_KEY).unwrap().is_none());
    }

    #[test]
    fn append_line_creates_and_extends() {
        let store = InMemoryStore::new();
        store.append_line(MEMORY_KEY, "VOICE_ID: Asha").unwrap();
        assert_eq!(
            store.get(MEMORY_KEY).unwrap().as_deref(),
            Some("VOICE_ID: Asha")
        );

        store.append_line(MEMORY_KEY, "VOICE_ID: Ravi").unwrap();
        assert_eq!(
            store.get(MEMORY_KEY).unwrap().as_deref(),
            Some("VOICE_ID: Asha\nVOICE_ID: Ravi")
        );
    }

    #[test]
    fn sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = SledMemoryStore::open(dir.path()).unwrap();
            store.set(MEMORY_KEY, "remembers the sangam trip").unwrap();
        }

        let store = SledMemoryStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(MEMORY_KEY).unwrap().as_deref(),
            Some("remembers the sangam trip")
        );
    }

    #[test]
    fn remove_absent_is_ok() {
        let store = InMemoryStore::new();
        assert!(store.remove("nothing/here").is_ok());
    }
}
