//! In-memory store, mostly useful for tests and short-lived sessions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{split_scheme, KeyValueStore, StorageError, StorageResult};

/// Store keeping all entries in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store from a `memory:` URI.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedUri`] for any other scheme, or if
    /// the URI carries a host, path, query or fragment.
    pub fn from_uri(uri: &str) -> StorageResult<Self> {
        match split_scheme(uri) {
            Some((scheme, rest)) if scheme == "memory" => {
                if !rest.is_empty() {
                    return Err(StorageError::UnsupportedUri(format!(
                        "{uri}: superfluous component"
                    )));
                }
                Ok(Self::new())
            }
            _ => Err(StorageError::UnsupportedUri(format!(
                "{uri}: not a memory scheme"
            ))),
        }
    }

    /// Number of stored entries.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // Entries are plain strings; a panic mid-insert cannot corrupt them.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn uri(&self) -> String {
        "memory:".to_string()
    }

    fn get(&self, key: &str) -> StorageResult<String> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        debug!(key, size = value.len(), "memory store set");
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.lock().contains_key(key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_has() {
        let store = MemoryStore::new();
        assert!(!store.has("foo").unwrap());
        store.set("foo", "bar").unwrap();
        assert!(store.has("foo").unwrap());
        assert_eq!(store.get("foo").unwrap(), "bar");
        assert_eq!(store.size(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("foo").unwrap_err();
        assert!(matches!(err, StorageError::NotFound { ref key } if key == "foo"));
    }

    #[test]
    fn overwrite_existing_key() {
        let store = MemoryStore::new();
        store.set("foo", "one").unwrap();
        store.set("foo", "two").unwrap();
        assert_eq!(store.get("foo").unwrap(), "two");
        assert_eq!(store.keys(), vec!["foo".to_string()]);
    }

    #[test]
    fn from_uri() {
        let store = MemoryStore::from_uri("memory:").unwrap();
        assert_eq!(store.uri(), "memory:");
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn from_uri_rejects_extra_components() {
        assert!(MemoryStore::from_uri("memory://host").is_err());
        assert!(MemoryStore::from_uri("memory:path").is_err());
        assert!(MemoryStore::from_uri("file:/tmp").is_err());
    }
}
