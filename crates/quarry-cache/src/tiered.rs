//! Two-tier cache over optional local and remote stores.
//!
//! Execution ids are read local-first and written remote-first; a remote hit
//! is promoted into the local tier. Result payloads live in the local tier
//! only. A missing entry, or a store that fails, reads as a cache miss.

use std::fmt;
use std::sync::Arc;

use quarry_core::ResultSet;
use quarry_storage::{KeyValueStore, StorageError};
use tracing::{debug, info, warn};

use crate::codec::{decode_results, encode_results};
use crate::keys::{execution_key, results_key};
use crate::CacheError;

// ---------------------------------------------------------------------------
// CacheOptions
// ---------------------------------------------------------------------------

/// Cache toggles. They only affect future operations; stored entries stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Master switch. When off the cache is neither read nor written.
    pub enabled: bool,
    /// Whether lookups may be served from the cache.
    pub read: bool,
    /// Whether new entries may be stored.
    pub write: bool,
    /// Whether a cached execution that failed is reused as-is.
    pub cache_failures: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            read: true,
            write: true,
            cache_failures: false,
        }
    }
}

impl CacheOptions {
    /// Options with the cache switched off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn can_read(&self) -> bool {
        self.enabled && self.read
    }

    pub fn can_write(&self) -> bool {
        self.enabled && self.write
    }
}

// ---------------------------------------------------------------------------
// TieredCache
// ---------------------------------------------------------------------------

/// Local and remote cache tiers plus their toggles.
///
/// Cloning is shallow: clones share the underlying stores but own their
/// options.
#[derive(Clone, Default)]
pub struct TieredCache {
    local: Option<Arc<dyn KeyValueStore>>,
    remote: Option<Arc<dyn KeyValueStore>>,
    options: CacheOptions,
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("local", &self.local.as_ref().map(|s| s.uri()))
            .field("remote", &self.remote.as_ref().map(|s| s.uri()))
            .field("options", &self.options)
            .finish()
    }
}

impl TieredCache {
    pub fn new(
        local: Option<Arc<dyn KeyValueStore>>,
        remote: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        Self {
            local,
            remote,
            options: CacheOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    pub fn options_mut(&mut self) -> &mut CacheOptions {
        &mut self.options
    }

    pub fn local(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.local.as_ref()
    }

    pub fn remote(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.remote.as_ref()
    }

    // -- execution ids ------------------------------------------------------

    /// Looks up the cached execution id of `sql` against `database`.
    ///
    /// A hit in the remote tier is copied into the local tier.
    pub fn load_execution_id(&self, database: Option<&str>, sql: &str) -> Option<String> {
        if !self.options.can_read() {
            return None;
        }
        let key = execution_key(database, sql);

        if let Some(local) = &self.local {
            if let Some(execution_id) = read_value(local.as_ref(), &key) {
                info!(store = %local.uri(), %key, %execution_id, "execution loaded from cache");
                return Some(execution_id);
            }
        }

        let remote = self.remote.as_ref()?;
        let execution_id = read_value(remote.as_ref(), &key)?;
        info!(store = %remote.uri(), %key, %execution_id, "execution loaded from cache");
        if let (Some(local), true) = (&self.local, self.options.can_write()) {
            write_value(local.as_ref(), &key, &execution_id);
        }
        Some(execution_id)
    }

    /// Records the execution id of `sql` against `database`, remote tier
    /// first.
    pub fn save_execution_id(&self, database: Option<&str>, sql: &str, execution_id: &str) {
        if !self.options.can_write() {
            return;
        }
        let key = execution_key(database, sql);
        for store in [&self.remote, &self.local].into_iter().flatten() {
            if write_value(store.as_ref(), &key, execution_id) {
                info!(store = %store.uri(), %key, %execution_id, "execution saved to cache");
            }
        }
    }

    // -- results ------------------------------------------------------------

    /// Returns `true` if results of `execution_id` are cached locally.
    pub fn has_results(&self, execution_id: &str) -> bool {
        let Some(local) = self.readable_local() else {
            return false;
        };
        let key = results_key(execution_id);
        match local.has(&key) {
            Ok(found) => found,
            Err(e) => {
                warn!(store = %local.uri(), %key, error = %e, "cache lookup failed");
                false
            }
        }
    }

    /// Loads cached results of `execution_id` from the local tier.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Format`] if the cached payload is corrupt.
    /// Storage failures read as a miss.
    pub fn load_results(&self, execution_id: &str) -> Result<Option<ResultSet>, CacheError> {
        let Some(local) = self.readable_local() else {
            return Ok(None);
        };
        let key = results_key(execution_id);
        let loaded = local
            .reader(&key)
            .map_err(CacheError::from)
            .and_then(decode_results);
        match loaded {
            Ok(results) => {
                info!(store = %local.uri(), %key, rows = results.len(), "results loaded from cache");
                Ok(Some(results))
            }
            Err(CacheError::Storage(StorageError::NotFound { .. })) => {
                debug!(store = %local.uri(), %key, "results cache miss");
                Ok(None)
            }
            Err(CacheError::Storage(e)) => {
                warn!(store = %local.uri(), %key, error = %e, "cache read failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stores results of `execution_id` in the local tier.
    pub fn save_results(&self, execution_id: &str, results: &ResultSet) {
        if !self.options.can_write() {
            return;
        }
        let Some(local) = &self.local else {
            return;
        };
        let key = results_key(execution_id);
        let saved = local.writer(&key).map_err(CacheError::from).and_then(|mut writer| {
            encode_results(results, &mut writer)?;
            writer.commit()?;
            Ok(())
        });
        match saved {
            Ok(()) => {
                info!(store = %local.uri(), %key, rows = results.len(), "results saved to cache");
            }
            Err(e) => warn!(store = %local.uri(), %key, error = %e, "cache write failed"),
        }
    }

    fn readable_local(&self) -> Option<&Arc<dyn KeyValueStore>> {
        if !self.options.can_read() {
            return None;
        }
        self.local.as_ref()
    }
}

/// Reads a value, treating any failure as a miss.
fn read_value(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => Some(value),
        Err(StorageError::NotFound { .. }) => {
            debug!(store = %store.uri(), key, "cache miss");
            None
        }
        Err(e) => {
            warn!(store = %store.uri(), key, error = %e, "cache read failed");
            None
        }
    }
}

/// Writes a value, logging and dropping failures. Returns `true` on success.
fn write_value(store: &dyn KeyValueStore, key: &str, value: &str) -> bool {
    match store.set(key, value) {
        Ok(()) => true,
        Err(e) => {
            warn!(store = %store.uri(), key, error = %e, "cache write failed");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_storage::{InMemoryObjects, MemoryStore, ObjectStorage};

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    fn tiered(local: &Arc<MemoryStore>, remote: &Arc<MemoryStore>) -> TieredCache {
        TieredCache::new(Some(local.clone()), Some(remote.clone()))
    }

    fn sample() -> ResultSet {
        ResultSet::new(
            vec!["x".into()],
            vec!["integer".into()],
            vec![vec![Some("1".into())], vec![None]],
        )
        .unwrap()
    }

    #[test]
    fn save_writes_both_tiers() {
        let (local, remote) = stores();
        let cache = tiered(&local, &remote);
        cache.save_execution_id(Some("db"), "SELECT 1", "exec-1");

        let key = execution_key(Some("db"), "SELECT 1");
        assert_eq!(local.get(&key).unwrap(), "exec-1");
        assert_eq!(remote.get(&key).unwrap(), "exec-1");
        assert_eq!(cache.load_execution_id(Some("db"), "SELECT 1").as_deref(), Some("exec-1"));
        assert_eq!(cache.load_execution_id(None, "SELECT 1"), None);
    }

    #[test]
    fn local_hit_wins() {
        let (local, remote) = stores();
        let key = execution_key(None, "SELECT 1");
        local.set(&key, "local-id").unwrap();
        remote.set(&key, "remote-id").unwrap();
        let cache = tiered(&local, &remote);
        assert_eq!(cache.load_execution_id(None, "SELECT 1").as_deref(), Some("local-id"));
    }

    #[test]
    fn remote_hit_is_promoted() {
        let (local, remote) = stores();
        let key = execution_key(None, "SELECT 1");
        remote.set(&key, "exec-1").unwrap();
        let cache = tiered(&local, &remote);

        assert_eq!(cache.load_execution_id(None, "SELECT 1").as_deref(), Some("exec-1"));
        assert_eq!(local.get(&key).unwrap(), "exec-1");

        // Served from the local tier from now on.
        let local_only = TieredCache::new(Some(local.clone()), None);
        assert_eq!(local_only.load_execution_id(None, "SELECT 1").as_deref(), Some("exec-1"));
    }

    #[test]
    fn no_promotion_when_writes_disabled() {
        let (local, remote) = stores();
        remote.set(&execution_key(None, "SELECT 1"), "exec-1").unwrap();
        let cache = tiered(&local, &remote).with_options(CacheOptions {
            write: false,
            ..CacheOptions::default()
        });
        assert!(cache.load_execution_id(None, "SELECT 1").is_some());
        assert_eq!(local.size(), 0);
    }

    #[test]
    fn toggles_gate_reads_and_writes() {
        let (local, remote) = stores();
        let mut cache = tiered(&local, &remote);

        cache.options_mut().write = false;
        cache.save_execution_id(None, "SELECT 1", "exec-1");
        cache.save_results("exec-1", &sample());
        assert_eq!(local.size() + remote.size(), 0);

        cache.options_mut().write = true;
        cache.save_execution_id(None, "SELECT 1", "exec-1");
        cache.save_results("exec-1", &sample());

        cache.options_mut().read = false;
        assert_eq!(cache.load_execution_id(None, "SELECT 1"), None);
        assert!(!cache.has_results("exec-1"));
        assert_eq!(cache.load_results("exec-1").unwrap(), None);

        *cache.options_mut() = CacheOptions::disabled();
        assert_eq!(cache.load_execution_id(None, "SELECT 1"), None);

        // Entries written earlier survive the toggles.
        *cache.options_mut() = CacheOptions::default();
        assert!(cache.has_results("exec-1"));
    }

    #[test]
    fn results_are_local_only() {
        let (local, remote) = stores();
        let cache = tiered(&local, &remote);
        assert!(!cache.has_results("exec-1"));

        cache.save_results("exec-1", &sample());
        assert!(cache.has_results("exec-1"));
        assert_eq!(cache.load_results("exec-1").unwrap(), Some(sample()));
        assert_eq!(local.keys(), vec!["results-exec-1".to_string()]);
        assert_eq!(remote.size(), 0);
    }

    #[test]
    fn no_tiers_is_always_a_miss() {
        let cache = TieredCache::default();
        cache.save_execution_id(None, "SELECT 1", "exec-1");
        cache.save_results("exec-1", &sample());
        assert_eq!(cache.load_execution_id(None, "SELECT 1"), None);
        assert!(!cache.has_results("exec-1"));
        assert_eq!(cache.load_results("exec-1").unwrap(), None);
    }

    #[test]
    fn corrupt_results_surface_as_format_error() {
        let (local, remote) = stores();
        local.set("results-exec-1", "\"x\"\n\"integer\"\n1\n").unwrap();
        let cache = tiered(&local, &remote);
        assert!(matches!(cache.load_results("exec-1"), Err(CacheError::Format(_))));
    }

    #[test]
    fn failing_remote_reads_as_miss() {
        let objects = Arc::new(InMemoryObjects::new());
        let remote = Arc::new(ObjectStorage::from_uri("s3://bucket/cache/", objects.clone()).unwrap());
        let local = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(Some(local.clone()), Some(remote));

        objects.set_unavailable(true);
        cache.save_execution_id(None, "SELECT 1", "exec-1");
        // The local write still happens after the remote one failed.
        assert_eq!(local.size(), 1);

        let fresh = TieredCache::new(None, cache.remote().cloned());
        assert_eq!(fresh.load_execution_id(None, "SELECT 1"), None);
    }

    #[test]
    fn results_persist_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(quarry_storage::FileSystemStore::new(dir.path()).unwrap());
        TieredCache::new(Some(store), None).save_results("exec-1", &sample());

        let reopened = Arc::new(quarry_storage::FileSystemStore::new(dir.path()).unwrap());
        let cache = TieredCache::new(Some(reopened), None);
        assert!(cache.has_results("exec-1"));
        assert_eq!(cache.load_results("exec-1").unwrap(), Some(sample()));
        assert!(dir.path().join(results_key("exec-1")).is_file());
    }
}
