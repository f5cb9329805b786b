//! Opens stores from URIs through factories registered per scheme.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::object::{ObjectClient, ObjectStorage};
use crate::{
    split_scheme, FileSystemStore, KeyValueStore, MemoryStore, ObjectStoreClient, StorageError,
    StorageResult,
};

/// Scheme assumed for URIs that carry none.
pub const DEFAULT_SCHEME: &str = "file";

/// Builds a store from a full URI.
pub type StoreFactory = Arc<dyn Fn(&str) -> StorageResult<Arc<dyn KeyValueStore>> + Send + Sync>;

/// Maps URI schemes to store factories.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl StoreRegistry {
    /// Creates a registry with no schemes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry knowing `memory:`, `file:` and `s3://`.
    ///
    /// `s3://` goes through [`ObjectStoreClient::s3`], configured from the
    /// `AWS_*` environment.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |uri| {
            Ok(Arc::new(MemoryStore::from_uri(uri)?) as Arc<dyn KeyValueStore>)
        });
        registry.register("file", |uri| {
            Ok(Arc::new(FileSystemStore::from_uri(uri)?) as Arc<dyn KeyValueStore>)
        });
        registry.register_object_client("s3", Arc::new(ObjectStoreClient::s3(None)));
        registry
    }

    /// Registers (or replaces) the factory for `scheme`.
    pub fn register<F>(&mut self, scheme: &str, factory: F)
    where
        F: Fn(&str) -> StorageResult<Arc<dyn KeyValueStore>> + Send + Sync + 'static,
    {
        self.factories
            .insert(scheme.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Registers `scheme` as an object-storage scheme served by `client`.
    pub fn register_object_client(&mut self, scheme: &str, client: Arc<dyn ObjectClient>) {
        self.register(scheme, move |uri| {
            Ok(Arc::new(ObjectStorage::from_uri(uri, client.clone())?) as Arc<dyn KeyValueStore>)
        });
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Opens the store described by `uri`.
    ///
    /// URIs without a scheme are handed to the [`DEFAULT_SCHEME`] factory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedUri`] for an unknown scheme, or
    /// whatever the factory reports for a malformed URI.
    pub fn open(&self, uri: &str) -> StorageResult<Arc<dyn KeyValueStore>> {
        let scheme = split_scheme(uri)
            .map(|(scheme, _)| scheme)
            .unwrap_or_else(|| DEFAULT_SCHEME.to_string());
        let factory = self.factories.get(&scheme).ok_or_else(|| {
            StorageError::UnsupportedUri(format!("{uri}: unknown scheme '{scheme}'"))
        })?;
        let store = factory(uri)?;
        debug!(uri = %store.uri(), "opened store");
        Ok(store)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
