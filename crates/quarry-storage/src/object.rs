//! Remote object-storage store: entries are objects under `bucket/prefix`.
//!
//! The wire transport is abstracted behind [`ObjectClient`]. The production
//! transport is [`crate::ObjectStoreClient`]; [`InMemoryObjects`] is an
//! in-process transport for tests that can also simulate an outage.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use url::Url;

use crate::{KeyValueStore, StorageError, StorageResult};

// ---------------------------------------------------------------------------
// ObjectClient
// ---------------------------------------------------------------------------

/// Minimal object-store transport.
pub trait ObjectClient: Send + Sync + fmt::Debug {
    /// Fetches an object body. `Ok(None)` means the object does not exist.
    fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Uploads an object, replacing any existing one.
    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()>;

    /// Returns `true` if the object exists.
    fn head_object(&self, bucket: &str, key: &str) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// ObjectStorage
// ---------------------------------------------------------------------------

/// Store keeping each entry in the object `<prefix><key>` of a bucket.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    client: Arc<dyn ObjectClient>,
    scheme: String,
    bucket: String,
    prefix: String,
}

impl ObjectStorage {
    /// Creates a store over `client`. A non-empty `prefix` loses any leading
    /// `/` and gains a trailing one.
    pub fn new(
        client: Arc<dyn ObjectClient>,
        scheme: &str,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Self> {
        if bucket.is_empty() {
            return Err(StorageError::UnsupportedUri(format!(
                "{scheme}: bucket is required"
            )));
        }
        let mut prefix = prefix.trim_start_matches('/').to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Ok(Self {
            client,
            scheme: scheme.to_ascii_lowercase(),
            bucket: bucket.to_string(),
            prefix,
        })
    }

    /// Creates a store from a URI such as `s3://bucket/prefix/`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedUri`] if the URI does not parse,
    /// has no bucket, or carries a query or fragment.
    pub fn from_uri(uri: &str, client: Arc<dyn ObjectClient>) -> StorageResult<Self> {
        let url = Url::parse(uri)
            .map_err(|e| StorageError::UnsupportedUri(format!("{uri}: {e}")))?;
        if url.query().is_some() || url.fragment().is_some() {
            return Err(StorageError::UnsupportedUri(format!(
                "{uri}: object storage does not support query or fragment"
            )));
        }
        let bucket = url.host_str().unwrap_or_default();
        if bucket.is_empty() {
            return Err(StorageError::UnsupportedUri(format!(
                "{uri}: bucket is required"
            )));
        }
        Self::new(client, url.scheme(), bucket, url.path())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl KeyValueStore for ObjectStorage {
    fn uri(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.bucket, self.prefix)
    }

    fn get(&self, key: &str) -> StorageResult<String> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, "object get");
        let body = self
            .client
            .get_object(&self.bucket, &object_key)?
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        String::from_utf8(body).map_err(|e| StorageError::Encoding(format!("{key}: {e}")))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, size = value.len(), "object put");
        self.client
            .put_object(&self.bucket, &object_key, value.as_bytes().to_vec())
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        self.client.head_object(&self.bucket, &self.object_key(key))
    }
}

// ---------------------------------------------------------------------------
// InMemoryObjects
// ---------------------------------------------------------------------------

/// Object transport backed by a process-local map of `(bucket, key)`.
///
/// Can be switched to "unavailable", in which case every call fails with
/// [`StorageError::Remote`].
#[derive(Debug, Default)]
pub struct InMemoryObjects {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Object keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Remote("object store unavailable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectClient for InMemoryObjects {
    fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.check_available()?;
        self.lock()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    fn head_object(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        self.check_available()?;
        Ok(self
            .lock()
            .contains_key(&(bucket.to_string(), key.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store(uri: &str) -> (Arc<InMemoryObjects>, ObjectStorage) {
        let objects = Arc::new(InMemoryObjects::new());
        let store = ObjectStorage::from_uri(uri, objects.clone()).unwrap();
        (objects, store)
    }

    #[test]
    fn set_get_has_under_prefix() {
        let (objects, store) = store("s3://bucket/cache");
        assert!(!store.has("foo").unwrap());
        store.set("foo", "bar").unwrap();
        assert!(store.has("foo").unwrap());
        assert_eq!(store.get("foo").unwrap(), "bar");
        assert_eq!(objects.keys("bucket"), vec!["cache/foo".to_string()]);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_, store) = store("s3://bucket/");
        assert!(store.get("foo").unwrap_err().is_not_found());
    }

    #[test]
    fn uri_normalizes_prefix() {
        assert_eq!(store("s3://bucket").1.uri(), "s3://bucket/");
        assert_eq!(store("s3://bucket/").1.uri(), "s3://bucket/");
        assert_eq!(store("s3://bucket/a/b").1.uri(), "s3://bucket/a/b/");
        assert_eq!(store("s3://bucket/a/b/").1.prefix(), "a/b/");
        assert_eq!(store("S3://bucket/x").1.uri(), "s3://bucket/x/");
    }

    #[test]
    fn from_uri_rejects_invalid() {
        let objects: Arc<dyn ObjectClient> = Arc::new(InMemoryObjects::new());
        assert!(ObjectStorage::from_uri("s3:///prefix", objects.clone()).is_err());
        assert!(ObjectStorage::from_uri("s3://bucket/p?x=1", objects.clone()).is_err());
        assert!(ObjectStorage::from_uri("s3://bucket/p#frag", objects.clone()).is_err());
        assert!(ObjectStorage::from_uri("not a uri", objects).is_err());
    }

    #[test]
    fn unavailable_transport_is_remote_error() {
        let (objects, store) = store("s3://bucket/cache/");
        store.set("foo", "bar").unwrap();
        objects.set_unavailable(true);
        assert!(matches!(store.get("foo"), Err(StorageError::Remote(_))));
        assert!(matches!(store.set("foo", "x"), Err(StorageError::Remote(_))));
        objects.set_unavailable(false);
        assert_eq!(store.get("foo").unwrap(), "bar");
    }

    #[test]
    fn streaming_uses_default_buffering() {
        use std::io::{Read, Write};

        let (_, store) = store("s3://bucket/cache/");
        let mut writer = store.writer("results-1").unwrap();
        writer.write_all(b"\"a\"\n").unwrap();
        writer.commit().unwrap();

        let mut content = String::new();
        store
            .reader("results-1")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "\"a\"\n");
    }
}
