//! [`ObjectClient`] over the `object_store` crate (Amazon S3 and compatibles).
//!
//! `object_store` is async; the blocking [`ObjectClient`] calls are driven
//! to completion with [`block_on`], which reuses the ambient tokio runtime
//! when there is one and spins up a current-thread runtime otherwise.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;

use crate::object::ObjectClient;
use crate::{StorageError, StorageResult};

/// Builds the store serving one bucket.
type Connect = dyn Fn(&str) -> StorageResult<Arc<dyn ObjectStore>> + Send + Sync;

// ---------------------------------------------------------------------------
// ObjectStoreClient
// ---------------------------------------------------------------------------

/// Object transport backed by `object_store`, one store per bucket.
///
/// Stores are connected lazily on the first call touching their bucket, so
/// registering the client never reaches the network.
pub struct ObjectStoreClient {
    connect: Box<Connect>,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets: Vec<String> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ObjectStoreClient")
            .field("buckets", &buckets)
            .finish()
    }
}

impl ObjectStoreClient {
    /// Creates a client building each bucket's store with `connect`.
    pub fn new<F>(connect: F) -> Self
    where
        F: Fn(&str) -> StorageResult<Arc<dyn ObjectStore>> + Send + Sync + 'static,
    {
        Self {
            connect: Box::new(connect),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Amazon S3 client configured from the `AWS_*` environment variables.
    ///
    /// `region` overrides `AWS_REGION` / `AWS_DEFAULT_REGION` when given.
    pub fn s3(region: Option<String>) -> Self {
        Self::new(move |bucket| {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = &region {
                builder = builder.with_region(region);
            }
            let store = builder
                .build()
                .map_err(|e| StorageError::Remote(format!("s3://{bucket}: {e}")))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })
    }

    fn store(&self, bucket: &str) -> StorageResult<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }
        let store = (self.connect)(bucket)?;
        debug!(bucket, "connected object store");
        stores.insert(bucket.to_string(), Arc::clone(&store));
        Ok(store)
    }
}

impl ObjectClient for ObjectStoreClient {
    fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let store = self.store(bucket)?;
        let location = Path::from(key);
        block_on(async move {
            match store.get(&location).await {
                Ok(result) => {
                    let bytes = result.bytes().await.map_err(remote)?;
                    Ok(Some(bytes.to_vec()))
                }
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(remote(e)),
            }
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        let store = self.store(bucket)?;
        let location = Path::from(key);
        block_on(async move {
            store
                .put(&location, PutPayload::from(body))
                .await
                .map(|_| ())
                .map_err(remote)
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let store = self.store(bucket)?;
        let location = Path::from(key);
        block_on(async move {
            match store.head(&location).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(remote(e)),
            }
        })
    }
}

fn remote(e: object_store::Error) -> StorageError {
    StorageError::Remote(e.to_string())
}

/// Runs `future` to completion from synchronous code.
///
/// Inside a tokio runtime the future is driven on a scoped helper thread
/// through the runtime handle; blocking the runtime's own thread would
/// deadlock it.
fn block_on<F, T>(future: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>> + Send,
    T: Send,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return std::thread::scope(|scope| -> StorageResult<T> {
            scope
                .spawn(|| handle.block_on(future))
                .join()
                .map_err(|_| StorageError::Remote("object store task panicked".to_string()))?
        });
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
