//! Quarry Storage -- minimal key-value stores used as cache tiers.
//!
//! Every backend implements [`KeyValueStore`]: string keys, string values,
//! and optional streaming access. Backends are constructed from URIs through
//! a [`registry::StoreRegistry`] keyed by scheme (`memory:`, `file:`, and
//! object-storage schemes such as `s3://bucket/prefix/`).

use std::fmt;
use std::io::{self, Cursor, Read, Write};

pub mod filesystem;
pub mod memory;
pub mod object;
pub mod registry;
pub mod s3;

pub use filesystem::FileSystemStore;
pub use memory::MemoryStore;
pub use object::{InMemoryObjects, ObjectClient, ObjectStorage};
pub use registry::StoreRegistry;
pub use s3::ObjectStoreClient;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key is not present. Callers treat this as a cache miss.
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// The URI cannot be turned into a store.
    #[error("unsupported storage URI: {0}")]
    UnsupportedUri(String),

    /// The key cannot be stored by this backend.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// The stored payload is not valid UTF-8.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The remote object-store transport failed.
    #[error("remote storage error: {0}")]
    Remote(String),

    /// A local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Returns `true` for the "not found" signal.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for `Result<T, StorageError>`.
pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// A simple key-value store over string keys and string values.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// URI describing this store instance.
    fn uri(&self) -> String;

    /// Returns the value of `key`.
    ///
    /// Fails with [`StorageError::NotFound`] if the key is absent.
    fn get(&self, key: &str) -> StorageResult<String>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Returns `true` if `key` is present.
    fn has(&self, key: &str) -> StorageResult<bool>;

    /// Opens `key` for streaming reads.
    ///
    /// The default implementation reads the whole value through
    /// [`KeyValueStore::get`]; backends with native streaming override it.
    fn reader<'a>(&'a self, key: &str) -> StorageResult<Box<dyn Read + 'a>> {
        let value = self.get(key)?;
        Ok(Box::new(Cursor::new(value.into_bytes())))
    }

    /// Opens `key` for streaming writes.
    ///
    /// Nothing is stored until [`StoreWriter::commit`] is called. The default
    /// implementation buffers in memory and stores through
    /// [`KeyValueStore::set`].
    fn writer<'a>(&'a self, key: &str) -> StorageResult<Box<dyn StoreWriter + 'a>> {
        Ok(Box::new(BufferedWriter::new(self, key)))
    }
}

// ---------------------------------------------------------------------------
// StoreWriter
// ---------------------------------------------------------------------------

/// A writable stream whose content is stored on commit.
///
/// Dropping a writer without committing discards what was written.
pub trait StoreWriter: Write {
    /// Flushes and stores everything written so far.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// Writer that buffers content in memory and stores it with `set`.
pub struct BufferedWriter<'a, S: ?Sized> {
    store: &'a S,
    key: String,
    buffer: Vec<u8>,
}

impl<'a, S: KeyValueStore + ?Sized> BufferedWriter<'a, S> {
    /// Creates a writer for `key` in `store`.
    pub fn new(store: &'a S, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            buffer: Vec::new(),
        }
    }
}

impl<S: KeyValueStore + ?Sized> Write for BufferedWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> StoreWriter for BufferedWriter<'_, S> {
    fn commit(self: Box<Self>) -> StorageResult<()> {
        let BufferedWriter { store, key, buffer } = *self;
        let value = String::from_utf8(buffer)
            .map_err(|e| StorageError::Encoding(format!("{key}: {e}")))?;
        store.set(&key, &value)
    }
}

// ---------------------------------------------------------------------------
// URI helpers
// ---------------------------------------------------------------------------

/// Splits a URI into its lower-cased scheme and the remainder after `:`.
///
/// Returns `None` when the URI has no scheme. Single-letter "schemes" are
/// treated as Windows drive letters, not schemes.
pub fn split_scheme(uri: &str) -> Option<(String, &str)> {
    let (scheme, rest) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let valid = scheme.len() > 1
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then(|| (scheme.to_ascii_lowercase(), rest))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
