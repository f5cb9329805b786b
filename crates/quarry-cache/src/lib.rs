//! Quarry Cache -- execution-id and result caching over key-value stores.
//!
//! Execution identifiers are cached in both a local and a remote tier so
//! that other processes can reuse a finished execution. Result payloads are
//! cached locally only, serialized in the engine's quoted CSV dialect.

pub mod codec;
pub mod keys;
pub mod tiered;

pub use codec::{decode_results, encode_results};
pub use keys::{execution_key, results_key};
pub use tiered::{CacheOptions, TieredCache};

use quarry_storage::StorageError;

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cached payload is corrupt.
    #[error("cache format error: {0}")]
    Format(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
