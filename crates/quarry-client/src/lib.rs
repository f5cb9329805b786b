//! Quarry Client -- caching, polling query client for asynchronous SQL
//! engines.
//!
//! An [`Engine`] starts statements and reports on them. [`CachingClient`]
//! sits in front of it: cacheable statements are looked up by key before
//! they are submitted, and the [`PollingQuery`] handed back waits for the
//! execution with Fibonacci backoff and caches its results locally.
//! [`Normalizing`] and [`KillOnInterrupt`] wrap any [`QueryClient`] to add
//! SQL normalization and cancel-on-interrupt behaviour.

pub mod backoff;
pub mod client;
pub mod engine;
pub mod query;
pub mod setup;
pub mod sleep;
pub mod testing;
pub mod wrappers;

pub use backoff::{Backoff, BackoffPolicy};
pub use client::{CachingClient, Overrides, QueryClient, SubmitOptions};
pub use engine::{Engine, ExecutionContext};
pub use query::PollingQuery;
pub use setup::setup;
pub use sleep::{CancellationToken, Interrupted, Sleep, ThreadSleep};
pub use wrappers::{KillOnInterrupt, Normalizing};

use quarry_cache::CacheError;
use quarry_core::{QueryFailure, QueryState};

// ---------------------------------------------------------------------------
// QueryError
// ---------------------------------------------------------------------------

/// Error type for query operations.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The execution finished in a state other than success.
    #[error(
        "execution {execution_id} {}{}",
        .state.as_str().to_ascii_lowercase(),
        .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
    )]
    Failed {
        execution_id: String,
        state: QueryState,
        reason: Option<String>,
    },

    /// Waiting was interrupted and the execution was not cancelled.
    #[error("interrupted while waiting for execution {execution_id}")]
    Interrupted { execution_id: String },

    /// The engine could not be reached or rejected a request.
    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<QueryFailure> for QueryError {
    fn from(failure: QueryFailure) -> Self {
        Self::Failed {
            execution_id: failure.execution_id,
            state: failure.state,
            reason: failure.reason,
        }
    }
}

/// Convenience alias for `Result<T, QueryError>`.
pub type QueryResult<T> = Result<T, QueryError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
