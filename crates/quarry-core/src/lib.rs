//! Quarry Core -- shared types, configuration, and logging.
//!
//! This crate defines the types that flow between the storage, cache, and
//! client layers of quarry: execution lifecycle states, execution metadata
//! snapshots, tabular result sets, and the SQL helpers that decide whether a
//! statement may be cached at all.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod results;
pub mod sql;

pub use results::{ResultSet, Row};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Top-level error type for the quarry-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A result set violated its shape invariant.
    #[error("format error: {0}")]
    Format(String),

    /// Tracing/logging initialization failed.
    #[error("tracing initialization error: {0}")]
    TracingInit(String),
}

/// Convenience alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Tracing / Logging
// ---------------------------------------------------------------------------

/// Initialize structured tracing with the given verbosity level.
///
/// # Behaviour
///
/// | `verbose` | `quiet` | `json_output` | Effect                           |
/// |-----------|---------|---------------|----------------------------------|
/// | `true`    | _       | _             | DEBUG level                      |
/// | _         | `true`  | _             | ERROR level only                 |
/// | `false`   | `false` | _             | INFO level (default)             |
/// | _         | _       | `true`        | JSON-formatted log lines         |
/// | _         | _       | `false`       | Human-readable, compact lines    |
///
/// The `RUST_LOG` environment variable, when set, takes precedence over the
/// programmatic level selection.
///
/// # Errors
///
/// Returns [`CoreError::TracingInit`] if the global subscriber has already been
/// set.
pub fn init_tracing(verbose: bool, quiet: bool, json_output: bool) -> Result<(), CoreError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    } else {
        fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// QueryState
// ---------------------------------------------------------------------------

/// Lifecycle state of one query execution, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryState {
    /// Accepted by the engine but not started yet.
    #[serde(alias = "QUEUED")]
    Pending,
    /// Executing.
    Running,
    /// Finished successfully; results can be fetched.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled before it could finish.
    Cancelled,
}

impl QueryState {
    /// Returns `true` for states from which no further transition occurs.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns the upper-case label used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(CoreError::Format(format!("unknown query state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// QueryFailure
// ---------------------------------------------------------------------------

/// A query execution that reached a terminal state other than success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    /// Handle of the failed execution.
    pub execution_id: String,
    /// Terminal state (`Failed` or `Cancelled`).
    pub state: QueryState,
    /// Engine-provided reason, when there is one.
    pub reason: Option<String>,
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.as_str().to_ascii_lowercase();
        match &self.reason {
            Some(reason) => write!(f, "query {state}: {reason}"),
            None => write!(f, "query {state}"),
        }
    }
}

impl std::error::Error for QueryFailure {}

// ---------------------------------------------------------------------------
// ExecutionInfo
// ---------------------------------------------------------------------------

/// Price charged by the engine per terabyte scanned, in dollars.
const PRICE_PER_TB: f64 = 5.0;

/// Snapshot of execution metadata returned by an engine status call.
///
/// A snapshot in a terminal state never changes and may be kept for the
/// lifetime of the query that requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Opaque execution handle issued by the engine.
    pub execution_id: String,
    /// Statement text as executed.
    pub sql: String,
    /// Target database, if one was given at submission.
    pub database: Option<String>,
    /// Current lifecycle state.
    pub state: QueryState,
    /// Reason for a failure or cancellation.
    pub state_reason: Option<String>,
    /// Where the engine stored the results.
    pub output_location: Option<String>,
    /// Bytes scanned so far.
    pub scanned_bytes: u64,
    /// Total execution time so far.
    pub execution_time: Duration,
}

impl ExecutionInfo {
    /// Creates a snapshot with empty statistics.
    pub fn new(execution_id: impl Into<String>, sql: impl Into<String>, state: QueryState) -> Self {
        Self {
            execution_id: execution_id.into(),
            sql: sql.into(),
            database: None,
            state,
            state_reason: None,
            output_location: None,
            scanned_bytes: 0,
            execution_time: Duration::ZERO,
        }
    }

    /// Returns `true` once the execution reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns `true` if the execution finished successfully.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.state == QueryState::Succeeded
    }

    /// Approximate price of the execution in dollars.
    #[must_use]
    pub fn approx_price(&self) -> f64 {
        PRICE_PER_TB * self.scanned_bytes as f64 / 1e12
    }

    /// Fails if the execution finished in any state other than success.
    ///
    /// Unfinished executions pass; callers decide whether to keep waiting.
    pub fn check(&self) -> Result<(), QueryFailure> {
        if self.is_finished() && !self.is_succeeded() {
            return Err(QueryFailure {
                execution_id: self.execution_id.clone(),
                state: self.state,
                reason: self.state_reason.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ExecutionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, scanned {} in {}, approx. price {}",
            self.state,
            format_size(self.scanned_bytes),
            format_time(self.execution_time),
            format_price(self.approx_price()),
        )
    }
}

/// Formats a byte count with decimal prefixes (1 kB = 1000 B).
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64;
    let mut prefix = "";
    for p in ["k", "M", "G", "T"] {
        value /= 1000.0;
        prefix = p;
        if value < 1000.0 {
            break;
        }
    }
    format!("{value:.2}{prefix}B")
}

/// Formats a duration as seconds below one minute, minutes and seconds above.
#[must_use]
pub fn format_time(duration: Duration) -> String {
    if duration < Duration::from_secs(60) {
        return format!("{:.1}s", duration.as_secs_f64());
    }
    let secs = duration.as_secs();
    format!("{}min {}s", secs / 60, secs % 60)
}

/// Formats a price in dollars, or in cents below one dollar.
#[must_use]
pub fn format_price(dollars: f64) -> String {
    if dollars > 1.0 {
        format!("${dollars:.2}")
    } else {
        format!("{:.2}¢", dollars * 100.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
