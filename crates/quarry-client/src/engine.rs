//! The execution engine collaborator.

use std::fmt;

use quarry_core::{ExecutionInfo, ResultSet};

use crate::QueryResult;

/// Where and how statements are executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Default database for unqualified table names.
    pub database: Option<String>,
    /// Engine workgroup to run in.
    pub workgroup: Option<String>,
    /// Location the engine writes results to.
    pub output_location: Option<String>,
}

/// An asynchronous SQL engine.
///
/// Implementations talk to the remote service and own its pagination and
/// retry concerns. Failures are reported as [`crate::QueryError::Engine`].
/// A status read right after a cancellation may still report the previous
/// state.
pub trait Engine: Send + Sync + fmt::Debug {
    /// Starts executing `sql` and returns the execution handle.
    fn submit(&self, sql: &str, context: &ExecutionContext) -> QueryResult<String>;

    /// Reads the current status of an execution.
    fn status(&self, execution_id: &str) -> QueryResult<ExecutionInfo>;

    /// Downloads all results of a succeeded execution.
    fn fetch_results(&self, execution_id: &str) -> QueryResult<ResultSet>;

    /// Requests cancellation of an execution.
    fn cancel(&self, execution_id: &str) -> QueryResult<()>;
}
