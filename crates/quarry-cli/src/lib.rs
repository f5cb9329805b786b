//! Quarry CLI -- command-line tools for the quarry query cache.
//!
//! This crate provides the `quarry` binary: argument parsing, exit code
//! definitions, and the commands that inspect configuration and cached
//! entries without talking to a query engine.

use std::fmt;

pub mod commands;

// ---------------------------------------------------------------------------
// Exit Codes
// ---------------------------------------------------------------------------

/// Quarry process exit codes.
///
/// | Code | Meaning                                        |
/// |------|------------------------------------------------|
/// | 0    | Command completed                              |
/// | 1    | Requested entry missing or query not cacheable |
/// | 2    | Engine or storage error                        |
/// | 4    | Configuration error                            |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    /// Command completed.
    Ok = 0,
    /// The requested cache entry is missing or the statement is not cacheable.
    QueryError = 1,
    /// Engine or storage error.
    EngineError = 2,
    /// Configuration error (invalid YAML, bad environment value).
    ConfigError = 4,
}

impl ExitCode {
    /// Returns the numeric exit code as a `u8`.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns a human-readable description of this exit code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "command completed",
            Self::QueryError => "entry missing or statement not cacheable",
            Self::EngineError => "engine or storage error",
            Self::ConfigError => "configuration error (invalid YAML or environment)",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {} ({})", self.as_u8(), self.description())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}

/// Terminate the process with the given [`ExitCode`].
///
/// Logs the exit reason (info for [`ExitCode::Ok`], error for everything
/// else) and returns the matching [`std::process::ExitCode`] for `main`.
///
/// # Example
///
/// ```rust,no_run
/// use quarry_cli::ExitCode;
///
/// fn main() -> std::process::ExitCode {
///     quarry_cli::terminate(ExitCode::Ok)
/// }
/// ```
pub fn terminate(code: ExitCode) -> std::process::ExitCode {
    match code {
        ExitCode::Ok => {
            tracing::debug!(%code, "quarry exiting");
        }
        _ => {
            tracing::error!(%code, "quarry exiting with error");
        }
    }
    code.into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
