//! Error taxonomy for one run of the downloader.
//!
//! Only spawn failures are returned as `Err` from the coordinator; every other
//! terminal outcome (timeout, cancellation, non-zero exit) is reported inside
//! the final [`crate::coordinator::ExecutionResult`] so the caller always gets
//! exactly one result per run. Parse anomalies are recovered inside the parser
//! and never reach this type.

use std::time::Duration;

/// Error types for subprocess execution.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn downloader process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("output collection ended early: {0}")]
    Pipe(String),

    #[error("downloader exited with code {code}: {message}")]
    ToolFailure { code: i32, message: String },
}

impl RunError {
    /// Check if this error ends the run before any background task starts.
    pub fn is_pre_start(&self) -> bool {
        matches!(self, RunError::Spawn(_))
    }

    /// Check if this error is absorbed mid-run with degraded information
    /// rather than aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RunError::Pipe(_))
    }

    /// Get error category for programmatic handling.
    pub fn category(&self) -> &'static str {
        match self {
            RunError::Spawn(_) => "SPAWN",
            RunError::Timeout(_) => "TIMEOUT",
            RunError::Cancelled => "CANCELLED",
            RunError::Pipe(_) => "PIPE",
            RunError::ToolFailure { .. } => "TOOL",
        }
    }
}
