//! Shared constants for the execution engine.
//!
//! Timeouts and buffer sizes that several modules agree on live here so a
//! change in policy is a one-line edit.

use std::time::Duration;

/// Size of a single raw read from a child process pipe.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long the coordinator waits for the reader task to drain remaining
/// buffered output after the child has exited.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period between the cooperative cancellation signal and a forced kill.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(3);

/// Default per-run timeout when the caller does not specify one.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Sentinel percentage meaning "progress is occurring but total size is
/// unknown". Rendered as a busy indicator, never as a bar position.
pub const INDETERMINATE_PERCENT: i64 = -1;

/// Token the downloader emits for a progress field it cannot fill in.
pub const NOT_AVAILABLE: &str = "NA";

/// Length of a content identifier token in info-extraction lines.
pub const CONTENT_ID_LEN: usize = 11;
