//! # Noutaja
//!
//! Noutaja (Finnish for retriever) is a subprocess execution and streaming
//! output-parsing engine for media downloaders in the yt-dlp family.
//!
//! ## Core Mission
//!
//! Launch the downloader as a child process, capture its interleaved
//! stdout/stderr in real time, classify and parse each output line into a
//! structured progress model, and deliver exactly one terminal result per
//! run — while supporting cooperative cancellation and hard timeouts.
//!
//! ## Key Functional Requirements
//!
//! - **Streaming capture**: both pipes are drained concurrently in chunks;
//!   a per-stream decoder makes the line sequence independent of where the
//!   OS happens to split reads, even inside multi-byte UTF-8 characters.
//! - **Line classification**: each decoded line gets one category (progress
//!   token, error, destination, post-processing, ...) by first match in a
//!   fixed precedence order; anything unrecognized degrades to `Unknown`.
//! - **Progress model**: a forward-monotonic state machine from
//!   `Initializing` to one of `Completed`/`Failed`/`Cancelled`, with
//!   percentage, humanized status, tracked output files, and content id.
//! - **Two-phase cancellation**: cooperative interrupt first so the tool can
//!   rename its partial files, forced kill after a grace period.
//! - **Exactly one result**: only spawn failures surface as `Err`; timeout,
//!   cancellation, and tool failure are all reported inside the final
//!   [`ExecutionResult`].
//!
//! ## Modules
//!
//! - **`spec`**: Immutable description of one downloader invocation.
//! - **`controller`**: Child process lifecycle (spawn, cancel, kill, reap).
//! - **`decoder`**: Chunk-boundary-safe byte-to-line decoding.
//! - **`classifier`**: Line-to-category pattern matching.
//! - **`progress`**: The shared progress model and its parser.
//! - **`output_buffer`**: Append-only transcript of all decoded output.
//! - **`reader`**: The per-run task that drains both pipes.
//! - **`sink`**: Progress event delivery (channel, log, or no-op).
//! - **`coordinator`**: Orchestrates a full run into one result.
//! - **`error`**: The run error taxonomy.
//! - **`logging`**: `tracing` subscriber setup.
//!
//! ## Usage
//!
//! ```no_run
//! use noutaja::{CommandSpec, ExecutionCoordinator, RunOptions};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let spec = CommandSpec::new("yt-dlp")
//!     .arg("--newline")
//!     .args(["--progress-template", "download:%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.speed)s|%(progress.eta)s"])
//!     .arg("https://example.com/watch?v=dQw4w9WgXcQ");
//! let coordinator = ExecutionCoordinator::new();
//! let result = coordinator.run(spec, RunOptions::default()).await?;
//! println!("success: {} ({:?})", result.success, result.final_file);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod constants;
pub mod controller;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod output_buffer;
pub mod progress;
pub mod reader;
pub mod sink;
pub mod spec;

pub use classifier::{LineClass, LineClassifier};
pub use controller::{HandleStatus, ProcessController, ProcessHandle};
pub use coordinator::{ExecutionCoordinator, ExecutionResult, RunHandle, RunOptions};
pub use decoder::LineDecoder;
pub use error::RunError;
pub use output_buffer::OutputBuffer;
pub use progress::{
    DownloadProgress, DownloadState, FileKind, ProgressParser, TrackedFile,
};
pub use reader::OutputReaderLoop;
pub use sink::{ProgressEvent, ProgressSink, channel_sink, logging_sink, no_sink};
pub use spec::CommandSpec;
