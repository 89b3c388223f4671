//! Top-level orchestration of one downloader run.
//!
//! ## Core Components
//!
//! - [`ExecutionCoordinator`]: spawns the child, runs the reader task, applies
//!   the timeout and cancellation policy, and folds everything into exactly
//!   one [`ExecutionResult`].
//! - [`RunHandle`]: returned by [`ExecutionCoordinator::spawn`] for callers
//!   that want to poll progress or cancel mid-run.
//!
//! Only a spawn failure is an `Err`; every post-spawn outcome (success,
//! non-zero exit, timeout, cancellation) is reported inside the result so a
//! caller always receives one terminal report per run.

use crate::constants::DRAIN_TIMEOUT;
use crate::controller::ProcessController;
use crate::error::RunError;
use crate::output_buffer::OutputBuffer;
use crate::progress::{DownloadProgress, ProgressParser, RunVerdict, TrackedFile};
use crate::reader::OutputReaderLoop;
use crate::sink::{ProgressEvent, ProgressSink};
use crate::spec::CommandSpec;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Terminal report for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Full decoded transcript, stdout and stderr interleaved by arrival.
    pub output: String,
    pub error_message: Option<String>,
    /// Command line plus transcript, populated only on failure.
    pub diagnostics: Option<String>,
    pub content_id: Option<String>,
    pub final_file: Option<std::path::PathBuf>,
    pub tracked_files: Vec<TrackedFile>,
}

/// Per-run knobs beyond the command itself.
pub struct RunOptions {
    pub sink: Option<Arc<dyn ProgressSink>>,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sink: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Handle for a run started with [`ExecutionCoordinator::spawn`].
pub struct RunHandle {
    progress: Arc<Mutex<DownloadProgress>>,
    cancel: CancellationToken,
    join: JoinHandle<Result<ExecutionResult, RunError>>,
}

impl RunHandle {
    /// Request cooperative cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of the live progress model.
    pub fn progress_snapshot(&self) -> DownloadProgress {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for the run to finish and take its result.
    pub async fn wait(self) -> Result<ExecutionResult, RunError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(RunError::Pipe(format!("run task failed: {err}"))),
        }
    }
}

/// Orchestrates spawn, drain, timeout, cancellation, and result assembly.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCoordinator {
    controller: ProcessController,
}

impl ExecutionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cancel grace period for every run this coordinator starts.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.controller = self.controller.with_grace_period(grace);
        self
    }

    /// Run the command to completion.
    pub async fn run(
        &self,
        spec: CommandSpec,
        options: RunOptions,
    ) -> Result<ExecutionResult, RunError> {
        let progress = Arc::new(Mutex::new(DownloadProgress::new()));
        self.run_with_progress(spec, options, progress).await
    }

    /// Start the run in a background task and return a handle for polling
    /// and cancellation.
    pub fn spawn(&self, spec: CommandSpec, options: RunOptions) -> RunHandle {
        let progress = Arc::new(Mutex::new(DownloadProgress::new()));
        let cancel = options.cancel.clone();
        let coordinator = self.clone();
        let task_progress = progress.clone();
        let join = tokio::spawn(async move {
            coordinator
                .run_with_progress(spec, options, task_progress)
                .await
        });
        RunHandle {
            progress,
            cancel,
            join,
        }
    }

    async fn run_with_progress(
        &self,
        spec: CommandSpec,
        options: RunOptions,
        progress: Arc<Mutex<DownloadProgress>>,
    ) -> Result<ExecutionResult, RunError> {
        let command_line = spec.render_command_line();
        tracing::info!(command = %command_line, "starting downloader run");

        let mut handle = self.controller.start(&spec)?;
        if let Some(sink) = &options.sink {
            let event = ProgressEvent::Started {
                command: command_line.clone(),
            };
            if let Err(err) = sink.send(event).await {
                tracing::debug!(%err, "progress sink rejected start event");
            }
        }

        let buffer = Arc::new(OutputBuffer::new());
        let parser = ProgressParser::new(progress);
        let (stdout, stderr) = handle.take_output();
        let reader = OutputReaderLoop::new(buffer.clone(), parser.clone(), options.sink.clone());
        let mut reader_task = tokio::spawn(reader.drain(stdout, stderr));

        let run_timeout = spec.timeout();
        let waited = tokio::select! {
            waited = handle.wait(run_timeout) => Some(waited),
            () = options.cancel.cancelled() => None,
        };
        let cancelled = waited.is_none();
        let (exit_code, timed_out) = match waited {
            Some(outcome) => outcome,
            None => {
                tracing::info!(pid = handle.pid(), "cancellation requested");
                let code = handle.shutdown().await;
                (code, false)
            }
        };

        if timed_out {
            tracing::warn!(
                pid = handle.pid(),
                timeout = ?run_timeout,
                "run exceeded its timeout"
            );
            handle.shutdown().await;
        }

        // The child is gone (or being killed), so the pipes hit EOF shortly.
        // Bound the drain anyway so a wedged pipe cannot hang the run.
        let mut ended_early = None;
        match timeout(DRAIN_TIMEOUT, &mut reader_task).await {
            Ok(Ok(outcome)) => ended_early = outcome.ended_early,
            Ok(Err(err)) => {
                tracing::warn!(%err, "reader task panicked");
                ended_early = Some(format!("reader task failed: {err}"));
            }
            Err(_) => {
                // A pipe held open past the drain window (e.g. by a grandchild
                // that inherited it) must not leave the reader alive to emit
                // events after the final result.
                reader_task.abort();
                tracing::warn!("reader task did not drain in time, aborted");
                ended_early = Some("output drain timed out".to_string());
            }
        }

        let verdict = if cancelled {
            RunVerdict::Cancelled
        } else if timed_out || exit_code != Some(0) {
            RunVerdict::Failed
        } else {
            RunVerdict::Completed
        };
        parser.finalize(spec.working_dir(), verdict).await;

        handle.cleanup().await;

        let output = buffer.snapshot();
        let snapshot = parser.snapshot();
        let success = verdict == RunVerdict::Completed;

        let failure = if success {
            None
        } else if cancelled {
            Some(RunError::Cancelled)
        } else if timed_out {
            Some(RunError::Timeout(run_timeout))
        } else {
            Some(RunError::ToolFailure {
                code: exit_code.unwrap_or(-1),
                message: derive_error_message(&snapshot, &output, exit_code),
            })
        };
        let error_message = failure.as_ref().map(|failure| match failure {
            // The tool's own line is the most readable message.
            RunError::ToolFailure { message, .. } => message.clone(),
            other => other.to_string(),
        });
        if let Some(failure) = &failure {
            tracing::warn!(category = failure.category(), error = %failure, "run failed");
        }
        if let Some(reason) = &ended_early {
            tracing::warn!(reason = %reason, "output collection ended before pipe EOF");
        }

        let diagnostics = if success {
            None
        } else {
            Some(format!("$ {command_line}\n{output}"))
        };

        let result = ExecutionResult {
            success,
            exit_code,
            output,
            error_message,
            diagnostics,
            content_id: snapshot.content_id,
            final_file: snapshot.final_file,
            tracked_files: snapshot.tracked_files,
        };
        tracing::info!(
            success = result.success,
            exit_code = ?result.exit_code,
            "downloader run finished"
        );

        if let Some(sink) = &options.sink {
            let event = ProgressEvent::Finished {
                result: result.clone(),
            };
            if let Err(err) = sink.send(event).await {
                tracing::debug!(%err, "progress sink rejected finish event");
            }
        }

        Ok(result)
    }
}

/// Pick the most useful failure message: a parsed error line if one was seen,
/// else the last non-empty transcript line, else the exit code.
fn derive_error_message(
    snapshot: &DownloadProgress,
    output: &str,
    exit_code: Option<i32>,
) -> String {
    if let Some(message) = &snapshot.error_message {
        return message.clone();
    }
    if let Some(line) = output.lines().rev().find(|l| !l.trim().is_empty()) {
        return line.trim().to_string();
    }
    match exit_code {
        Some(code) => format!("downloader exited with code {code}"),
        None => "downloader was terminated by a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_parsed_error_line() {
        let mut snapshot = DownloadProgress::new();
        snapshot.error_message = Some("ERROR: video unavailable".to_string());
        let message = derive_error_message(&snapshot, "other line\n", Some(1));
        assert_eq!(message, "ERROR: video unavailable");
    }

    #[test]
    fn error_message_falls_back_to_last_transcript_line() {
        let snapshot = DownloadProgress::new();
        let message =
            derive_error_message(&snapshot, "first\nlast words\n\n", Some(1));
        assert_eq!(message, "last words");
    }

    #[test]
    fn error_message_falls_back_to_exit_code_then_signal() {
        let snapshot = DownloadProgress::new();
        assert_eq!(
            derive_error_message(&snapshot, "", Some(2)),
            "downloader exited with code 2"
        );
        assert_eq!(
            derive_error_message(&snapshot, "", None),
            "downloader was terminated by a signal"
        );
    }
}
