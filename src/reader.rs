//! Single-task drain of both child output pipes.
//!
//! One reader task per run selects over chunk reads from stdout and stderr,
//! feeds each stream through its own [`LineDecoder`], and hands every
//! completed line to the transcript, the parser, and the progress sink in
//! that order. Lines from one stream are delivered in the order the stream
//! produced them; the interleaving between streams follows arrival.
//!
//! A read error on one pipe ends collection early but is absorbed: the lines
//! gathered so far remain valid and the run outcome comes from the process
//! exit, not from the pipe.

use crate::constants::READ_CHUNK_SIZE;
use crate::decoder::LineDecoder;
use crate::output_buffer::OutputBuffer;
use crate::progress::ProgressParser;
use crate::sink::{ProgressEvent, ProgressSink};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout};

/// What the drain observed, reported back to the coordinator.
#[derive(Debug, Default)]
pub struct ReaderOutcome {
    /// Set when a pipe failed before EOF; the transcript is truncated at the
    /// failure point.
    pub ended_early: Option<String>,
}

/// Owns the per-run output pipeline: transcript buffer, parser, sink.
pub struct OutputReaderLoop {
    buffer: Arc<OutputBuffer>,
    parser: ProgressParser,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl OutputReaderLoop {
    pub fn new(
        buffer: Arc<OutputBuffer>,
        parser: ProgressParser,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Self {
        Self {
            buffer,
            parser,
            sink,
        }
    }

    /// Read both pipes to EOF (or failure), delivering each completed line.
    /// Runs as its own tokio task so the coordinator can await the child exit
    /// concurrently.
    pub async fn drain(
        self,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    ) -> ReaderOutcome {
        let mut outcome = ReaderOutcome::default();

        let mut stdout = stdout;
        let mut stderr = stderr;
        let mut stdout_decoder = LineDecoder::new();
        let mut stderr_decoder = LineDecoder::new();
        let mut stdout_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stderr_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stdout_open = stdout.is_some();
        let mut stderr_open = stderr.is_some();

        while stdout_open || stderr_open {
            tokio::select! {
                read = read_some(&mut stdout, &mut stdout_buf), if stdout_open => {
                    match read {
                        Ok(0) => stdout_open = false,
                        Ok(n) => {
                            for line in stdout_decoder.push_chunk(&stdout_buf[..n]) {
                                self.deliver(&line).await;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "stdout read failed, ending collection");
                            outcome.ended_early = Some(format!("stdout: {err}"));
                            stdout_open = false;
                        }
                    }
                }
                read = read_some(&mut stderr, &mut stderr_buf), if stderr_open => {
                    match read {
                        Ok(0) => stderr_open = false,
                        Ok(n) => {
                            for line in stderr_decoder.push_chunk(&stderr_buf[..n]) {
                                self.deliver(&line).await;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "stderr read failed, ending collection");
                            outcome.ended_early = Some(format!("stderr: {err}"));
                            stderr_open = false;
                        }
                    }
                }
            }
        }

        // Unterminated final lines still count.
        if let Some(line) = stdout_decoder.finish() {
            self.deliver(&line).await;
        }
        if let Some(line) = stderr_decoder.finish() {
            self.deliver(&line).await;
        }

        outcome
    }

    async fn deliver(&self, line: &str) {
        self.buffer.push_line(line);
        let (percentage, status) = self.parser.apply(line);
        if let Some(sink) = &self.sink {
            if let Err(err) = sink
                .send(ProgressEvent::Progress { percentage, status })
                .await
            {
                tracing::debug!(%err, "progress sink rejected event");
            }
        }
    }
}

async fn read_some<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match reader {
        Some(r) => r.read(buf).await,
        // Branch is disabled by the `if` guard when the pipe is absent.
        None => Ok(0),
    }
}
