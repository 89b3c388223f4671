//! Progress delivery for long-running downloads.
//!
//! The reader loop and the coordinator publish [`ProgressEvent`]s through a
//! [`ProgressSink`]; the trait hides whether the consumer is a channel, the
//! log, or nothing at all. Delivery failures are reported but never abort the
//! run itself.

use crate::coordinator::ExecutionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events published over the lifetime of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProgressEvent {
    /// The child process has been spawned.
    Started { command: String },
    /// A parsed line changed the progress model.
    Progress { percentage: i64, status: String },
    /// The run reached its single terminal outcome.
    Finished { result: ExecutionResult },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { command } => write!(f, "started: {command}"),
            ProgressEvent::Progress { percentage, status } => {
                if *percentage < 0 {
                    write!(f, "progress: {status}")
                } else {
                    write!(f, "progress {percentage}%: {status}")
                }
            }
            ProgressEvent::Finished { result } => {
                write!(f, "finished: success={}", result.success)
            }
        }
    }
}

/// Errors that can occur during event delivery.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("progress consumer disconnected: {0}")]
    Disconnected(String),
}

/// Consumer side of progress delivery.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn send(&self, event: ProgressEvent) -> Result<(), SinkError>;
}

/// Sink that forwards events into an unbounded channel, for UIs and tests
/// that want to observe the event stream.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn send(&self, event: ProgressEvent) -> Result<(), SinkError> {
        self.sender
            .send(event)
            .map_err(|e| SinkError::Disconnected(e.to_string()))
    }
}

/// Sink that writes events to the log, for headless runs.
pub struct LoggingSink;

#[async_trait]
impl ProgressSink for LoggingSink {
    async fn send(&self, event: ProgressEvent) -> Result<(), SinkError> {
        tracing::info!(%event, "download progress");
        Ok(())
    }
}

/// Sink that drops every event.
pub struct NoOpSink;

#[async_trait]
impl ProgressSink for NoOpSink {
    async fn send(&self, _event: ProgressEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Create a channel-backed sink plus the receiver to consume it.
pub fn channel_sink() -> (Arc<dyn ProgressSink>, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink { sender }), receiver)
}

/// Create a sink that logs each event.
pub fn logging_sink() -> Arc<dyn ProgressSink> {
    Arc::new(LoggingSink)
}

/// Create a sink that ignores each event.
pub fn no_sink() -> Arc<dyn ProgressSink> {
    Arc::new(NoOpSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = channel_sink();
        sink.send(ProgressEvent::Started {
            command: "yt-dlp --newline".to_string(),
        })
        .await
        .expect("send");
        sink.send(ProgressEvent::Progress {
            percentage: 50,
            status: "Downloading".to_string(),
        })
        .await
        .expect("send");

        match rx.recv().await {
            Some(ProgressEvent::Started { command }) => {
                assert_eq!(command, "yt-dlp --newline")
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await {
            Some(ProgressEvent::Progress { percentage, .. }) => assert_eq!(percentage, 50),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn channel_sink_reports_dropped_receiver() {
        let (sink, rx) = channel_sink();
        drop(rx);
        let err = sink
            .send(ProgressEvent::Progress {
                percentage: 1,
                status: String::new(),
            })
            .await
            .expect_err("receiver is gone");
        assert!(matches!(err, SinkError::Disconnected(_)));
    }

    #[tokio::test]
    async fn noop_sink_always_succeeds() {
        let sink = no_sink();
        sink.send(ProgressEvent::Progress {
            percentage: 0,
            status: String::new(),
        })
        .await
        .expect("noop");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ProgressEvent::Progress {
            percentage: 42,
            status: "Downloading".to_string(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"Progress\""));
        assert!(json.contains("\"percentage\":42"));
    }

    #[test]
    fn display_renders_indeterminate_without_a_percent() {
        let event = ProgressEvent::Progress {
            percentage: -1,
            status: "Downloaded 1.5 MB".to_string(),
        };
        assert_eq!(event.to_string(), "progress: Downloaded 1.5 MB");
    }
}
