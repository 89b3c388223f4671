//! Child process lifecycle: spawn, cancel, wait, kill, clean up.
//!
//! ## Core Components
//!
//! - [`ProcessController`]: stateless policy object holding the cancel grace
//!   period; spawns children from a [`CommandSpec`].
//! - [`ProcessHandle`]: owns one live child and its pipe ends. All lifecycle
//!   operations are idempotent so the coordinator can call them from any
//!   exit path without tracking which ran before.
//!
//! Cancellation is two-phase: a cooperative interrupt first (SIGINT on Unix,
//! so the downloader can rename its partial files), then a forced kill after
//! the grace period.

use crate::constants::DEFAULT_CANCEL_GRACE;
use crate::error::RunError;
use crate::spec::CommandSpec;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a handle, as last observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Running,
    Completed,
    Cancelled,
}

/// Spawns children and applies the cancellation policy.
#[derive(Debug, Clone)]
pub struct ProcessController {
    grace_period: Duration,
}

impl Default for ProcessController {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl ProcessController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the interval between the cooperative interrupt and the
    /// forced kill.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Spawn the child with both output pipes captured. The only `Err` the
    /// engine ever surfaces directly; everything after a successful spawn is
    /// reported through the run result.
    pub fn start(&self, spec: &CommandSpec) -> Result<ProcessHandle, RunError> {
        let mut child = spec.to_command().spawn()?;
        let pid = child.id();
        let stdout = child.stdout.take().ok_or_else(|| {
            RunError::Pipe("child stdout pipe was not captured".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            RunError::Pipe("child stderr pipe was not captured".to_string())
        })?;
        tracing::debug!(pid, program = %spec.program().display(), "spawned child process");
        Ok(ProcessHandle {
            pid,
            child: Some(child),
            stdout: Some(stdout),
            stderr: Some(stderr),
            status: HandleStatus::Running,
            exit_code: None,
            cancel_token: CancellationToken::new(),
            grace_period: self.grace_period,
            cleaned_up: false,
        })
    }
}

/// One live (or reaped) child process and its captured pipes.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    status: HandleStatus,
    exit_code: Option<i32>,
    cancel_token: CancellationToken,
    grace_period: Duration,
    cleaned_up: bool,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> HandleStatus {
        self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Token observers can use to notice a cancellation request.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Move the pipe ends out for the reader task. Each can be taken once.
    pub fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (self.stdout.take(), self.stderr.take())
    }

    /// Reconcile with the OS and report whether the child is still alive.
    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status.code());
                false
            }
            Ok(None) => true,
            Err(err) => {
                tracing::warn!(pid = self.pid, %err, "try_wait failed, assuming exited");
                false
            }
        }
    }

    /// Request cooperative shutdown. Idempotent; repeated calls do not
    /// re-signal.
    pub fn request_cancel(&mut self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        self.cancel_token.cancel();
        self.status = HandleStatus::Cancelled;
        self.signal_interrupt();
    }

    #[cfg(unix)]
    fn signal_interrupt(&mut self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = self.pid {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                Ok(()) => tracing::debug!(pid, "sent SIGINT to child"),
                Err(err) => {
                    // Process already gone or unsignalable; fall through to
                    // the forced-kill phase.
                    tracing::debug!(pid, %err, "SIGINT delivery failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_interrupt(&mut self) {
        // No cooperative interrupt available; go straight to kill.
        if let Some(child) = self.child.as_mut()
            && let Err(err) = child.start_kill()
        {
            tracing::debug!(pid = self.pid, %err, "start_kill failed");
        }
    }

    /// Wait for exit with a deadline. Returns `(exit_code, timed_out)`; on
    /// timeout the child is still running and the caller decides what next.
    pub async fn wait(&mut self, deadline: Duration) -> (Option<i32>, bool) {
        if let Some(code) = self.exit_code {
            return (Some(code), false);
        }
        let Some(child) = self.child.as_mut() else {
            return (None, false);
        };
        match timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                let code = status.code();
                self.record_exit(code);
                (code, false)
            }
            Ok(Err(err)) => {
                tracing::warn!(pid = self.pid, %err, "wait on child failed");
                self.record_exit(None);
                (None, false)
            }
            Err(_) => (None, true),
        }
    }

    /// Kill the child immediately and reap it. Idempotent; a bounded reap so
    /// a wedged kernel-side exit cannot hang the caller.
    pub async fn force_kill(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Err(err) = child.start_kill() {
            tracing::debug!(pid = self.pid, %err, "start_kill during force_kill");
        }
        match timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(status)) => self.record_exit(status.code()),
            Ok(Err(err)) => {
                tracing::warn!(pid = self.pid, %err, "reap after kill failed");
                self.record_exit(None);
            }
            Err(_) => {
                tracing::warn!(pid = self.pid, "child did not exit after kill");
            }
        }
    }

    /// Two-phase shutdown: cooperative interrupt, grace period, then forced
    /// kill if the child is still alive. Returns the exit code if one was
    /// observed.
    pub async fn shutdown(&mut self) -> Option<i32> {
        self.request_cancel();
        let (code, timed_out) = self.wait(self.grace_period).await;
        if timed_out {
            tracing::warn!(
                pid = self.pid,
                grace = ?self.grace_period,
                "child ignored interrupt, killing"
            );
            self.force_kill().await;
        }
        self.status = HandleStatus::Cancelled;
        code.or(self.exit_code)
    }

    /// Release the child and pipes. Safe to call multiple times and from any
    /// exit path.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        if self.is_running() {
            self.force_kill().await;
        }
        self.child = None;
        self.stdout = None;
        self.stderr = None;
        tracing::debug!(pid = self.pid, "process handle cleaned up");
    }

    fn record_exit(&mut self, code: Option<i32>) {
        self.exit_code = code.or(self.exit_code);
        if self.status == HandleStatus::Running {
            self.status = HandleStatus::Completed;
        }
        self.child = None;
    }
}
