//! Immutable description of one downloader invocation.
//!
//! A [`CommandSpec`] is built by the caller, handed to the coordinator, and
//! never mutated afterwards. The argument list is taken as already assembled;
//! this crate does not know the semantics of the wrapped tool's flags.

use crate::constants::DEFAULT_RUN_TIMEOUT;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;

/// Everything needed to launch one run of the external tool.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a spec for the given executable with the default timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: DEFAULT_RUN_TIMEOUT,
            env: Vec::new(),
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory for the child process.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the overall run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds an environment override for the child process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Render the invocation for diagnostics. Arguments containing whitespace
    /// are single-quoted so the line can be read back unambiguously.
    pub fn render_command_line(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        for arg in &self.args {
            if arg.chars().any(char::is_whitespace) || arg.is_empty() {
                parts.push(format!("'{}'", arg.replace('\'', "'\"'\"'")));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    /// Build the tokio command with both output streams piped and stdin
    /// closed. The controller owns the pipe ends after spawn.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}
