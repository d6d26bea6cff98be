//! Execution request and result types.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported when an execution hits its timeout.
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// A command to run in a fresh container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxExecutionRequest {
    /// Program to run.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory inside the container. Defaults to `/workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Bytes written to the command's stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<Vec<u8>>,
    /// Execution timeout. The sandbox default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl SandboxExecutionRequest {
    /// Run `command` with `args`.
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Feed `input` on stdin.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `command args...` as one string, for logs and events.
    #[must_use]
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What happened to an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxExecutionResult {
    /// Exit code, or [`TIMEOUT_EXIT_CODE`] on timeout.
    pub exit_code: i64,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
    /// Wall time from create to exit.
    pub duration_ms: u64,
    /// Whether the timeout fired.
    pub timed_out: bool,
    /// Memory in use at the end of the run, when the runtime could say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used_bytes: Option<u64>,
    /// Whether either stream hit the output cap.
    #[serde(default)]
    pub output_truncated: bool,
}

impl SandboxExecutionResult {
    /// Exited zero within the timeout.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// A container the executor currently owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveContainer {
    /// Runtime container ID.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Command being run.
    pub command: String,
    /// When the container was created.
    pub started_at: DateTime<Utc>,
}
