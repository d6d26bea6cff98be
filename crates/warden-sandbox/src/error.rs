//! Sandbox error types.

use thiserror::Error;

/// Errors raised by the sandbox.
///
/// Infrastructure failures end the requested execution. A command that runs
/// and fails, or times out, is not an error: it is reported in
/// [`SandboxExecutionResult`](crate::SandboxExecutionResult).
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The container runtime could not be reached.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The sandbox image could not be pulled.
    #[error("failed to pull image {image}: {reason}")]
    ImagePull {
        /// Image reference.
        image: String,
        /// Runtime message.
        reason: String,
    },

    /// A runtime call failed.
    #[error("container runtime error during {operation}: {reason}")]
    Runtime {
        /// The call that failed.
        operation: &'static str,
        /// Runtime message.
        reason: String,
    },

    /// The multiplexed output stream was malformed.
    #[error("malformed output stream: {0}")]
    Frame(String),

    /// The execution request was rejected before anything was created.
    #[error("invalid execution request: {0}")]
    InvalidRequest(String),

    /// The sandbox configuration is unusable.
    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    /// Host filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub(crate) fn runtime(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Runtime {
            operation,
            reason: reason.into(),
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
