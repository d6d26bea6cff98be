//! Gate error types.

use thiserror::Error;
use warden_approval::ApprovalError;
use warden_sandbox::SandboxError;

/// Failures of the pipeline itself.
///
/// Refusals are not errors: a policy deny or a human denial is a
/// [`GateOutcome`](crate::GateOutcome).
#[derive(Debug, Error)]
pub enum GateError {
    /// The approval workflow failed, e.g. the queue is full.
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// The sandbox could not run the command.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The command line could not be parsed.
    #[error("invalid command line: {0}")]
    InvalidCommandLine(String),
}

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;
