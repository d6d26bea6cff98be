//! Error types for policy configuration.

use thiserror::Error;

/// Errors raised while building or mutating a policy.
///
/// Evaluation never fails: a command or path that cannot be judged is denied
/// and the reason is carried in the [`AllowlistDecision`](crate::AllowlistDecision).
#[derive(Debug, Error)]
pub enum PolicyError {
    /// An argument regex did not compile.
    #[error("invalid argument pattern '{pattern}' for {command}: {reason}")]
    InvalidArgsPattern {
        /// Command the pattern belongs to.
        command: String,
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A blocked-path glob did not compile.
    #[error("invalid blocked pattern '{pattern}': {reason}")]
    InvalidGlob {
        /// The offending glob.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// A command definition had no name.
    #[error("command definition has an empty name")]
    EmptyCommandName,
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
