//! Error types for the approval workflow.

use thiserror::Error;
use uuid::Uuid;

use crate::request::{ApprovalStatus, RequestId};

/// Errors that can occur in the approval workflow.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The pending queue is at capacity.
    #[error("approval queue is full ({max_pending} pending requests)")]
    QueueFull {
        /// Configured ceiling.
        max_pending: usize,
    },

    /// No request with this ID.
    #[error("approval request not found: {0}")]
    NotFound(RequestId),

    /// The request has already left `pending`.
    #[error("approval request {id} is already {status}")]
    InvalidState {
        /// Request ID.
        id: RequestId,
        /// Its current status.
        status: ApprovalStatus,
    },

    /// The request's deadline passed before a decision.
    #[error("approval request {0} expired")]
    Expired(RequestId),

    /// The request parameters were rejected.
    #[error("invalid approval request: {0}")]
    InvalidRequest(String),

    /// A rule pattern does not compile.
    #[error("invalid rule pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// No rule with this ID.
    #[error("auto-approve rule not found: {0}")]
    RuleNotFound(Uuid),

    /// Imported data violates an invariant.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Snapshot storage failed.
    #[error("snapshot storage error: {0}")]
    Storage(String),

    /// Snapshot (de)serialization failed.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
