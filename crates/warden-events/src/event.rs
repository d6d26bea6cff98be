//! Event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::RiskLevel;

/// Common envelope fields carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Component that produced it.
    pub source: String,
}

impl EventMetadata {
    /// Create metadata stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self::at(source, Utc::now())
    }

    /// Create metadata stamped with an explicit time.
    #[must_use]
    pub fn at(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp,
            source: source.into(),
        }
    }
}

/// Lifecycle events emitted by the approval workflow and the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WardenEvent {
    /// A new approval request entered the queue.
    RequestCreated {
        /// Envelope.
        metadata: EventMetadata,
        /// Request identifier.
        request_id: Uuid,
        /// Session that raised it.
        session_id: String,
        /// Approval category name.
        category: String,
        /// Action under review.
        action: String,
        /// Assessed risk.
        risk_level: RiskLevel,
        /// Deadline for a decision.
        expires_at: DateTime<Utc>,
    },
    /// A human approved a request.
    RequestApproved {
        /// Envelope.
        metadata: EventMetadata,
        /// Request identifier.
        request_id: Uuid,
        /// Who decided, if known.
        decided_by: Option<String>,
    },
    /// A human denied a request.
    RequestDenied {
        /// Envelope.
        metadata: EventMetadata,
        /// Request identifier.
        request_id: Uuid,
        /// Who decided, if known.
        decided_by: Option<String>,
        /// Stated reason.
        reason: Option<String>,
    },
    /// A rule approved a request without human review.
    RequestAutoApproved {
        /// Envelope.
        metadata: EventMetadata,
        /// Request identifier.
        request_id: Uuid,
        /// The rule that matched.
        rule_id: Uuid,
    },
    /// A request passed its deadline undecided.
    RequestExpired {
        /// Envelope.
        metadata: EventMetadata,
        /// Request identifier.
        request_id: Uuid,
    },
    /// A sandboxed execution started.
    ExecutionStarted {
        /// Envelope.
        metadata: EventMetadata,
        /// Execution identifier.
        execution_id: Uuid,
        /// Container name.
        container: String,
        /// Executable being run.
        command: String,
    },
    /// A sandboxed execution ran to completion or was killed on timeout.
    ExecutionCompleted {
        /// Envelope.
        metadata: EventMetadata,
        /// Execution identifier.
        execution_id: Uuid,
        /// Container name.
        container: String,
        /// Exit code (the timeout sentinel when `timed_out`).
        exit_code: i64,
        /// Wall time in milliseconds.
        duration_ms: u64,
        /// Whether the run was killed by the timer.
        timed_out: bool,
    },
    /// A sandboxed execution failed for infrastructure reasons.
    ExecutionFailed {
        /// Envelope.
        metadata: EventMetadata,
        /// Execution identifier.
        execution_id: Uuid,
        /// Container name, if one was created.
        container: Option<String>,
        /// Failure description.
        error: String,
    },
}

impl WardenEvent {
    /// Wire name of the event, e.g. `request:created`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request:created",
            Self::RequestApproved { .. } => "request:approved",
            Self::RequestDenied { .. } => "request:denied",
            Self::RequestAutoApproved { .. } => "request:auto_approved",
            Self::RequestExpired { .. } => "request:expired",
            Self::ExecutionStarted { .. } => "execution:started",
            Self::ExecutionCompleted { .. } => "execution:completed",
            Self::ExecutionFailed { .. } => "execution:failed",
        }
    }

    /// Envelope of the event.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::RequestCreated { metadata, .. }
            | Self::RequestApproved { metadata, .. }
            | Self::RequestDenied { metadata, .. }
            | Self::RequestAutoApproved { metadata, .. }
            | Self::RequestExpired { metadata, .. }
            | Self::ExecutionStarted { metadata, .. }
            | Self::ExecutionCompleted { metadata, .. }
            | Self::ExecutionFailed { metadata, .. } => metadata,
        }
    }

    /// Request identifier for approval events.
    #[must_use]
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Self::RequestCreated { request_id, .. }
            | Self::RequestApproved { request_id, .. }
            | Self::RequestDenied { request_id, .. }
            | Self::RequestAutoApproved { request_id, .. }
            | Self::RequestExpired { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}
