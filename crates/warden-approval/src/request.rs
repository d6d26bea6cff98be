//! Approval requests and decisions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::RiskLevel;

/// Unique identifier for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new random request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.strip_prefix("req:").unwrap_or(s)).map(Self)
    }
}

/// Kind of operation awaiting approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalCategory {
    /// Creating or modifying files.
    FileWrite,
    /// Deleting files.
    FileDelete,
    /// Running a shell command the policy does not allow outright.
    ShellCommand,
    /// Running a command from the dangerous table.
    DangerousCommand,
    /// Outbound network access.
    NetworkRequest,
    /// Reading secrets or credentials.
    CredentialAccess,
    /// Calling a third-party API.
    ExternalApi,
    /// Changing system configuration.
    SystemConfig,
    /// Moving data out of the workspace.
    DataExport,
}

impl ApprovalCategory {
    /// Every category.
    pub const ALL: [Self; 9] = [
        Self::FileWrite,
        Self::FileDelete,
        Self::ShellCommand,
        Self::DangerousCommand,
        Self::NetworkRequest,
        Self::CredentialAccess,
        Self::ExternalApi,
        Self::SystemConfig,
        Self::DataExport,
    ];

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileWrite => "file_write",
            Self::FileDelete => "file_delete",
            Self::ShellCommand => "shell_command",
            Self::DangerousCommand => "dangerous_command",
            Self::NetworkRequest => "network_request",
            Self::CredentialAccess => "credential_access",
            Self::ExternalApi => "external_api",
            Self::SystemConfig => "system_config",
            Self::DataExport => "data_export",
        }
    }
}

impl fmt::Display for ApprovalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown approval category '{s}'"))
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by a human.
    Approved,
    /// Denied by a human.
    Denied,
    /// Approved by a rule.
    AutoApproved,
    /// Deadline passed without a decision.
    Expired,
}

impl ApprovalStatus {
    /// Whether the status can never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the operation may go ahead.
    #[must_use]
    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::AutoApproved => "auto_approved",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation awaiting a yes/no decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Identifier.
    pub id: RequestId,
    /// Kind of operation.
    pub category: ApprovalCategory,
    /// Short operation name (e.g. `shell.exec`).
    pub operation: String,
    /// The concrete action, matched by auto-approve rules (e.g. `git status`).
    pub action: String,
    /// Assessed risk.
    pub risk_level: RiskLevel,
    /// Why the agent wants to do this.
    pub context: String,
    /// Extra detail for the reviewer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_details: Option<String>,
    /// Session that raised the request.
    pub session_id: String,
    /// User on whose behalf the agent acts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Deadline for a decision.
    pub expires_at: DateTime<Utc>,
    /// Current state.
    pub status: ApprovalStatus,
    /// Arbitrary caller metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When the request left `pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// Reason given with the resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_reason: Option<String>,
    /// Rule that auto-approved it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<Uuid>,
}

impl ApprovalRequest {
    /// Whether the request is still awaiting a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Whether the deadline has been reached at `now`. A deadline equal to
    /// `now` counts as reached.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Display for ApprovalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} ({} risk, {})",
            self.id, self.category, self.action, self.risk_level, self.status
        )
    }
}

/// Parameters for a new request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalParams {
    /// Kind of operation.
    pub category: ApprovalCategory,
    /// Short operation name.
    pub operation: String,
    /// Concrete action.
    pub action: String,
    /// Assessed risk.
    pub risk_level: RiskLevel,
    /// Why the agent wants this.
    pub context: String,
    /// Extra detail for the reviewer.
    pub technical_details: Option<String>,
    /// Session raising the request.
    pub session_id: String,
    /// User on whose behalf the agent acts.
    pub user_id: Option<String>,
    /// Caller metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Per-request time-to-live; the queue default applies when absent.
    pub ttl: Option<Duration>,
}

impl ApprovalParams {
    /// Start building parameters for `action` in `category`.
    #[must_use]
    pub fn new(category: ApprovalCategory, action: impl Into<String>) -> Self {
        Self {
            category,
            operation: category.as_str().to_owned(),
            action: action.into(),
            risk_level: RiskLevel::Medium,
            context: String::new(),
            technical_details: None,
            session_id: "default".to_owned(),
            user_id: None,
            metadata: BTreeMap::new(),
            ttl: None,
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Set the risk level.
    #[must_use]
    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Set the context shown to the reviewer.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Set technical details.
    #[must_use]
    pub fn with_technical_details(mut self, details: impl Into<String>) -> Self {
        self.technical_details = Some(details.into());
        self
    }

    /// Set the session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the time-to-live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Verdict in a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Let it run.
    Approved,
    /// Refuse it.
    Denied,
}

/// How broadly a remembered approval applies to future requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RememberScope {
    /// The identical action string.
    #[default]
    Exact,
    /// Any action with the same base command.
    Similar,
    /// Anything in the same category.
    Category,
}

/// A human decision on a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Target request.
    pub request_id: RequestId,
    /// Verdict.
    pub status: DecisionStatus,
    /// Whether to learn a rule from this approval.
    #[serde(default)]
    pub remember_decision: bool,
    /// Breadth of the learned rule.
    #[serde(default)]
    pub remember_scope: RememberScope,
    /// Stated reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
    /// Who made it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// Where the decision came from, recorded in the audit trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl ApprovalDecision {
    fn new(request_id: RequestId, status: DecisionStatus) -> Self {
        Self {
            request_id,
            status,
            remember_decision: false,
            remember_scope: RememberScope::Exact,
            reason: None,
            decided_at: Utc::now(),
            decided_by: None,
            ip_address: None,
        }
    }

    /// An approval.
    #[must_use]
    pub fn approve(request_id: RequestId) -> Self {
        Self::new(request_id, DecisionStatus::Approved)
    }

    /// A denial.
    #[must_use]
    pub fn deny(request_id: RequestId) -> Self {
        Self::new(request_id, DecisionStatus::Denied)
    }

    /// Learn a rule of the given scope from this approval.
    #[must_use]
    pub fn remember(mut self, scope: RememberScope) -> Self {
        self.remember_decision = true;
        self.remember_scope = scope;
        self
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Record the decider.
    #[must_use]
    pub fn by(mut self, user: impl Into<String>) -> Self {
        self.decided_by = Some(user.into());
        self
    }

    /// Record the origin address.
    #[must_use]
    pub fn from_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}
