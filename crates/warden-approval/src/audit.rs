//! Audit trail entries and queries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::{ApprovalStatus, RequestId};

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Request entered the queue.
    Created,
    /// A human approved it.
    Approved,
    /// A human denied it.
    Denied,
    /// The deadline passed.
    Expired,
    /// A rule approved it.
    AutoApproved,
}

impl AuditAction {
    /// Audit action recording a transition into `status`.
    #[must_use]
    pub fn for_status(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::Pending => Self::Created,
            ApprovalStatus::Approved => Self::Approved,
            ApprovalStatus::Denied => Self::Denied,
            ApprovalStatus::AutoApproved => Self::AutoApproved,
            ApprovalStatus::Expired => Self::Expired,
        }
    }

    /// Whether this entry records a decision (human or rule) rather than
    /// creation or expiry.
    #[must_use]
    pub fn is_decision(self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::AutoApproved)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::AutoApproved => "auto_approved",
        };
        f.write_str(s)
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAuditEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Request the entry belongs to.
    pub request_id: RequestId,
    /// What happened.
    pub action: AuditAction,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Who did it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Origin address of the actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Filter and page over the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    /// Only entries for this request.
    pub request_id: Option<RequestId>,
    /// Only entries at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Only entries strictly before this time.
    pub until: Option<DateTime<Utc>>,
    /// Only entries with this action.
    pub action: Option<AuditAction>,
    /// Entries to skip.
    pub offset: usize,
    /// Maximum entries to return.
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            request_id: None,
            since: None,
            until: None,
            action: None,
            offset: 0,
            limit: 100,
        }
    }
}

impl AuditQuery {
    /// Query everything, first page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one request.
    #[must_use]
    pub fn for_request(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Restrict to `[since, until)`.
    #[must_use]
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Restrict to entries at or after `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Restrict to one action.
    #[must_use]
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Select a page.
    #[must_use]
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub(crate) fn matches(&self, entry: &ApprovalAuditEntry) -> bool {
        self.request_id.is_none_or(|id| entry.request_id == id)
            && self.since.is_none_or(|t| entry.timestamp >= t)
            && self.until.is_none_or(|t| entry.timestamp < t)
            && self.action.is_none_or(|a| entry.action == a)
    }
}

/// One page of audit results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPage {
    /// Entries on this page, oldest first.
    pub entries: Vec<ApprovalAuditEntry>,
    /// Total entries matching the filter across all pages.
    pub total: usize,
}

impl AuditPage {
    /// Whether more entries follow this page.
    #[must_use]
    pub fn has_more(&self, query: &AuditQuery) -> bool {
        query.offset.saturating_add(self.entries.len()) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(action: AuditAction, at: DateTime<Utc>) -> ApprovalAuditEntry {
        ApprovalAuditEntry {
            id: Uuid::new_v4(),
            request_id: RequestId::new(),
            action,
            timestamp: at,
            user_id: None,
            details: None,
            ip_address: None,
        }
    }

    #[test]
    fn test_action_for_status() {
        assert_eq!(
            AuditAction::for_status(ApprovalStatus::AutoApproved),
            AuditAction::AutoApproved
        );
        assert!(AuditAction::Denied.is_decision());
        assert!(!AuditAction::Expired.is_decision());
        assert_eq!(AuditAction::AutoApproved.to_string(), "auto_approved");
    }

    #[test]
    fn test_query_time_window_is_half_open() {
        let now = Utc::now();
        let q = AuditQuery::new().between(now, now + Duration::seconds(10));
        assert!(q.matches(&entry(AuditAction::Created, now)));
        assert!(!q.matches(&entry(AuditAction::Created, now + Duration::seconds(10))));
        assert!(!q.matches(&entry(AuditAction::Created, now - Duration::seconds(1))));
    }

    #[test]
    fn test_query_filters_action_and_request() {
        let now = Utc::now();
        let e = entry(AuditAction::Denied, now);
        assert!(AuditQuery::new().with_action(AuditAction::Denied).matches(&e));
        assert!(!AuditQuery::new().with_action(AuditAction::Approved).matches(&e));
        assert!(AuditQuery::new().for_request(e.request_id).matches(&e));
        assert!(!AuditQuery::new().for_request(RequestId::new()).matches(&e));
    }
}
