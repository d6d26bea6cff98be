//! Queue statistics.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{ApprovalAuditEntry, AuditAction};
use crate::request::{ApprovalCategory, ApprovalRequest, ApprovalStatus, RequestId};

const TOP_CATEGORIES: usize = 5;

/// Terminal outcomes within a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Approved by a human.
    pub approved: usize,
    /// Denied by a human.
    pub denied: usize,
    /// Approved by a rule.
    pub auto_approved: usize,
    /// Expired without a decision.
    pub expired: usize,
}

impl StatusCounts {
    /// Sum of all outcomes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.approved
            .saturating_add(self.denied)
            .saturating_add(self.auto_approved)
            .saturating_add(self.expired)
    }

    fn record(&mut self, status: ApprovalStatus) {
        let slot = match status {
            ApprovalStatus::Approved => &mut self.approved,
            ApprovalStatus::Denied => &mut self.denied,
            ApprovalStatus::AutoApproved => &mut self.auto_approved,
            ApprovalStatus::Expired => &mut self.expired,
            ApprovalStatus::Pending => return,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Snapshot of queue health.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Requests currently pending.
    pub pending: usize,
    /// Outcomes resolved in the last 24 hours.
    pub last_24h: StatusCounts,
    /// Mean time from creation to decision over the last 24 hours, in
    /// milliseconds. Expiries are not decisions and are excluded.
    pub mean_decision_latency_ms: Option<f64>,
    /// Most frequent categories over the last 24 hours, most frequent first.
    pub top_categories: Vec<(ApprovalCategory, usize)>,
}

pub(crate) fn compute_stats<'a>(
    pending: usize,
    requests: impl Iterator<Item = &'a ApprovalRequest>,
    audit: &[ApprovalAuditEntry],
    now: DateTime<Utc>,
) -> QueueStats {
    let since = now.checked_sub_signed(Duration::hours(24)).unwrap_or(now);

    let mut last_24h = StatusCounts::default();
    let mut categories: HashMap<ApprovalCategory, usize> = HashMap::new();
    for request in requests {
        if request.created_at >= since {
            let count = categories.entry(request.category).or_default();
            *count = count.saturating_add(1);
        }
        if request.resolved_at.is_some_and(|t| t >= since) {
            last_24h.record(request.status);
        }
    }

    let created: HashMap<RequestId, DateTime<Utc>> = audit
        .iter()
        .filter(|e| e.action == AuditAction::Created)
        .map(|e| (e.request_id, e.timestamp))
        .collect();
    let latencies: Vec<i64> = audit
        .iter()
        .filter(|e| e.action.is_decision() && e.timestamp >= since)
        .filter_map(|e| {
            created
                .get(&e.request_id)
                .map(|c| e.timestamp.signed_duration_since(*c).num_milliseconds())
        })
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let mean_decision_latency_ms = (!latencies.is_empty()).then(|| {
        let sum: f64 = latencies.iter().map(|&ms| ms as f64).sum();
        sum / latencies.len() as f64
    });

    let mut top_categories: Vec<(ApprovalCategory, usize)> = categories.into_iter().collect();
    top_categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
    top_categories.truncate(TOP_CATEGORIES);

    QueueStats {
        pending,
        last_24h,
        mean_decision_latency_ms,
        top_categories,
    }
}
