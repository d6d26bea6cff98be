//! The approval queue.
//!
//! All state lives behind one mutex: the request arena, the pending-by-session
//! index, the pending counter, the watch channels that wake waiters, and the
//! audit trail. Every transition out of `pending` is a compare-and-swap under
//! that lock, so a sweep and a concurrent decision can never both commit, and
//! each committed transition appends exactly one audit entry.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_core::{SharedClock, system_clock};
use warden_events::{EventBus, EventMetadata, WardenEvent};

use crate::audit::{ApprovalAuditEntry, AuditAction, AuditPage, AuditQuery};
use crate::error::{ApprovalError, ApprovalResult};
use crate::request::{ApprovalParams, ApprovalRequest, ApprovalStatus, RequestId};
use crate::stats::{QueueStats, compute_stats};

const EVENT_SOURCE: &str = "approval_queue";

/// Queue limits and retention windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Ceiling on simultaneously pending requests.
    pub max_pending: usize,
    /// Default time-to-live for a request.
    pub default_ttl: Duration,
    /// How long terminal requests are kept before eviction.
    pub retention: Duration,
    /// How long audit entries are kept.
    pub audit_max_age: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 100,
            default_ttl: Duration::from_secs(300),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            audit_max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Who resolved a request and why.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Actor.
    pub by: Option<String>,
    /// Stated reason.
    pub reason: Option<String>,
    /// Actor's address.
    pub ip_address: Option<String>,
    /// Rule responsible for an auto-approval.
    pub rule_id: Option<Uuid>,
}

impl Resolution {
    /// Resolution by a named user.
    #[must_use]
    pub fn by(user: impl Into<String>) -> Self {
        Self {
            by: Some(user.into()),
            ..Self::default()
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Serializable queue contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Every request, oldest first.
    pub requests: Vec<ApprovalRequest>,
    /// The audit trail, in append order.
    pub audit_trail: Vec<ApprovalAuditEntry>,
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Requests that were expired.
    pub expired: Vec<RequestId>,
    /// Terminal requests evicted past retention.
    pub evicted: usize,
    /// Audit entries pruned past their max age.
    pub audit_pruned: usize,
}

impl SweepReport {
    /// Whether the sweep changed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.evicted == 0 && self.audit_pruned == 0
    }
}

struct Slot {
    request: ApprovalRequest,
    notify: Option<watch::Sender<ApprovalStatus>>,
}

#[derive(Default)]
struct QueueState {
    requests: HashMap<RequestId, Slot>,
    pending_by_session: HashMap<String, BTreeSet<(DateTime<Utc>, RequestId)>>,
    pending: usize,
    audit: Vec<ApprovalAuditEntry>,
}

impl QueueState {
    fn index_pending(&mut self, request: &ApprovalRequest) {
        self.pending_by_session
            .entry(request.session_id.clone())
            .or_default()
            .insert((request.created_at, request.id));
        self.pending = self.pending.saturating_add(1);
    }

    fn unindex_pending(&mut self, request: &ApprovalRequest) {
        if let Some(set) = self.pending_by_session.get_mut(&request.session_id) {
            set.remove(&(request.created_at, request.id));
            if set.is_empty() {
                self.pending_by_session.remove(&request.session_id);
            }
        }
        self.pending = self.pending.saturating_sub(1);
    }
}

/// Owner of every approval request and its audit trail.
pub struct ApprovalQueue {
    config: QueueConfig,
    clock: SharedClock,
    events: Option<EventBus>,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ApprovalQueue")
            .field("config", &self.config)
            .field("requests", &state.requests.len())
            .field("pending", &state.pending)
            .field("audit_entries", &state.audit.len())
            .finish_non_exhaustive()
    }
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl ApprovalQueue {
    /// Create a queue on the system clock with no event sink.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
            events: None,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Publish lifecycle events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Current time according to the queue's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Approval queue lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn emit(&self, event: WardenEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Create a pending request.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::QueueFull`] when `max_pending` requests are already pending
    /// - [`ApprovalError::InvalidRequest`] for a zero TTL or empty action
    pub fn create_request(&self, params: ApprovalParams) -> ApprovalResult<ApprovalRequest> {
        let ttl = params.ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Err(ApprovalError::InvalidRequest(
                "time-to-live must be positive".to_owned(),
            ));
        }
        if params.action.trim().is_empty() {
            return Err(ApprovalError::InvalidRequest(
                "action must not be empty".to_owned(),
            ));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| ApprovalError::InvalidRequest("time-to-live is too large".to_owned()))?;

        let mut state = self.lock();
        if state.pending >= self.config.max_pending {
            warn!(
                max_pending = self.config.max_pending,
                session_id = %params.session_id,
                "Approval queue full, rejecting request"
            );
            return Err(ApprovalError::QueueFull {
                max_pending: self.config.max_pending,
            });
        }

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            ApprovalError::InvalidRequest("time-to-live is too large".to_owned())
        })?;

        let request = ApprovalRequest {
            id: RequestId::new(),
            category: params.category,
            operation: params.operation,
            action: params.action,
            risk_level: params.risk_level,
            context: params.context,
            technical_details: params.technical_details,
            session_id: params.session_id,
            user_id: params.user_id,
            created_at: now,
            expires_at,
            status: ApprovalStatus::Pending,
            metadata: params.metadata,
            resolved_at: None,
            resolved_by: None,
            resolution_reason: None,
            matched_rule: None,
        };

        let (notify, _) = watch::channel(ApprovalStatus::Pending);
        state.index_pending(&request);
        state.audit.push(ApprovalAuditEntry {
            id: Uuid::new_v4(),
            request_id: request.id,
            action: AuditAction::Created,
            timestamp: now,
            user_id: request.user_id.clone(),
            details: Some(format!("{}: {}", request.category, request.action)),
            ip_address: None,
        });
        state.requests.insert(
            request.id,
            Slot {
                request: request.clone(),
                notify: Some(notify),
            },
        );

        self.emit(WardenEvent::RequestCreated {
            metadata: EventMetadata::at(EVENT_SOURCE, now),
            request_id: request.id.0,
            session_id: request.session_id.clone(),
            category: request.category.as_str().to_owned(),
            action: request.action.clone(),
            risk_level: request.risk_level,
            expires_at,
        });
        drop(state);

        info!(
            request_id = %request.id,
            category = %request.category,
            risk = %request.risk_level,
            "Approval request created"
        );
        Ok(request)
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`], [`ApprovalError::InvalidState`], or
    /// [`ApprovalError::Expired`] if the deadline has already passed.
    pub fn approve(&self, id: RequestId, resolution: Resolution) -> ApprovalResult<ApprovalRequest> {
        self.decide_transition(id, ApprovalStatus::Approved, resolution)
    }

    /// Deny a pending request.
    ///
    /// # Errors
    ///
    /// Same as [`ApprovalQueue::approve`].
    pub fn deny(&self, id: RequestId, resolution: Resolution) -> ApprovalResult<ApprovalRequest> {
        self.decide_transition(id, ApprovalStatus::Denied, resolution)
    }

    /// Mark a pending request approved by `rule_id`.
    ///
    /// # Errors
    ///
    /// Same as [`ApprovalQueue::approve`].
    pub fn auto_approve(&self, id: RequestId, rule_id: Uuid) -> ApprovalResult<ApprovalRequest> {
        let resolution = Resolution {
            by: Some("auto-approve".to_owned()),
            rule_id: Some(rule_id),
            ..Resolution::default()
        };
        self.decide_transition(id, ApprovalStatus::AutoApproved, resolution)
    }

    /// Expire a pending request.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`] or [`ApprovalError::InvalidState`].
    pub fn expire(&self, id: RequestId) -> ApprovalResult<ApprovalRequest> {
        let now = self.clock.now();
        let mut state = self.lock();
        self.transition_locked(&mut state, id, ApprovalStatus::Expired, Resolution::default(), now)
    }

    fn decide_transition(
        &self,
        id: RequestId,
        to: ApprovalStatus,
        resolution: Resolution,
    ) -> ApprovalResult<ApprovalRequest> {
        let now = self.clock.now();
        let mut state = self.lock();

        let overdue = state
            .requests
            .get(&id)
            .is_some_and(|slot| slot.request.is_pending() && slot.request.is_overdue(now));
        if overdue {
            // A decision never lands past the deadline.
            self.transition_locked(&mut state, id, ApprovalStatus::Expired, Resolution::default(), now)?;
            return Err(ApprovalError::Expired(id));
        }

        self.transition_locked(&mut state, id, to, resolution, now)
    }

    fn transition_locked(
        &self,
        state: &mut QueueState,
        id: RequestId,
        to: ApprovalStatus,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> ApprovalResult<ApprovalRequest> {
        let slot = state
            .requests
            .get_mut(&id)
            .ok_or(ApprovalError::NotFound(id))?;
        if slot.request.status != ApprovalStatus::Pending {
            return Err(ApprovalError::InvalidState {
                id,
                status: slot.request.status,
            });
        }

        slot.request.status = to;
        slot.request.resolved_at = Some(now);
        slot.request.resolved_by.clone_from(&resolution.by);
        slot.request.resolution_reason.clone_from(&resolution.reason);
        slot.request.matched_rule = resolution.rule_id;
        if let Some(notify) = slot.notify.take() {
            notify.send_replace(to);
        }
        let request = slot.request.clone();

        state.unindex_pending(&request);
        state.audit.push(ApprovalAuditEntry {
            id: Uuid::new_v4(),
            request_id: id,
            action: AuditAction::for_status(to),
            timestamp: now,
            user_id: resolution.by.clone(),
            details: resolution
                .reason
                .clone()
                .or_else(|| resolution.rule_id.map(|r| format!("rule {r}"))),
            ip_address: resolution.ip_address.clone(),
        });

        let metadata = EventMetadata::at(EVENT_SOURCE, now);
        self.emit(match to {
            ApprovalStatus::Approved => WardenEvent::RequestApproved {
                metadata,
                request_id: id.0,
                decided_by: resolution.by,
            },
            ApprovalStatus::Denied => WardenEvent::RequestDenied {
                metadata,
                request_id: id.0,
                decided_by: resolution.by,
                reason: resolution.reason,
            },
            ApprovalStatus::AutoApproved => WardenEvent::RequestAutoApproved {
                metadata,
                request_id: id.0,
                rule_id: resolution.rule_id.unwrap_or_default(),
            },
            ApprovalStatus::Expired | ApprovalStatus::Pending => WardenEvent::RequestExpired {
                metadata,
                request_id: id.0,
            },
        });

        info!(request_id = %id, status = %to, "Approval request resolved");
        Ok(request)
    }

    /// Look up a request.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`] if the ID is unknown or evicted.
    pub fn get(&self, id: RequestId) -> ApprovalResult<ApprovalRequest> {
        self.lock()
            .requests
            .get(&id)
            .map(|slot| slot.request.clone())
            .ok_or(ApprovalError::NotFound(id))
    }

    /// Subscribe to status changes of a request. A terminal request yields a
    /// receiver that already holds its final status.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`] if the ID is unknown.
    pub fn watch(&self, id: RequestId) -> ApprovalResult<watch::Receiver<ApprovalStatus>> {
        let state = self.lock();
        let slot = state.requests.get(&id).ok_or(ApprovalError::NotFound(id))?;
        Ok(match &slot.notify {
            Some(sender) => sender.subscribe(),
            None => watch::channel(slot.request.status).1,
        })
    }

    /// Pending requests, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let state = self.lock();
        let mut pending: Vec<_> = state
            .requests
            .values()
            .filter(|slot| slot.request.is_pending())
            .map(|slot| slot.request.clone())
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.id));
        pending
    }

    /// Pending requests for one session, oldest first.
    #[must_use]
    pub fn pending_for_session(&self, session_id: &str) -> Vec<ApprovalRequest> {
        let state = self.lock();
        state
            .pending_by_session
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|(_, id)| state.requests.get(id))
                    .map(|slot| slot.request.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending
    }

    /// Number of requests held, in any state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    /// Whether the queue holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().requests.is_empty()
    }

    /// Audit entries for one request, in order.
    #[must_use]
    pub fn audit_trail(&self, id: RequestId) -> Vec<ApprovalAuditEntry> {
        self.lock()
            .audit
            .iter()
            .filter(|e| e.request_id == id)
            .cloned()
            .collect()
    }

    /// Filtered, paginated audit entries.
    #[must_use]
    pub fn query_audit(&self, query: &AuditQuery) -> AuditPage {
        let state = self.lock();
        let matching: Vec<&ApprovalAuditEntry> =
            state.audit.iter().filter(|e| query.matches(e)).collect();
        AuditPage {
            total: matching.len(),
            entries: matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect(),
        }
    }

    /// Expire overdue requests, evict old terminal ones, prune the audit trail.
    ///
    /// A request whose deadline equals `now` is expired.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut state = self.lock();

        let overdue: Vec<RequestId> = state
            .requests
            .values()
            .filter(|slot| slot.request.is_pending() && slot.request.is_overdue(now))
            .map(|slot| slot.request.id)
            .collect();
        for id in overdue {
            match self.transition_locked(&mut state, id, ApprovalStatus::Expired, Resolution::default(), now) {
                Ok(_) => report.expired.push(id),
                Err(e) => debug!(request_id = %id, error = %e, "Sweep skipped request"),
            }
        }

        if let Some(cutoff) = cutoff(now, self.config.retention) {
            let before = state.requests.len();
            state.requests.retain(|_, slot| {
                let r = &slot.request;
                !(r.status.is_terminal() && r.resolved_at.unwrap_or(r.created_at) < cutoff)
            });
            report.evicted = before.saturating_sub(state.requests.len());
        }

        if let Some(cutoff) = cutoff(now, self.config.audit_max_age) {
            let before = state.audit.len();
            state.audit.retain(|e| e.timestamp >= cutoff);
            report.audit_pruned = before.saturating_sub(state.audit.len());
        }
        drop(state);

        if !report.is_empty() {
            info!(
                expired = report.expired.len(),
                evicted = report.evicted,
                audit_pruned = report.audit_pruned,
                "Approval sweep completed"
            );
        }
        report
    }

    /// Statistics as of `now`.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let state = self.lock();
        compute_stats(
            state.pending,
            state.requests.values().map(|slot| &slot.request),
            &state.audit,
            now,
        )
    }

    /// Copy out every request and the audit trail.
    #[must_use]
    pub fn export(&self) -> QueueSnapshot {
        let state = self.lock();
        let mut requests: Vec<_> = state
            .requests
            .values()
            .map(|slot| slot.request.clone())
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        QueueSnapshot {
            requests,
            audit_trail: state.audit.clone(),
        }
    }

    /// Replace the queue contents with `snapshot`.
    ///
    /// Waiters on the replaced requests are woken with a closed channel.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::InvalidSnapshot`] if a request has a deadline not after
    /// its creation, a duplicate ID, or a terminal status without a resolution
    /// time. Nothing is replaced on error.
    pub fn import(&self, snapshot: QueueSnapshot) -> ApprovalResult<usize> {
        let mut next = QueueState::default();
        for request in snapshot.requests {
            if request.expires_at <= request.created_at {
                return Err(ApprovalError::InvalidSnapshot(format!(
                    "{} expires at or before its creation",
                    request.id
                )));
            }
            if request.status.is_terminal() && request.resolved_at.is_none() {
                return Err(ApprovalError::InvalidSnapshot(format!(
                    "{} is {} but has no resolution time",
                    request.id, request.status
                )));
            }
            let notify = if request.is_pending() {
                next.index_pending(&request);
                Some(watch::channel(ApprovalStatus::Pending).0)
            } else {
                None
            };
            let id = request.id;
            if next.requests.insert(id, Slot { request, notify }).is_some() {
                return Err(ApprovalError::InvalidSnapshot(format!("duplicate request {id}")));
            }
        }
        next.audit = snapshot.audit_trail;

        if next.pending > self.config.max_pending {
            warn!(
                pending = next.pending,
                max_pending = self.config.max_pending,
                "Imported snapshot exceeds the pending ceiling; new requests will be rejected until it drains"
            );
        }

        let count = next.requests.len();
        *self.lock() = next;
        info!(requests = count, "Approval queue imported");
        Ok(count)
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
