//! Approval manager - the entry point for everything the policy escalates.
//!
//! # Approval Flow
//!
//! 1. Create a pending request in the [`ApprovalQueue`]
//! 2. If the category or risk level is on the always-review floor, stop here
//! 3. Otherwise ask the [`AutoApproveRuleEngine`]; a match approves at once
//! 4. With no match, hand back a [`DecisionWaiter`] bounded by the deadline
//!
//! Human decisions arrive through [`ApprovalManager::decide`] (or the
//! [`approve`](ApprovalManager::approve) / [`deny`](ApprovalManager::deny)
//! shorthands). An approval may ask to be remembered, which teaches the rule
//! engine a new rule.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{RiskLevel, SharedClock, system_clock};
use warden_events::EventBus;

use crate::audit::{ApprovalAuditEntry, AuditPage, AuditQuery};
use crate::error::{ApprovalError, ApprovalResult};
use crate::queue::{ApprovalQueue, QueueConfig, Resolution, SweepReport};
use crate::request::{
    ApprovalCategory, ApprovalDecision, ApprovalParams, ApprovalRequest, DecisionStatus,
    RememberScope, RequestId,
};
use crate::rules::{AutoApproveRule, AutoApproveRuleEngine};
use crate::snapshot::{PersistedState, SNAPSHOT_VERSION, SnapshotStore};
use crate::stats::QueueStats;
use crate::waiter::DecisionWaiter;

/// Manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Categories that always go to a human. No rule can approve them.
    pub always_require_categories: Vec<ApprovalCategory>,
    /// Risk levels that always go to a human.
    pub always_require_risk_levels: Vec<RiskLevel>,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            always_require_categories: vec![
                ApprovalCategory::CredentialAccess,
                ApprovalCategory::SystemConfig,
            ],
            always_require_risk_levels: vec![RiskLevel::Critical],
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl ManagerConfig {
    /// Whether `request` sits on the always-review floor.
    #[must_use]
    pub fn requires_human(&self, request: &ApprovalRequest) -> bool {
        self.always_require_categories.contains(&request.category)
            || self.always_require_risk_levels.contains(&request.risk_level)
    }
}

/// Result of [`ApprovalManager::request_approval`].
#[derive(Debug)]
pub enum ApprovalOutcome {
    /// A rule approved the request. Proceed.
    AutoApproved {
        /// The resolved request.
        request: ApprovalRequest,
        /// The rule that matched, with its updated counters.
        rule: AutoApproveRule,
    },
    /// The request needs a human.
    Pending {
        /// The pending request.
        request: ApprovalRequest,
        /// Resolves on decision or deadline.
        waiter: DecisionWaiter,
    },
}

impl ApprovalOutcome {
    /// The request, in whatever state it was returned.
    #[must_use]
    pub fn request(&self) -> &ApprovalRequest {
        match self {
            Self::AutoApproved { request, .. } | Self::Pending { request, .. } => request,
        }
    }

    /// Whether a rule approved the request.
    #[must_use]
    pub fn is_auto_approved(&self) -> bool {
        matches!(self, Self::AutoApproved { .. })
    }
}

/// Options for [`ApprovalManager::approve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApproveOptions {
    /// Learn a rule of this scope.
    pub remember: Option<RememberScope>,
    /// Stated reason.
    pub reason: Option<String>,
    /// Decider.
    pub decided_by: Option<String>,
    /// Decider's address.
    pub ip_address: Option<String>,
}

/// Options for [`ApprovalManager::deny`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyOptions {
    /// Stated reason.
    pub reason: Option<String>,
    /// Decider.
    pub decided_by: Option<String>,
    /// Decider's address.
    pub ip_address: Option<String>,
}

/// Handle to the background sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Approval sweeper task ended abnormally");
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Builder for [`ApprovalManager`].
#[derive(Debug, Default)]
pub struct ApprovalManagerBuilder {
    clock: Option<SharedClock>,
    events: Option<EventBus>,
    queue_config: QueueConfig,
    config: ManagerConfig,
    rules: Option<AutoApproveRuleEngine>,
}

impl ApprovalManagerBuilder {
    /// Use `clock` for the queue and rules.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish lifecycle events.
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue limits.
    #[must_use]
    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// Manager settings.
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Rule engine. Defaults to one with the built-in read-only rules.
    #[must_use]
    pub fn rules(mut self, rules: AutoApproveRuleEngine) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Build the manager.
    #[must_use]
    pub fn build(self) -> ApprovalManager {
        let clock = self.clock.unwrap_or_else(system_clock);
        let mut queue = ApprovalQueue::new(self.queue_config).with_clock(Arc::clone(&clock));
        if let Some(events) = self.events {
            queue = queue.with_events(events);
        }
        let rules = self
            .rules
            .unwrap_or_else(AutoApproveRuleEngine::with_default_rules)
            .with_clock(clock);

        ApprovalManager {
            queue: Arc::new(queue),
            rules: Arc::new(rules),
            config: self.config,
        }
    }
}

/// Coordinates the queue and the rule engine.
pub struct ApprovalManager {
    queue: Arc<ApprovalQueue>,
    rules: Arc<AutoApproveRuleEngine>,
    config: ManagerConfig,
}

impl std::fmt::Debug for ApprovalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalManager")
            .field("pending", &self.queue.pending_count())
            .field("rules", &self.rules.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ApprovalManager {
    /// Start building a manager.
    #[must_use]
    pub fn builder() -> ApprovalManagerBuilder {
        ApprovalManagerBuilder::default()
    }

    /// The queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<ApprovalQueue> {
        &self.queue
    }

    /// The rule engine.
    #[must_use]
    pub fn rules(&self) -> &Arc<AutoApproveRuleEngine> {
        &self.rules
    }

    /// Manager settings.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Submit a request for approval.
    ///
    /// Returns immediately. A rule match comes back as
    /// [`ApprovalOutcome::AutoApproved`]; everything else as
    /// [`ApprovalOutcome::Pending`] with a waiter.
    ///
    /// # Errors
    ///
    /// Errors from [`ApprovalQueue::create_request`], notably
    /// [`ApprovalError::QueueFull`].
    pub fn request_approval(&self, params: ApprovalParams) -> ApprovalResult<ApprovalOutcome> {
        let request = self.queue.create_request(params)?;

        if self.config.requires_human(&request) {
            debug!(
                request_id = %request.id,
                category = %request.category,
                risk = %request.risk_level,
                "Request is on the always-review floor, skipping auto-approval"
            );
        } else if let Some(rule) = self.rules.should_auto_approve(&request) {
            match self.queue.auto_approve(request.id, rule.id) {
                Ok(request) => {
                    info!(request_id = %request.id, rule = %rule.name, "Request auto-approved");
                    return Ok(ApprovalOutcome::AutoApproved { request, rule });
                },
                // Lost a race with a sweep or a human; fall through to the waiter.
                Err(e) => debug!(request_id = %request.id, error = %e, "Auto-approval did not apply"),
            }
        }

        let waiter = DecisionWaiter::new(Arc::clone(&self.queue), &request)?;
        Ok(ApprovalOutcome::Pending { request, waiter })
    }

    /// Apply a human decision.
    ///
    /// An approval with `remember_decision` set also learns a rule. Failing
    /// to learn is logged and does not undo the approval.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`], [`ApprovalError::InvalidState`] when the
    /// request is no longer pending, or [`ApprovalError::Expired`] when the
    /// deadline has passed.
    pub fn decide(&self, decision: ApprovalDecision) -> ApprovalResult<ApprovalRequest> {
        let resolution = Resolution {
            by: decision.decided_by,
            reason: decision.reason,
            ip_address: decision.ip_address,
            rule_id: None,
        };

        match decision.status {
            DecisionStatus::Denied => self.queue.deny(decision.request_id, resolution),
            DecisionStatus::Approved => {
                let request = self.queue.approve(decision.request_id, resolution)?;
                if decision.remember_decision {
                    match self
                        .rules
                        .learn_from_decision(&request, decision.remember_scope)
                    {
                        Ok(rule) => info!(
                            request_id = %request.id,
                            rule = %rule.name,
                            pattern = %rule.operation_pattern,
                            "Learned auto-approve rule"
                        ),
                        Err(e) => warn!(
                            request_id = %request.id,
                            error = %e,
                            "Failed to learn auto-approve rule"
                        ),
                    }
                }
                Ok(request)
            },
        }
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// Same as [`ApprovalManager::decide`].
    pub fn approve(&self, id: RequestId, options: ApproveOptions) -> ApprovalResult<ApprovalRequest> {
        let mut decision = ApprovalDecision::approve(id);
        if let Some(scope) = options.remember {
            decision = decision.remember(scope);
        }
        decision.reason = options.reason;
        decision.decided_by = options.decided_by;
        decision.ip_address = options.ip_address;
        self.decide(decision)
    }

    /// Deny a pending request.
    ///
    /// # Errors
    ///
    /// Same as [`ApprovalManager::decide`].
    pub fn deny(&self, id: RequestId, options: DenyOptions) -> ApprovalResult<ApprovalRequest> {
        let mut decision = ApprovalDecision::deny(id);
        decision.reason = options.reason;
        decision.decided_by = options.decided_by;
        decision.ip_address = options.ip_address;
        self.decide(decision)
    }

    /// All pending requests, oldest first.
    #[must_use]
    pub fn get_pending(&self) -> Vec<ApprovalRequest> {
        self.queue.pending()
    }

    /// Pending requests for one session, oldest first.
    #[must_use]
    pub fn get_pending_for_session(&self, session_id: &str) -> Vec<ApprovalRequest> {
        self.queue.pending_for_session(session_id)
    }

    /// Look up a request.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`].
    pub fn get_request(&self, id: RequestId) -> ApprovalResult<ApprovalRequest> {
        self.queue.get(id)
    }

    /// Audit entries for one request.
    #[must_use]
    pub fn get_audit_trail(&self, id: RequestId) -> Vec<ApprovalAuditEntry> {
        self.queue.audit_trail(id)
    }

    /// Filtered audit entries.
    #[must_use]
    pub fn query_audit(&self, query: &AuditQuery) -> AuditPage {
        self.queue.query_audit(query)
    }

    /// Queue statistics as of now.
    #[must_use]
    pub fn get_stats(&self) -> QueueStats {
        self.queue.stats(self.queue.now())
    }

    /// Run one sweep now.
    pub fn sweep_now(&self) -> SweepReport {
        self.queue.sweep(self.queue.now())
    }

    /// Sweep every `sweep_interval` until the handle is shut down.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let token = CancellationToken::new();
        let queue = Arc::clone(&self.queue);
        let period = self.config.sweep_interval.max(Duration::from_millis(10));
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => {
                        queue.sweep(queue.now());
                    },
                }
            }
            debug!("Approval sweeper stopped");
        });

        SweeperHandle { token, handle }
    }

    /// Snapshot the queue and rules.
    #[must_use]
    pub fn export_state(&self) -> PersistedState {
        PersistedState {
            version: SNAPSHOT_VERSION,
            saved_at: self.queue.now(),
            queue: self.queue.export(),
            rules: self.rules.export(),
        }
    }

    /// Save a snapshot to `store`.
    ///
    /// # Errors
    ///
    /// Storage or serialization errors from the store.
    pub async fn persist(&self, store: &dyn SnapshotStore) -> ApprovalResult<()> {
        store.save(&self.export_state()).await
    }

    /// Load the last snapshot from `store`, if any. Returns whether state was
    /// restored.
    ///
    /// Rules are validated before anything is replaced.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::InvalidSnapshot`] or [`ApprovalError::InvalidPattern`]
    /// for bad contents, or storage errors from the store.
    pub async fn restore(&self, store: &dyn SnapshotStore) -> ApprovalResult<bool> {
        let Some(state) = store.load().await? else {
            return Ok(false);
        };
        if state.version != SNAPSHOT_VERSION {
            return Err(ApprovalError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                state.version
            )));
        }

        // Check rules compile before touching either component.
        AutoApproveRuleEngine::new().import(state.rules.clone())?;
        let requests = self.queue.import(state.queue)?;
        let rules = self.rules.import(state.rules)?;
        info!(requests, rules, "Approval state restored");
        Ok(true)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
