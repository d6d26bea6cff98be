//! Test fixtures for common types.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use warden_approval::{
    ApprovalCategory, ApprovalManager, ApprovalParams, AutoApproveRuleEngine, QueueConfig,
};
use warden_core::{ManualClock, RiskLevel};
use warden_policy::{AllowlistConfig, PolicyEngine};
use warden_sandbox::SandboxConfig;

/// Fixed instant used as the start of manual clocks.
#[must_use]
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A manual clock frozen at [`test_epoch`].
#[must_use]
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(test_epoch()))
}

/// Policy engine with the default tables rooted at `root`.
///
/// # Panics
///
/// If the default tables fail to compile.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_policy(root: &Path) -> PolicyEngine {
    PolicyEngine::new(AllowlistConfig::new(root)).expect("default policy compiles")
}

/// Sandbox configuration with short timeouts, mounting `workspace`.
#[must_use]
pub fn test_sandbox_config(workspace: &Path) -> SandboxConfig {
    SandboxConfig {
        default_timeout: Duration::from_secs(5),
        max_timeout: Duration::from_secs(10),
        ..SandboxConfig::new(workspace)
    }
}

/// Approval manager on `clock` with no auto-approve rules.
#[must_use]
pub fn test_manager(clock: Arc<ManualClock>) -> ApprovalManager {
    ApprovalManager::builder()
        .clock(clock)
        .rules(AutoApproveRuleEngine::new())
        .build()
}

/// Approval manager on `clock` with a small pending ceiling.
#[must_use]
pub fn test_manager_with_capacity(clock: Arc<ManualClock>, max_pending: usize) -> ApprovalManager {
    ApprovalManager::builder()
        .clock(clock)
        .rules(AutoApproveRuleEngine::new())
        .queue_config(QueueConfig {
            max_pending,
            ..QueueConfig::default()
        })
        .build()
}

/// Shell-command approval parameters at medium risk in session `test-session`.
#[must_use]
pub fn test_approval_params(action: &str) -> ApprovalParams {
    ApprovalParams::new(ApprovalCategory::ShellCommand, action)
        .with_risk_level(RiskLevel::Medium)
        .with_session("test-session")
        .with_context("test operation")
}

/// Dangerous-command approval parameters at high risk.
#[must_use]
pub fn test_dangerous_params(action: &str) -> ApprovalParams {
    ApprovalParams::new(ApprovalCategory::DangerousCommand, action)
        .with_risk_level(RiskLevel::High)
        .with_session("test-session")
}
