//! Bridge from `warden_config::Config` to the domain config types.
//!
//! `warden-config` depends on no other Warden crate, so the conversions into
//! policy, approval, sandbox and logging configs live here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use warden_approval::{ApprovalCategory, AutoApproveRuleEngine, ManagerConfig, QueueConfig};
use warden_config::{ApprovalSection, LoggingSection, PolicySection, SandboxSection};
use warden_core::RiskLevel;
use warden_policy::{AllowlistConfig, DefaultPolicy, DirectoryPermission, PathOperation};
use warden_sandbox::{NetworkPolicy, SandboxConfig};
use warden_telemetry::{LogConfig, LogFormat};

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MIB: u64 = 1024 * 1024;

/// Resolve the workspace root against `cwd` when relative.
#[must_use]
pub fn workspace_root(section: &PolicySection, cwd: &Path) -> PathBuf {
    let root = PathBuf::from(&section.workspace_root);
    if root.is_absolute() {
        root
    } else {
        cwd.join(root)
    }
}

/// Build the policy tables.
///
/// # Errors
///
/// Fails on an unknown `default_policy`.
pub fn policy_config(section: &PolicySection, cwd: &Path) -> Result<AllowlistConfig> {
    let default_policy = match section.default_policy.as_str() {
        "deny" => DefaultPolicy::Deny,
        "deny_strict" => DefaultPolicy::DenyStrict,
        other => bail!("unknown default policy '{other}'"),
    };
    let mut config =
        AllowlistConfig::new(workspace_root(section, cwd)).with_default_policy(default_policy);
    config
        .blocked_patterns
        .extend(section.blocked_patterns.iter().cloned());
    config.allowed_directories.extend(
        section
            .read_only_directories
            .iter()
            .map(|dir| DirectoryPermission::new(dir, &[PathOperation::Read])),
    );
    Ok(config)
}

/// Queue limits and retention.
#[must_use]
pub fn queue_config(section: &ApprovalSection) -> QueueConfig {
    QueueConfig {
        max_pending: section.max_pending,
        default_ttl: Duration::from_secs(section.default_ttl_secs),
        retention: Duration::from_secs(section.retention_days.saturating_mul(SECS_PER_DAY)),
        audit_max_age: Duration::from_secs(
            section.audit_max_age_days.saturating_mul(SECS_PER_DAY),
        ),
    }
}

/// The always-review floor and sweep period.
///
/// # Errors
///
/// Fails on an unknown category or risk level.
pub fn manager_config(section: &ApprovalSection) -> Result<ManagerConfig> {
    let always_require_categories = section
        .always_require_categories
        .iter()
        .map(|c| c.parse::<ApprovalCategory>().map_err(|e| anyhow!(e)))
        .collect::<Result<Vec<_>>>()?;
    let always_require_risk_levels = section
        .always_require_risk_levels
        .iter()
        .map(|r| r.parse::<RiskLevel>().context("approval.always_require_risk_levels"))
        .collect::<Result<Vec<_>>>()?;
    Ok(ManagerConfig {
        always_require_categories,
        always_require_risk_levels,
        sweep_interval: Duration::from_secs(section.sweep_interval_secs),
    })
}

/// Rule engine, seeded with the built-in rules when enabled.
#[must_use]
pub fn rule_engine(section: &ApprovalSection) -> AutoApproveRuleEngine {
    if section.default_rules {
        AutoApproveRuleEngine::with_default_rules()
    } else {
        AutoApproveRuleEngine::new()
    }
}

/// Sandbox ceilings, mounting `workspace` at `/workspace`.
#[must_use]
pub fn sandbox_config(section: &SandboxSection, workspace: &Path) -> SandboxConfig {
    let network = if section.network_allowlist.is_empty() {
        NetworkPolicy::None
    } else {
        NetworkPolicy::Allowlist {
            hosts: section.network_allowlist.clone(),
        }
    };
    let max_output_bytes = u64::try_from(section.max_output_kb)
        .unwrap_or(u64::MAX)
        .saturating_mul(1024);
    SandboxConfig {
        image: section.image.clone(),
        workspace_dir: workspace.to_path_buf(),
        memory_bytes: section.memory_mb.saturating_mul(MIB),
        nano_cpus: nano_cpus(section.cpus),
        pids_limit: section.pids_limit,
        default_timeout: Duration::from_secs(section.default_timeout_secs),
        max_timeout: Duration::from_secs(section.max_timeout_secs),
        max_output_bytes: usize::try_from(max_output_bytes).unwrap_or(usize::MAX),
        network,
        user: section.user.clone(),
        runtime_binary: section.runtime.clone(),
        ..SandboxConfig::default()
    }
}

// Validation already rejected non-finite and non-positive values.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn nano_cpus(cpus: f64) -> u64 {
    (cpus * 1e9).round().clamp(1.0, u64::MAX as f64) as u64
}

/// Logging setup. `verbose` forces debug level.
///
/// # Errors
///
/// Fails on an unknown format.
pub fn log_config(section: &LoggingSection, verbose: bool) -> Result<LogConfig> {
    let level = if verbose { "debug" } else { section.level.as_str() };
    let format: LogFormat = section.format.parse()?;
    let mut config = LogConfig::new(level.to_lowercase()).with_format(format);
    for directive in &section.directives {
        config = config.with_directive(directive.clone());
    }
    if !section.log_dir.is_empty() {
        config = config.with_file_logging(&section.log_dir);
    }
    Ok(config)
}
