//! Post-merge configuration validation.
//!
//! Range and vocabulary checks only. The domain crates repeat their own
//! stricter checks when the bridged configs are constructed.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

const CATEGORIES: &[&str] = &[
    "file_write",
    "file_delete",
    "shell_command",
    "network_request",
    "credential_access",
    "system_config",
    "dangerous_command",
    "data_export",
];
const RISK_LEVELS: &[&str] = &["low", "medium", "high", "critical"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_policy(config)?;
    validate_approval(config)?;
    validate_sandbox(config)?;
    validate_events(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> ConfigResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("'{value}' is not one of: {}", allowed.join(", ")),
        ))
    }
}

fn validate_policy(config: &Config) -> ConfigResult<()> {
    let p = &config.policy;
    if p.workspace_root.trim().is_empty() {
        return Err(invalid("policy.workspace_root", "must not be empty"));
    }
    one_of("policy.default_policy", &p.default_policy, &["deny", "deny_strict"])
}

fn validate_approval(config: &Config) -> ConfigResult<()> {
    let a = &config.approval;
    if a.default_ttl_secs == 0 {
        return Err(invalid("approval.default_ttl_secs", "must be greater than 0"));
    }
    if a.sweep_interval_secs == 0 {
        return Err(invalid("approval.sweep_interval_secs", "must be greater than 0"));
    }
    for category in &a.always_require_categories {
        one_of("approval.always_require_categories", category, CATEGORIES)?;
    }
    for level in &a.always_require_risk_levels {
        one_of("approval.always_require_risk_levels", level, RISK_LEVELS)?;
    }
    Ok(())
}

fn validate_sandbox(config: &Config) -> ConfigResult<()> {
    let s = &config.sandbox;
    if s.image.trim().is_empty() {
        return Err(invalid("sandbox.image", "must not be empty"));
    }
    if s.runtime.trim().is_empty() {
        return Err(invalid("sandbox.runtime", "must not be empty"));
    }
    if s.memory_mb < 4 {
        return Err(invalid("sandbox.memory_mb", "must be at least 4"));
    }
    if !s.cpus.is_finite() || s.cpus <= 0.0 {
        return Err(invalid("sandbox.cpus", "must be a finite positive number"));
    }
    if s.pids_limit == 0 {
        return Err(invalid("sandbox.pids_limit", "must be greater than 0"));
    }
    if s.default_timeout_secs == 0 {
        return Err(invalid("sandbox.default_timeout_secs", "must be greater than 0"));
    }
    if s.max_timeout_secs < s.default_timeout_secs {
        return Err(invalid(
            "sandbox.max_timeout_secs",
            format!(
                "{} is below default_timeout_secs ({})",
                s.max_timeout_secs, s.default_timeout_secs
            ),
        ));
    }
    if s.max_output_kb == 0 {
        return Err(invalid("sandbox.max_output_kb", "must be greater than 0"));
    }
    let uid = s.user.split(':').next().unwrap_or_default();
    if uid.is_empty() || uid == "0" || uid == "root" {
        return Err(invalid("sandbox.user", "must name a non-root user"));
    }
    Ok(())
}

fn validate_events(config: &Config) -> ConfigResult<()> {
    if config.events.channel_capacity == 0 {
        return Err(invalid("events.channel_capacity", "must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    one_of("logging.level", &l.level.to_lowercase(), LOG_LEVELS)?;
    one_of("logging.format", &l.format, LOG_FORMATS)
}
