//! Configuration types.
//!
//! These mirror the domain configs of the policy, approval and sandbox crates
//! using plain strings and numbers, so this crate has no internal
//! dependencies. Every struct implements [`Default`] with the same values as
//! `defaults.toml`, so a bare `[section]` header produces a working config.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command and path policy.
    pub policy: PolicySection,
    /// Approval queue and rules.
    pub approval: ApprovalSection,
    /// Container sandbox.
    pub sandbox: SandboxSection,
    /// Event bus.
    pub events: EventsSection,
    /// Logging.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// PolicySection
// ---------------------------------------------------------------------------

/// Policy engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Workspace root. Relative paths resolve against the current directory.
    pub workspace_root: String,
    /// `"deny"` or `"deny_strict"`.
    pub default_policy: String,
    /// Extra blocked path globs.
    pub blocked_patterns: Vec<String>,
    /// Extra directories granted read access only.
    pub read_only_directories: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            workspace_root: ".".to_owned(),
            default_policy: "deny".to_owned(),
            blocked_patterns: Vec::new(),
            read_only_directories: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalSection
// ---------------------------------------------------------------------------

/// Approval workflow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Ceiling on pending requests.
    pub max_pending: usize,
    /// Seconds before an undecided request expires.
    pub default_ttl_secs: u64,
    /// Days terminal requests are retained.
    pub retention_days: u64,
    /// Days audit entries are retained.
    pub audit_max_age_days: u64,
    /// Seconds between background sweeps.
    pub sweep_interval_secs: u64,
    /// Categories that always need a human.
    pub always_require_categories: Vec<String>,
    /// Risk levels that always need a human.
    pub always_require_risk_levels: Vec<String>,
    /// Install the built-in auto-approve rules.
    pub default_rules: bool,
    /// Snapshot file. Empty disables persistence.
    pub state_file: String,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            max_pending: 100,
            default_ttl_secs: 300,
            retention_days: 7,
            audit_max_age_days: 30,
            sweep_interval_secs: 30,
            always_require_categories: vec![
                "credential_access".to_owned(),
                "system_config".to_owned(),
            ],
            always_require_risk_levels: vec!["critical".to_owned()],
            default_rules: true,
            state_file: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxSection
// ---------------------------------------------------------------------------

/// Sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Container image.
    pub image: String,
    /// Container runtime client binary.
    pub runtime: String,
    /// Memory ceiling in MiB.
    pub memory_mb: u64,
    /// CPU ceiling in CPUs.
    pub cpus: f64,
    /// Process ceiling.
    pub pids_limit: u64,
    /// Default execution timeout in seconds.
    pub default_timeout_secs: u64,
    /// Largest timeout a request may ask for.
    pub max_timeout_secs: u64,
    /// Per-stream output cap in KiB.
    pub max_output_kb: usize,
    /// `uid:gid` inside the container.
    pub user: String,
    /// Reachable hosts. Empty means no network.
    pub network_allowlist: Vec<String>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            image: "alpine:3.20".to_owned(),
            runtime: "docker".to_owned(),
            memory_mb: 512,
            cpus: 1.0,
            pids_limit: 100,
            default_timeout_secs: 30,
            max_timeout_secs: 300,
            max_output_kb: 1024,
            user: "1000:1000".to_owned(),
            network_allowlist: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventsSection
// ---------------------------------------------------------------------------

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Per-receiver buffer.
    pub channel_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level filter (`"trace"` to `"error"`).
    pub level: String,
    /// `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate directives such as `"warden_sandbox=debug"`.
    pub directives: Vec<String>,
    /// Rolling log file directory. Empty logs to stderr.
    pub log_dir: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            log_dir: String::new(),
        }
    }
}
