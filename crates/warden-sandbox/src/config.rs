//! Sandbox configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

/// Default sandbox image.
pub const DEFAULT_IMAGE: &str = "alpine:3.20";

/// Where the host workspace is mounted inside the container.
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Outbound network access for sandboxed commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// No network interface at all.
    #[default]
    None,
    /// Bridge networking limited to these hosts. The list is attached to the
    /// container as a label for the host's egress filter to enforce.
    Allowlist {
        /// Permitted hostnames.
        hosts: Vec<String>,
    },
}

impl NetworkPolicy {
    /// Whether the container gets a network interface.
    #[must_use]
    pub fn has_network(&self) -> bool {
        matches!(self, Self::Allowlist { hosts } if !hosts.is_empty())
    }
}

/// Resource ceilings and isolation settings for every container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Image every command runs in.
    pub image: String,
    /// Host directory mounted read-write at `/workspace`.
    pub workspace_dir: PathBuf,
    /// Memory ceiling in bytes. Swap is disabled.
    pub memory_bytes: u64,
    /// CPU ceiling in billionths of a CPU.
    pub nano_cpus: u64,
    /// Maximum processes inside the container.
    pub pids_limit: u64,
    /// Timeout applied when a request does not set one.
    pub default_timeout: Duration,
    /// Longest timeout a request may ask for.
    pub max_timeout: Duration,
    /// Per-stream output cap.
    pub max_output_bytes: usize,
    /// Network access.
    pub network: NetworkPolicy,
    /// `uid:gid` the command runs as. Never root.
    pub user: String,
    /// Runtime binary name or path.
    pub runtime_binary: String,
    /// Container name prefix.
    pub name_prefix: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            workspace_dir: std::env::temp_dir().join("warden-workspace"),
            memory_bytes: 512 * 1024 * 1024,
            nano_cpus: 1_000_000_000,
            pids_limit: 100,
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
            max_output_bytes: 1024 * 1024,
            network: NetworkPolicy::None,
            user: "1000:1000".to_owned(),
            runtime_binary: "docker".to_owned(),
            name_prefix: "warden-sandbox".to_owned(),
        }
    }
}

impl SandboxConfig {
    /// Defaults with `workspace_dir` as the mounted workspace.
    #[must_use]
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            ..Self::default()
        }
    }

    /// Derive the CPU ceiling from the memory ceiling's share of host memory.
    ///
    /// A container allowed a quarter of host memory gets a quarter of host
    /// CPUs, never less than a tenth of one CPU.
    #[must_use]
    pub fn with_proportional_cpu(mut self, host_memory_bytes: u64, host_cpus: u64) -> Self {
        if host_memory_bytes == 0 || host_cpus == 0 {
            return self;
        }
        let total = u128::from(host_cpus).saturating_mul(1_000_000_000);
        let share = total
            .saturating_mul(u128::from(self.memory_bytes))
            .checked_div(u128::from(host_memory_bytes))
            .unwrap_or(0)
            .min(total);
        self.nano_cpus = u64::try_from(share).unwrap_or(u64::MAX).max(100_000_000);
        self
    }

    /// Clamp a requested timeout into `(0, max_timeout]`, defaulting when absent.
    #[must_use]
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Reject settings that would weaken isolation or can never work.
    ///
    /// # Errors
    ///
    /// [`SandboxError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::InvalidConfig("image must be set".to_owned()));
        }
        if self.memory_bytes < 4 * 1024 * 1024 {
            return Err(SandboxError::InvalidConfig(
                "memory ceiling must be at least 4 MiB".to_owned(),
            ));
        }
        if self.nano_cpus == 0 || self.pids_limit == 0 {
            return Err(SandboxError::InvalidConfig(
                "cpu and pids ceilings must be positive".to_owned(),
            ));
        }
        if self.default_timeout.is_zero() || self.max_timeout < self.default_timeout {
            return Err(SandboxError::InvalidConfig(
                "timeouts must satisfy 0 < default <= max".to_owned(),
            ));
        }
        let uid = self.user.split(':').next().unwrap_or_default();
        if uid.is_empty() || uid == "0" || uid == "root" {
            return Err(SandboxError::InvalidConfig(
                "sandbox user must be a non-root uid".to_owned(),
            ));
        }
        if self.name_prefix.is_empty()
            || !self
                .name_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SandboxError::InvalidConfig(
                "name prefix must be non-empty [A-Za-z0-9_-]".to_owned(),
            ));
        }
        Ok(())
    }
}
