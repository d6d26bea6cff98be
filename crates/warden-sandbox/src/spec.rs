//! Container specifications.
//!
//! [`ContainerSpec::for_execution`] is the single place isolation settings are
//! decided. Every field that weakens isolation has exactly one value here and
//! no request can override it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{CONTAINER_WORKSPACE, NetworkPolicy, SandboxConfig};
use crate::error::{SandboxError, SandboxResult};
use crate::seccomp;
use crate::types::SandboxExecutionRequest;

/// Label carrying the egress allowlist for the host's network filter.
pub const NETWORK_ALLOWLIST_LABEL: &str = "warden.network.allowlist";

/// Label marking containers owned by Warden.
pub const MANAGED_LABEL: &str = "warden.managed";

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Host path.
    pub source: PathBuf,
    /// Container path.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl BindMount {
    /// `source:target[:ro]`.
    #[must_use]
    pub fn to_volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Resource and privilege settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Memory ceiling in bytes.
    pub memory_bytes: u64,
    /// Memory plus swap ceiling. Equal to `memory_bytes`: no swap.
    pub memory_swap_bytes: u64,
    /// CPU ceiling in billionths of a CPU.
    pub nano_cpus: u64,
    /// Process ceiling.
    pub pids_limit: u64,
    /// Root filesystem is read-only.
    pub read_only_rootfs: bool,
    /// Capabilities dropped.
    pub cap_drop: Vec<String>,
    /// Extra security options (besides seccomp).
    pub security_opt: Vec<String>,
    /// Seccomp profile JSON.
    pub seccomp_profile: String,
    /// `none` or `bridge`.
    pub network_mode: String,
    /// IPC namespace mode.
    pub ipc_mode: String,
    /// Bind mounts.
    pub binds: Vec<BindMount>,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Program and arguments.
    pub cmd: Vec<String>,
    /// Working directory.
    pub working_dir: String,
    /// Environment.
    pub env: BTreeMap<String, String>,
    /// `uid:gid`.
    pub user: String,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Keep stdin open for input.
    pub open_stdin: bool,
    /// Resource and privilege settings.
    pub host_config: HostConfig,
}

impl ContainerSpec {
    /// Spec for running `request` under `config`, with `scratch` mounted at
    /// `/tmp`.
    ///
    /// # Errors
    ///
    /// [`SandboxError::InvalidRequest`] for an empty command, a working
    /// directory outside `/workspace`, or a malformed environment name.
    pub fn for_execution(
        config: &SandboxConfig,
        name: &str,
        request: &SandboxExecutionRequest,
        scratch: &Path,
    ) -> SandboxResult<Self> {
        if request.command.trim().is_empty() {
            return Err(SandboxError::InvalidRequest("command must not be empty".to_owned()));
        }

        let working_dir = match &request.working_dir {
            None => CONTAINER_WORKSPACE.to_owned(),
            Some(dir) => resolve_working_dir(dir)?,
        };

        for key in request.env.keys() {
            let valid = !key.is_empty()
                && !key.starts_with(|c: char| c.is_ascii_digit())
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(SandboxError::InvalidRequest(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_owned(), "true".to_owned());
        let network_mode = match &config.network {
            NetworkPolicy::Allowlist { hosts } if !hosts.is_empty() => {
                labels.insert(NETWORK_ALLOWLIST_LABEL.to_owned(), hosts.join(","));
                "bridge"
            },
            _ => "none",
        };

        let cmd = std::iter::once(request.command.clone())
            .chain(request.args.iter().cloned())
            .collect();

        Ok(Self {
            name: name.to_owned(),
            image: config.image.clone(),
            cmd,
            working_dir,
            env: request.env.clone(),
            user: config.user.clone(),
            labels,
            open_stdin: request.stdin.is_some(),
            host_config: HostConfig {
                memory_bytes: config.memory_bytes,
                memory_swap_bytes: config.memory_bytes,
                nano_cpus: config.nano_cpus,
                pids_limit: config.pids_limit,
                read_only_rootfs: true,
                cap_drop: vec!["ALL".to_owned()],
                security_opt: vec!["no-new-privileges:true".to_owned()],
                seccomp_profile: seccomp::profile_json(),
                network_mode: network_mode.to_owned(),
                ipc_mode: "private".to_owned(),
                binds: vec![
                    BindMount {
                        source: config.workspace_dir.clone(),
                        target: CONTAINER_WORKSPACE.to_owned(),
                        read_only: false,
                    },
                    BindMount {
                        source: scratch.to_path_buf(),
                        target: "/tmp".to_owned(),
                        read_only: false,
                    },
                ],
            },
        })
    }
}

/// Working directories are relative to `/workspace` or absolute under it.
fn resolve_working_dir(dir: &str) -> SandboxResult<String> {
    let joined = if dir.starts_with('/') {
        dir.to_owned()
    } else {
        format!("{CONTAINER_WORKSPACE}/{dir}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                parts.pop();
            },
            p => parts.push(p),
        }
    }
    let normalized = format!("/{}", parts.join("/"));

    let root = CONTAINER_WORKSPACE;
    let inside = normalized == root
        || normalized
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'));
    if inside {
        Ok(normalized)
    } else {
        Err(SandboxError::InvalidRequest(format!(
            "working directory '{dir}' is outside {root}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(request: &SandboxExecutionRequest) -> SandboxResult<ContainerSpec> {
        ContainerSpec::for_execution(
            &SandboxConfig::new("/srv/project"),
            "warden-sandbox-test",
            request,
            Path::new("/tmp/scratch-1"),
        )
    }

    #[test]
    fn test_isolation_defaults() {
        let s = spec(&SandboxExecutionRequest::new("ls", ["-la"])).unwrap();
        let hc = &s.host_config;
        assert!(hc.read_only_rootfs);
        assert_eq!(hc.cap_drop, ["ALL"]);
        assert!(hc.security_opt.iter().any(|o| o.starts_with("no-new-privileges")));
        assert_eq!(hc.network_mode, "none");
        assert_eq!(hc.memory_swap_bytes, hc.memory_bytes);
        assert_eq!(hc.ipc_mode, "private");
        assert!(hc.seccomp_profile.contains("unshare"));
        assert_eq!(s.user, "1000:1000");
        assert_eq!(s.cmd, ["ls", "-la"]);
        assert_eq!(s.working_dir, "/workspace");
        assert!(!s.open_stdin);
    }

    #[test]
    fn test_mounts_workspace_and_scratch() {
        let s = spec(&SandboxExecutionRequest::new("ls", [] as [&str; 0])).unwrap();
        let volumes: Vec<_> = s
            .host_config
            .binds
            .iter()
            .map(BindMount::to_volume_arg)
            .collect();
        assert_eq!(volumes, ["/srv/project:/workspace", "/tmp/scratch-1:/tmp"]);
    }

    #[test]
    fn test_network_allowlist_uses_bridge_and_label() {
        let config = SandboxConfig {
            network: NetworkPolicy::Allowlist {
                hosts: vec!["crates.io".to_owned(), "static.crates.io".to_owned()],
            },
            ..SandboxConfig::new("/srv/project")
        };
        let s = ContainerSpec::for_execution(
            &config,
            "n",
            &SandboxExecutionRequest::new("cargo", ["fetch"]),
            Path::new("/tmp/s"),
        )
        .unwrap();
        assert_eq!(s.host_config.network_mode, "bridge");
        assert_eq!(s.labels[NETWORK_ALLOWLIST_LABEL], "crates.io,static.crates.io");
    }

    #[test]
    fn test_working_dir_must_stay_in_workspace() {
        let ok = spec(&SandboxExecutionRequest::new("ls", ["."]).in_dir("src/../lib")).unwrap();
        assert_eq!(ok.working_dir, "/workspace/lib");

        for bad in ["/etc", "../..", "/workspace/../etc", "/workspacex"] {
            let req = SandboxExecutionRequest::new("ls", ["."]).in_dir(bad);
            assert!(spec(&req).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_rejects_empty_command_and_bad_env() {
        assert!(spec(&SandboxExecutionRequest::new(" ", ["x"])).is_err());
        let req = SandboxExecutionRequest::new("env", [] as [&str; 0]).with_env("BAD=KEY", "v");
        assert!(spec(&req).is_err());
        let req = SandboxExecutionRequest::new("env", [] as [&str; 0]).with_env("1X", "v");
        assert!(spec(&req).is_err());
    }

    #[test]
    fn test_stdin_opens_input() {
        let req = SandboxExecutionRequest::new("cat", [] as [&str; 0]).with_stdin("hi");
        assert!(spec(&req).unwrap().open_stdin);
    }
}
