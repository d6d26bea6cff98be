//! Policy tables.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use warden_core::RiskLevel;

/// What happens to commands that appear in neither table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    /// Unknown commands are escalated for approval at high risk.
    #[default]
    Deny,
    /// Unknown commands are rejected without the option of approval.
    DenyStrict,
}

/// A filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathOperation {
    /// Read file contents or list a directory.
    Read,
    /// Create, modify or delete.
    Write,
    /// Execute a file.
    Execute,
}

impl PathOperation {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for PathOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PathOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "execute" | "exec" => Ok(Self::Execute),
            other => Err(format!("unknown path operation '{other}'")),
        }
    }
}

/// One row of the safe or dangerous command table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDefinition {
    /// Executable name (matched against the basename of the invoked command).
    pub name: String,
    /// Regex the space-joined arguments must match. Absent means any arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_args_pattern: Option<String>,
    /// Regex that must not match the space-joined arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_args_pattern: Option<String>,
    /// Risk of running this command.
    pub risk_level: RiskLevel,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

impl CommandDefinition {
    /// Create a definition with no argument constraints.
    #[must_use]
    pub fn new(name: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            name: name.into(),
            allowed_args_pattern: None,
            blocked_args_pattern: None,
            risk_level,
            description: String::new(),
        }
    }

    /// Restrict arguments to those matching `pattern`.
    #[must_use]
    pub fn with_allowed_args(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_args_pattern = Some(pattern.into());
        self
    }

    /// Reject arguments matching `pattern`.
    #[must_use]
    pub fn with_blocked_args(mut self, pattern: impl Into<String>) -> Self {
        self.blocked_args_pattern = Some(pattern.into());
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Access granted beneath a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPermission {
    /// Directory path. Relative paths are resolved against the workspace root.
    pub path: PathBuf,
    /// Operations permitted.
    pub permissions: BTreeSet<PathOperation>,
    /// Whether the grant covers the whole subtree or only direct children.
    #[serde(default = "default_true")]
    pub recursive: bool,
}

fn default_true() -> bool {
    true
}

impl DirectoryPermission {
    /// Recursive grant of `permissions` beneath `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, permissions: &[PathOperation]) -> Self {
        Self {
            path: path.into(),
            permissions: permissions.iter().copied().collect(),
            recursive: true,
        }
    }

    /// Limit the grant to direct children of the directory.
    #[must_use]
    pub fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Whether `operation` is granted.
    #[must_use]
    pub fn permits(&self, operation: PathOperation) -> bool {
        self.permissions.contains(&operation)
    }
}

/// Complete policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistConfig {
    /// Root that relative paths resolve against.
    pub workspace_root: PathBuf,
    /// Treatment of unknown commands.
    #[serde(default)]
    pub default_policy: DefaultPolicy,
    /// Commands allowed without approval when their arguments fit.
    #[serde(default)]
    pub safe_commands: Vec<CommandDefinition>,
    /// Commands that always need approval (or a pre-approval).
    #[serde(default)]
    pub dangerous_commands: Vec<CommandDefinition>,
    /// Directory grants.
    #[serde(default)]
    pub allowed_directories: Vec<DirectoryPermission>,
    /// Globs for paths that may never be touched.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

impl AllowlistConfig {
    /// Default tables rooted at `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            default_policy: DefaultPolicy::Deny,
            safe_commands: default_safe_commands(),
            dangerous_commands: default_dangerous_commands(),
            allowed_directories: default_directories(),
            blocked_patterns: default_blocked_patterns(),
        }
    }

    /// Empty tables rooted at `workspace_root`. Everything is escalated or denied.
    #[must_use]
    pub fn empty(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            default_policy: DefaultPolicy::Deny,
            safe_commands: Vec::new(),
            dangerous_commands: Vec::new(),
            allowed_directories: Vec::new(),
            blocked_patterns: Vec::new(),
        }
    }

    /// Set the unknown-command policy.
    #[must_use]
    pub fn with_default_policy(mut self, policy: DefaultPolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

fn safe(name: &str, description: &str) -> CommandDefinition {
    CommandDefinition::new(name, RiskLevel::Low).with_description(description)
}

fn dangerous(name: &str, risk: RiskLevel, description: &str) -> CommandDefinition {
    CommandDefinition::new(name, risk).with_description(description)
}

/// Read-only inspection commands.
#[must_use]
pub(crate) fn default_safe_commands() -> Vec<CommandDefinition> {
    vec![
        safe("ls", "List directory contents"),
        safe("pwd", "Print working directory"),
        safe("cat", "Print file contents"),
        safe("head", "Print the start of a file"),
        safe("tail", "Print the end of a file").with_blocked_args(r"(^|\s)-(f|F)\b"),
        safe("wc", "Count lines, words and bytes"),
        safe("grep", "Search file contents"),
        safe("rg", "Search file contents"),
        safe("find", "Search for files")
            .with_blocked_args(r"(^|\s)-(delete|exec|execdir|ok|okdir|fprint\w*)(\s|$)"),
        safe("tree", "Show a directory tree"),
        safe("stat", "Show file metadata"),
        safe("file", "Identify file type"),
        safe("du", "Report disk usage"),
        safe("df", "Report filesystem usage"),
        safe("echo", "Print arguments"),
        safe("date", "Print the date"),
        safe("whoami", "Print the current user"),
        safe("which", "Locate an executable"),
        safe("diff", "Compare files"),
        safe("sort", "Sort lines").with_blocked_args(r"(^|\s)-o\b|--output"),
        safe("uniq", "Filter repeated lines"),
        safe("git", "Inspect a git repository").with_allowed_args(
            r"^(status|log|diff|show|branch|remote|rev-parse|ls-files|blame|tag)(\s|$)",
        ),
    ]
}

/// Mutating commands that need a human.
#[must_use]
pub(crate) fn default_dangerous_commands() -> Vec<CommandDefinition> {
    vec![
        dangerous("rm", RiskLevel::High, "Remove files")
            .with_blocked_args(r"(^|\s)(/|/\*|~|~/)(\s|$)|--no-preserve-root"),
        dangerous("rmdir", RiskLevel::Medium, "Remove directories"),
        dangerous("mv", RiskLevel::Medium, "Move or rename files"),
        dangerous("cp", RiskLevel::Medium, "Copy files"),
        dangerous("mkdir", RiskLevel::Low, "Create directories"),
        dangerous("touch", RiskLevel::Low, "Create or touch files"),
        dangerous("sed", RiskLevel::Medium, "Stream editor (may edit in place)"),
        dangerous("tee", RiskLevel::Medium, "Write stdin to files"),
        dangerous("chmod", RiskLevel::High, "Change file modes"),
        dangerous("chown", RiskLevel::High, "Change file ownership"),
        dangerous("ln", RiskLevel::Medium, "Create links"),
        dangerous("curl", RiskLevel::High, "Transfer data over the network"),
        dangerous("wget", RiskLevel::High, "Download over the network"),
        dangerous("ssh", RiskLevel::High, "Remote shell"),
        dangerous("scp", RiskLevel::High, "Remote copy"),
        dangerous("rsync", RiskLevel::High, "Remote sync"),
        dangerous("pip", RiskLevel::High, "Install Python packages"),
        dangerous("cargo", RiskLevel::Medium, "Build and run Rust crates"),
        dangerous("npm", RiskLevel::Medium, "Node package manager"),
        dangerous("yarn", RiskLevel::Medium, "Node package manager"),
        dangerous("pnpm", RiskLevel::Medium, "Node package manager"),
        dangerous("docker", RiskLevel::High, "Container runtime"),
        dangerous("sh", RiskLevel::High, "Shell interpreter"),
        dangerous("bash", RiskLevel::High, "Shell interpreter"),
        dangerous("python", RiskLevel::High, "Python interpreter"),
        dangerous("python3", RiskLevel::High, "Python interpreter"),
        dangerous("node", RiskLevel::High, "Node interpreter"),
        dangerous("dd", RiskLevel::Critical, "Raw block copy"),
        dangerous("mkfs", RiskLevel::Critical, "Create a filesystem"),
        dangerous("crontab", RiskLevel::Critical, "Schedule jobs"),
    ]
}

fn default_directories() -> Vec<DirectoryPermission> {
    vec![
        DirectoryPermission::new(
            ".",
            &[
                PathOperation::Read,
                PathOperation::Write,
                PathOperation::Execute,
            ],
        ),
        DirectoryPermission::new("/tmp", &[PathOperation::Read, PathOperation::Write]),
    ]
}

/// Secrets, keys and credential stores.
#[must_use]
pub(crate) fn default_blocked_patterns() -> Vec<String> {
    [
        "**/.env",
        "**/.env.*",
        "**/*.pem",
        "**/*.key",
        "**/*.p12",
        "**/*.pfx",
        "**/id_rsa*",
        "**/id_ecdsa*",
        "**/id_ed25519*",
        "**/.ssh/**",
        "**/.gnupg/**",
        "**/.aws/credentials",
        "**/.docker/config.json",
        "**/.netrc",
        "**/.npmrc",
        "**/credentials.json",
        "**/secrets.*",
        "/etc/shadow",
        "/etc/sudoers",
        "/etc/sudoers.d/**",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}
