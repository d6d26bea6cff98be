//! The policy engine.
//!
//! Check order for commands:
//! 1. Blocklist → hard deny (critical)
//! 2. Injection scan → hard deny (high)
//! 3. Safe table → allow, or escalate (medium) on an argument mismatch
//! 4. Dangerous table → allow if pre-approved, else escalate at the row's risk
//! 5. Unknown → escalate (high), or hard deny under [`DefaultPolicy::DenyStrict`]
//!
//! Check order for paths:
//! 1. Normalize against the workspace root and resolve symlinks
//! 2. Blocked globs → hard deny
//! 3. Most specific directory grant → allow, or escalate

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};
use warden_core::RiskLevel;

use crate::config::{
    AllowlistConfig, CommandDefinition, DefaultPolicy, DirectoryPermission, PathOperation,
};
use crate::decision::AllowlistDecision;
use crate::error::{PolicyError, PolicyResult};
use crate::hash::operation_hash;
use crate::injection::detect_injection;
use crate::path::resolve;
use crate::tokenize::tokenize;

/// Executables that are never run, whatever the arguments.
pub const BLOCKLISTED_COMMANDS: &[(&str, &str)] = &[
    ("sudo", "privilege escalation"),
    ("su", "privilege escalation"),
    ("doas", "privilege escalation"),
    ("pkexec", "privilege escalation"),
    ("runuser", "privilege escalation"),
    ("systemctl", "service control"),
    ("service", "service control"),
    ("init", "service control"),
    ("launchctl", "service control"),
    ("shutdown", "system power control"),
    ("reboot", "system power control"),
    ("halt", "system power control"),
    ("poweroff", "system power control"),
    ("kill", "process control"),
    ("killall", "process control"),
    ("pkill", "process control"),
    ("nc", "raw network listener"),
    ("netcat", "raw network listener"),
    ("ncat", "raw network listener"),
    ("socat", "raw network listener"),
    ("telnet", "raw network listener"),
    ("eval", "shell code evaluation"),
    ("exec", "shell code evaluation"),
    ("source", "shell code evaluation"),
    (".", "shell code evaluation"),
];

struct CompiledCommand {
    definition: CommandDefinition,
    allowed: Option<Regex>,
    blocked: Option<Regex>,
}

impl CompiledCommand {
    fn compile(definition: CommandDefinition) -> PolicyResult<Self> {
        if definition.name.trim().is_empty() {
            return Err(PolicyError::EmptyCommandName);
        }
        let allowed = compile_args_pattern(
            &definition.name,
            definition.allowed_args_pattern.as_deref(),
        )?;
        let blocked = compile_args_pattern(
            &definition.name,
            definition.blocked_args_pattern.as_deref(),
        )?;
        Ok(Self {
            definition,
            allowed,
            blocked,
        })
    }

    fn args_allowed(&self, joined: &str) -> bool {
        self.allowed.as_ref().is_none_or(|re| re.is_match(joined))
    }

    fn args_blocked(&self, joined: &str) -> bool {
        self.blocked.as_ref().is_some_and(|re| re.is_match(joined))
    }
}

fn compile_args_pattern(command: &str, pattern: Option<&str>) -> PolicyResult<Option<Regex>> {
    pattern
        .map(|p| {
            RegexBuilder::new(p)
                .build()
                .map_err(|e| PolicyError::InvalidArgsPattern {
                    command: command.to_owned(),
                    pattern: p.to_owned(),
                    reason: e.to_string(),
                })
        })
        .transpose()
}

struct CompiledGlob {
    source: String,
    matcher: GlobMatcher,
}

fn compile_glob(root: &Path, pattern: &str) -> PolicyResult<CompiledGlob> {
    // Relative globs are anchored at the workspace root; `**/...` floats.
    let anchored = if pattern.starts_with('/') || pattern.starts_with("**") {
        pattern.to_owned()
    } else {
        format!("{}/{pattern}", root.display())
    };
    let glob = GlobBuilder::new(&anchored)
        .literal_separator(true)
        .build()
        .map_err(|e| PolicyError::InvalidGlob {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;
    Ok(CompiledGlob {
        source: pattern.to_owned(),
        matcher: glob.compile_matcher(),
    })
}

struct ResolvedDirectory {
    grant: DirectoryPermission,
    resolved: PathBuf,
}

impl ResolvedDirectory {
    fn contains(&self, path: &Path) -> bool {
        if self.grant.recursive {
            path.starts_with(&self.resolved)
        } else {
            path == self.resolved || path.parent() == Some(self.resolved.as_path())
        }
    }

    fn depth(&self) -> usize {
        self.resolved.components().count()
    }
}

struct PolicyState {
    default_policy: DefaultPolicy,
    safe: HashMap<String, CompiledCommand>,
    dangerous: HashMap<String, CompiledCommand>,
    directories: Vec<ResolvedDirectory>,
    blocked: Vec<CompiledGlob>,
    approved: HashSet<String>,
}

/// Deny-by-default policy over commands and paths.
///
/// Evaluation is a pure function of the current tables and the set of
/// pre-approved operation hashes. Mutations take effect for every check that
/// starts after they return.
pub struct PolicyEngine {
    root: PathBuf,
    state: RwLock<PolicyState>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("PolicyEngine")
            .field("root", &self.root)
            .field("safe_commands", &state.safe.len())
            .field("dangerous_commands", &state.dangerous.len())
            .field("directories", &state.directories.len())
            .field("blocked_patterns", &state.blocked.len())
            .field("pre_approved", &state.approved.len())
            .finish()
    }
}

impl PolicyEngine {
    /// Compile `config` into an engine.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if any argument pattern or blocked glob is malformed.
    pub fn new(config: AllowlistConfig) -> PolicyResult<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let root = resolve(&cwd, &config.workspace_root);
        let mut state = PolicyState {
            default_policy: config.default_policy,
            safe: HashMap::new(),
            dangerous: HashMap::new(),
            directories: Vec::new(),
            blocked: Vec::new(),
            approved: HashSet::new(),
        };

        for def in config.safe_commands {
            state.safe.insert(def.name.clone(), CompiledCommand::compile(def)?);
        }
        for def in config.dangerous_commands {
            state
                .dangerous
                .insert(def.name.clone(), CompiledCommand::compile(def)?);
        }
        for grant in config.allowed_directories {
            let resolved = resolve(&root, &grant.path);
            state.directories.push(ResolvedDirectory { grant, resolved });
        }
        for pattern in &config.blocked_patterns {
            state.blocked.push(compile_glob(&root, pattern)?);
        }

        info!(
            root = %root.display(),
            safe = state.safe.len(),
            dangerous = state.dangerous.len(),
            "Policy engine initialized"
        );

        Ok(Self {
            root,
            state: RwLock::new(state),
        })
    }

    /// Engine with the default tables rooted at `workspace_root`.
    ///
    /// # Errors
    ///
    /// Propagates [`PolicyEngine::new`] errors.
    pub fn with_defaults(workspace_root: impl Into<PathBuf>) -> PolicyResult<Self> {
        Self::new(AllowlistConfig::new(workspace_root))
    }

    /// Resolved workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.root
    }

    fn read(&self) -> RwLockReadGuard<'_, PolicyState> {
        self.state.read().unwrap_or_else(|e| {
            warn!("Policy state lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicyState> {
        self.state.write().unwrap_or_else(|e| {
            warn!("Policy state lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Judge a command invocation.
    #[must_use]
    pub fn check_command<S: AsRef<str>>(&self, command: &str, args: &[S]) -> AllowlistDecision {
        let decision = self.evaluate_command(command, args);
        debug!(
            command,
            allowed = decision.allowed,
            requires_approval = decision.requires_approval,
            risk = %decision.risk_level,
            reason = %decision.reason,
            "Command checked"
        );
        decision
    }

    fn evaluate_command<S: AsRef<str>>(&self, command: &str, args: &[S]) -> AllowlistDecision {
        let command = command.trim();
        if command.is_empty() {
            return AllowlistDecision::deny("empty command", RiskLevel::High);
        }
        let name = executable_name(command);

        if let Some((_, category)) = BLOCKLISTED_COMMANDS.iter().find(|(c, _)| *c == name) {
            return AllowlistDecision::deny(
                format!("'{name}' is never allowed ({category})"),
                RiskLevel::Critical,
            );
        }

        let joined = args
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ");
        let invocation = if joined.is_empty() {
            command.to_owned()
        } else {
            format!("{command} {joined}")
        };
        if let Some(pattern) = detect_injection(&invocation) {
            return AllowlistDecision::deny(
                format!("shell injection detected: {pattern}"),
                RiskLevel::High,
            );
        }

        let state = self.read();

        // Only bare names resolve through the tables. A path-qualified
        // executable may be anything, so it is judged as unknown.
        let listed = if command.contains('/') { None } else { Some(name) };

        if let Some(entry) = listed.and_then(|n| state.safe.get(n)) {
            if entry.args_blocked(&joined) {
                return AllowlistDecision::escalate(
                    format!("arguments to '{name}' match a blocked pattern"),
                    RiskLevel::Medium,
                );
            }
            if !entry.args_allowed(&joined) {
                return AllowlistDecision::escalate(
                    format!("arguments to '{name}' are not a recognized safe usage"),
                    RiskLevel::Medium,
                );
            }
            return AllowlistDecision::allow(
                format!("'{name}' is a safe command"),
                entry.definition.risk_level,
            );
        }

        if let Some(entry) = listed.and_then(|n| state.dangerous.get(n)) {
            if entry.args_blocked(&joined) {
                return AllowlistDecision::deny(
                    format!("arguments to '{name}' match a blocked pattern"),
                    RiskLevel::Critical,
                );
            }
            if state.approved.contains(&operation_hash(command, args)) {
                return AllowlistDecision::allow(
                    format!("'{name}' was pre-approved for these exact arguments"),
                    entry.definition.risk_level,
                );
            }
            return AllowlistDecision::escalate(
                format!("'{name}' requires approval: {}", entry.definition.description),
                entry.definition.risk_level,
            );
        }

        match state.default_policy {
            DefaultPolicy::Deny => AllowlistDecision::escalate(
                format!("'{command}' is not in the allowlist"),
                RiskLevel::High,
            ),
            DefaultPolicy::DenyStrict => AllowlistDecision::deny(
                format!("'{command}' is not in the allowlist"),
                RiskLevel::High,
            ),
        }
    }

    /// Tokenize a raw command line and judge it.
    ///
    /// Lines that cannot be tokenized are denied.
    #[must_use]
    pub fn check_command_line(&self, line: &str) -> AllowlistDecision {
        match tokenize(line) {
            Ok(words) => match words.split_first() {
                Some((command, args)) => self.check_command(command, args),
                None => AllowlistDecision::deny("empty command line", RiskLevel::High),
            },
            Err(e) => AllowlistDecision::deny(
                format!("command line could not be parsed: {e}"),
                RiskLevel::High,
            ),
        }
    }

    /// Judge a filesystem access.
    #[must_use]
    pub fn check_path(&self, path: impl AsRef<Path>, operation: PathOperation) -> AllowlistDecision {
        let requested = path.as_ref();
        let resolved = resolve(&self.root, requested);
        let state = self.read();

        if let Some(glob) = state.blocked.iter().find(|g| g.matcher.is_match(&resolved)) {
            debug!(path = %resolved.display(), pattern = %glob.source, "Path blocked");
            return AllowlistDecision::deny(
                format!(
                    "{} matches blocked pattern '{}'",
                    resolved.display(),
                    glob.source
                ),
                RiskLevel::Critical,
            );
        }

        let best = state
            .directories
            .iter()
            .filter(|d| d.contains(&resolved))
            .max_by_key(|d| d.depth());

        let decision = match best {
            Some(dir) if dir.grant.permits(operation) => AllowlistDecision::allow(
                format!(
                    "{operation} permitted under {}",
                    dir.resolved.display()
                ),
                RiskLevel::Low,
            ),
            Some(dir) => AllowlistDecision::escalate(
                format!(
                    "{operation} not permitted under {}",
                    dir.resolved.display()
                ),
                path_risk(operation),
            ),
            None => AllowlistDecision::escalate(
                format!("{} is outside every allowed directory", resolved.display()),
                path_risk(operation).max(RiskLevel::High),
            ),
        };
        debug!(
            path = %resolved.display(),
            %operation,
            allowed = decision.allowed,
            "Path checked"
        );
        decision
    }

    /// Add or replace a safe-table entry.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the definition's patterns do not compile.
    pub fn add_safe_command(&self, definition: CommandDefinition) -> PolicyResult<()> {
        let compiled = CompiledCommand::compile(definition)?;
        let name = compiled.definition.name.clone();
        self.write().safe.insert(name.clone(), compiled);
        info!(command = %name, "Safe command added");
        Ok(())
    }

    /// Add or replace a dangerous-table entry.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the definition's patterns do not compile.
    pub fn add_dangerous_command(&self, definition: CommandDefinition) -> PolicyResult<()> {
        let compiled = CompiledCommand::compile(definition)?;
        let name = compiled.definition.name.clone();
        self.write().dangerous.insert(name.clone(), compiled);
        info!(command = %name, "Dangerous command added");
        Ok(())
    }

    /// Remove a command from both tables. Returns whether anything was removed.
    pub fn remove_command(&self, name: &str) -> bool {
        let mut state = self.write();
        let removed_safe = state.safe.remove(name).is_some();
        let removed_dangerous = state.dangerous.remove(name).is_some();
        removed_safe || removed_dangerous
    }

    /// Add a directory grant.
    pub fn add_allowed_directory(&self, grant: DirectoryPermission) {
        let resolved = resolve(&self.root, &grant.path);
        info!(path = %resolved.display(), recursive = grant.recursive, "Directory grant added");
        self.write()
            .directories
            .push(ResolvedDirectory { grant, resolved });
    }

    /// Add a blocked-path glob.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidGlob`] if the glob is malformed.
    pub fn add_blocked_pattern(&self, pattern: &str) -> PolicyResult<()> {
        let compiled = compile_glob(&self.root, pattern)?;
        self.write().blocked.push(compiled);
        info!(pattern, "Blocked pattern added");
        Ok(())
    }

    /// Pre-approve one exact dangerous invocation. Returns its hash.
    pub fn approve_operation<S: AsRef<str>>(&self, command: &str, args: &[S]) -> String {
        let hash = operation_hash(command.trim(), args);
        self.write().approved.insert(hash.clone());
        info!(command, "Operation pre-approved");
        hash
    }

    /// Revoke a pre-approval. Returns whether one existed.
    pub fn revoke_approval<S: AsRef<str>>(&self, command: &str, args: &[S]) -> bool {
        let hash = operation_hash(command.trim(), args);
        self.write().approved.remove(&hash)
    }

    /// Whether this exact invocation is pre-approved.
    #[must_use]
    pub fn is_pre_approved<S: AsRef<str>>(&self, command: &str, args: &[S]) -> bool {
        self.read()
            .approved
            .contains(&operation_hash(command.trim(), args))
    }

    /// Current tables as a configuration value.
    #[must_use]
    pub fn config(&self) -> AllowlistConfig {
        let state = self.read();
        let mut safe: Vec<_> = state.safe.values().map(|c| c.definition.clone()).collect();
        safe.sort_by(|a, b| a.name.cmp(&b.name));
        let mut dangerous: Vec<_> = state
            .dangerous
            .values()
            .map(|c| c.definition.clone())
            .collect();
        dangerous.sort_by(|a, b| a.name.cmp(&b.name));

        AllowlistConfig {
            workspace_root: self.root.clone(),
            default_policy: state.default_policy,
            safe_commands: safe,
            dangerous_commands: dangerous,
            allowed_directories: state.directories.iter().map(|d| d.grant.clone()).collect(),
            blocked_patterns: state.blocked.iter().map(|g| g.source.clone()).collect(),
        }
    }
}

/// Basename of an executable path (`/usr/bin/rm` → `rm`).
fn executable_name(command: &str) -> &str {
    if command == "." {
        return command;
    }
    command.rsplit('/').next().unwrap_or(command)
}

fn path_risk(operation: PathOperation) -> RiskLevel {
    match operation {
        PathOperation::Read => RiskLevel::Medium,
        PathOperation::Write | PathOperation::Execute => RiskLevel::High,
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
