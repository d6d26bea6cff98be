//! Builds the trust-boundary stages from resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use warden_approval::{ApprovalManager, JsonFileSnapshotStore};
use warden_config::ResolvedConfig;
use warden_events::EventBus;
use warden_gate::Gate;
use warden_policy::PolicyEngine;
use warden_sandbox::SandboxExecutor;

use crate::config_bridge;

/// Everything a command needs, built once per invocation.
pub(crate) struct Stages {
    pub(crate) events: EventBus,
    pub(crate) policy: Arc<PolicyEngine>,
    pub(crate) approvals: Arc<ApprovalManager>,
    pub(crate) state: Option<JsonFileSnapshotStore>,
    workspace: PathBuf,
}

impl Stages {
    /// Policy and approval stages, with approval state restored from the
    /// snapshot file if one is configured.
    pub(crate) async fn build(resolved: &ResolvedConfig) -> Result<Self> {
        let config = &resolved.config;
        let cwd = std::env::current_dir().context("reading current directory")?;
        let events = EventBus::with_capacity(config.events.channel_capacity);

        let allowlist = config_bridge::policy_config(&config.policy, &cwd)?;
        let workspace = allowlist.workspace_root.clone();
        let policy = PolicyEngine::new(allowlist).context("building policy engine")?;

        let approvals = ApprovalManager::builder()
            .events(events.clone())
            .queue_config(config_bridge::queue_config(&config.approval))
            .config(config_bridge::manager_config(&config.approval)?)
            .rules(config_bridge::rule_engine(&config.approval))
            .build();

        let state = (!config.approval.state_file.is_empty())
            .then(|| JsonFileSnapshotStore::new(&config.approval.state_file));
        if let Some(store) = &state {
            let restored = approvals
                .restore(store)
                .await
                .with_context(|| format!("restoring {}", store.path().display()))?;
            info!(path = %store.path().display(), restored, "Approval state");
        }

        Ok(Self {
            events,
            policy: Arc::new(policy),
            approvals: Arc::new(approvals),
            state,
            workspace,
        })
    }

    /// A Docker-backed executor mounting the workspace root.
    pub(crate) fn sandbox(&self, resolved: &ResolvedConfig) -> Result<SandboxExecutor> {
        let config = config_bridge::sandbox_config(&resolved.config.sandbox, &self.workspace);
        Ok(SandboxExecutor::with_docker(config)?.with_events(self.events.clone()))
    }

    /// The full pipeline.
    pub(crate) fn gate(&self, resolved: &ResolvedConfig) -> Result<Gate> {
        Ok(Gate::new(
            Arc::clone(&self.policy),
            Arc::clone(&self.approvals),
            Arc::new(self.sandbox(resolved)?),
        ))
    }

    /// Write approval state back, if persistence is configured.
    pub(crate) async fn save(&self) -> Result<()> {
        if let Some(store) = &self.state {
            self.approvals
                .persist(store)
                .await
                .with_context(|| format!("saving {}", store.path().display()))?;
        }
        Ok(())
    }
}
