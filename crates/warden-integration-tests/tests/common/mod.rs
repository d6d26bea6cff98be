//! Shared harness for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use warden_approval::{ApprovalManager, ApprovalRequest, AutoApproveRuleEngine, QueueConfig};
use warden_events::EventBus;
use warden_gate::Gate;
use warden_sandbox::SandboxExecutor;
use warden_test::{
    MockExecution, MockRuntime, init_test_logging, test_policy, test_sandbox_config,
};

/// A gate over a mock container runtime, with every stage publishing to one
/// event bus.
///
/// Owns a `TempDir` that acts as the workspace root. The tempdir is cleaned
/// up when the harness is dropped.
#[allow(dead_code)]
pub struct GateHarness {
    /// The assembled pipeline.
    pub gate: Gate,
    /// Handle on the mock runtime shared with the sandbox.
    pub runtime: MockRuntime,
    /// Bus shared by the approval and sandbox stages.
    pub events: EventBus,
    _workspace_dir: TempDir,
}

#[allow(dead_code)]
impl GateHarness {
    /// Harness whose containers all exit 0 with `ok` on stdout.
    pub fn new() -> Self {
        Self::with_runtime(
            MockRuntime::new().with_default_execution(MockExecution::exit(0).stdout("ok\n")),
        )
    }

    /// Harness over `runtime` with default queue settings and no rules.
    pub fn with_runtime(runtime: MockRuntime) -> Self {
        Self::build(runtime, QueueConfig::default())
    }

    /// Harness whose pending requests expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::build(
            MockRuntime::new().with_default_execution(MockExecution::exit(0)),
            QueueConfig {
                default_ttl: ttl,
                ..QueueConfig::default()
            },
        )
    }

    fn build(runtime: MockRuntime, queue: QueueConfig) -> Self {
        init_test_logging();
        let workspace_dir = TempDir::new().expect("failed to create tempdir");
        let events = EventBus::new();

        let policy = test_policy(workspace_dir.path());
        let approvals = ApprovalManager::builder()
            .events(events.clone())
            .queue_config(queue)
            .rules(AutoApproveRuleEngine::new())
            .build();
        let sandbox = SandboxExecutor::new(
            test_sandbox_config(workspace_dir.path()),
            Arc::new(runtime.clone()),
        )
        .expect("sandbox config is valid")
        .with_events(events.clone());

        Self {
            gate: Gate::new(Arc::new(policy), Arc::new(approvals), Arc::new(sandbox)),
            runtime,
            events,
            _workspace_dir: workspace_dir,
        }
    }

    /// Wait for the first pending request to appear.
    pub async fn next_pending(&self) -> ApprovalRequest {
        for _ in 0..400 {
            if let Some(request) = self.gate.approvals().get_pending().into_iter().next() {
                return request;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no approval request appeared");
    }
}
