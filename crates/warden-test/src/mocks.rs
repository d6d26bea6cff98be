//! Mock implementations for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use warden_sandbox::frame::{StreamKind, encode_frame};
use warden_sandbox::{ContainerRuntime, ContainerSpec, OutputStream, SandboxError, SandboxResult};

/// Exit code reported for a container that was killed.
pub const KILLED_EXIT_CODE: i64 = 137;

/// What one scripted container does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockExecution {
    /// Exit code returned by `wait`.
    pub exit_code: i64,
    /// Bytes written to stdout.
    pub stdout: Vec<u8>,
    /// Bytes written to stderr.
    pub stderr: Vec<u8>,
    /// How long the container runs before its output arrives and it exits.
    pub run_for: Option<Duration>,
    /// Memory reported by `stats`.
    pub memory_bytes: Option<u64>,
}

impl MockExecution {
    /// Exits immediately with `code`.
    #[must_use]
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Runs for `duration` and then exits 0.
    #[must_use]
    pub fn running_for(duration: Duration) -> Self {
        Self {
            run_for: Some(duration),
            ..Self::default()
        }
    }

    /// Set stdout.
    #[must_use]
    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.as_bytes().to_vec();
        self
    }

    /// Set stderr.
    #[must_use]
    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.as_bytes().to_vec();
        self
    }

    /// Report `bytes` of memory use.
    #[must_use]
    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }
}

/// A recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `ping`.
    Ping,
    /// `image_exists`.
    ImageExists(String),
    /// `pull_image`.
    PullImage(String),
    /// `create`, with the spec it was given.
    Create(Box<ContainerSpec>),
    /// `start_attached`.
    Start {
        /// Container ID.
        id: String,
        /// Input forwarded.
        stdin: Option<Vec<u8>>,
    },
    /// `wait`.
    Wait(String),
    /// `stats`.
    Stats(String),
    /// `kill`.
    Kill(String),
    /// `remove`.
    Remove(String),
}

#[derive(Debug)]
struct Container {
    execution: MockExecution,
    killed: bool,
    kill_signal: Arc<Notify>,
}

#[derive(Debug, Default)]
struct State {
    unreachable: bool,
    image_missing: bool,
    fail_create: bool,
    fail_start: bool,
    queued: VecDeque<MockExecution>,
    default_execution: MockExecution,
    containers: HashMap<String, Container>,
    next_id: u64,
    calls: Vec<MockCall>,
}

/// Scripted [`ContainerRuntime`].
///
/// Each created container takes the next queued [`MockExecution`], or the
/// default one when the queue is empty. `kill` ends a running container
/// early with [`KILLED_EXIT_CODE`]. Every call is recorded.
///
/// Clones share state, so a test can keep one handle and give another to the
/// executor.
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<State>>,
}

impl MockRuntime {
    /// Reachable runtime with the image present; containers exit 0 silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// `ping` fails.
    #[must_use]
    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// The image must be pulled.
    #[must_use]
    pub fn with_missing_image(self) -> Self {
        self.lock().image_missing = true;
        self
    }

    /// `create` fails.
    #[must_use]
    pub fn failing_create(self) -> Self {
        self.lock().fail_create = true;
        self
    }

    /// `start_attached` fails.
    #[must_use]
    pub fn failing_start(self) -> Self {
        self.lock().fail_start = true;
        self
    }

    /// Behavior for containers with nothing queued.
    #[must_use]
    pub fn with_default_execution(self, execution: MockExecution) -> Self {
        self.lock().default_execution = execution;
        self
    }

    /// Queue the behavior of the next created container.
    #[must_use]
    pub fn with_execution(self, execution: MockExecution) -> Self {
        self.push_execution(execution);
        self
    }

    /// Queue the behavior of the next created container.
    pub fn push_execution(&self, execution: MockExecution) {
        self.lock().queued.push_back(execution);
    }

    /// Make the runtime reachable or unreachable from now on.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Specs passed to `create`.
    #[must_use]
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Create(spec) => Some(spec.as_ref().clone()),
                _ => None,
            })
            .collect()
    }

    /// IDs passed to `kill`.
    #[must_use]
    pub fn killed(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Kill(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// IDs passed to `remove`.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Remove(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Containers created and not yet removed.
    #[must_use]
    pub fn live_containers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of `create` calls.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.created_specs().len()
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push(call);
    }
}

fn frames(execution: &MockExecution) -> SandboxResult<Vec<u8>> {
    let mut bytes = Vec::new();
    if !execution.stdout.is_empty() {
        bytes.extend(encode_frame(StreamKind::Stdout, &execution.stdout)?);
    }
    if !execution.stderr.is_empty() {
        bytes.extend(encode_frame(StreamKind::Stderr, &execution.stderr)?);
    }
    Ok(bytes)
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> SandboxResult<()> {
        self.record(MockCall::Ping);
        if self.lock().unreachable {
            Err(SandboxError::RuntimeUnavailable(
                "Cannot connect to the container daemon".to_owned(),
            ))
        } else {
            Ok(())
        }
    }

    async fn image_exists(&self, image: &str) -> SandboxResult<bool> {
        self.record(MockCall::ImageExists(image.to_owned()));
        Ok(!self.lock().image_missing)
    }

    async fn pull_image(&self, image: &str) -> SandboxResult<()> {
        self.record(MockCall::PullImage(image.to_owned()));
        self.lock().image_missing = false;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> SandboxResult<String> {
        self.record(MockCall::Create(Box::new(spec.clone())));
        let mut state = self.lock();
        if state.fail_create {
            return Err(SandboxError::Runtime {
                operation: "create",
                reason: "scripted create failure".to_owned(),
            });
        }
        state.next_id = state.next_id.saturating_add(1);
        let id = format!("mock-{:04}", state.next_id);
        let execution = match state.queued.pop_front() {
            Some(execution) => execution,
            None => state.default_execution.clone(),
        };
        state.containers.insert(
            id.clone(),
            Container {
                execution,
                killed: false,
                kill_signal: Arc::new(Notify::new()),
            },
        );
        Ok(id)
    }

    async fn start_attached(
        &self,
        id: &str,
        stdin: Option<Vec<u8>>,
    ) -> SandboxResult<OutputStream> {
        self.record(MockCall::Start {
            id: id.to_owned(),
            stdin,
        });
        let (execution, kill_signal) = {
            let state = self.lock();
            if state.fail_start {
                return Err(SandboxError::Runtime {
                    operation: "start",
                    reason: "scripted start failure".to_owned(),
                });
            }
            let container = state.containers.get(id).ok_or_else(|| SandboxError::Runtime {
                operation: "start",
                reason: format!("No such container: {id}"),
            })?;
            (container.execution.clone(), Arc::clone(&container.kill_signal))
        };

        let bytes = frames(&execution)?;
        let (mut writer, reader) = tokio::io::duplex(bytes.len().max(1024));
        tokio::spawn(async move {
            if let Some(run_for) = execution.run_for {
                tokio::select! {
                    () = tokio::time::sleep(run_for) => {},
                    () = kill_signal.notified() => return,
                }
            }
            let _ = writer.write_all(&bytes).await;
        });
        Ok(Box::new(reader))
    }

    async fn wait(&self, id: &str) -> SandboxResult<i64> {
        self.record(MockCall::Wait(id.to_owned()));
        let state = self.lock();
        let container = state.containers.get(id).ok_or_else(|| SandboxError::Runtime {
            operation: "wait",
            reason: format!("No such container: {id}"),
        })?;
        Ok(if container.killed {
            KILLED_EXIT_CODE
        } else {
            container.execution.exit_code
        })
    }

    async fn stats(&self, id: &str) -> SandboxResult<Option<u64>> {
        self.record(MockCall::Stats(id.to_owned()));
        Ok(self
            .lock()
            .containers
            .get(id)
            .and_then(|c| c.execution.memory_bytes))
    }

    async fn kill(&self, id: &str) -> SandboxResult<()> {
        self.record(MockCall::Kill(id.to_owned()));
        if let Some(container) = self.lock().containers.get_mut(id) {
            container.killed = true;
            container.kill_signal.notify_one();
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> SandboxResult<()> {
        self.record(MockCall::Remove(id.to_owned()));
        if let Some(container) = self.lock().containers.remove(id) {
            container.kill_signal.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_queued_then_default_execution() {
        let runtime = MockRuntime::new()
            .with_default_execution(MockExecution::exit(0))
            .with_execution(MockExecution::exit(2));
        let spec = ContainerSpec {
            name: "n".to_owned(),
            image: "img".to_owned(),
            cmd: vec!["true".to_owned()],
            working_dir: "/workspace".to_owned(),
            env: Default::default(),
            user: "1000:1000".to_owned(),
            labels: Default::default(),
            open_stdin: false,
            host_config: warden_sandbox::HostConfig {
                memory_bytes: 1,
                memory_swap_bytes: 1,
                nano_cpus: 1,
                pids_limit: 1,
                read_only_rootfs: true,
                cap_drop: vec![],
                security_opt: vec![],
                seccomp_profile: String::new(),
                network_mode: "none".to_owned(),
                ipc_mode: "private".to_owned(),
                binds: vec![],
            },
        };
        let first = runtime.create(&spec).await.unwrap();
        let second = runtime.create(&spec).await.unwrap();
        assert_eq!(runtime.wait(&first).await.unwrap(), 2);
        assert_eq!(runtime.wait(&second).await.unwrap(), 0);
        assert_eq!(runtime.live_containers().len(), 2);

        runtime.remove(&first).await.unwrap();
        assert_eq!(runtime.live_containers(), [second]);
    }

    #[tokio::test]
    async fn test_kill_ends_running_container() {
        let runtime = MockRuntime::new().with_default_execution(
            MockExecution::running_for(Duration::from_secs(60)).stdout("late"),
        );
        let spec = warden_sandbox::ContainerSpec::for_execution(
            &warden_sandbox::SandboxConfig::new("/w"),
            "n",
            &warden_sandbox::SandboxExecutionRequest::new("sleep", ["60"]),
            std::path::Path::new("/tmp/s"),
        )
        .unwrap();
        let id = runtime.create(&spec).await.unwrap();
        let mut stream = runtime.start_attached(&id, None).await.unwrap();
        runtime.kill(&id).await.unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(runtime.wait(&id).await.unwrap(), KILLED_EXIT_CODE);
        assert_eq!(runtime.killed(), [id]);
    }
}
