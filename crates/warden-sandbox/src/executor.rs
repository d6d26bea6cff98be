//! The sandbox executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_events::{EventBus, EventMetadata, WardenEvent};

use crate::config::SandboxConfig;
use crate::docker::DockerCliRuntime;
use crate::error::{SandboxError, SandboxResult};
use crate::frame::Demuxer;
use crate::runtime::ContainerRuntime;
use crate::spec::ContainerSpec;
use crate::types::{
    ActiveContainer, SandboxExecutionRequest, SandboxExecutionResult, TIMEOUT_EXIT_CODE,
};

const EVENT_SOURCE: &str = "sandbox";
const READ_BUFFER: usize = 16 * 1024;

type Registry = Arc<Mutex<HashMap<String, ActiveContainer>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, ActiveContainer>> {
    registry.lock().unwrap_or_else(|e| {
        warn!("Active container registry lock poisoned, recovering");
        e.into_inner()
    })
}

/// Runs commands in throwaway containers.
///
/// Every execution gets a fresh container and a fresh host scratch directory
/// mounted at `/tmp`. Both are destroyed when the execution ends, whether it
/// exits, times out, fails, or the caller stops waiting.
pub struct SandboxExecutor {
    config: Arc<SandboxConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    events: Option<EventBus>,
    ready: OnceCell<()>,
    active: Registry,
}

impl SandboxExecutor {
    /// Create an executor over `runtime`.
    ///
    /// # Errors
    ///
    /// [`SandboxError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SandboxConfig, runtime: Arc<dyn ContainerRuntime>) -> SandboxResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            runtime,
            events: None,
            ready: OnceCell::new(),
            active: Arc::default(),
        })
    }

    /// Create an executor driving the configured docker binary.
    ///
    /// # Errors
    ///
    /// [`SandboxError::RuntimeUnavailable`] if the binary is not installed,
    /// or [`SandboxError::InvalidConfig`].
    pub fn with_docker(config: SandboxConfig) -> SandboxResult<Self> {
        let runtime = DockerCliRuntime::new(&config.runtime_binary)?;
        Self::new(config, Arc::new(runtime))
    }

    /// Publish execution events to `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Check the runtime, make sure the image is present and create the host
    /// workspace directory.
    ///
    /// Runs once. A failure is not remembered, so the next call tries again.
    ///
    /// # Errors
    ///
    /// [`SandboxError::RuntimeUnavailable`], [`SandboxError::ImagePull`] or
    /// [`SandboxError::Io`].
    pub async fn initialize(&self) -> SandboxResult<()> {
        self.ready
            .get_or_try_init(|| async {
                self.runtime.ping().await.map_err(|e| match e {
                    SandboxError::RuntimeUnavailable(_) => e,
                    other => SandboxError::RuntimeUnavailable(other.to_string()),
                })?;

                let image = &self.config.image;
                if self.runtime.image_exists(image).await? {
                    debug!(image, "Sandbox image present");
                } else {
                    info!(image, "Pulling sandbox image");
                    self.runtime.pull_image(image).await.map_err(|e| match e {
                        SandboxError::ImagePull { .. } => e,
                        other => SandboxError::ImagePull {
                            image: image.clone(),
                            reason: other.to_string(),
                        },
                    })?;
                }

                tokio::fs::create_dir_all(&self.config.workspace_dir).await?;
                info!(
                    image,
                    workspace = %self.config.workspace_dir.display(),
                    "Sandbox ready"
                );
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Whether the sandbox can run commands right now.
    pub async fn is_available(&self) -> bool {
        match self.initialize().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Sandbox unavailable");
                false
            },
        }
    }

    /// Run `request` in a new container.
    ///
    /// A command that exits non-zero or times out is a successful call; see
    /// [`SandboxExecutionResult::timed_out`].
    ///
    /// # Errors
    ///
    /// Infrastructure failures: the runtime is unreachable, the request is
    /// malformed, or a runtime call fails.
    pub async fn execute(
        &self,
        request: SandboxExecutionRequest,
    ) -> SandboxResult<SandboxExecutionResult> {
        self.initialize().await?;

        let execution_id = Uuid::new_v4();
        let name = format!("{}-{}", self.config.name_prefix, execution_id.simple());
        let timeout = self.config.effective_timeout(request.timeout);

        let scratch = tempfile::Builder::new().prefix("warden-scratch-").tempdir()?;
        let spec = ContainerSpec::for_execution(&self.config, &name, &request, scratch.path())?;

        let run = Run {
            execution_id,
            runtime: Arc::clone(&self.runtime),
            registry: Arc::clone(&self.active),
            events: self.events.clone(),
            max_output_bytes: self.config.max_output_bytes,
            timeout,
        };

        // Detached so that dropping the caller's future cannot skip teardown.
        tokio::spawn(run.execute(spec, request, scratch))
            .await
            .map_err(|e| SandboxError::runtime("execute", format!("execution task failed: {e}")))?
    }

    /// Run `command` with `args` under the default timeout.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn exec<I, S>(&self, command: &str, args: I) -> SandboxResult<SandboxExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(SandboxExecutionRequest::new(command, args)).await
    }

    /// Run `script` with `sh -c`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn shell(&self, script: &str) -> SandboxResult<SandboxExecutionResult> {
        self.exec("sh", ["-c", script]).await
    }

    /// Containers currently running.
    #[must_use]
    pub fn active_containers(&self) -> Vec<ActiveContainer> {
        let mut containers: Vec<_> = lock(&self.active).values().cloned().collect();
        containers.sort_by_key(|c| c.started_at);
        containers
    }

    /// Kill every running container. Their executions then finish with the
    /// runtime's exit code and are torn down as usual.
    ///
    /// Returns how many kills succeeded.
    pub async fn kill_all_containers(&self) -> usize {
        let ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        let mut killed = 0usize;
        for id in ids {
            match self.runtime.kill(&id).await {
                Ok(()) => killed = killed.saturating_add(1),
                Err(e) => warn!(container = %id, error = %e, "Failed to kill container"),
            }
        }
        if killed > 0 {
            info!(killed, "Killed sandbox containers");
        }
        killed
    }
}

impl std::fmt::Debug for SandboxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxExecutor")
            .field("image", &self.config.image)
            .field("runtime", &self.runtime)
            .field("initialized", &self.ready.initialized())
            .field("active", &lock(&self.active).len())
            .finish_non_exhaustive()
    }
}

/// Removes a container from the registry when dropped.
struct Registration {
    registry: Registry,
    id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.id);
    }
}

enum Finish {
    Exited(i64),
    TimedOut,
    Failed(SandboxError),
}

/// One execution's share of the executor, moved into its task.
struct Run {
    execution_id: Uuid,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Registry,
    events: Option<EventBus>,
    max_output_bytes: usize,
    timeout: Duration,
}

impl Run {
    fn emit(&self, event: WardenEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    fn fail(&self, container: Option<&str>, error: &SandboxError) {
        warn!(
            execution_id = %self.execution_id,
            container,
            error = %error,
            "Sandbox execution failed"
        );
        self.emit(WardenEvent::ExecutionFailed {
            metadata: EventMetadata::new(EVENT_SOURCE),
            execution_id: self.execution_id,
            container: container.map(str::to_owned),
            error: error.to_string(),
        });
    }

    async fn execute(
        self,
        spec: ContainerSpec,
        request: SandboxExecutionRequest,
        scratch: tempfile::TempDir,
    ) -> SandboxResult<SandboxExecutionResult> {
        let name = spec.name.clone();
        let display_cmd = request.display_command();

        let id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                // The create may have got as far as naming a container.
                if let Err(cleanup) = self.runtime.remove(&name).await {
                    debug!(container = %name, error = %cleanup, "No partial container to remove");
                }
                self.fail(Some(&name), &e);
                return Err(e);
            },
        };

        let registration = Registration {
            registry: Arc::clone(&self.registry),
            id: id.clone(),
        };
        lock(&self.registry).insert(
            id.clone(),
            ActiveContainer {
                id: id.clone(),
                name: name.clone(),
                command: display_cmd.clone(),
                started_at: Utc::now(),
            },
        );
        info!(
            execution_id = %self.execution_id,
            container = %name,
            command = %display_cmd,
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "Sandbox execution started"
        );
        self.emit(WardenEvent::ExecutionStarted {
            metadata: EventMetadata::new(EVENT_SOURCE),
            execution_id: self.execution_id,
            container: name.clone(),
            command: display_cmd,
        });

        let started = Instant::now();
        let mut demux = Demuxer::new(self.max_output_bytes);
        let finish = match tokio::time::timeout(
            self.timeout,
            attach_and_wait(self.runtime.as_ref(), &id, request.stdin, &mut demux),
        )
        .await
        {
            Ok(Ok(code)) => Finish::Exited(code),
            Ok(Err(e)) => Finish::Failed(e),
            Err(_) => {
                if let Err(e) = self.runtime.kill(&id).await {
                    warn!(container = %name, error = %e, "Failed to kill timed out container");
                }
                Finish::TimedOut
            },
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        // Teardown runs for every outcome.
        let memory_used_bytes = match self.runtime.stats(&id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(container = %name, error = %e, "Memory sample unavailable");
                None
            },
        };
        if let Err(e) = self.runtime.remove(&id).await {
            warn!(container = %name, error = %e, "Failed to remove sandbox container");
        }
        drop(registration);
        if let Err(e) = scratch.close() {
            warn!(container = %name, error = %e, "Failed to remove scratch directory");
        }

        let (exit_code, timed_out) = match finish {
            Finish::Exited(code) => (code, false),
            Finish::TimedOut => (TIMEOUT_EXIT_CODE, true),
            Finish::Failed(e) => {
                self.fail(Some(&name), &e);
                return Err(e);
            },
        };

        info!(
            execution_id = %self.execution_id,
            container = %name,
            exit_code,
            duration_ms,
            timed_out,
            "Sandbox execution completed"
        );
        self.emit(WardenEvent::ExecutionCompleted {
            metadata: EventMetadata::new(EVENT_SOURCE),
            execution_id: self.execution_id,
            container: name,
            exit_code,
            duration_ms,
            timed_out,
        });

        Ok(SandboxExecutionResult {
            exit_code,
            stdout: demux.stdout_lossy(),
            stderr: demux.stderr_lossy(),
            duration_ms,
            timed_out,
            memory_used_bytes,
            output_truncated: demux.truncated(),
        })
    }
}

async fn attach_and_wait(
    runtime: &dyn ContainerRuntime,
    id: &str,
    stdin: Option<Vec<u8>>,
    demux: &mut Demuxer,
) -> SandboxResult<i64> {
    let mut stream = runtime.start_attached(id, stdin).await?;
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        demux.push(&buf[..n])?;
    }
    demux.finish()?;
    runtime.wait(id).await
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
