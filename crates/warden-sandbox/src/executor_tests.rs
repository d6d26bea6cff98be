use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::*;
use crate::frame::{StreamKind, encode_frame};
use crate::runtime::OutputStream;

// ---------------------------------------------------------------------------
// Scripted runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Script {
    reachable: bool,
    image_present: bool,
    fail_create: bool,
    fail_start: bool,
    exit_code: i64,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Delay before output is written and the stream closes.
    run_for: Option<Duration>,
    memory: Option<u64>,
}

#[derive(Debug, Default)]
struct FakeRuntime {
    script: Script,
    calls: StdMutex<Vec<String>>,
    specs: StdMutex<Vec<ContainerSpec>>,
    stdin_seen: StdMutex<Option<Vec<u8>>>,
}

impl FakeRuntime {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    fn ok(exit_code: i64, stdout: &str) -> Arc<Self> {
        Self::new(Script {
            reachable: true,
            image_present: true,
            exit_code,
            stdout: stdout.as_bytes().to_vec(),
            ..Script::default()
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> SandboxResult<()> {
        self.record("ping");
        if self.script.reachable {
            Ok(())
        } else {
            Err(SandboxError::runtime("ping", "connection refused"))
        }
    }

    async fn image_exists(&self, image: &str) -> SandboxResult<bool> {
        self.record(format!("image_exists {image}"));
        Ok(self.script.image_present)
    }

    async fn pull_image(&self, image: &str) -> SandboxResult<()> {
        self.record(format!("pull {image}"));
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> SandboxResult<String> {
        self.record(format!("create {}", spec.name));
        if self.script.fail_create {
            return Err(SandboxError::runtime("create", "no space left on device"));
        }
        self.specs.lock().unwrap().push(spec.clone());
        Ok(format!("id-{}", spec.name))
    }

    async fn start_attached(
        &self,
        id: &str,
        stdin: Option<Vec<u8>>,
    ) -> SandboxResult<OutputStream> {
        self.record(format!("start {id}"));
        if self.script.fail_start {
            return Err(SandboxError::runtime("start", "exec format error"));
        }
        *self.stdin_seen.lock().unwrap() = stdin;

        let mut bytes = Vec::new();
        if !self.script.stdout.is_empty() {
            bytes.extend(encode_frame(StreamKind::Stdout, &self.script.stdout)?);
        }
        if !self.script.stderr.is_empty() {
            bytes.extend(encode_frame(StreamKind::Stderr, &self.script.stderr)?);
        }
        let (mut writer, reader) = tokio::io::duplex(1024 * 1024);
        let delay = self.script.run_for;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _ = writer.write_all(&bytes).await;
        });
        Ok(Box::new(reader))
    }

    async fn wait(&self, id: &str) -> SandboxResult<i64> {
        self.record(format!("wait {id}"));
        Ok(self.script.exit_code)
    }

    async fn stats(&self, id: &str) -> SandboxResult<Option<u64>> {
        self.record(format!("stats {id}"));
        Ok(self.script.memory)
    }

    async fn kill(&self, id: &str) -> SandboxResult<()> {
        self.record(format!("kill {id}"));
        Ok(())
    }

    async fn remove(&self, id: &str) -> SandboxResult<()> {
        self.record(format!("remove {id}"));
        Ok(())
    }
}

fn executor(runtime: &Arc<FakeRuntime>) -> (SandboxExecutor, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig::new(dir.path().join("workspace"));
    let exec = SandboxExecutor::new(config, Arc::clone(runtime) as Arc<dyn ContainerRuntime>)
        .unwrap();
    (exec, dir)
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_initialize_runs_once_and_creates_workspace() {
    let runtime = FakeRuntime::ok(0, "");
    let (exec, dir) = executor(&runtime);

    exec.initialize().await.unwrap();
    exec.initialize().await.unwrap();
    assert!(exec.is_available().await);

    assert_eq!(runtime.count("ping"), 1);
    assert!(dir.path().join("workspace").is_dir());
}

#[tokio::test]
async fn test_initialize_pulls_missing_image() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: false,
        ..Script::default()
    });
    let (exec, _dir) = executor(&runtime);
    exec.initialize().await.unwrap();
    assert_eq!(runtime.count("pull alpine:3.20"), 1);
}

#[tokio::test]
async fn test_unreachable_runtime_fails_closed() {
    let runtime = FakeRuntime::new(Script::default());
    let (exec, _dir) = executor(&runtime);

    let err = exec.exec("ls", ["-la"]).await.unwrap_err();
    assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));
    assert!(!exec.is_available().await);
    // Failures are not cached.
    assert_eq!(runtime.count("ping"), 2);
    assert_eq!(runtime.count("create"), 0);
}

#[test]
fn test_new_rejects_invalid_config() {
    let config = SandboxConfig {
        user: "0:0".to_owned(),
        ..SandboxConfig::new("/tmp/w")
    };
    let runtime: Arc<dyn ContainerRuntime> = FakeRuntime::ok(0, "");
    assert!(matches!(
        SandboxExecutor::new(config, runtime),
        Err(SandboxError::InvalidConfig(_))
    ));
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_execute_collects_output_and_tears_down() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: true,
        exit_code: 3,
        stdout: b"hello\n".to_vec(),
        stderr: b"warning\n".to_vec(),
        memory: Some(4096),
        ..Script::default()
    });
    let (exec, _dir) = executor(&runtime);

    let result = exec.exec("echo", ["hello"]).await.unwrap();
    assert_eq!(result.exit_code, 3);
    assert!(!result.is_success());
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "warning\n");
    assert!(!result.timed_out);
    assert!(!result.output_truncated);
    assert_eq!(result.memory_used_bytes, Some(4096));

    let calls = runtime.calls();
    let order: Vec<&str> = calls
        .iter()
        .filter_map(|c| c.split_whitespace().next())
        .filter(|c| !matches!(*c, "ping" | "image_exists"))
        .collect();
    assert_eq!(order, ["create", "start", "wait", "stats", "remove"]);
    assert!(exec.active_containers().is_empty());
}

#[tokio::test]
async fn test_container_names_are_unique_and_prefixed() {
    let runtime = FakeRuntime::ok(0, "");
    let (exec, _dir) = executor(&runtime);
    exec.exec("true", [] as [&str; 0]).await.unwrap();
    exec.exec("true", [] as [&str; 0]).await.unwrap();

    let specs = runtime.specs.lock().unwrap();
    assert_eq!(specs.len(), 2);
    assert_ne!(specs[0].name, specs[1].name);
    assert!(specs.iter().all(|s| s.name.starts_with("warden-sandbox-")));
}

#[tokio::test]
async fn test_scratch_dir_is_removed_after_run() {
    let runtime = FakeRuntime::ok(0, "");
    let (exec, _dir) = executor(&runtime);
    exec.exec("true", [] as [&str; 0]).await.unwrap();

    let specs = runtime.specs.lock().unwrap();
    let scratch = specs[0]
        .host_config
        .binds
        .iter()
        .find(|b| b.target == "/tmp")
        .unwrap();
    assert!(!scratch.source.exists());
}

#[tokio::test]
async fn test_shell_wraps_in_sh_c() {
    let runtime = FakeRuntime::ok(0, "");
    let (exec, _dir) = executor(&runtime);
    exec.shell("echo $HOME | wc -c").await.unwrap();
    let specs = runtime.specs.lock().unwrap();
    assert_eq!(specs[0].cmd, ["sh", "-c", "echo $HOME | wc -c"]);
}

#[tokio::test]
async fn test_stdin_is_forwarded() {
    let runtime = FakeRuntime::ok(0, "");
    let (exec, _dir) = executor(&runtime);
    exec.execute(SandboxExecutionRequest::new("cat", [] as [&str; 0]).with_stdin("data"))
        .await
        .unwrap();
    assert_eq!(runtime.stdin_seen.lock().unwrap().as_deref(), Some(&b"data"[..]));
}

#[tokio::test]
async fn test_output_is_capped() {
    let runtime = FakeRuntime::ok(0, &"x".repeat(64));
    let dir = tempfile::tempdir().unwrap();
    let config = SandboxConfig {
        max_output_bytes: 16,
        ..SandboxConfig::new(dir.path())
    };
    let exec = SandboxExecutor::new(config, runtime as Arc<dyn ContainerRuntime>).unwrap();

    let result = exec.exec("yes", [] as [&str; 0]).await.unwrap();
    assert_eq!(result.stdout.len(), 16);
    assert!(result.output_truncated);
}

#[tokio::test]
async fn test_timeout_kills_and_reports_sentinel() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: true,
        run_for: Some(Duration::from_secs(5)),
        ..Script::default()
    });
    let (exec, _dir) = executor(&runtime);

    let request =
        SandboxExecutionRequest::new("sleep", ["5"]).with_timeout(Duration::from_millis(50));
    let result = exec.execute(request).await.unwrap();

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.duration_ms < 5_000);
    assert!(exec.active_containers().is_empty());
    assert_eq!(runtime.count("kill"), 1);
    assert_eq!(runtime.count("remove"), 1);
    assert_eq!(runtime.count("wait"), 0);
}

#[tokio::test]
async fn test_create_failure_cleans_up_and_emits_failed() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: true,
        fail_create: true,
        ..Script::default()
    });
    let bus = EventBus::new();
    let mut rx = bus.subscribe_prefix("execution:");
    let (exec, _dir) = executor(&runtime);
    let exec = exec.with_events(bus);

    let err = exec.exec("ls", [] as [&str; 0]).await.unwrap_err();
    assert!(matches!(err, SandboxError::Runtime { operation: "create", .. }));
    // Best-effort removal by name.
    assert_eq!(runtime.count("remove warden-sandbox-"), 1);
    assert!(exec.active_containers().is_empty());

    let events = rx.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "execution:failed");
}

#[tokio::test]
async fn test_start_failure_still_tears_down() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: true,
        fail_start: true,
        ..Script::default()
    });
    let (exec, _dir) = executor(&runtime);

    let err = exec.exec("ls", [] as [&str; 0]).await.unwrap_err();
    assert!(matches!(err, SandboxError::Runtime { operation: "start", .. }));
    assert_eq!(runtime.count("remove id-"), 1);
    assert!(exec.active_containers().is_empty());
}

#[tokio::test]
async fn test_invalid_request_creates_nothing() {
    let runtime = FakeRuntime::ok(0, "");
    let (exec, _dir) = executor(&runtime);
    let err = exec
        .execute(SandboxExecutionRequest::new("ls", ["."]).in_dir("/etc"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidRequest(_)));
    assert_eq!(runtime.count("create"), 0);
}

#[tokio::test]
async fn test_events_started_then_completed() {
    let runtime = FakeRuntime::ok(0, "ok");
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let (exec, _dir) = executor(&runtime);
    let exec = exec.with_events(bus);

    exec.exec("true", [] as [&str; 0]).await.unwrap();
    let types: Vec<_> = rx.drain().iter().map(|e| e.event_type()).collect();
    assert_eq!(types, ["execution:started", "execution:completed"]);
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_running_container_is_listed_and_killable() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: true,
        run_for: Some(Duration::from_millis(300)),
        ..Script::default()
    });
    let (exec, _dir) = executor(&runtime);
    let exec = Arc::new(exec);

    let task = tokio::spawn({
        let exec = Arc::clone(&exec);
        async move { exec.exec("sleep", ["1"]).await }
    });

    let mut listed = Vec::new();
    for _ in 0..100 {
        listed = exec.active_containers();
        if !listed.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].command, "sleep 1");

    assert_eq!(exec.kill_all_containers().await, 1);
    task.await.unwrap().unwrap();
    assert!(exec.active_containers().is_empty());
}

#[tokio::test]
async fn test_dropped_caller_does_not_skip_teardown() {
    let runtime = FakeRuntime::new(Script {
        reachable: true,
        image_present: true,
        run_for: Some(Duration::from_millis(100)),
        ..Script::default()
    });
    let (exec, _dir) = executor(&runtime);
    let exec = Arc::new(exec);

    let task = tokio::spawn({
        let exec = Arc::clone(&exec);
        async move { exec.exec("sleep", ["1"]).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();

    for _ in 0..100 {
        if runtime.count("remove") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(runtime.count("remove"), 1);
    assert!(exec.active_containers().is_empty());
}
