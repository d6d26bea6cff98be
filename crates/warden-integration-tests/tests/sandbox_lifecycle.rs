//! Sandbox executor against the scripted runtime.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::time::Duration;

use warden_events::{EventBus, WardenEvent};
use warden_sandbox::{
    SandboxError, SandboxExecutionRequest, SandboxExecutor, TIMEOUT_EXIT_CODE,
};
use warden_test::mocks::KILLED_EXIT_CODE;
use warden_test::{
    MockCall, MockExecution, MockRuntime, init_test_logging, test_sandbox_config,
};

fn executor(runtime: &MockRuntime) -> (Arc<SandboxExecutor>, tempfile::TempDir) {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let exec = SandboxExecutor::new(
        test_sandbox_config(&dir.path().join("workspace")),
        Arc::new(runtime.clone()),
    )
    .unwrap();
    (Arc::new(exec), dir)
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let runtime = MockRuntime::new()
        .with_execution(MockExecution::running_for(Duration::from_secs(5)))
        .with_execution(MockExecution::exit(0).stdout("fast\n"))
        .with_execution(MockExecution::exit(3).stderr("boom\n"));
    let (exec, _dir) = executor(&runtime);
    // Creation order decides which script each run gets.
    exec.initialize().await.unwrap();

    let slow = tokio::spawn({
        let exec = Arc::clone(&exec);
        async move {
            exec.execute(
                SandboxExecutionRequest::new("sleep", ["5"])
                    .with_timeout(Duration::from_millis(100)),
            )
            .await
        }
    });
    while runtime.create_count() < 1 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let fast = exec.exec("echo", ["fast"]).await.unwrap();
    let failing = exec.exec("false", [] as [&str; 0]).await.unwrap();
    let slow = slow.await.unwrap().unwrap();

    assert!(slow.timed_out);
    assert_eq!(slow.exit_code, TIMEOUT_EXIT_CODE);
    assert_eq!(fast.stdout, "fast\n");
    assert!(fast.is_success());
    assert_eq!(failing.exit_code, 3);
    assert_eq!(failing.stderr, "boom\n");
    assert!(!failing.timed_out);

    let names: Vec<String> = runtime.created_specs().into_iter().map(|s| s.name).collect();
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.starts_with("warden-")));
    assert_ne!(names[0], names[1]);
    assert!(runtime.live_containers().is_empty());
    assert!(exec.active_containers().is_empty());
}

#[tokio::test]
async fn test_timed_out_container_is_killed_then_removed() {
    let runtime =
        MockRuntime::new().with_default_execution(MockExecution::running_for(Duration::from_secs(5)));
    let (exec, _dir) = executor(&runtime);

    let result = exec
        .execute(SandboxExecutionRequest::new("sleep", ["5"]).with_timeout(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(result.timed_out);
    assert!(result.duration_ms < 5_000);
    let killed = runtime.killed();
    assert_eq!(killed.len(), 1);
    assert_eq!(runtime.removed(), killed);

    let calls = runtime.calls();
    let kill_at = calls
        .iter()
        .position(|c| matches!(c, MockCall::Kill(_)))
        .unwrap();
    let remove_at = calls
        .iter()
        .position(|c| matches!(c, MockCall::Remove(_)))
        .unwrap();
    assert!(kill_at < remove_at);
}

#[tokio::test]
async fn test_kill_all_ends_running_containers() {
    let runtime =
        MockRuntime::new().with_default_execution(MockExecution::running_for(Duration::from_secs(5)));
    let (exec, _dir) = executor(&runtime);

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move { exec.exec("sleep", ["5"]).await })
        })
        .collect();
    while exec.active_containers().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(exec.kill_all_containers().await, 2);
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.exit_code, KILLED_EXIT_CODE);
        assert!(!result.timed_out);
    }
    assert!(exec.active_containers().is_empty());
    assert!(runtime.live_containers().is_empty());
}

#[tokio::test]
async fn test_unreachable_runtime_fails_closed_then_recovers() {
    let runtime = MockRuntime::new()
        .unreachable()
        .with_default_execution(MockExecution::exit(0));
    let (exec, _dir) = executor(&runtime);

    assert!(!exec.is_available().await);
    let err = exec.exec("ls", ["."]).await.unwrap_err();
    assert!(matches!(err, SandboxError::RuntimeUnavailable(_)));
    assert_eq!(runtime.create_count(), 0);

    runtime.set_unreachable(false);
    assert!(exec.is_available().await);
    assert!(exec.exec("ls", ["."]).await.unwrap().is_success());
}

#[tokio::test]
async fn test_events_track_each_execution() {
    let runtime = MockRuntime::new().failing_create();
    let bus = EventBus::new();
    let mut events = bus.subscribe_prefix("execution:");
    let dir = tempfile::tempdir().unwrap();
    let exec = SandboxExecutor::new(test_sandbox_config(dir.path()), Arc::new(runtime.clone()))
        .unwrap()
        .with_events(bus);

    assert!(exec.exec("ls", ["."]).await.is_err());

    let seen = events.drain();
    assert_eq!(seen.len(), 1);
    let WardenEvent::ExecutionFailed { container, .. } = seen[0].as_ref() else {
        panic!("expected execution:failed, got {:?}", seen[0]);
    };
    assert!(container.as_deref().is_some_and(|n| n.starts_with("warden-")));
}

#[tokio::test]
async fn test_missing_image_is_pulled_once() {
    let runtime = MockRuntime::new()
        .with_missing_image()
        .with_default_execution(MockExecution::exit(0));
    runtime.push_execution(MockExecution::exit(0).memory(64 * 1024 * 1024));
    let (exec, _dir) = executor(&runtime);

    let first = exec.exec("true", [] as [&str; 0]).await.unwrap();
    let second = exec.exec("true", [] as [&str; 0]).await.unwrap();

    let pulls = runtime
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockCall::PullImage(_)))
        .count();
    assert_eq!(pulls, 1);
    assert_eq!(first.memory_used_bytes, Some(64 * 1024 * 1024));
    assert_eq!(second.memory_used_bytes, None);
}

#[tokio::test]
async fn test_start_failure_still_removes_the_container() {
    let runtime = MockRuntime::new().failing_start();
    let (exec, _dir) = executor(&runtime);

    let err = exec.exec("ls", ["."]).await.unwrap_err();

    assert!(matches!(err, SandboxError::Runtime { .. }));
    assert_eq!(runtime.create_count(), 1);
    assert_eq!(runtime.removed().len(), 1);
    assert!(runtime.live_containers().is_empty());
    assert!(exec.active_containers().is_empty());
}
