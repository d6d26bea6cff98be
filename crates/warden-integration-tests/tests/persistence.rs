//! Approval state survives a restart through the JSON snapshot file.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;

use warden_approval::{
    ApprovalError, ApprovalOutcome, ApprovalRequest, ApprovalStatus, ApproveOptions, AuditAction,
    JsonFileSnapshotStore, RememberScope,
};
use warden_test::{test_approval_params, test_clock, test_manager};

fn pending(outcome: ApprovalOutcome) -> ApprovalRequest {
    match outcome {
        ApprovalOutcome::Pending { request, .. } => request,
        ApprovalOutcome::AutoApproved { .. } => panic!("expected pending"),
    }
}

#[tokio::test]
async fn test_restart_keeps_pending_requests_rules_and_audit() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSnapshotStore::new(dir.path().join("state/approvals.json"));
    let clock = test_clock();

    let before = test_manager(Arc::clone(&clock));
    let learned = pending(before.request_approval(test_approval_params("make build")).unwrap());
    before
        .approve(
            learned.id,
            ApproveOptions {
                remember: Some(RememberScope::Exact),
                decided_by: Some("alice".to_string()),
                ..ApproveOptions::default()
            },
        )
        .unwrap();
    let waiting = pending(before.request_approval(test_approval_params("make deploy")).unwrap());
    before.persist(&store).await.unwrap();
    assert!(store.path().exists());
    drop(before);

    let after = test_manager(Arc::clone(&clock));
    assert!(after.restore(&store).await.unwrap());

    let still_pending = after.get_pending();
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].id, waiting.id);
    assert_eq!(
        after.get_request(learned.id).unwrap().resolved_by.as_deref(),
        Some("alice")
    );
    let actions: Vec<AuditAction> = after
        .get_audit_trail(learned.id)
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, [AuditAction::Created, AuditAction::Approved]);

    // The learned rule came back with the queue.
    assert!(
        after
            .request_approval(test_approval_params("make build"))
            .unwrap()
            .is_auto_approved()
    );
    // And the restored request can still be decided.
    let approved = after.approve(waiting.id, ApproveOptions::default()).unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn test_missing_snapshot_restores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSnapshotStore::new(dir.path().join("absent.json"));
    let m = test_manager(test_clock());

    assert!(!m.restore(&store).await.unwrap());
    assert!(m.get_pending().is_empty());
}

#[tokio::test]
async fn test_corrupt_snapshot_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("approvals.json");
    std::fs::write(&path, b"{ not json").unwrap();
    let store = JsonFileSnapshotStore::new(&path);

    let m = test_manager(test_clock());
    let request = pending(m.request_approval(test_approval_params("make")).unwrap());

    assert!(matches!(
        m.restore(&store).await,
        Err(ApprovalError::Serialization(_))
    ));
    assert_eq!(m.get_pending()[0].id, request.id);
}

#[tokio::test]
async fn test_unknown_snapshot_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileSnapshotStore::new(dir.path().join("approvals.json"));
    let m = test_manager(test_clock());
    m.persist(&store).await.unwrap();

    let mut raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
    raw["version"] = serde_json::json!(99);
    std::fs::write(store.path(), serde_json::to_vec(&raw).unwrap()).unwrap();

    assert!(matches!(
        m.restore(&store).await,
        Err(ApprovalError::InvalidSnapshot(_))
    ));
}
