use std::sync::Arc;

use super::*;
use crate::request::ApprovalCategory;
use warden_core::{Clock, ManualClock, RiskLevel};

fn clocked(config: QueueConfig) -> (Arc<ManualClock>, ApprovalQueue) {
    let clock = Arc::new(ManualClock::starting_now());
    let queue = ApprovalQueue::new(config).with_clock(clock.clone());
    (clock, queue)
}

fn params(action: &str) -> ApprovalParams {
    ApprovalParams::new(ApprovalCategory::ShellCommand, action)
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[test]
fn test_create_request_sets_deadline_and_audits() {
    let (clock, queue) = clocked(QueueConfig::default());
    let request = queue
        .create_request(params("make").with_session("s1").with_user("alice"))
        .unwrap();

    assert_eq!(request.status, ApprovalStatus::Pending);
    assert_eq!(request.created_at, clock.now());
    assert_eq!(
        request.expires_at,
        clock.now() + chrono::Duration::seconds(300)
    );
    assert_eq!(queue.pending_count(), 1);

    let trail = queue.audit_trail(request.id);
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, AuditAction::Created);
    assert_eq!(trail[0].user_id.as_deref(), Some("alice"));
}

#[test]
fn test_custom_ttl_and_zero_ttl() {
    let (clock, queue) = clocked(QueueConfig::default());
    let request = queue
        .create_request(params("make").with_ttl(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(request.expires_at, clock.now() + chrono::Duration::seconds(5));

    let err = queue
        .create_request(params("make").with_ttl(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidRequest(_)));
}

#[test]
fn test_empty_action_rejected() {
    let queue = ApprovalQueue::default();
    assert!(matches!(
        queue.create_request(params("  ")),
        Err(ApprovalError::InvalidRequest(_))
    ));
}

#[test]
fn test_queue_full_rejects_and_recovers() {
    let queue = ApprovalQueue::new(QueueConfig {
        max_pending: 2,
        ..QueueConfig::default()
    });
    let first = queue.create_request(params("a")).unwrap();
    queue.create_request(params("b")).unwrap();

    let err = queue.create_request(params("c")).unwrap_err();
    assert!(matches!(err, ApprovalError::QueueFull { max_pending: 2 }));
    assert_eq!(queue.len(), 2);

    queue.deny(first.id, Resolution::by("alice")).unwrap();
    assert!(queue.create_request(params("c")).is_ok());
}

#[test]
fn test_concurrent_creates_never_exceed_capacity() {
    let queue = ApprovalQueue::new(QueueConfig {
        max_pending: 100,
        ..QueueConfig::default()
    });
    let barrier = std::sync::Barrier::new(120);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..120)
            .map(|i| {
                let queue = &queue;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    queue.create_request(params(&format!("task {i}")))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let created = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ApprovalError::QueueFull { max_pending: 100 })))
        .count();
    assert_eq!(created, 100);
    assert_eq!(rejected, 20);
    assert_eq!(queue.pending_count(), 100);
    assert_eq!(queue.len(), 100);
}

#[test]
fn test_create_request_emits_event() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = ApprovalQueue::default().with_events(bus);

    let request = queue
        .create_request(params("make").with_risk_level(RiskLevel::High))
        .unwrap();
    let event = rx.try_recv().unwrap();
    assert_eq!(event.event_type(), "request:created");
    assert_eq!(event.request_id(), Some(request.id.0));
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[test]
fn test_each_terminal_state_is_final() {
    let queue = ApprovalQueue::default();
    let rule = Uuid::new_v4();
    type Transition = fn(&ApprovalQueue, RequestId, Uuid) -> ApprovalResult<ApprovalRequest>;
    let transitions: [(ApprovalStatus, Transition); 4] = [
        (ApprovalStatus::Approved, |q, id, _| q.approve(id, Resolution::default())),
        (ApprovalStatus::Denied, |q, id, _| q.deny(id, Resolution::default())),
        (ApprovalStatus::AutoApproved, |q, id, r| q.auto_approve(id, r)),
        (ApprovalStatus::Expired, |q, id, _| q.expire(id)),
    ];

    for (first_status, first) in transitions {
        let request = queue.create_request(params("make")).unwrap();
        let resolved = first(&queue, request.id, rule).unwrap();
        assert_eq!(resolved.status, first_status);

        for (_, second) in transitions {
            let err = second(&queue, request.id, rule).unwrap_err();
            assert!(
                matches!(err, ApprovalError::InvalidState { status, .. } if status == first_status),
                "{first_status} must be terminal, got {err}"
            );
        }
        assert_eq!(queue.get(request.id).unwrap().status, first_status);
        // created + exactly one terminal entry.
        assert_eq!(queue.audit_trail(request.id).len(), 2);
    }
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn test_unknown_request_is_not_found() {
    let queue = ApprovalQueue::default();
    assert!(matches!(
        queue.approve(RequestId::new(), Resolution::default()),
        Err(ApprovalError::NotFound(_))
    ));
}

#[test]
fn test_resolution_is_recorded() {
    let queue = ApprovalQueue::default();
    let request = queue.create_request(params("make")).unwrap();
    let mut resolution = Resolution::by("alice").with_reason("looks fine");
    resolution.ip_address = Some("10.0.0.1".to_owned());
    let resolved = queue.approve(request.id, resolution).unwrap();

    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
    assert_eq!(resolved.resolution_reason.as_deref(), Some("looks fine"));
    assert!(resolved.resolved_at.is_some());

    let last = queue.audit_trail(request.id).pop().unwrap();
    assert_eq!(last.action, AuditAction::Approved);
    assert_eq!(last.ip_address.as_deref(), Some("10.0.0.1"));
}

#[test]
fn test_auto_approve_records_rule() {
    let queue = ApprovalQueue::default();
    let request = queue.create_request(params("git status")).unwrap();
    let rule = Uuid::new_v4();
    let resolved = queue.auto_approve(request.id, rule).unwrap();
    assert_eq!(resolved.matched_rule, Some(rule));
    assert_eq!(
        queue.audit_trail(request.id).pop().unwrap().action,
        AuditAction::AutoApproved
    );
}

#[test]
fn test_decision_after_deadline_expires_instead() {
    let (clock, queue) = clocked(QueueConfig::default());
    let request = queue
        .create_request(params("make").with_ttl(Duration::from_secs(10)))
        .unwrap();

    clock.advance(chrono::Duration::seconds(10));
    let err = queue.approve(request.id, Resolution::by("late")).unwrap_err();
    assert!(matches!(err, ApprovalError::Expired(id) if id == request.id));
    assert_eq!(queue.get(request.id).unwrap().status, ApprovalStatus::Expired);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn test_transitions_emit_events_in_order() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let queue = ApprovalQueue::default().with_events(bus);

    let request = queue.create_request(params("make")).unwrap();
    queue.deny(request.id, Resolution::by("bob")).unwrap();

    let kinds: Vec<_> = rx.drain().iter().map(|e| e.event_type()).collect();
    assert_eq!(kinds, ["request:created", "request:denied"]);
}

#[tokio::test]
async fn test_watch_sees_terminal_status() {
    let queue = ApprovalQueue::default();
    let request = queue.create_request(params("make")).unwrap();
    let mut rx = queue.watch(request.id).unwrap();
    assert_eq!(*rx.borrow(), ApprovalStatus::Pending);

    queue.approve(request.id, Resolution::default()).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), ApprovalStatus::Approved);

    // Late subscribers see the final value immediately.
    assert_eq!(
        *queue.watch(request.id).unwrap().borrow(),
        ApprovalStatus::Approved
    );
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[test]
fn test_pending_is_oldest_first_and_per_session() {
    let (clock, queue) = clocked(QueueConfig::default());
    let a = queue.create_request(params("a").with_session("s1")).unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let b = queue.create_request(params("b").with_session("s2")).unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let c = queue.create_request(params("c").with_session("s1")).unwrap();

    let ids: Vec<_> = queue.pending().iter().map(|r| r.id).collect();
    assert_eq!(ids, [a.id, b.id, c.id]);

    let s1: Vec<_> = queue.pending_for_session("s1").iter().map(|r| r.id).collect();
    assert_eq!(s1, [a.id, c.id]);

    queue.approve(a.id, Resolution::default()).unwrap();
    let s1: Vec<_> = queue.pending_for_session("s1").iter().map(|r| r.id).collect();
    assert_eq!(s1, [c.id]);
    assert!(queue.pending_for_session("nobody").is_empty());
}

#[test]
fn test_query_audit_pages() {
    let queue = ApprovalQueue::default();
    for i in 0..5 {
        queue.create_request(params(&format!("cmd {i}"))).unwrap();
    }
    let query = AuditQuery::new().with_action(AuditAction::Created).page(2, 2);
    let page = queue.query_audit(&query);
    assert_eq!(page.total, 5);
    assert_eq!(page.entries.len(), 2);
    assert!(page.has_more(&query));

    let last = AuditQuery::new().page(4, 2);
    let page = queue.query_audit(&last);
    assert_eq!(page.entries.len(), 1);
    assert!(!page.has_more(&last));
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

#[test]
fn test_sweep_expires_at_exact_deadline() {
    let (clock, queue) = clocked(QueueConfig::default());
    let request = queue
        .create_request(params("make").with_ttl(Duration::from_secs(60)))
        .unwrap();

    let report = queue.sweep(clock.now() + chrono::Duration::seconds(59));
    assert!(report.expired.is_empty());

    let report = queue.sweep(request.expires_at);
    assert_eq!(report.expired, [request.id]);
    let trail = queue.audit_trail(request.id);
    assert_eq!(trail.last().unwrap().action, AuditAction::Expired);

    // A second sweep does not double-audit.
    assert!(queue.sweep(request.expires_at).expired.is_empty());
    assert_eq!(queue.audit_trail(request.id).len(), 2);
}

#[test]
fn test_sweep_evicts_old_terminal_requests() {
    let (clock, queue) = clocked(QueueConfig::default());
    let old = queue.create_request(params("old")).unwrap();
    queue.deny(old.id, Resolution::default()).unwrap();
    let pending = queue
        .create_request(params("pending").with_ttl(Duration::from_secs(30 * 24 * 3600)))
        .unwrap();

    clock.advance(chrono::Duration::days(8));
    let report = queue.sweep(clock.now());
    assert_eq!(report.evicted, 1);
    assert!(matches!(queue.get(old.id), Err(ApprovalError::NotFound(_))));
    assert!(queue.get(pending.id).unwrap().is_pending());
}

#[test]
fn test_sweep_prunes_old_audit_entries() {
    let (clock, queue) = clocked(QueueConfig {
        audit_max_age: Duration::from_secs(3600),
        ..QueueConfig::default()
    });
    queue.create_request(params("make")).unwrap();
    clock.advance(chrono::Duration::hours(2));
    let report = queue.sweep(clock.now());
    // created + expired; only the fresh expiry entry survives.
    assert_eq!(report.audit_pruned, 1);
    assert_eq!(queue.query_audit(&AuditQuery::new()).total, 1);
}

#[test]
fn test_sweep_and_decision_race_commits_once() {
    let queue = Arc::new(ApprovalQueue::default());
    for _ in 0..50 {
        let request = queue
            .create_request(params("race").with_ttl(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));

        let q1 = Arc::clone(&queue);
        let q2 = Arc::clone(&queue);
        let id = request.id;
        let sweeper = std::thread::spawn(move || q1.sweep(q1.now()));
        let decider = std::thread::spawn(move || q2.approve(id, Resolution::default()));
        sweeper.join().unwrap();
        let _ = decider.join().unwrap();

        let trail = queue.audit_trail(id);
        assert_eq!(trail.len(), 2, "exactly one terminal audit entry");
        assert!(queue.get(id).unwrap().status.is_terminal());
    }
}

// ---------------------------------------------------------------------------
// Stats and snapshots
// ---------------------------------------------------------------------------

#[test]
fn test_stats_counts_and_latency() {
    let (clock, queue) = clocked(QueueConfig::default());
    let a = queue.create_request(params("a")).unwrap();
    let b = queue
        .create_request(ApprovalParams::new(ApprovalCategory::FileWrite, "write"))
        .unwrap();
    queue.create_request(params("c")).unwrap();

    clock.advance(chrono::Duration::seconds(2));
    queue.approve(a.id, Resolution::default()).unwrap();
    clock.advance(chrono::Duration::seconds(2));
    queue.deny(b.id, Resolution::default()).unwrap();

    let stats = queue.stats(clock.now());
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.last_24h.approved, 1);
    assert_eq!(stats.last_24h.denied, 1);
    assert_eq!(stats.last_24h.total(), 2);
    assert_eq!(stats.mean_decision_latency_ms, Some(3000.0));
    assert_eq!(stats.top_categories[0], (ApprovalCategory::ShellCommand, 2));
}

#[test]
fn test_export_import_round_trip() {
    let queue = ApprovalQueue::default();
    let a = queue.create_request(params("a").with_session("s")).unwrap();
    let b = queue.create_request(params("b")).unwrap();
    queue.approve(b.id, Resolution::by("alice")).unwrap();
    let snapshot = queue.export();

    let restored = ApprovalQueue::default();
    assert_eq!(restored.import(snapshot.clone()).unwrap(), 2);
    assert_eq!(restored.export(), snapshot);
    assert_eq!(restored.pending_count(), 1);
    assert_eq!(restored.pending_for_session("s")[0].id, a.id);

    // Restored pending requests can still be decided.
    restored.deny(a.id, Resolution::default()).unwrap();
}

#[test]
fn test_import_rejects_inconsistent_snapshot() {
    let queue = ApprovalQueue::default();
    let request = queue.create_request(params("a")).unwrap();

    let mut bad = queue.export();
    bad.requests[0].expires_at = bad.requests[0].created_at;
    assert!(matches!(
        queue.import(bad),
        Err(ApprovalError::InvalidSnapshot(_))
    ));

    let mut dup = queue.export();
    dup.requests.push(dup.requests[0].clone());
    assert!(matches!(
        queue.import(dup),
        Err(ApprovalError::InvalidSnapshot(_))
    ));

    // Failed imports leave the queue untouched.
    assert!(queue.get(request.id).unwrap().is_pending());
}
