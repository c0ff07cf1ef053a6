//! End-to-end tests for the mandate session lifecycle
//!
//! Driven against the in-memory store with a manual clock, so every duration
//! below is exact.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use tokio::sync::Barrier;
use uuid::Uuid;

use helpers::{t0, Desk};
use mandate_desk::{
    ActivityStatus, Deliverable, ErrorKind, MandateError, MandateStatus, MemoryStore, NewMandate,
    OpenTimer, PresenceStatus, Session, SessionStore, StoreTx, Worker,
};

// ============================================================================
// Round trip
// ============================================================================

#[tokio::test]
async fn test_start_pause_resume_end_accounts_time() {
    let desk = Desk::new().await;
    let mandate = desk.post(5).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.assert_pointer_matches_open_session().await;

    desk.clock.advance_secs(100);
    let paused = desk.controller.pause(w, m).await.unwrap();
    assert_eq!(paused.total_active_secs, 100);
    assert_eq!(paused.total_inactive_secs, 0);

    desk.clock.advance_secs(30);
    let resumed = desk.controller.resume(w, m).await.unwrap();
    assert_eq!(resumed.total_active_secs, 100);
    assert_eq!(resumed.total_inactive_secs, 30);

    desk.clock.advance_secs(70);
    let summary = desk.controller.end(w).await.unwrap();
    assert_eq!(summary.total_active_secs, 170);
    assert_eq!(summary.total_inactive_secs, 30);
    assert_eq!(summary.status, MandateStatus::PartialReview);
    assert_eq!(summary.deliverable_count, 0);
    assert_eq!(summary.positions, 5);

    let sessions = desk.store.sessions_for(w, m).await.unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.active_start_time, None);
    assert_eq!(session.inactive_start_time, None);
    assert_eq!(session.submitted_at, Some(t0() + ChronoDuration::seconds(200)));

    let mandate = desk.mandate_row(m).await;
    assert_eq!(mandate.started_at, Some(t0()));
    assert_eq!(mandate.submitted_at, Some(t0() + ChronoDuration::seconds(200)));

    let worker = desk.worker_row().await;
    assert_eq!(worker.active_mandate_id, None);
    assert_eq!(worker.presence, PresenceStatus::Inactive);
    desk.assert_pointer_matches_open_session().await;
}

#[tokio::test]
async fn test_end_while_paused_flushes_inactive_time() {
    let desk = Desk::new().await;
    let mandate = desk.post(3).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(100);
    desk.controller.pause(w, m).await.unwrap();
    desk.clock.advance_secs(30);
    desk.controller.resume(w, m).await.unwrap();
    desk.clock.advance_secs(70);
    let paused = desk.controller.pause(w, m).await.unwrap();
    assert_eq!(paused.total_active_secs, 170);
    assert_eq!(paused.total_inactive_secs, 30);

    // Ten seconds paused before ending; the open inactive timer is folded in.
    desk.clock.advance_secs(10);
    let summary = desk.controller.end(w).await.unwrap();
    assert_eq!(summary.total_active_secs, 170);
    assert_eq!(summary.total_inactive_secs, 40);

    let sessions = desk.store.sessions_for(w, m).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].inactive_start_time, None);
    assert_eq!(sessions[0].total_inactive_secs, 40);
    assert_eq!(sessions[0].submitted_at, Some(t0() + ChronoDuration::seconds(210)));
}

#[tokio::test]
async fn test_start_sets_every_row_together() {
    let desk = Desk::new().await;
    let mandate = desk.post(2).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    assert_eq!(desk.controller.start(w, m).await.unwrap(), m);

    let mandate = desk.mandate_row(m).await;
    assert_eq!(mandate.status, MandateStatus::InProgress);
    assert_eq!(mandate.started_at, Some(t0()));
    assert_eq!(mandate.submitted_at, None);

    let worker = desk.worker_row().await;
    assert_eq!(worker.active_mandate_id, Some(m));
    assert_eq!(worker.presence, PresenceStatus::Active);

    let session = desk.store.open_session(w).await.unwrap().unwrap();
    assert_eq!(session.started_at, t0());
    assert_eq!(session.open_timer(), Some(OpenTimer::Active));
    assert_eq!(session.total_active_secs, 0);
    assert_eq!(session.total_inactive_secs, 0);
}

// ============================================================================
// Deliverables
// ============================================================================

#[tokio::test]
async fn test_end_with_enough_deliverables_completes_review() {
    let desk = Desk::new().await;
    let mandate = desk.post(5).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(60);
    for _ in 0..5 {
        desk.store
            .record_deliverable(&Deliverable::new(w, Some(m), desk.clock_now()))
            .await
            .unwrap();
    }

    let summary = desk.controller.end(w).await.unwrap();
    assert_eq!(summary.deliverable_count, 5);
    assert_eq!(summary.status, MandateStatus::CompletedReview);
    assert_eq!(
        desk.mandate_row(m).await.status,
        MandateStatus::CompletedReview
    );
}

#[tokio::test]
async fn test_end_short_of_target_is_partial_review() {
    let desk = Desk::new().await;
    let mandate = desk.post(5).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    // Uploaded before the mandate started: never counted.
    desk.store
        .record_deliverable(&Deliverable::new(w, None, t0() - ChronoDuration::seconds(1)))
        .await
        .unwrap();

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(10);
    for _ in 0..2 {
        desk.store
            .record_deliverable(&Deliverable::new(w, Some(m), desk.clock_now()))
            .await
            .unwrap();
    }
    // Unlinked uploads after start count.
    desk.store
        .record_deliverable(&Deliverable::new(w, None, desk.clock_now()))
        .await
        .unwrap();
    // Linked to another mandate: excluded.
    desk.store
        .record_deliverable(&Deliverable::new(w, Some(Uuid::new_v4()), desk.clock_now()))
        .await
        .unwrap();

    let summary = desk.controller.end(w).await.unwrap();
    assert_eq!(summary.deliverable_count, 3);
    assert_eq!(summary.status, MandateStatus::PartialReview);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_double_start_conflicts_and_keeps_one_session() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    let err = desk.controller.start(w, m).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, MandateError::MandateInProgress { .. }));

    assert_eq!(desk.store.session_count(), 1);
    assert_eq!(desk.mandate_row(m).await.started_at, Some(t0()));
}

#[tokio::test]
async fn test_double_pause_does_not_double_count() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(45);
    desk.controller.pause(w, m).await.unwrap();

    desk.clock.advance_secs(15);
    let err = desk.controller.pause(w, m).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, MandateError::NoActiveSession { .. }));

    let session = desk.store.open_session(w).await.unwrap().unwrap();
    assert_eq!(session.total_active_secs, 45);
    assert_eq!(session.total_inactive_secs, 0);
    assert_eq!(
        session.inactive_start_time,
        Some(t0() + ChronoDuration::seconds(45))
    );
}

#[tokio::test]
async fn test_resume_without_pause_is_not_found() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    let err = desk.controller.resume(w, m).await.unwrap_err();
    assert!(matches!(err, MandateError::NoPausedSession { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_end_without_mandate_changes_nothing() {
    let desk = Desk::new().await;
    let before = desk.worker_row().await;

    let err = desk.controller.end(desk.worker_id()).await.unwrap_err();
    assert!(matches!(err, MandateError::NoActiveMandate { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(desk.worker_row().await, before);
    assert!(desk
        .store
        .activity_for_worker(desk.worker_id())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(desk.store.session_count(), 0);
}

#[tokio::test]
async fn test_ended_mandate_cannot_restart() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.controller.end(w).await.unwrap();

    let err = desk.controller.start(w, m).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, MandateError::MandateClosed { .. }));
    assert_eq!(desk.store.session_count(), 1);
}

#[tokio::test]
async fn test_unassigned_mandate_is_forbidden() {
    let desk = Desk::new().await;
    let other = desk.workers.register("Kiran").await.unwrap();
    let mandate = desk.post_for(other.worker_id, 1).await;

    let err = desk
        .controller
        .start(desk.worker_id(), mandate.mandate_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(desk.mandate_row(mandate.mandate_id).await.status, MandateStatus::Open);
    assert_eq!(desk.worker_row().await.active_mandate_id, None);
}

#[tokio::test]
async fn test_busy_worker_cannot_start_second_mandate() {
    let desk = Desk::new().await;
    let first = desk.post(1).await;
    let second = desk.post(1).await;
    let w = desk.worker_id();

    desk.controller.start(w, first.mandate_id).await.unwrap();
    let err = desk.controller.start(w, second.mandate_id).await.unwrap_err();
    assert!(matches!(
        err,
        MandateError::WorkerBusy { active_mandate_id, .. } if active_mandate_id == first.mandate_id
    ));

    // Once the first one ends the worker is free again.
    desk.controller.end(w).await.unwrap();
    desk.controller.start(w, second.mandate_id).await.unwrap();
    desk.assert_pointer_matches_open_session().await;
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;

    let err = desk
        .controller
        .start(Uuid::new_v4(), mandate.mandate_id)
        .await
        .unwrap_err();
    assert!(matches!(err, MandateError::WorkerNotFound { .. }));

    let err = desk
        .controller
        .start(desk.worker_id(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, MandateError::MandateNotFound { .. }));
}

// ============================================================================
// Inconsistent state
// ============================================================================

#[tokio::test]
async fn test_dangling_pointer_is_fatal_and_rolls_back() {
    // A worker already pointing at an open, never-started mandate.
    let mut broken = Worker::new("Dev");
    let assigned = NewMandate {
        title: "Data Analyst".into(),
        primary_skills: "SQL".into(),
        experience_required: "2 years".into(),
        location: "Remote".into(),
        positions: 1,
        assigned_worker_id: broken.worker_id,
        deadline: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
    }
    .validate()
    .unwrap();
    broken.active_mandate_id = Some(assigned.mandate_id);

    let store = MemoryStore::new();
    store.insert_worker(&broken).await.unwrap();
    store.insert_mandate(&assigned).await.unwrap();
    let desk = Desk::with_store(store).await;

    let err = desk
        .controller
        .start(broken.worker_id, assigned.mandate_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(desk.store.session_count(), 0);

    let err = desk.controller.end(broken.worker_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);

    let mandate = desk.mandate_row(assigned.mandate_id).await;
    assert_eq!(mandate.status, MandateStatus::Open);
    assert_eq!(mandate.submitted_at, None);
    assert!(desk
        .store
        .activity_for_worker(broken.worker_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_stray_open_session_on_other_mandate_blocks_start() {
    let desk = Desk::new().await;
    let stale = desk.post(1).await;
    let fresh = desk.post(1).await;
    let w = desk.worker_id();

    // An unclosed session on one mandate while the worker pointer is clear.
    let mut tx = desk.store.begin().await.unwrap();
    tx.insert_session(&Session::open(w, stale.mandate_id, t0()))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(desk.worker_row().await.active_mandate_id, None);

    desk.clock.advance_secs(60);
    let err = desk.controller.start(w, fresh.mandate_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(matches!(err, MandateError::Inconsistent { .. }));

    assert_eq!(desk.store.session_count(), 1);
    let mandate = desk.mandate_row(fresh.mandate_id).await;
    assert_eq!(mandate.status, MandateStatus::Open);
    assert_eq!(mandate.started_at, None);
    let worker = desk.worker_row().await;
    assert_eq!(worker.active_mandate_id, None);
    assert!(desk.store.activity_for_worker(w).await.unwrap().is_empty());
}

// ============================================================================
// Clock edge cases and reads
// ============================================================================

#[tokio::test]
async fn test_backward_clock_adds_no_time() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(-20);
    let totals = desk.controller.pause(w, m).await.unwrap();
    assert_eq!(totals.total_active_secs, 0);
}

#[tokio::test]
async fn test_status_includes_running_timer_without_writing() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(40);

    let status = desk.controller.status(w).await.unwrap();
    assert_eq!(status.active_mandate_id, Some(m));
    assert_eq!(status.presence, PresenceStatus::Active);
    assert_eq!(status.open_timer, Some(OpenTimer::Active));
    assert_eq!(status.session.unwrap().total_active_secs, 40);

    let stored = desk.store.open_session(w).await.unwrap().unwrap();
    assert_eq!(stored.total_active_secs, 0);

    let active = desk.controller.active_mandate(w).await.unwrap().unwrap();
    assert_eq!(active.mandate_id, m);
}

#[tokio::test]
async fn test_activity_log_records_each_transition() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(5);
    desk.controller.pause(w, m).await.unwrap();
    desk.clock.advance_secs(5);
    desk.controller.resume(w, m).await.unwrap();
    desk.clock.advance_secs(5);
    desk.controller.end(w).await.unwrap();

    let statuses: Vec<ActivityStatus> = desk
        .store
        .activity_for_worker(w)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            ActivityStatus::Active,
            ActivityStatus::Inactive,
            ActivityStatus::Active,
            ActivityStatus::Ended
        ]
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_exactly_one() {
    let desk = Desk::new().await;
    let first = desk.post(1).await;
    let second = desk.post(1).await;
    let w = desk.worker_id();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for mandate_id in [first.mandate_id, second.mandate_id] {
        let controller = desk.controller.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            controller.start(w, mandate_id).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::Conflict);
                conflicts += 1;
            }
        }
    }
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(desk.store.session_count(), 1);
    desk.assert_pointer_matches_open_session().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pauses_flush_once() {
    let desk = Desk::new().await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);

    desk.controller.start(w, m).await.unwrap();
    desk.clock.advance_secs(50);

    let barrier = Arc::new(Barrier::new(3));
    let mut handles = Vec::new();
    for _ in 0..3 {
        let controller = desk.controller.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            controller.pause(w, m).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
    let session = desk.store.open_session(w).await.unwrap().unwrap();
    assert_eq!(session.total_active_secs, 50);
}

#[tokio::test]
async fn test_lock_timeout_is_transient() {
    let desk = Desk::with_store(MemoryStore::with_lock_timeout(Duration::from_millis(50))).await;
    let mandate = desk.post(1).await;
    let (w, m) = (desk.worker_id(), mandate.mandate_id);
    desk.controller.start(w, m).await.unwrap();

    let mut holder = desk.store.begin().await.unwrap();
    holder.lock_worker(w).await.unwrap();

    let err = desk.controller.pause(w, m).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.kind().is_retryable());

    holder.rollback().await.unwrap();
    let session = desk.store.open_session(w).await.unwrap().unwrap();
    assert_eq!(session.open_timer(), Some(OpenTimer::Active));

    // A fresh request succeeds once the lock is released.
    desk.controller.pause(w, m).await.unwrap();
}
