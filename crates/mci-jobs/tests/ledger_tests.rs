//! Job ledger behaviour over slow and failing backends

use mci_jobs::{JobLedger, JobStatus, JobUpdate, StageKind};
use mci_storage::{DegradedReason, FallbackStore, SharedStore, Storage};
use mci_test_utils::{FailingStore, FlakyStore, SlowStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn create_returns_within_write_timeout_on_slow_backend() {
    let ledger = JobLedger::new(Storage::new(SlowStore::shared(Duration::from_secs(5))));

    let started = tokio::time::Instant::now();
    let created = ledger.create_job(StageKind::Needs, "coffee", "v1").await;

    assert!(started.elapsed() <= Duration::from_millis(300));
    assert_eq!(
        created.degraded_reason(),
        Some(&DegradedReason::TimedOut { timeout_ms: 250 })
    );
    assert_eq!(created.value().status, JobStatus::Pending);

    // The spawned write still lands eventually.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let stored = ledger.get_job(&created.value().job_id).await.unwrap();
    assert_eq!(stored.as_ref(), Some(created.value()));
}

#[tokio::test]
async fn failing_backend_still_yields_records() {
    let ledger = JobLedger::new(Storage::new(FailingStore::shared()));

    let created = ledger.create_job(StageKind::Demand, "coffee", "v1").await;
    assert!(!created.is_durable());
    let job = created.into_value();

    let updated = ledger
        .update_job(&job, JobUpdate::status(JobStatus::Running).with_message("Working"))
        .await;
    assert!(matches!(updated.degraded_reason(), Some(DegradedReason::Failed(_))));
    assert_eq!(updated.value().status, JobStatus::Running);
    assert_eq!(updated.value().logs.len(), 1);
}

#[tokio::test]
async fn cancellation_wins_over_completion() {
    let ledger = JobLedger::new(mci_test_utils::memory_storage());
    let job = ledger.create_job(StageKind::Synthesis, "coffee", "v1").await.into_value();

    ledger
        .update_job(&job, JobUpdate::status(JobStatus::Cancelling).with_message("Stopping"))
        .await;
    let cancelled = ledger
        .update_job(&job, JobUpdate::status(JobStatus::Cancelled).with_message("Plan Cancelled"))
        .await
        .into_value();
    let late_success = ledger
        .update_job(&job, JobUpdate::status(JobStatus::Completed).with_message("Done"))
        .await
        .into_value();

    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(late_success.status, JobStatus::Cancelled);
    assert_eq!(late_success.message, "Plan Cancelled");
}

#[tokio::test]
async fn cancellation_held_in_fallback_memory_stays_terminal() {
    let primary = Arc::new(FlakyStore::new());
    let backend: SharedStore = Arc::new(FallbackStore::new(Arc::clone(&primary) as SharedStore));
    let ledger = JobLedger::new(Storage::new(backend));

    let job = ledger.create_job(StageKind::Needs, "coffee", "v1").await.into_value();
    ledger
        .update_job(&job, JobUpdate::status(JobStatus::Running).with_message("Working"))
        .await;

    primary.set_rejecting(true);
    ledger
        .update_job(&job, JobUpdate::status(JobStatus::Cancelled).with_message("Plan Cancelled"))
        .await;
    let late_success = ledger
        .update_job(&job, JobUpdate::status(JobStatus::Completed).with_message("Done"))
        .await
        .into_value();

    assert_eq!(late_success.status, JobStatus::Cancelled);
    let stored = ledger.require_job(&job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.message, "Plan Cancelled");
}
