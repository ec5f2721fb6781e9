//! Pipeline orchestrator behaviour with scripted stages

use mci_core::{
    ArtifactCache, ExecutionMode, PipelineConfig, PipelineError, PipelineOrchestrator, PlanEvent, PlanStatus,
    SkipReason, StageKind, StageOutcome, StageRegistry, WorkItemCatalog,
};
use mci_jobs::{JobLedger, JobStatus};
use mci_storage::{FileStore, Storage};
use mci_test_utils::{
    catalog, memory_storage, scripted_registry, scripted_registry_with_delay, strings, CallLog, FailingStore, SlowStore,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator(storage: Storage, registry: StageRegistry, catalog: WorkItemCatalog) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        JobLedger::new(storage.clone()),
        ArtifactCache::new(storage),
        registry,
        catalog,
    )
}

fn calls(log: &CallLog) -> Vec<(StageKind, String)> {
    log.lock().clone()
}

#[tokio::test]
async fn requesting_synthesis_materializes_the_whole_chain() {
    let (registry, log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Synthesis], ExecutionMode::SequentialByWorkItem);
    assert_eq!(plan.total_tasks, 1);
    let report = orch.execute_plan(&mut plan).await;

    let order: Vec<StageKind> = calls(&log).into_iter().map(|(k, _)| k).collect();
    assert_eq!(order, StageKind::PIPELINE.to_vec());
    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.completed_tasks, 1);

    let item = report.work_item("tea").unwrap();
    for stage in StageKind::PIPELINE {
        assert_eq!(item.outcome(stage), Some(&StageOutcome::Completed));
    }

    let jobs = orch.ledger().recent_jobs(10).await.unwrap();
    assert_eq!(jobs.len(), 4);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed && j.message == "Done"));
}

#[tokio::test]
async fn upstream_failure_skips_downstream_stages() {
    let (registry, log) = scripted_registry(&[("tea", StageKind::Demand)]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Synthesis], ExecutionMode::SequentialByWorkItem);
    let report = orch.execute_plan(&mut plan).await;
    let item = report.work_item("tea").unwrap();

    assert_eq!(item.outcome(StageKind::Needs), Some(&StageOutcome::Completed));
    assert!(matches!(item.outcome(StageKind::Demand), Some(StageOutcome::Failed(_))));
    let unmet = StageOutcome::Skipped(SkipReason::DependencyUnmet);
    assert_eq!(item.outcome(StageKind::DeepAnalysis), Some(&unmet));
    assert_eq!(item.outcome(StageKind::Synthesis), Some(&unmet));
    assert_eq!(calls(&log).len(), 2);

    assert_eq!(plan.completed_tasks, 0);
    assert_eq!(report.status, PlanStatus::Failed);
    assert!(matches!(item.first_error(), Some(PipelineError::StageFailed { stage: StageKind::Demand, .. })));

    let demand_job = orch
        .ledger()
        .require_job(item.job_id(StageKind::Demand).unwrap())
        .await
        .unwrap();
    assert_eq!(demand_job.status, JobStatus::Failed);
    assert!(demand_job.message.starts_with("Error: "));

    let needs_job = orch
        .ledger()
        .require_job(item.job_id(StageKind::Needs).unwrap())
        .await
        .unwrap();
    assert_eq!(needs_job.status, JobStatus::Completed);
}

#[tokio::test]
async fn failures_are_isolated_per_work_item() {
    let (registry, _log) = scripted_registry(&[("b", StageKind::Needs)]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["a", "b"]));

    let mut plan = orch.create_plan(
        &strings(&["a", "b"]),
        &[StageKind::Needs, StageKind::Demand],
        ExecutionMode::SequentialByWorkItem,
    );
    assert_eq!(plan.total_tasks, 4);
    let report = orch.execute_plan(&mut plan).await;

    assert_eq!(plan.completed_tasks, 2);
    assert_eq!(report.status, PlanStatus::Completed);
    assert!(report.has_failures());

    let a = report.work_item("a").unwrap();
    assert_eq!(a.outcome(StageKind::Demand), Some(&StageOutcome::Completed));
    let b = report.work_item("b").unwrap();
    assert_eq!(
        b.outcome(StageKind::Demand),
        Some(&StageOutcome::Skipped(SkipReason::DependencyUnmet))
    );
}

#[tokio::test]
async fn cached_artifacts_are_reused_and_audited() {
    let (registry, log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));

    let mut first = orch.create_plan(&strings(&["tea"]), &[StageKind::Needs], ExecutionMode::SequentialByWorkItem);
    orch.execute_plan(&mut first).await;
    log.lock().clear();

    let mut second = orch.create_plan(
        &strings(&["tea"]),
        &[StageKind::Needs, StageKind::Demand],
        ExecutionMode::SequentialByWorkItem,
    );
    let report = orch.execute_plan(&mut second).await;
    let item = report.work_item("tea").unwrap();

    assert_eq!(item.outcome(StageKind::Needs), Some(&StageOutcome::Reused));
    assert_eq!(item.outcome(StageKind::Demand), Some(&StageOutcome::Completed));
    assert_eq!(calls(&log), vec![(StageKind::Demand, "tea".to_string())]);
    assert_eq!(second.completed_tasks, 2);

    let reuse_job = orch
        .ledger()
        .require_job(item.job_id(StageKind::Needs).unwrap())
        .await
        .unwrap();
    assert_eq!(reuse_job.status, JobStatus::Completed);
    assert_eq!(reuse_job.message, "Reused cached artifact");
}

#[tokio::test]
async fn unrequested_downstream_stages_are_not_run() {
    let (registry, log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Needs], ExecutionMode::SequentialByWorkItem);
    let report = orch.execute_plan(&mut plan).await;
    let item = report.work_item("tea").unwrap();

    assert_eq!(calls(&log).len(), 1);
    for stage in [StageKind::Demand, StageKind::DeepAnalysis, StageKind::Synthesis] {
        assert_eq!(item.outcome(stage), Some(&StageOutcome::Skipped(SkipReason::NotRequested)));
    }
}

#[tokio::test]
async fn stage_phase_mode_runs_each_phase_across_items() {
    let (registry, log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["a", "b"]));

    let mut plan = orch.create_plan(&strings(&["a", "b"]), &[StageKind::Demand], ExecutionMode::SequentialByStagePhase);
    orch.execute_plan(&mut plan).await;

    assert_eq!(
        calls(&log),
        vec![
            (StageKind::Needs, "a".to_string()),
            (StageKind::Needs, "b".to_string()),
            (StageKind::Demand, "a".to_string()),
            (StageKind::Demand, "b".to_string()),
        ]
    );
    assert_eq!(plan.completed_tasks, 2);
}

#[tokio::test]
async fn unknown_work_items_are_skipped() {
    let (registry, _log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));

    let mut plan = orch.create_plan(
        &strings(&["tea", "ghost", "tea"]),
        &[StageKind::Needs, StageKind::Ping],
        ExecutionMode::SequentialByWorkItem,
    );
    assert_eq!(plan.work_item_ids, strings(&["tea", "ghost"]));
    assert_eq!(plan.stages, vec![StageKind::Needs]);
    assert_eq!(plan.total_tasks, 2);

    let report = orch.execute_plan(&mut plan).await;
    assert_eq!(report.unknown_work_items, strings(&["ghost"]));
    assert_eq!(report.completed_tasks, 1);
    assert!(plan.completed_tasks <= plan.total_tasks);
}

#[tokio::test(start_paused = true)]
async fn stop_plan_cancels_in_flight_stage_and_remaining_items() {
    let (registry, log) = scripted_registry_with_delay(&[], Some(Duration::from_secs(1)));
    let orch = orchestrator(memory_storage(), registry, catalog(&["a", "b", "c"]));
    assert!(!orch.stop_plan());

    let mut plan = orch.create_plan(
        &strings(&["a", "b", "c"]),
        &[StageKind::Needs],
        ExecutionMode::SequentialByWorkItem,
    );
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(orch.stop_plan());
    };
    let (report, ()) = tokio::join!(orch.execute_plan(&mut plan), stopper);

    assert_eq!(report.status, PlanStatus::Cancelled);
    assert_eq!(plan.completed_tasks, 1);
    assert_eq!(calls(&log).len(), 2);
    assert!(report.work_item("c").is_none());

    let b = report.work_item("b").unwrap();
    assert_eq!(b.outcome(StageKind::Needs), Some(&StageOutcome::Cancelled));
    let job = orch
        .ledger()
        .require_job(b.job_id(StageKind::Needs).unwrap())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.message, "Execution aborted by user.");
}

#[tokio::test]
async fn pre_tripped_token_cancels_before_any_work() {
    let (registry, log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Needs], ExecutionMode::SequentialByWorkItem);
    let report = orch.execute_plan_with_token(&mut plan, &cancel).await;

    assert_eq!(report.status, PlanStatus::Cancelled);
    assert!(report.work_items.is_empty());
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn plan_events_follow_execution() {
    let (registry, _log) = scripted_registry(&[]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"])).with_events(tx);

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Demand], ExecutionMode::SequentialByWorkItem);
    orch.execute_plan(&mut plan).await;
    drop(orch);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(PlanEvent::PlanStarted { total_tasks: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(PlanEvent::PlanFinished { status: PlanStatus::Completed, completed_tasks: 1, .. })
    ));
    let started = events
        .iter()
        .filter(|e| matches!(e, PlanEvent::StageStarted { .. }))
        .count();
    assert_eq!(started, 2);
}

#[tokio::test]
async fn single_item_pipeline() {
    let (registry, _log) = scripted_registry(&[]);
    let orch = orchestrator(memory_storage(), registry, catalog(&["tea"]));
    let cancel = CancellationToken::new();

    let err = orch
        .run_category_pipeline("ghost", &[StageKind::Needs], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownWorkItem(id) if id == "ghost"));

    let report = orch
        .run_category_pipeline("tea", &[StageKind::DeepAnalysis], &cancel)
        .await
        .unwrap();
    assert_eq!(report.outcome(StageKind::DeepAnalysis), Some(&StageOutcome::Completed));
    assert!(report.first_error().is_none());
}

#[tokio::test]
async fn file_backed_artifacts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default();

    let (registry, _log) = scripted_registry(&[]);
    let first = PipelineOrchestrator::from_config(
        Arc::new(FileStore::new(dir.path())),
        &config,
        registry,
        catalog(&["tea"]),
    );
    let mut plan = first.create_plan(&strings(&["tea"]), &[StageKind::Demand], ExecutionMode::SequentialByWorkItem);
    first.execute_plan(&mut plan).await;
    drop(first);

    let (registry, log) = scripted_registry(&[]);
    let second = PipelineOrchestrator::from_config(
        Arc::new(FileStore::new(dir.path())),
        &config,
        registry,
        catalog(&["tea"]),
    );
    let mut plan = second.create_plan(&strings(&["tea"]), &[StageKind::Demand], ExecutionMode::SequentialByWorkItem);
    let report = second.execute_plan(&mut plan).await;

    assert!(calls(&log).is_empty());
    assert_eq!(
        report.work_item("tea").unwrap().outcome(StageKind::Demand),
        Some(&StageOutcome::Reused)
    );
    assert_eq!(second.ledger().recent_jobs(10).await.unwrap().len(), 4);
}

#[tokio::test]
async fn plan_completes_from_memory_when_storage_rejects_writes() {
    let (registry, log) = scripted_registry(&[]);
    let orch = orchestrator(Storage::new(FailingStore::shared()), registry, catalog(&["tea"]));

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Synthesis], ExecutionMode::SequentialByWorkItem);
    let report = orch.execute_plan(&mut plan).await;

    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(plan.completed_tasks, 1);
    assert_eq!(calls(&log).len(), 4);
    let item = report.work_item("tea").unwrap();
    for stage in StageKind::PIPELINE {
        assert_eq!(item.outcome(stage), Some(&StageOutcome::Completed));
    }
}

#[tokio::test(start_paused = true)]
async fn slow_storage_only_costs_the_write_timeout() {
    let (registry, log) = scripted_registry(&[]);
    let storage = Storage::new(SlowStore::shared(Duration::from_secs(30)));
    let write_timeout = storage.write_timeout();
    let orch = orchestrator(storage, registry, catalog(&["tea"]));

    let mut plan = orch.create_plan(&strings(&["tea"]), &[StageKind::Synthesis], ExecutionMode::SequentialByWorkItem);
    let started = tokio::time::Instant::now();
    let report = orch.execute_plan(&mut plan).await;
    let elapsed = started.elapsed();

    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(plan.completed_tasks, 1);
    assert_eq!(calls(&log).len(), 4);
    // Each stage writes a handful of records: create, start, log line, cache, finish.
    let stages = u32::try_from(StageKind::PIPELINE.len()).unwrap();
    assert!(elapsed <= write_timeout * 6 * stages, "plan took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn concurrent_plans_keep_their_own_stop_handles() {
    let (registry, _log) = scripted_registry_with_delay(&[], Some(Duration::from_secs(1)));
    let orch = orchestrator(memory_storage(), registry, catalog(&["a", "b", "c"]));

    let mut short = orch.create_plan(&strings(&["a"]), &[StageKind::Needs], ExecutionMode::SequentialByWorkItem);
    let mut long = orch.create_plan(&strings(&["b", "c"]), &[StageKind::Needs], ExecutionMode::SequentialByWorkItem);
    assert!(!orch.stop_plan_by_id(&long.id));

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(orch.stop_plan());
    };
    let (short_report, long_report, ()) = tokio::join!(orch.execute_plan(&mut short), orch.execute_plan(&mut long), stopper);

    assert_eq!(short_report.status, PlanStatus::Completed);
    assert_eq!(short.completed_tasks, 1);
    assert_eq!(long_report.status, PlanStatus::Cancelled);
    assert_eq!(long.completed_tasks, 1);
    assert_eq!(
        long_report.work_item("c").unwrap().outcome(StageKind::Needs),
        Some(&StageOutcome::Cancelled)
    );
    assert!(!orch.stop_plan());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn completed_tasks_counts_successful_requested_pairs(
        items in proptest::sample::subsequence(vec!["a", "b", "c"], 1..=3),
        stages in proptest::sample::subsequence(StageKind::PIPELINE.to_vec(), 1..=4),
        failures in proptest::collection::vec((0..3usize, 0..4usize), 0..4),
        by_stage in any::<bool>(),
    ) {
        let names = ["a", "b", "c"];
        let failures: Vec<(&str, StageKind)> = failures
            .into_iter()
            .map(|(item, stage)| (names[item], StageKind::PIPELINE[stage]))
            .collect();
        let mode = if by_stage {
            ExecutionMode::SequentialByStagePhase
        } else {
            ExecutionMode::SequentialByWorkItem
        };

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (plan, report) = runtime.block_on(async {
            let (registry, _log) = scripted_registry(&failures);
            let orch = orchestrator(memory_storage(), registry, catalog(&names));
            let mut plan = orch.create_plan(&strings(&items), &stages, mode);
            let report = orch.execute_plan(&mut plan).await;
            (plan, report)
        });

        let successes = report
            .work_items
            .iter()
            .flat_map(|item| &item.stages)
            .filter(|record| plan.requests(record.stage) && record.outcome.is_success())
            .count();
        prop_assert_eq!(plan.completed_tasks, successes);
        prop_assert_eq!(report.completed_tasks, successes);
        prop_assert!(plan.completed_tasks <= plan.total_tasks);
        prop_assert_eq!(plan.total_tasks, items.len() * stages.len());
    }
}
