//! Pipeline orchestrator
//!
//! Executes run plans over work items and the fixed stage chain
//! `NEEDS -> DEMAND -> DEEP_ANALYSIS -> SYNTHESIS`. For every (work item,
//! stage) pair the policy is:
//!
//! 1. Skip the stage when neither it nor anything downstream was requested
//! 2. Reuse a cached artifact when one exists, auditing it with a short job
//! 3. Otherwise run the stage through the job ledger, caching its artifact
//! 4. Once a stage fails for a work item, skip its remaining needed stages
//!
//! Work items run one at a time. A single cancellation token is shared by the
//! whole plan and checked before every work item and every stage.

use crate::artifact::{Artifact, ArtifactCache};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageFailure};
use crate::plan::{
    ExecutionMode, PlanConfig, PlanEvent, PlanReport, PlanStatus, RunPlan, SkipReason, StageOutcome, StageRecord,
    WorkItemReport,
};
use crate::stage::StageRegistry;
use crate::work_item::{WorkItem, WorkItemCatalog};
use chrono::Utc;
use mci_jobs::{AbortSignature, JobLedger, JobLogSink, JobStatus, JobUpdate, Progress, StageKind};
use mci_storage::{SharedStore, Storage};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Progress of one work item through the chain
struct ItemRun {
    item: WorkItem,
    artifacts: HashMap<StageKind, Artifact>,
    /// A stage failed or was cancelled; no further stage may run
    halted: bool,
    report: WorkItemReport,
}

impl ItemRun {
    fn new(item: WorkItem) -> Self {
        let report = WorkItemReport {
            work_item_id: item.id.clone(),
            stages: Vec::new(),
        };
        Self {
            item,
            artifacts: HashMap::new(),
            halted: false,
            report,
        }
    }
}

/// Per-execution context threaded through every step
struct StepContext<'a> {
    plan_id: Option<&'a str>,
    requested: &'a [StageKind],
    cancel: &'a CancellationToken,
}

/// Whether a stage must produce an artifact for the requested set
fn is_needed(stage: StageKind, requested: &[StageKind]) -> bool {
    requested.contains(&stage) || requested.iter().any(|r| stage.is_upstream_of(*r))
}

/// Top-level scheduler for run plans
#[derive(Debug)]
pub struct PipelineOrchestrator {
    ledger: JobLedger,
    cache: ArtifactCache,
    stages: StageRegistry,
    catalog: WorkItemCatalog,
    window_id: String,
    plan_config: PlanConfig,
    /// Tokens of executing plans by plan id
    active: Mutex<HashMap<String, CancellationToken>>,
    events: Option<UnboundedSender<PlanEvent>>,
}

impl PipelineOrchestrator {
    /// Create orchestrator with default window and plan hints
    #[must_use]
    pub fn new(ledger: JobLedger, cache: ArtifactCache, stages: StageRegistry, catalog: WorkItemCatalog) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            ledger,
            cache,
            stages,
            catalog,
            window_id: defaults.window_id,
            plan_config: defaults.plan,
            active: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Build ledger, cache and orchestrator over one backend
    #[must_use]
    pub fn from_config(
        backend: SharedStore,
        config: &PipelineConfig,
        stages: StageRegistry,
        catalog: WorkItemCatalog,
    ) -> Self {
        let storage = Storage::with_config(backend, config.storage);
        let ledger = JobLedger::with_config(storage.clone(), config.ledger);
        let cache = ArtifactCache::with_config(storage, config.cache);
        Self::new(ledger, cache, stages, catalog)
            .with_window_id(config.window_id.clone())
            .with_plan_config(config.plan)
    }

    /// With window id stamped on jobs
    #[inline]
    #[must_use]
    pub fn with_window_id(mut self, window_id: impl Into<String>) -> Self {
        self.window_id = window_id.into();
        self
    }

    /// With plan hints
    #[inline]
    #[must_use]
    pub fn with_plan_config(mut self, plan_config: PlanConfig) -> Self {
        self.plan_config = plan_config;
        self
    }

    /// With a channel receiving [`PlanEvent`]s
    #[inline]
    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<PlanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Job ledger
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Artifact cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Work item catalog
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &WorkItemCatalog {
        &self.catalog
    }

    /// Build a pending plan
    ///
    /// Duplicate work items and stages are dropped, stages are put in
    /// pipeline order, and kinds outside the pipeline are ignored.
    /// `total_tasks` is work items times stages.
    #[must_use]
    pub fn create_plan(&self, work_item_ids: &[String], stages: &[StageKind], mode: ExecutionMode) -> RunPlan {
        let mut items: Vec<String> = Vec::with_capacity(work_item_ids.len());
        for id in work_item_ids {
            if !items.contains(id) {
                items.push(id.clone());
            }
        }

        for kind in stages.iter().filter(|k| !k.is_pipeline_stage()) {
            tracing::warn!("[PLAN][IGNORED_STAGE] {} is not a pipeline stage", kind);
        }
        let ordered: Vec<StageKind> = StageKind::PIPELINE
            .iter()
            .copied()
            .filter(|k| stages.contains(k))
            .collect();

        let plan = RunPlan {
            id: format!("PLAN-{}", ulid::Ulid::new()),
            created_at: Utc::now(),
            total_tasks: items.len() * ordered.len(),
            work_item_ids: items,
            stages: ordered,
            mode,
            batch_size: self.plan_config.work_item_batch_size,
            max_concurrency: self.plan_config.max_concurrency,
            status: PlanStatus::Pending,
            completed_tasks: 0,
        };
        tracing::info!(
            "[PLAN][CREATE] id={} items={} stages={:?} total_tasks={}",
            plan.id,
            plan.work_item_ids.len(),
            plan.stages,
            plan.total_tasks
        );
        plan
    }

    /// Execute a plan with a fresh cancellation token
    ///
    /// The token is registered under the plan id while the plan runs so
    /// [`Self::stop_plan`] and [`Self::stop_plan_by_id`] can trip it from
    /// another task. Several plans may run on one orchestrator at once.
    pub async fn execute_plan(&self, plan: &mut RunPlan) -> PlanReport {
        let token = CancellationToken::new();
        if let Some(previous) = self.active.lock().insert(plan.id.clone(), token.clone()) {
            tracing::warn!("[PLAN][RESTART] id={} was already executing, stopping it", plan.id);
            previous.cancel();
        }
        let report = self.execute_plan_with_token(plan, &token).await;
        self.active.lock().remove(&plan.id);
        report
    }

    /// Trip the cancellation token of every executing plan
    ///
    /// Returns whether any plan was running.
    pub fn stop_plan(&self) -> bool {
        let active = self.active.lock();
        for (plan_id, token) in active.iter() {
            tracing::info!("[PLAN][STOP] id={} cancellation requested", plan_id);
            token.cancel();
        }
        !active.is_empty()
    }

    /// Trip the cancellation token of one executing plan
    ///
    /// Returns whether that plan was running.
    pub fn stop_plan_by_id(&self, plan_id: &str) -> bool {
        match self.active.lock().get(plan_id) {
            Some(token) => {
                tracing::info!("[PLAN][STOP] id={} cancellation requested", plan_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute a plan under a caller-owned token
    ///
    /// A token that is already tripped cancels the plan before any work.
    pub async fn execute_plan_with_token(&self, plan: &mut RunPlan, cancel: &CancellationToken) -> PlanReport {
        plan.status = PlanStatus::Running;
        plan.completed_tasks = 0;
        tracing::info!("[PLAN][START] id={} mode={:?}", plan.id, plan.mode);
        self.emit(PlanEvent::PlanStarted {
            plan_id: plan.id.clone(),
            total_tasks: plan.total_tasks,
        });

        let mut unknown = Vec::new();
        let mut runs = Vec::new();
        for id in &plan.work_item_ids {
            match self.catalog.get(id) {
                Some(item) => runs.push(ItemRun::new(item.clone())),
                None => {
                    tracing::warn!("[PLAN][UNKNOWN_ITEM] plan={} item={}, skipping", plan.id, id);
                    unknown.push(id.clone());
                }
            }
        }

        let requested = plan.stages.clone();
        let plan_id = plan.id.clone();
        let ctx = StepContext {
            plan_id: Some(&plan_id),
            requested: &requested,
            cancel,
        };

        let mut reached = 0;
        match plan.mode {
            ExecutionMode::SequentialByWorkItem => {
                for run in &mut runs {
                    if cancel.is_cancelled() {
                        break;
                    }
                    reached += 1;
                    tracing::info!("[PLAN][ITEM] plan={} item={}", plan_id, run.item.id);
                    for stage in StageKind::PIPELINE {
                        if cancel.is_cancelled() {
                            break;
                        }
                        if self.advance(run, stage, &ctx).await && plan.requests(stage) {
                            plan.completed_tasks += 1;
                        }
                    }
                }
            }
            ExecutionMode::SequentialByStagePhase => {
                reached = runs.len();
                'phases: for stage in StageKind::PIPELINE {
                    tracing::info!("[PLAN][PHASE] plan={} stage={}", plan_id, stage);
                    for run in &mut runs {
                        if cancel.is_cancelled() {
                            break 'phases;
                        }
                        if self.advance(run, stage, &ctx).await && plan.requests(stage) {
                            plan.completed_tasks += 1;
                        }
                    }
                }
            }
        }

        let failures = runs
            .iter()
            .flat_map(|r| &r.report.stages)
            .filter(|s| matches!(s.outcome, StageOutcome::Failed(_)))
            .count();
        plan.status = if cancel.is_cancelled() {
            PlanStatus::Cancelled
        } else if failures > 0 && plan.completed_tasks == 0 {
            PlanStatus::Failed
        } else {
            PlanStatus::Completed
        };

        tracing::info!(
            "[PLAN][FINISH] id={} status={} completed={}/{} items_reached={} failures={}",
            plan_id,
            plan.status,
            plan.completed_tasks,
            plan.total_tasks,
            reached,
            failures
        );
        self.emit(PlanEvent::PlanFinished {
            plan_id: plan_id.clone(),
            status: plan.status,
            completed_tasks: plan.completed_tasks,
        });

        PlanReport {
            plan_id,
            status: plan.status,
            total_tasks: plan.total_tasks,
            completed_tasks: plan.completed_tasks,
            work_items: runs
                .into_iter()
                .filter(|r| !r.report.stages.is_empty())
                .map(|r| r.report)
                .collect(),
            unknown_work_items: unknown,
        }
    }

    /// Walk the stage chain for a single work item
    pub async fn run_category_pipeline(
        &self,
        work_item_id: &str,
        stages: &[StageKind],
        cancel: &CancellationToken,
    ) -> Result<WorkItemReport, PipelineError> {
        let item = self
            .catalog
            .get(work_item_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownWorkItem(work_item_id.to_string()))?;

        let mut run = ItemRun::new(item);
        let ctx = StepContext {
            plan_id: None,
            requested: stages,
            cancel,
        };
        for stage in StageKind::PIPELINE {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            self.advance(&mut run, stage, &ctx).await;
        }
        Ok(run.report)
    }

    /// Apply the stage policy to one (work item, stage) pair
    ///
    /// Returns whether an artifact for `stage` is available afterwards.
    async fn advance(&self, run: &mut ItemRun, stage: StageKind, ctx: &StepContext<'_>) -> bool {
        let (outcome, job_id) = self.decide(run, stage, ctx).await;
        let success = outcome.is_success();

        if let Some(plan_id) = ctx.plan_id {
            self.emit(PlanEvent::StageFinished {
                plan_id: plan_id.to_string(),
                work_item_id: run.item.id.clone(),
                stage,
                outcome: outcome.clone(),
            });
        }
        run.report.stages.push(StageRecord { stage, outcome, job_id });
        success
    }

    async fn decide(&self, run: &mut ItemRun, stage: StageKind, ctx: &StepContext<'_>) -> (StageOutcome, Option<String>) {
        if !is_needed(stage, ctx.requested) {
            return (StageOutcome::Skipped(SkipReason::NotRequested), None);
        }
        if run.halted {
            tracing::info!("[PIPELINE][SKIP] item={} stage={} upstream unavailable", run.item.id, stage);
            return (StageOutcome::Skipped(SkipReason::DependencyUnmet), None);
        }

        match self.cache.get(stage, &run.item.id).await {
            Ok(Some(artifact)) => {
                let job_id = self.record_reuse(&run.item.id, stage).await;
                run.artifacts.insert(stage, artifact);
                return (StageOutcome::Reused, Some(job_id));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("[CACHE][READ_FAILED] item={} stage={} error={}", run.item.id, stage, e);
            }
        }

        let upstream = match stage.upstream() {
            None => None,
            Some(up) => match run.artifacts.get(&up) {
                Some(artifact) => Some(artifact.clone()),
                None => {
                    tracing::info!("[PIPELINE][SKIP] item={} stage={} missing {}", run.item.id, stage, up);
                    run.halted = true;
                    return (StageOutcome::Skipped(SkipReason::DependencyUnmet), None);
                }
            },
        };

        let job = self
            .ledger
            .create_job(stage, &run.item.id, &self.window_id)
            .await
            .into_value();
        if let Some(plan_id) = ctx.plan_id {
            self.emit(PlanEvent::StageStarted {
                plan_id: plan_id.to_string(),
                work_item_id: run.item.id.clone(),
                stage,
                job_id: job.job_id.clone(),
            });
        }

        let sink = JobLogSink::new(self.ledger.clone(), job.clone());
        let implementation = self.stages.get(stage);
        let item = &run.item;
        let upstream_ref = upstream.as_ref();
        let cancel = ctx.cancel;
        let sink_ref = &sink;
        let result = self
            .ledger
            .run_step(&job, stage.label(), || async move {
                let Some(implementation) = implementation else {
                    return Err(StageFailure::failed(format!("no implementation registered for {stage}")));
                };
                let artifact = implementation.run(item, upstream_ref, cancel, sink_ref).await?;
                if artifact.stage != stage || artifact.work_item_id != item.id {
                    return Err(StageFailure::failed(format!(
                        "stage {stage} returned an artifact for {}::{}",
                        artifact.stage, artifact.work_item_id
                    )));
                }
                Ok(artifact)
            })
            .await;

        match result {
            Ok(artifact) => {
                self.cache.put(&artifact).await;
                self.ledger
                    .update_job(
                        &job,
                        JobUpdate::status(JobStatus::Completed)
                            .with_progress(Progress::Percent(100))
                            .with_message("Done"),
                    )
                    .await;
                tracing::info!("[PIPELINE][DONE] item={} stage={} job={}", run.item.id, stage, job.job_id);
                run.artifacts.insert(stage, artifact);
                (StageOutcome::Completed, Some(job.job_id))
            }
            Err(failure) if failure.is_abort() || ctx.cancel.is_cancelled() => {
                if !failure.is_abort() {
                    self.ledger
                        .update_job(
                            &job,
                            JobUpdate::status(JobStatus::Cancelled)
                                .with_stage_label("Cancelled")
                                .with_message("Plan Cancelled"),
                        )
                        .await;
                }
                tracing::info!("[PIPELINE][CANCELLED] item={} stage={}", run.item.id, stage);
                run.halted = true;
                (StageOutcome::Cancelled, Some(job.job_id))
            }
            Err(failure) => {
                tracing::error!("[PIPELINE][FAILED] item={} stage={} error={}", run.item.id, stage, failure);
                run.halted = true;
                (StageOutcome::Failed(failure.to_string()), Some(job.job_id))
            }
        }
    }

    /// Audit a cache hit with a job that goes straight to `COMPLETED`
    async fn record_reuse(&self, work_item_id: &str, stage: StageKind) -> String {
        let job = self
            .ledger
            .create_job(stage, work_item_id, &self.window_id)
            .await
            .into_value();
        self.ledger
            .update_job(
                &job,
                JobUpdate::status(JobStatus::Completed)
                    .with_progress(Progress::Percent(100))
                    .with_message("Reused cached artifact"),
            )
            .await;
        tracing::info!("[PIPELINE][REUSE] item={} stage={} job={}", work_item_id, stage, job.job_id);
        job.job_id
    }

    fn emit(&self, event: PlanEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = events.send(event);
        }
    }
}
