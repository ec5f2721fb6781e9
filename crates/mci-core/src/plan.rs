//! Run plans, their reports and progress events

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use mci_jobs::StageKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Run plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Pending => "PENDING",
            PlanStatus::Running => "RUNNING",
            PlanStatus::Completed => "COMPLETED",
            PlanStatus::Cancelled => "CANCELLED",
            PlanStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Order in which (work item, stage) pairs are visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Each work item's chain runs to the end before the next work item
    #[default]
    SequentialByWorkItem,
    /// Stage N runs for every work item before stage N+1
    SequentialByStagePhase,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by-item" | "item" | "sequential_by_work_item" => Ok(Self::SequentialByWorkItem),
            "by-stage" | "stage" | "sequential_by_stage_phase" => Ok(Self::SequentialByStagePhase),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Informational batch hints recorded on every plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub work_item_batch_size: usize,
    pub max_concurrency: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            work_item_batch_size: 3,
            max_concurrency: 2,
        }
    }
}

/// A batch orchestration request over work items and stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub work_item_ids: Vec<String>,
    /// Requested stages in pipeline order
    pub stages: Vec<StageKind>,
    pub mode: ExecutionMode,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub status: PlanStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
}

impl RunPlan {
    /// Whether a stage was explicitly requested
    #[inline]
    #[must_use]
    pub fn requests(&self, stage: StageKind) -> bool {
        self.stages.contains(&stage)
    }
}

/// Why a stage did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// Neither the stage nor anything downstream of it was requested
    NotRequested,
    /// Its upstream artifact could not be produced
    DependencyUnmet,
}

/// What happened to one stage of one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutcome {
    /// A cached artifact was reused
    Reused,
    /// The stage ran and produced an artifact
    Completed,
    /// The stage ran and failed
    Failed(String),
    /// The stage stopped because the plan was cancelled
    Cancelled,
    /// The stage did not run
    Skipped(SkipReason),
}

impl StageOutcome {
    /// Whether an artifact is available afterwards
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reused | Self::Completed)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused => f.write_str("reused"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(message) => write!(f, "failed: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Skipped(SkipReason::NotRequested) => f.write_str("skipped (not requested)"),
            Self::Skipped(SkipReason::DependencyUnmet) => f.write_str("skipped (dependency unmet)"),
        }
    }
}

/// Outcome of one stage with the job that audited it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: StageKind,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Stage outcomes of one work item, in pipeline order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemReport {
    pub work_item_id: String,
    pub stages: Vec<StageRecord>,
}

impl WorkItemReport {
    /// Outcome recorded for a stage
    #[must_use]
    pub fn outcome(&self, stage: StageKind) -> Option<&StageOutcome> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.outcome)
    }

    /// Job that audited a stage
    #[must_use]
    pub fn job_id(&self, stage: StageKind) -> Option<&str> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .and_then(|r| r.job_id.as_deref())
    }

    /// First cancellation, failure or unmet dependency, as an error
    #[must_use]
    pub fn first_error(&self) -> Option<PipelineError> {
        self.stages.iter().find_map(|record| match &record.outcome {
            StageOutcome::Cancelled => Some(PipelineError::Cancelled),
            StageOutcome::Failed(message) => Some(PipelineError::StageFailed {
                work_item_id: self.work_item_id.clone(),
                stage: record.stage,
                message: message.clone(),
            }),
            StageOutcome::Skipped(SkipReason::DependencyUnmet) => Some(PipelineError::DependencyUnmet {
                work_item_id: self.work_item_id.clone(),
                stage: record.stage,
            }),
            _ => None,
        })
    }
}

/// Result of executing a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub plan_id: String,
    pub status: PlanStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub work_items: Vec<WorkItemReport>,
    /// Requested ids missing from the catalog
    pub unknown_work_items: Vec<String>,
}

impl PlanReport {
    /// Report for a work item
    #[must_use]
    pub fn work_item(&self, id: &str) -> Option<&WorkItemReport> {
        self.work_items.iter().find(|r| r.work_item_id == id)
    }

    /// Whether any stage failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.work_items
            .iter()
            .flat_map(|r| &r.stages)
            .any(|s| matches!(s.outcome, StageOutcome::Failed(_)))
    }
}

/// Progress notifications emitted while a plan executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEvent {
    PlanStarted {
        plan_id: String,
        total_tasks: usize,
    },
    StageStarted {
        plan_id: String,
        work_item_id: String,
        stage: StageKind,
        job_id: String,
    },
    StageFinished {
        plan_id: String,
        work_item_id: String,
        stage: StageKind,
        outcome: StageOutcome,
    },
    PlanFinished {
        plan_id: String,
        status: PlanStatus,
        completed_tasks: usize,
    },
}
