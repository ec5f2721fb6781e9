//! Error types for the pipeline orchestrator
//!
//! - [`StageFailure`]: what a stage collaborator returns
//! - [`PipelineError`]: what orchestrator entry points return

use mci_jobs::{looks_like_abort, AbortSignature, StageKind};
use mci_storage::StorageError;

/// Failure reported by a stage implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageFailure {
    /// The stage observed cancellation and stopped
    #[error("Cancelled")]
    Cancelled,

    /// The stage's computation failed
    #[error("{0}")]
    Failed(String),

    /// The stage was invoked without the artifact it consumes
    #[error("missing upstream artifact from {0}")]
    MissingUpstream(StageKind),
}

impl StageFailure {
    /// Create generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl AbortSignature for StageFailure {
    fn is_abort(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Failed(message) => looks_like_abort(message),
            Self::MissingUpstream(_) => false,
        }
    }
}

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The plan or pipeline was cancelled
    #[error("cancelled")]
    Cancelled,

    /// A stage failed for one work item
    #[error("stage {stage} failed for {work_item_id}: {message}")]
    StageFailed {
        work_item_id: String,
        stage: StageKind,
        message: String,
    },

    /// A requested stage could not run because its upstream artifact is missing
    #[error("stage {stage} skipped for {work_item_id}: upstream artifact unavailable")]
    DependencyUnmet { work_item_id: String, stage: StageKind },

    /// Work item not present in the catalog
    #[error("unknown work item: {0}")]
    UnknownWorkItem(String),

    /// Storage read failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether this is a cancellation rather than a failure
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether running again may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::StageFailed { .. } | Self::DependencyUnmet { .. } => true,
            Self::Storage(e) => e.is_transient(),
            Self::UnknownWorkItem(_) | Self::Config(_) => false,
        }
    }
}
