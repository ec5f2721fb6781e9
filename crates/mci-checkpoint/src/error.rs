//! Error types for chunked jobs and stage checkpoints

use mci_storage::StorageError;

/// Checkpoint errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying storage read failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No stage checkpoint for this work item
    #[error("no checkpoint found for {0}")]
    MissingCheckpoint(String),

    /// No chunked job for this window and work item
    #[error("no chunked job found for {window_id}::{work_item_id}")]
    MissingJob {
        window_id: String,
        work_item_id: String,
    },

    /// Cancellation was observed at a loop boundary
    #[error("cancelled")]
    Cancelled,

    /// A sub-unit computation failed; finished sub-units are kept
    #[error("sub-unit {sub_unit_id} failed: {message}")]
    SubUnitFailed {
        sub_unit_id: String,
        message: String,
    },
}

impl CheckpointError {
    /// Create missing job error
    pub fn missing_job(window_id: impl Into<String>, work_item_id: impl Into<String>) -> Self {
        Self::MissingJob {
            window_id: window_id.into(),
            work_item_id: work_item_id.into(),
        }
    }

    /// Whether this error is a cancellation rather than a failure
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether resuming later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::SubUnitFailed { .. } | Self::Cancelled => true,
            Self::MissingCheckpoint(_) | Self::MissingJob { .. } => false,
        }
    }
}

/// Chunk fetch failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Upstream refused the request for now
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other fetch failure
    #[error("fetch failed: {0}")]
    Failed(String),
}

impl FetchError {
    /// Create generic fetch failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
