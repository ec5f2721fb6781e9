//! Stage checkpoint store
//!
//! Tracks which sub-units of a decomposable stage have finished for a work
//! item, together with their results. Results are appended at most once per
//! sub-unit id, and a non-terminal checkpoint is always resumed rather than
//! replaced.

use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use mci_storage::{Namespace, Persisted, Storage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

/// Checkpoint status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl CheckpointStatus {
    /// Complete and failed checkpoints are superseded by a fresh attempt
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Persisted partial progress of one decomposable stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCheckpoint<R> {
    pub work_item_id: String,
    pub status: CheckpointStatus,
    /// Finished sub-unit ids in completion order
    pub completed_sub_unit_ids: Vec<String>,
    pub sub_unit_results: BTreeMap<String, R>,
    pub total_sub_units: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl<R> StageCheckpoint<R> {
    fn fresh(work_item_id: &str, total_sub_units: usize) -> Self {
        let now = Utc::now();
        Self {
            work_item_id: work_item_id.to_string(),
            status: CheckpointStatus::InProgress,
            completed_sub_unit_ids: Vec::new(),
            sub_unit_results: BTreeMap::new(),
            total_sub_units,
            failure: None,
            started_at: now,
            last_updated_at: now,
        }
    }

    /// Whether a sub-unit already has a result
    #[inline]
    #[must_use]
    pub fn is_done(&self, sub_unit_id: &str) -> bool {
        self.completed_sub_unit_ids.iter().any(|id| id == sub_unit_id)
    }

    /// Sub-units of `all_ids` that still need to run, in input order
    #[must_use]
    pub fn pending_sub_units<'a>(&self, all_ids: &'a [String]) -> Vec<&'a str> {
        all_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !self.is_done(id))
            .collect()
    }

    /// Results in completion order
    pub fn ordered_results(&self) -> impl Iterator<Item = (&str, &R)> {
        self.completed_sub_unit_ids
            .iter()
            .filter_map(|id| self.sub_unit_results.get(id).map(|r| (id.as_str(), r)))
    }
}

/// Persistence for [`StageCheckpoint`]s with result type `R`
pub struct StageCheckpointStore<R> {
    storage: Storage,
    _results: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for StageCheckpointStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageCheckpointStore")
            .field("storage", &self.storage)
            .finish()
    }
}

impl<R> Clone for StageCheckpointStore<R> {
    fn clone(&self) -> Self {
        Self::new(self.storage.clone())
    }
}

impl<R> StageCheckpointStore<R> {
    /// Create store
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            _results: PhantomData,
        }
    }
}

impl<R> StageCheckpointStore<R>
where
    R: Serialize + DeserializeOwned + Send + Sync,
{
    /// Load a checkpoint
    pub async fn get_checkpoint(&self, work_item_id: &str) -> Result<Option<StageCheckpoint<R>>, CheckpointError> {
        Ok(self.storage.load(Namespace::STAGE_CHECKPOINTS, work_item_id).await?)
    }

    async fn require(&self, work_item_id: &str) -> Result<StageCheckpoint<R>, CheckpointError> {
        self.get_checkpoint(work_item_id)
            .await?
            .ok_or_else(|| CheckpointError::MissingCheckpoint(work_item_id.to_string()))
    }

    async fn save(&self, checkpoint: StageCheckpoint<R>) -> Persisted<StageCheckpoint<R>> {
        self.storage
            .save(Namespace::STAGE_CHECKPOINTS, &checkpoint.work_item_id, &checkpoint)
            .await
            .with_value(checkpoint)
    }

    /// Resume the non-terminal checkpoint or start a new `IN_PROGRESS` one
    pub async fn init_checkpoint(
        &self,
        work_item_id: &str,
        all_sub_unit_ids: &[String],
    ) -> Result<Persisted<StageCheckpoint<R>>, CheckpointError> {
        if let Some(existing) = self.get_checkpoint(work_item_id).await? {
            if !existing.status.is_terminal() {
                tracing::info!(
                    "[CHECKPOINT][RESUME] item={} done={}/{}",
                    work_item_id,
                    existing.completed_sub_unit_ids.len(),
                    existing.total_sub_units
                );
                return Ok(Persisted::Durable(existing));
            }
        }

        tracing::info!("[CHECKPOINT][START] item={} sub_units={}", work_item_id, all_sub_unit_ids.len());
        Ok(self
            .save(StageCheckpoint::fresh(work_item_id, all_sub_unit_ids.len()))
            .await)
    }

    /// Append a sub-unit result unless one is already recorded
    ///
    /// Fails when no checkpoint exists for the work item.
    pub async fn save_sub_unit_result(
        &self,
        work_item_id: &str,
        sub_unit_id: &str,
        result: R,
    ) -> Result<Persisted<StageCheckpoint<R>>, CheckpointError> {
        let checkpoint = self.require(work_item_id).await?;
        Ok(self.append_result(checkpoint, sub_unit_id, result).await)
    }

    async fn append_result(
        &self,
        mut checkpoint: StageCheckpoint<R>,
        sub_unit_id: &str,
        result: R,
    ) -> Persisted<StageCheckpoint<R>> {
        if checkpoint.is_done(sub_unit_id) {
            tracing::debug!(
                "[CHECKPOINT][DUPLICATE] item={} sub_unit={}",
                checkpoint.work_item_id,
                sub_unit_id
            );
            return Persisted::Durable(checkpoint);
        }

        checkpoint.completed_sub_unit_ids.push(sub_unit_id.to_string());
        checkpoint.sub_unit_results.insert(sub_unit_id.to_string(), result);
        checkpoint.last_updated_at = Utc::now();
        self.save(checkpoint).await
    }

    /// Sub-units still to run for a work item
    ///
    /// Everything is pending when no checkpoint exists.
    pub async fn pending_sub_units(
        &self,
        work_item_id: &str,
        all_sub_unit_ids: &[String],
    ) -> Result<Vec<String>, CheckpointError> {
        Ok(match self.get_checkpoint(work_item_id).await? {
            Some(checkpoint) => checkpoint
                .pending_sub_units(all_sub_unit_ids)
                .into_iter()
                .map(str::to_string)
                .collect(),
            None => all_sub_unit_ids.to_vec(),
        })
    }

    /// Mark the checkpoint `COMPLETE`
    pub async fn mark_complete(&self, work_item_id: &str) -> Result<Persisted<StageCheckpoint<R>>, CheckpointError> {
        let checkpoint = self.require(work_item_id).await?;
        Ok(self.complete(checkpoint).await)
    }

    async fn complete(&self, mut checkpoint: StageCheckpoint<R>) -> Persisted<StageCheckpoint<R>> {
        checkpoint.status = CheckpointStatus::Complete;
        checkpoint.last_updated_at = Utc::now();
        tracing::info!("[CHECKPOINT][COMPLETE] item={}", checkpoint.work_item_id);
        self.save(checkpoint).await
    }

    /// Mark the checkpoint `FAILED`; the next init starts over
    pub async fn mark_failed(
        &self,
        work_item_id: &str,
        reason: &str,
    ) -> Result<Persisted<StageCheckpoint<R>>, CheckpointError> {
        let mut checkpoint = self.require(work_item_id).await?;
        checkpoint.status = CheckpointStatus::Failed;
        checkpoint.failure = Some(reason.to_string());
        checkpoint.last_updated_at = Utc::now();
        tracing::warn!("[CHECKPOINT][FAILED] item={} reason={}", work_item_id, reason);
        Ok(self.save(checkpoint).await)
    }

    /// Delete the checkpoint
    pub async fn clear_checkpoint(&self, work_item_id: &str) -> Result<(), CheckpointError> {
        self.storage.delete(Namespace::STAGE_CHECKPOINTS, work_item_id).await?;
        Ok(())
    }

    /// Delete every checkpoint
    pub async fn clear_all(&self) -> Result<(), CheckpointError> {
        Ok(self.storage.clear(Namespace::STAGE_CHECKPOINTS).await?)
    }

    /// Run the remaining sub-units of a stage one at a time
    ///
    /// Resumes (or starts) the checkpoint, skips sub-units that already have
    /// a result, saves each new result as soon as it is produced, and marks
    /// the checkpoint `COMPLETE` at the end. Cancellation and sub-unit
    /// failures leave the checkpoint `IN_PROGRESS` so a later call resumes.
    /// Progress is carried in memory between sub-units; a backend that rejects
    /// writes does not stop the run.
    pub async fn run_sub_units<F, Fut, E>(
        &self,
        work_item_id: &str,
        all_sub_unit_ids: &[String],
        cancel: &CancellationToken,
        mut run: F,
    ) -> Result<StageCheckpoint<R>, CheckpointError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: fmt::Display,
    {
        let mut checkpoint = self.init_checkpoint(work_item_id, all_sub_unit_ids).await?.into_value();
        let pending: Vec<String> = checkpoint
            .pending_sub_units(all_sub_unit_ids)
            .into_iter()
            .map(str::to_string)
            .collect();

        for sub_unit_id in pending {
            if cancel.is_cancelled() {
                tracing::info!("[CHECKPOINT][CANCELLED] item={} next={}", work_item_id, sub_unit_id);
                return Err(CheckpointError::Cancelled);
            }
            let result = run(sub_unit_id.clone())
                .await
                .map_err(|e| CheckpointError::SubUnitFailed {
                    sub_unit_id: sub_unit_id.clone(),
                    message: e.to_string(),
                })?;
            checkpoint = self.append_result(checkpoint, &sub_unit_id, result).await.into_value();
        }

        Ok(self.complete(checkpoint).await.into_value())
    }
}
