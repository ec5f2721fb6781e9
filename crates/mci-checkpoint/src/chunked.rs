//! Chunked job store
//!
//! A [`ChunkedJob`] freezes its key set into fixed-size chunks exactly once,
//! at creation. Resuming a non-terminal job always re-enters at the same
//! chunk boundaries because the partition is stored, never recomputed.

use crate::error::CheckpointError;
use crate::normalize::dedup_keys;
use chrono::{DateTime, Utc};
use mci_storage::{Namespace, Persisted, Storage, WriteOutcome};
use serde::{Deserialize, Serialize};

/// Chunking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Keys per frozen chunk
    pub chunk_size: usize,
    /// A chunk is given up once its attempt count exceeds this
    pub max_retries: u32,
    /// Pause between ticks when driven to completion
    pub inter_chunk_delay_ms: u64,
}

impl ChunkingConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With chunk size
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// With retry bound
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// With inter-chunk delay
    #[inline]
    #[must_use]
    pub fn with_inter_chunk_delay_ms(mut self, ms: u64) -> Self {
        self.inter_chunk_delay_ms = ms;
        self
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            max_retries: 2,
            inter_chunk_delay_ms: 1000,
        }
    }
}

/// Chunk status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    Pending,
    Success,
    Failed,
}

/// Chunked job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkedJobStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl ChunkedJobStatus {
    /// Complete and failed jobs are never resumed
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One immutable slice of the frozen key set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenChunk {
    pub index: usize,
    pub keys: Vec<String>,
    pub status: ChunkStatus,
    pub attempt_count: u32,
}

/// Resumable bulk job over a frozen key partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedJob {
    pub window_id: String,
    pub work_item_id: String,
    pub status: ChunkedJobStatus,
    pub total_keys: usize,
    pub frozen_chunks: Vec<FrozenChunk>,
    /// Index of the next chunk to attempt
    pub current_chunk_index: usize,
    pub processed_keys: Vec<String>,
    pub failed_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ChunkedJob {
    /// Storage key for a window and work item
    #[must_use]
    pub fn storage_key(window_id: &str, work_item_id: &str) -> String {
        format!("{window_id}::{work_item_id}")
    }

    /// Freeze a new plan from raw keys
    ///
    /// Keys are normalized and de-duplicated, then split in input order into
    /// chunks of `chunk_size` (a size of zero is treated as one).
    #[must_use]
    pub fn plan<I, S>(window_id: &str, work_item_id: &str, keys: I, chunk_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique = dedup_keys(keys);
        let frozen_chunks = unique
            .chunks(chunk_size.max(1))
            .enumerate()
            .map(|(index, keys)| FrozenChunk {
                index,
                keys: keys.to_vec(),
                status: ChunkStatus::Pending,
                attempt_count: 0,
            })
            .collect();
        let now = Utc::now();
        Self {
            window_id: window_id.to_string(),
            work_item_id: work_item_id.to_string(),
            status: ChunkedJobStatus::Pending,
            total_keys: unique.len(),
            frozen_chunks,
            current_chunk_index: 0,
            processed_keys: Vec::new(),
            failed_keys: Vec::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Storage key of this job
    #[must_use]
    pub fn id(&self) -> String {
        Self::storage_key(&self.window_id, &self.work_item_id)
    }

    /// Whether the cursor has passed the last chunk
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.current_chunk_index >= self.frozen_chunks.len()
    }

    /// Keys not yet processed or given up on
    #[must_use]
    pub fn remaining_keys(&self) -> usize {
        self.total_keys
            .saturating_sub(self.processed_keys.len() + self.failed_keys.len())
    }
}

/// Persistence for [`ChunkedJob`]s
#[derive(Debug, Clone)]
pub struct ChunkedJobStore {
    storage: Storage,
    config: ChunkingConfig,
}

impl ChunkedJobStore {
    /// Create store with default chunking
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self::with_config(storage, ChunkingConfig::default())
    }

    /// Create store with explicit chunking
    #[must_use]
    pub fn with_config(storage: Storage, config: ChunkingConfig) -> Self {
        Self { storage, config }
    }

    /// Chunking configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Underlying storage
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Load a job
    pub async fn get_job(&self, window_id: &str, work_item_id: &str) -> Result<Option<ChunkedJob>, CheckpointError> {
        let key = ChunkedJob::storage_key(window_id, work_item_id);
        Ok(self.storage.load(Namespace::CHUNKED_JOBS, &key).await?)
    }

    /// Load a job that must exist
    pub async fn require_job(&self, window_id: &str, work_item_id: &str) -> Result<ChunkedJob, CheckpointError> {
        self.get_job(window_id, work_item_id)
            .await?
            .ok_or_else(|| CheckpointError::missing_job(window_id, work_item_id))
    }

    /// Resume the non-terminal job for this window and work item, or freeze
    /// and persist a new one
    pub async fn initialize_job<I, S>(
        &self,
        window_id: &str,
        work_item_id: &str,
        keys: I,
    ) -> Result<Persisted<ChunkedJob>, CheckpointError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(existing) = self.get_job(window_id, work_item_id).await? {
            if !existing.status.is_terminal() {
                tracing::info!(
                    "[CHUNKS][RESUME] job={} cursor={}/{}",
                    existing.id(),
                    existing.current_chunk_index,
                    existing.frozen_chunks.len()
                );
                return Ok(Persisted::Durable(existing));
            }
        }

        let job = ChunkedJob::plan(window_id, work_item_id, keys, self.config.chunk_size);
        tracing::info!(
            "[CHUNKS][CREATE] job={} keys={} chunks={}",
            job.id(),
            job.total_keys,
            job.frozen_chunks.len()
        );
        Ok(self.save_job(&job).await.with_value(job))
    }

    /// Persist a job
    pub async fn save_job(&self, job: &ChunkedJob) -> WriteOutcome {
        self.storage.save(Namespace::CHUNKED_JOBS, &job.id(), job).await
    }

    /// Delete one job
    pub async fn clear_job(&self, window_id: &str, work_item_id: &str) -> Result<(), CheckpointError> {
        let key = ChunkedJob::storage_key(window_id, work_item_id);
        self.storage.delete(Namespace::CHUNKED_JOBS, &key).await?;
        tracing::info!("[CHUNKS][CLEAR] job={}", key);
        Ok(())
    }

    /// Delete every job
    pub async fn clear_all(&self) -> Result<(), CheckpointError> {
        Ok(self.storage.clear(Namespace::CHUNKED_JOBS).await?)
    }
}
