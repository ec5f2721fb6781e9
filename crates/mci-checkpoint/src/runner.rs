//! Chunked job runner
//!
//! One [`ChunkedJobRunner::run_tick`] attempts exactly one chunk. The job is
//! persisted after every attempt, so a restart resumes at the stored cursor
//! with at most the in-flight chunk repeated.

use crate::chunked::{ChunkStatus, ChunkedJob, ChunkedJobStatus, ChunkedJobStore};
use crate::error::{CheckpointError, FetchError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mci_storage::Namespace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Best-effort per-key lookup for one chunk
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    /// Fetch values for `keys`; keys missing from the result count as 0
    async fn fetch(&self, keys: &[String]) -> Result<HashMap<String, u64>, FetchError>;
}

/// A fetched value recorded for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeObservation {
    pub key: String,
    pub window_id: String,
    pub volume: u64,
    pub observed_at: DateTime<Utc>,
}

impl VolumeObservation {
    /// Storage key for a window and key
    #[must_use]
    pub fn storage_key(window_id: &str, key: &str) -> String {
        format!("{window_id}::{key}")
    }
}

/// Whether the caller should keep ticking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Continue,
    Complete,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub status: TickStatus,
    /// Chunk attempted by this tick, if any
    pub chunk_index: Option<usize>,
    /// Keys successfully processed by this tick
    pub processed_count: usize,
}

/// Totals of a [`ChunkedJobRunner::run_to_completion`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub ticks: usize,
    pub processed_keys: usize,
    pub failed_keys: usize,
}

/// Drives a [`ChunkedJob`] chunk by chunk
#[derive(Debug, Clone)]
pub struct ChunkedJobRunner {
    store: ChunkedJobStore,
}

impl ChunkedJobRunner {
    /// Create runner over a store
    #[must_use]
    pub fn new(store: ChunkedJobStore) -> Self {
        Self { store }
    }

    /// Underlying store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &ChunkedJobStore {
        &self.store
    }

    /// Attempt the chunk at the cursor
    ///
    /// On success every key's value is recorded, the chunk is marked
    /// `SUCCESS` and the cursor advances. On failure the attempt count is
    /// bumped; once it exceeds `max_retries` the chunk is marked `FAILED`, its
    /// keys go to `failed_keys` and the cursor advances anyway. Otherwise the
    /// cursor stays and the next tick retries the same chunk.
    pub async fn run_tick(&self, job: &mut ChunkedJob, fetcher: &dyn ChunkFetcher) -> TickOutcome {
        if job.is_exhausted() {
            job.status = ChunkedJobStatus::Complete;
            job.last_updated_at = Utc::now();
            self.store.save_job(job).await;
            tracing::info!(
                "[CHUNKS][COMPLETE] job={} processed={} failed={}",
                job.id(),
                job.processed_keys.len(),
                job.failed_keys.len()
            );
            return TickOutcome {
                status: TickStatus::Complete,
                chunk_index: None,
                processed_count: 0,
            };
        }

        let index = job.current_chunk_index;
        let total = job.frozen_chunks.len();
        let keys = job.frozen_chunks[index].keys.clone();
        tracing::debug!(
            "[CHUNKS][TICK] job={} chunk={}/{} attempt={} keys={}",
            job.id(),
            index + 1,
            total,
            job.frozen_chunks[index].attempt_count + 1,
            keys.len()
        );

        let processed_count = match fetcher.fetch(&keys).await {
            Ok(volumes) => {
                self.record_volumes(&job.window_id, &keys, &volumes).await;
                let chunk = &mut job.frozen_chunks[index];
                chunk.status = ChunkStatus::Success;
                job.processed_keys.extend(keys.iter().cloned());
                job.current_chunk_index += 1;
                job.status = ChunkedJobStatus::InProgress;
                tracing::info!("[CHUNKS][SUCCESS] job={} chunk={}/{}", job.id(), index + 1, total);
                keys.len()
            }
            Err(e) => {
                let max_retries = self.store.config().max_retries;
                let chunk = &mut job.frozen_chunks[index];
                chunk.attempt_count += 1;
                let attempts = chunk.attempt_count;
                if attempts > max_retries {
                    chunk.status = ChunkStatus::Failed;
                    job.failed_keys.extend(keys.iter().cloned());
                    job.current_chunk_index += 1;
                    tracing::warn!(
                        "[CHUNKS][EXHAUSTED] job={} chunk={}/{} attempts={} error={}, skipping",
                        job.id(),
                        index + 1,
                        total,
                        attempts,
                        e
                    );
                } else {
                    tracing::warn!(
                        "[CHUNKS][RETRY] job={} chunk={}/{} attempts={} error={}",
                        job.id(),
                        index + 1,
                        total,
                        attempts,
                        e
                    );
                }
                job.status = ChunkedJobStatus::InProgress;
                0
            }
        };

        job.last_updated_at = Utc::now();
        self.store.save_job(job).await;

        TickOutcome {
            status: TickStatus::Continue,
            chunk_index: Some(index),
            processed_count,
        }
    }

    /// Tick until the job completes
    ///
    /// Cancellation is checked before every chunk and interrupts the pause
    /// between chunks. A cancelled run leaves the job resumable.
    pub async fn run_to_completion(
        &self,
        job: &mut ChunkedJob,
        fetcher: &dyn ChunkFetcher,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CheckpointError> {
        let delay = Duration::from_millis(self.store.config().inter_chunk_delay_ms);
        let mut summary = RunSummary::default();

        loop {
            if cancel.is_cancelled() {
                tracing::info!("[CHUNKS][CANCELLED] job={} cursor={}", job.id(), job.current_chunk_index);
                return Err(CheckpointError::Cancelled);
            }

            let outcome = self.run_tick(job, fetcher).await;
            summary.ticks += 1;
            summary.processed_keys += outcome.processed_count;
            if outcome.status == TickStatus::Complete {
                break;
            }

            if !job.is_exhausted() && !delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        summary.failed_keys = job.failed_keys.len();
        Ok(summary)
    }

    async fn record_volumes(&self, window_id: &str, keys: &[String], volumes: &HashMap<String, u64>) {
        let storage = self.store.storage();
        let observed_at = Utc::now();
        for key in keys {
            let observation = VolumeObservation {
                key: key.clone(),
                window_id: window_id.to_string(),
                volume: volumes.get(key).copied().unwrap_or(0),
                observed_at,
            };
            storage
                .save(
                    Namespace::VOLUMES,
                    &VolumeObservation::storage_key(window_id, key),
                    &observation,
                )
                .await;
        }
    }
}
