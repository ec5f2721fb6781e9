//! Job ledger
//!
//! Writes go through [`Storage::save`], so no ledger operation ever blocks on
//! a slow backend for longer than the write timeout. Callers always get the
//! in-memory record back, tagged with whether it is known to be durable.

use crate::error::{AbortSignature, LedgerError};
use crate::types::{JobRecord, JobStatus, JobUpdate, StageKind};
use chrono::Utc;
use mci_storage::{Namespace, Persisted, Storage};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Ledger configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum number of log lines kept per job
    pub log_cap: usize,
    /// Default page size of [`JobLedger::recent_jobs`] callers
    pub recent_jobs_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            log_cap: 200,
            recent_jobs_limit: 20,
        }
    }
}

/// Durable job ledger
#[derive(Debug, Clone)]
pub struct JobLedger {
    storage: Storage,
    config: LedgerConfig,
}

impl JobLedger {
    /// Create ledger with default configuration
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self::with_config(storage, LedgerConfig::default())
    }

    /// Create ledger with explicit configuration
    #[must_use]
    pub fn with_config(storage: Storage, config: LedgerConfig) -> Self {
        Self { storage, config }
    }

    /// Ledger configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Underlying storage
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Create a pending job
    ///
    /// Returns within the storage write timeout even when the backend hangs.
    pub async fn create_job(
        &self,
        stage_kind: StageKind,
        work_item_id: &str,
        window_id: &str,
    ) -> Persisted<JobRecord> {
        let job = JobRecord::new(stage_kind, work_item_id, window_id);
        let outcome = self.storage.save(Namespace::JOBS, &job.job_id, &job).await;
        if outcome.is_durable() {
            tracing::debug!("[JOBS][CREATE] id={}", job.job_id);
        } else {
            tracing::warn!("[JOBS][CREATE_DEGRADED] id={} continuing in memory", job.job_id);
        }
        outcome.with_value(job)
    }

    /// Merge an update into the latest stored version of a job
    ///
    /// The stored copy wins over `job` when present. Once a job is terminal,
    /// only updates that move it to `CANCELLED` or `FAILED` are applied;
    /// anything else is dropped and the current record is returned unchanged.
    pub async fn update_job(&self, job: &JobRecord, update: JobUpdate) -> Persisted<JobRecord> {
        let mut current = match self.storage.load::<JobRecord>(Namespace::JOBS, &job.job_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => job.clone(),
            Err(e) => {
                tracing::warn!("[JOBS][READ_FAILED] id={} error={}, using caller copy", job.job_id, e);
                job.clone()
            }
        };

        if current.status.is_terminal() && !update.status.is_some_and(|s| s.overrides_terminal()) {
            tracing::debug!(
                "[JOBS][TERMINAL_GUARD] id={} status={} ignoring {:?}",
                current.job_id,
                current.status,
                update.status
            );
            return Persisted::Durable(current);
        }

        if let Some(next) = update.status {
            if next != current.status && !current.status.can_transition_to(next) {
                tracing::debug!(
                    "[JOBS][UNUSUAL_TRANSITION] id={} {} -> {}",
                    current.job_id,
                    current.status,
                    next
                );
            }
        }

        current.merge(update, Utc::now(), self.config.log_cap);
        self.storage
            .save(Namespace::JOBS, &current.job_id, &current)
            .await
            .with_value(current)
    }

    /// Fetch one job
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, LedgerError> {
        Ok(self.storage.load(Namespace::JOBS, job_id).await?)
    }

    /// Fetch one job that must exist
    pub async fn require_job(&self, job_id: &str) -> Result<JobRecord, LedgerError> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(job_id.to_string()))
    }

    /// Newest jobs first, by start time
    ///
    /// Records that fail to decode are skipped.
    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<JobRecord>, LedgerError> {
        let keys = self.storage.keys(Namespace::JOBS).await?;
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            match self.storage.load::<JobRecord>(Namespace::JOBS, &key).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => tracing::warn!("[JOBS][SKIP] key={} error={}", key, e),
            }
        }
        jobs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Run a step under a job
    ///
    /// Marks the job `RUNNING`, awaits `step`, and on error records either
    /// `CANCELLED` (abort signature) or `FAILED` before handing the error
    /// back. Success is left for the caller to record.
    pub async fn run_step<T, E, F, Fut>(&self, job: &JobRecord, stage_label: &str, step: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: AbortSignature,
    {
        self.update_job(
            job,
            JobUpdate::status(JobStatus::Running)
                .with_stage_label(stage_label)
                .with_message(format!("Starting {stage_label}...")),
        )
        .await;

        match step().await {
            Ok(value) => Ok(value),
            Err(e) => {
                let text = e.to_string();
                let update = if e.is_abort() {
                    tracing::info!("[JOBS][CANCELLED] id={} step={}", job.job_id, stage_label);
                    JobUpdate::status(JobStatus::Cancelled)
                        .with_stage_label("Cancelled")
                        .with_message("Execution aborted by user.")
                        .with_error(text)
                } else {
                    tracing::error!("[JOBS][FAILED] id={} step={} error={}", job.job_id, stage_label, text);
                    JobUpdate::status(JobStatus::Failed)
                        .with_stage_label("Failed")
                        .with_message(format!("Error: {text}"))
                        .with_error(text)
                };
                self.update_job(job, update).await;
                Err(e)
            }
        }
    }

    /// Delete every job record
    pub async fn reset(&self) -> Result<(), LedgerError> {
        self.storage.clear(Namespace::JOBS).await?;
        Ok(())
    }

    /// Self-test: create a `PING` job for the `GLOBAL` work item
    pub async fn ping(&self) -> Persisted<JobRecord> {
        self.create_job(StageKind::Ping, "GLOBAL", "test").await
    }
}
