//! Log sinks handed to running stages

use crate::ledger::JobLedger;
use crate::types::{JobRecord, JobUpdate};
use async_trait::async_trait;

/// Destination for progress lines emitted while a stage runs
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Record one line
    async fn log(&self, line: &str);
}

/// Appends lines to a job's log in the ledger
#[derive(Debug, Clone)]
pub struct JobLogSink {
    ledger: JobLedger,
    job: JobRecord,
}

impl JobLogSink {
    /// Create sink bound to a job
    #[must_use]
    pub fn new(ledger: JobLedger, job: JobRecord) -> Self {
        Self { ledger, job }
    }

    /// Job this sink writes to
    #[inline]
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }
}

#[async_trait]
impl LogSink for JobLogSink {
    async fn log(&self, line: &str) {
        tracing::debug!("[JOBS][LOG] id={} {}", self.job.job_id, line);
        self.ledger
            .update_job(&self.job, JobUpdate::new().with_log_line(line))
            .await;
    }
}

/// Discards every line
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogSink;

#[async_trait]
impl LogSink for NullLogSink {
    async fn log(&self, _line: &str) {}
}
