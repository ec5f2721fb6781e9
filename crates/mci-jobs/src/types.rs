//! Job ledger types
//!
//! - [`StageKind`] and its fixed dependency chain
//! - [`JobStatus`] and its transition table
//! - [`JobRecord`] and the [`JobUpdate`] merged into it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    /// Needs discovery
    Needs,
    /// Demand estimation
    Demand,
    /// Deep analysis
    DeepAnalysis,
    /// Synthesis
    Synthesis,
    /// Bulk chunked warmup
    Warmup,
    /// Ledger self-test
    Ping,
}

impl StageKind {
    /// The four pipeline stages in dependency order
    pub const PIPELINE: [StageKind; 4] = [
        StageKind::Needs,
        StageKind::Demand,
        StageKind::DeepAnalysis,
        StageKind::Synthesis,
    ];

    /// Human-readable label used as the job's stage label
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Needs => "Needs",
            StageKind::Demand => "Demand",
            StageKind::DeepAnalysis => "Deep Analysis",
            StageKind::Synthesis => "Synthesis",
            StageKind::Warmup => "Warmup",
            StageKind::Ping => "Ping",
        }
    }

    /// Stable identifier (also the serialized form)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Needs => "NEEDS",
            StageKind::Demand => "DEMAND",
            StageKind::DeepAnalysis => "DEEP_ANALYSIS",
            StageKind::Synthesis => "SYNTHESIS",
            StageKind::Warmup => "WARMUP",
            StageKind::Ping => "PING",
        }
    }

    /// Whether this kind is one of the four ordered pipeline stages
    #[inline]
    #[must_use]
    pub fn is_pipeline_stage(&self) -> bool {
        self.pipeline_position().is_some()
    }

    /// Position in [`StageKind::PIPELINE`]
    #[inline]
    #[must_use]
    pub fn pipeline_position(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|kind| kind == self)
    }

    /// The stage whose artifact this stage consumes
    #[must_use]
    pub fn upstream(&self) -> Option<StageKind> {
        match self.pipeline_position()? {
            0 => None,
            idx => Some(Self::PIPELINE[idx - 1]),
        }
    }

    /// Whether `other` comes strictly after `self` in the pipeline
    #[must_use]
    pub fn is_upstream_of(&self, other: StageKind) -> bool {
        match (self.pipeline_position(), other.pipeline_position()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NEEDS" => Ok(StageKind::Needs),
            "DEMAND" => Ok(StageKind::Demand),
            "DEEP_ANALYSIS" | "DEEP" => Ok(StageKind::DeepAnalysis),
            "SYNTHESIS" => Ok(StageKind::Synthesis),
            "WARMUP" => Ok(StageKind::Warmup),
            "PING" => Ok(StageKind::Ping),
            other => Err(format!("unknown stage kind: {other}")),
        }
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs are terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Statuses that may still be written onto a terminal job
    #[inline]
    #[must_use]
    pub fn overrides_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Documented transitions out of a status
    ///
    /// `Pending -> Completed` is the short-circuit used when a cached artifact
    /// is reused without running the stage.
    #[must_use]
    pub fn allowed_transitions(&self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Pending => &[Running, Completed, Failed, Cancelled],
            Running => &[Completed, Failed, Cancelling, Cancelled],
            Cancelling => &[Cancelled, Failed],
            Completed | Failed | Cancelled => &[Failed, Cancelled],
        }
    }

    /// Check a transition against [`JobStatus::allowed_transitions`]
    #[inline]
    #[must_use]
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Stable identifier (also the serialized form)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Cancelling => "CANCELLING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Job progress, either a percentage or a processed/total pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Progress {
    Percent(u8),
    Counts { processed: u64, total: u64 },
}

impl Progress {
    /// Progress as a 0-100 percentage
    #[must_use]
    pub fn percent(&self) -> u8 {
        match *self {
            Progress::Percent(p) => p.min(100),
            Progress::Counts { total: 0, .. } => 0,
            Progress::Counts { processed, total } => {
                let pct = processed.min(total).saturating_mul(100) / total;
                u8::try_from(pct).unwrap_or(100)
            }
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Progress::Percent(0)
    }
}

/// Durable record of one stage attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub stage_kind: StageKind,
    pub work_item_id: String,
    pub window_id: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub message: String,
    pub current_stage_label: String,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build a fresh pending record
    ///
    /// The id embeds the stage kind, the work item and a ULID (which carries
    /// the creation time), so it is never reused across attempts.
    #[must_use]
    pub fn new(stage_kind: StageKind, work_item_id: &str, window_id: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: format!("JOB-{stage_kind}-{work_item_id}-{}", ulid::Ulid::new()),
            stage_kind,
            work_item_id: work_item_id.to_string(),
            window_id: window_id.to_string(),
            status: JobStatus::Pending,
            progress: Progress::default(),
            message: "Queued...".to_string(),
            current_stage_label: stage_kind.label().to_string(),
            logs: Vec::new(),
            error: None,
            created_at: now,
            started_at: now,
            updated_at: now,
        }
    }

    /// Merge an update into this record
    ///
    /// A changed message appends `HH:MM:SS [stage] message` to the log; extra
    /// log lines are appended after it. The log keeps only the newest
    /// `log_cap` lines. The terminal guard is the ledger's job, not this
    /// method's.
    pub fn merge(&mut self, update: JobUpdate, now: DateTime<Utc>, log_cap: usize) {
        if let Some(message) = &update.message {
            if *message != self.message {
                let stage = update
                    .current_stage_label
                    .as_deref()
                    .filter(|label| !label.is_empty())
                    .or_else(|| Some(self.current_stage_label.as_str()).filter(|l| !l.is_empty()))
                    .unwrap_or("INFO");
                self.logs.push(format!("{} [{stage}] {message}", now.format("%H:%M:%S")));
            }
        }
        self.logs.extend(update.log_lines);
        if self.logs.len() > log_cap {
            let excess = self.logs.len() - log_cap;
            self.logs.drain(..excess);
        }

        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(label) = update.current_stage_label {
            self.current_stage_label = label;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = now;
    }
}

/// Partial update merged into a [`JobRecord`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<Progress>,
    pub message: Option<String>,
    pub current_stage_label: Option<String>,
    pub error: Option<String>,
    /// Lines appended verbatim to the job log
    pub log_lines: Vec<String>,
}

impl JobUpdate {
    /// Create empty update
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create status-only update
    #[inline]
    #[must_use]
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// With progress
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// With message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// With stage label
    #[inline]
    #[must_use]
    pub fn with_stage_label(mut self, label: impl Into<String>) -> Self {
        self.current_stage_label = Some(label.into());
        self
    }

    /// With error text
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// With an extra log line
    #[inline]
    #[must_use]
    pub fn with_log_line(mut self, line: impl Into<String>) -> Self {
        self.log_lines.push(line.into());
        self
    }
}
