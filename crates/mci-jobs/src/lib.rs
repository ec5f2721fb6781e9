//! MCI Jobs - Job Ledger
//!
//! Durable records of individual asynchronous stage attempts:
//! - Job creation that never blocks on storage health
//! - Read-merge-write updates with a terminal-status guard
//! - Append-only logs capped at a fixed length
//! - Step execution that classifies failures as cancelled or failed
//!
//! # Example
//!
//! ```rust,ignore
//! use mci_jobs::{JobLedger, JobUpdate, JobStatus, StageKind};
//! use mci_storage::{MemoryStore, Storage};
//!
//! # async fn example() {
//! let ledger = JobLedger::new(Storage::new(MemoryStore::shared()));
//! let job = ledger.create_job(StageKind::Needs, "home-care", "v1").await.into_value();
//!
//! let job = ledger
//!     .update_job(&job, JobUpdate::status(JobStatus::Completed).with_message("Done"))
//!     .await
//!     .into_value();
//! assert_eq!(job.status, JobStatus::Completed);
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod ledger;
pub mod sink;
pub mod types;

pub use error::{looks_like_abort, AbortSignature, LedgerError};
pub use ledger::{JobLedger, LedgerConfig};
pub use sink::{JobLogSink, LogSink, NullLogSink};
pub use types::{JobRecord, JobStatus, JobUpdate, Progress, StageKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
