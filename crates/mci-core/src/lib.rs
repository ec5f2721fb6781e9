//! MCI Core - Pipeline Orchestrator
//!
//! Runs plans over work items and the four dependency-ordered stages:
//! - [`PipelineOrchestrator`]: plan creation, execution and cancellation
//! - [`Stage`] / [`StageRegistry`]: the stage collaborator contract
//! - [`ArtifactCache`]: TTL cache of stage outputs
//! - [`PipelineConfig`]: aggregate TOML configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use mci_core::{ExecutionMode, PipelineConfig, PipelineOrchestrator, StageKind};
//! use mci_storage::MemoryStore;
//!
//! # async fn example(stages: mci_core::StageRegistry, catalog: mci_core::WorkItemCatalog) {
//! let orchestrator =
//!     PipelineOrchestrator::from_config(MemoryStore::shared(), &PipelineConfig::default(), stages, catalog);
//!
//! let mut plan = orchestrator.create_plan(
//!     &["coffee".to_string()],
//!     &[StageKind::Synthesis],
//!     ExecutionMode::SequentialByWorkItem,
//! );
//! let report = orchestrator.execute_plan(&mut plan).await;
//! println!("{}/{} tasks", report.completed_tasks, report.total_tasks);
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod stage;
pub mod work_item;

pub use artifact::{Artifact, ArtifactCache, CacheConfig};
pub use config::PipelineConfig;
pub use error::{PipelineError, StageFailure};
pub use orchestrator::PipelineOrchestrator;
pub use plan::{
    ExecutionMode, PlanConfig, PlanEvent, PlanReport, PlanStatus, RunPlan, SkipReason, StageOutcome, StageRecord,
    WorkItemReport,
};
pub use stage::{Stage, StageRegistry};
pub use work_item::{WorkItem, WorkItemCatalog};

pub use mci_jobs::StageKind;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
