//! MCI Checkpoint - Resumable bulk work
//!
//! Two persistence-backed mechanisms for work that must survive interruption:
//! - **Chunked jobs**: a large key set frozen into fixed-size chunks at
//!   creation, driven one chunk per tick with bounded retry and
//!   skip-on-exhaustion
//! - **Stage checkpoints**: per-work-item record of finished sub-units of a
//!   decomposable stage, so a resumed stage only runs what is left
//!
//! Neither depends on the orchestrator; both can be driven standalone.

#![warn(unreachable_pub)]

pub mod chunked;
pub mod error;
pub mod normalize;
pub mod runner;
pub mod stage;

pub use chunked::{ChunkStatus, ChunkedJob, ChunkedJobStatus, ChunkedJobStore, ChunkingConfig, FrozenChunk};
pub use error::{CheckpointError, FetchError};
pub use normalize::{dedup_keys, normalize_key};
pub use runner::{ChunkFetcher, ChunkedJobRunner, RunSummary, TickOutcome, TickStatus, VolumeObservation};
pub use stage::{CheckpointStatus, StageCheckpoint, StageCheckpointStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
