//! MCI Storage - Persistence Adapter
//!
//! A narrow, namespaced key-value contract plus the policy that sits on top
//! of it:
//! - Namespaced `get` / `set` / `remove` / `list_keys` / `clear`
//! - Typed JSON records through the [`Storage`] facade
//! - Writes raced against a short timeout, reported as [`WriteOutcome`]
//! - In-memory, file-backed and fallback backends
//!
//! Storage here is treated as unreliable. A slow or failing write never
//! blocks the caller: it is surfaced as a degraded outcome and the caller
//! carries on with the value it holds in memory.
//!
//! # Example
//!
//! ```rust,ignore
//! use mci_storage::{MemoryStore, Namespace, Storage};
//!
//! # async fn example() -> Result<(), mci_storage::StorageError> {
//! let storage = Storage::new(MemoryStore::shared());
//! let outcome = storage.save(Namespace::JOBS, "job-1", &"hello").await;
//! assert!(outcome.is_durable());
//!
//! let value: Option<String> = storage.load(Namespace::JOBS, "job-1").await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod error;
pub mod fallback;
pub mod file;
pub mod memory;
pub mod namespace;
pub mod persisted;
pub mod storage;
pub mod store;

pub use error::StorageError;
pub use fallback::FallbackStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use namespace::Namespace;
pub use persisted::{DegradedReason, Persisted, WriteOutcome};
pub use storage::{Storage, StorageConfig};
pub use store::{KeyValueStore, SharedStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
