//! Aggregate pipeline configuration
//!
//! Every section is optional in TOML and falls back to its defaults:
//!
//! ```toml
//! window_id = "v2"
//!
//! [storage]
//! write_timeout_ms = 500
//!
//! [chunking]
//! chunk_size = 10
//! ```

use crate::artifact::CacheConfig;
use crate::error::PipelineError;
use crate::plan::PlanConfig;
use mci_checkpoint::ChunkingConfig;
use mci_jobs::LedgerConfig;
use mci_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of every pipeline component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Window tag stamped on orchestrator jobs
    pub window_id: String,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub chunking: ChunkingConfig,
    pub cache: CacheConfig,
    pub plan: PlanConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_id: "v1".to_string(),
            storage: StorageConfig::default(),
            ledger: LedgerConfig::default(),
            chunking: ChunkingConfig::default(),
            cache: CacheConfig::default(),
            plan: PlanConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// With window id
    #[inline]
    #[must_use]
    pub fn with_window_id(mut self, window_id: impl Into<String>) -> Self {
        self.window_id = window_id.into();
        self
    }

    /// With storage write timeout
    #[inline]
    #[must_use]
    pub fn with_write_timeout_ms(mut self, ms: u64) -> Self {
        self.storage = self.storage.with_write_timeout_ms(ms);
        self
    }

    /// With chunking policy
    #[inline]
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }
}
