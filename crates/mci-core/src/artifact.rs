//! Stage artifacts and their TTL cache

use chrono::{DateTime, TimeDelta, Utc};
use mci_jobs::StageKind;
use mci_storage::{Namespace, Storage, StorageError, WriteOutcome};
use serde::{Deserialize, Serialize};

const ENVELOPE_VERSION: u32 = 1;

/// Output of a completed stage for one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub stage: StageKind,
    pub work_item_id: String,
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
}

impl Artifact {
    /// Create artifact produced now
    #[must_use]
    pub fn new(stage: StageKind, work_item_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            stage,
            work_item_id: work_item_id.into(),
            payload,
            produced_at: Utc::now(),
        }
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached artifact
    pub artifact_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            artifact_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    data: Artifact,
    stored_at: DateTime<Utc>,
    ttl_secs: u64,
    version: u32,
}

/// Stage artifacts keyed by `{STAGE_KIND}::{workItemId}`
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    storage: Storage,
    config: CacheConfig,
}

impl ArtifactCache {
    /// Create cache with default TTL
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self::with_config(storage, CacheConfig::default())
    }

    /// Create cache with explicit TTL
    #[must_use]
    pub fn with_config(storage: Storage, config: CacheConfig) -> Self {
        Self { storage, config }
    }

    /// Storage key of an artifact
    #[must_use]
    pub fn key(stage: StageKind, work_item_id: &str) -> String {
        format!("{stage}::{work_item_id}")
    }

    /// Fresh artifact for this stage and work item
    ///
    /// Expired envelopes are deleted. An envelope holding another stage's or
    /// work item's artifact is treated as absent.
    pub async fn get(&self, stage: StageKind, work_item_id: &str) -> Result<Option<Artifact>, StorageError> {
        let key = Self::key(stage, work_item_id);
        let Some(envelope) = self.storage.load::<Envelope>(Namespace::ARTIFACTS, &key).await? else {
            return Ok(None);
        };

        // A TTL too large to represent never expires.
        let expired = i64::try_from(envelope.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| envelope.stored_at.checked_add_signed(ttl))
            .is_some_and(|expiry| Utc::now() > expiry);
        if expired {
            tracing::debug!("[CACHE][EXPIRED] key={}", key);
            self.storage.delete(Namespace::ARTIFACTS, &key).await?;
            return Ok(None);
        }

        if envelope.data.stage != stage || envelope.data.work_item_id != work_item_id {
            tracing::warn!(
                "[CACHE][MISMATCH] key={} holds {}::{}, ignoring",
                key,
                envelope.data.stage,
                envelope.data.work_item_id
            );
            return Ok(None);
        }

        Ok(Some(envelope.data))
    }

    /// Store an artifact under its own stage and work item
    pub async fn put(&self, artifact: &Artifact) -> WriteOutcome {
        let key = Self::key(artifact.stage, &artifact.work_item_id);
        let envelope = Envelope {
            data: artifact.clone(),
            stored_at: Utc::now(),
            ttl_secs: self.config.artifact_ttl_secs,
            version: ENVELOPE_VERSION,
        };
        self.storage.save(Namespace::ARTIFACTS, &key, &envelope).await
    }

    /// Drop one artifact
    pub async fn invalidate(&self, stage: StageKind, work_item_id: &str) -> Result<(), StorageError> {
        self.storage
            .delete(Namespace::ARTIFACTS, &Self::key(stage, work_item_id))
            .await
    }

    /// Drop every artifact
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear(Namespace::ARTIFACTS).await
    }
}
