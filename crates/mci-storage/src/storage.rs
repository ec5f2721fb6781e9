//! Typed storage facade with timeout-raced writes

use crate::error::StorageError;
use crate::namespace::Namespace;
use crate::persisted::{DegradedReason, WriteOutcome};
use crate::store::SharedStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Storage policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Upper bound a caller waits on a single write
    pub write_timeout_ms: u64,
}

impl StorageConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With write timeout in milliseconds
    #[inline]
    #[must_use]
    pub fn with_write_timeout_ms(mut self, ms: u64) -> Self {
        self.write_timeout_ms = ms;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 250,
        }
    }
}

/// Typed JSON access to a [`crate::KeyValueStore`]
///
/// Reads propagate errors. Writes never do: [`Storage::save`] races the
/// backend write against the configured timeout and reports the result as a
/// [`WriteOutcome`], leaving the caller free to proceed with its in-memory
/// value.
#[derive(Debug, Clone)]
pub struct Storage {
    backend: SharedStore,
    write_timeout: Duration,
}

impl Storage {
    /// Create facade with default policy
    #[must_use]
    pub fn new(backend: SharedStore) -> Self {
        Self::with_config(backend, StorageConfig::default())
    }

    /// Create facade with explicit policy
    #[must_use]
    pub fn with_config(backend: SharedStore, config: StorageConfig) -> Self {
        Self {
            backend,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    /// Underlying backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &SharedStore {
        &self.backend
    }

    /// Configured write timeout
    #[inline]
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Read and decode a record
    pub async fn load<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.backend.get(namespace, key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::serialization(key, e)),
            None => Ok(None),
        }
    }

    /// Encode and write a record, racing the write timeout
    ///
    /// When the timeout wins, the spawned write keeps running and may still
    /// land; the outcome is reported as degraded either way.
    pub async fn save<T: Serialize>(&self, namespace: Namespace, key: &str, value: &T) -> WriteOutcome {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                let err = StorageError::serialization(key, e);
                tracing::warn!("[STORAGE][WRITE_DEGRADED] ns={} key={} reason={}", namespace, key, err);
                return WriteOutcome::Degraded(DegradedReason::Failed(err.to_string()));
            }
        };

        let backend = Arc::clone(&self.backend);
        let owned_key = key.to_string();
        let write = tokio::spawn(async move { backend.set(namespace, &owned_key, encoded).await });

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(Ok(()))) => WriteOutcome::Durable,
            Ok(Ok(Err(e))) => {
                tracing::warn!("[STORAGE][WRITE_DEGRADED] ns={} key={} reason={}", namespace, key, e);
                WriteOutcome::Degraded(DegradedReason::Failed(e.to_string()))
            }
            Ok(Err(join_error)) => {
                tracing::warn!(
                    "[STORAGE][WRITE_DEGRADED] ns={} key={} reason=write task aborted: {}",
                    namespace,
                    key,
                    join_error
                );
                WriteOutcome::Degraded(DegradedReason::Failed(join_error.to_string()))
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    "[STORAGE][WRITE_DEGRADED] ns={} key={} reason=timeout after {}ms",
                    namespace,
                    key,
                    timeout_ms
                );
                WriteOutcome::Degraded(DegradedReason::TimedOut { timeout_ms })
            }
        }
    }

    /// Delete a record
    pub async fn delete(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
        self.backend.remove(namespace, key).await
    }

    /// List keys of a namespace
    pub async fn keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        self.backend.list_keys(namespace).await
    }

    /// Delete every record of a namespace
    pub async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
        tracing::info!("[STORAGE][CLEAR] ns={}", namespace);
        self.backend.clear(namespace).await
    }
}
