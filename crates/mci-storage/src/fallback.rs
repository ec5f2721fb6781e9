//! Primary store with an in-memory fallback
//!
//! When the primary rejects a write, the value is kept in memory until the
//! primary accepts a later write for the same key. Reads prefer the memory
//! copy, so a stale primary value never shadows it. Listings merge both sides.

use crate::error::StorageError;
use crate::memory::MemoryStore;
use crate::namespace::Namespace;
use crate::store::{KeyValueStore, SharedStore};
use serde_json::Value;

/// Store that falls back to memory when the primary fails
#[derive(Debug)]
pub struct FallbackStore {
    primary: SharedStore,
    fallback: MemoryStore,
}

impl FallbackStore {
    /// Wrap a primary store
    #[must_use]
    pub fn new(primary: SharedStore) -> Self {
        Self {
            primary,
            fallback: MemoryStore::new(),
        }
    }

    /// Number of keys currently held only in memory
    #[must_use]
    pub fn fallback_len(&self) -> usize {
        self.fallback.len()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FallbackStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, StorageError> {
        // A memory copy only exists while it is newer than the primary's.
        if let Some(value) = self.fallback.get(namespace, key).await? {
            return Ok(Some(value));
        }
        match self.primary.get(namespace, key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(
                    "[STORAGE][FALLBACK_MEMORY] op=get ns={} key={} reason={}",
                    namespace,
                    key,
                    e
                );
                Ok(None)
            }
        }
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), StorageError> {
        match self.primary.set(namespace, key, value.clone()).await {
            Ok(()) => {
                // The primary now holds the freshest copy.
                self.fallback.remove(namespace, key).await
            }
            Err(e) => {
                tracing::warn!(
                    "[STORAGE][FALLBACK_MEMORY] op=set ns={} key={} reason={}",
                    namespace,
                    key,
                    e
                );
                self.fallback.set(namespace, key, value).await
            }
        }
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
        if let Err(e) = self.primary.remove(namespace, key).await {
            tracing::warn!(
                "[STORAGE][FALLBACK_MEMORY] op=remove ns={} key={} reason={}",
                namespace,
                key,
                e
            );
        }
        self.fallback.remove(namespace, key).await
    }

    async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        let mut keys = self.primary.list_keys(namespace).await.unwrap_or_else(|e| {
            tracing::warn!("[STORAGE][FALLBACK_MEMORY] op=list ns={} reason={}", namespace, e);
            Vec::new()
        });
        for key in self.fallback.list_keys(namespace).await? {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
        let primary = self.primary.clear(namespace).await;
        self.fallback.clear(namespace).await?;
        primary
    }
}
