//! In-memory backend

use crate::error::StorageError;
use crate::namespace::Namespace;
use crate::store::{KeyValueStore, SharedStore};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Concurrent in-memory store
///
/// Keys are kept sorted per namespace so listings are deterministic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: DashMap<Namespace, BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty store behind a shared handle
    #[must_use]
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Total number of keys across namespaces
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.iter().map(|entry| entry.value().len()).sum()
    }

    /// Check if the store holds no keys
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .namespaces
            .get(&namespace)
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), StorageError> {
        self.namespaces
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
        if let Some(mut entries) = self.namespaces.get_mut(&namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        Ok(self
            .namespaces
            .get(&namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
        self.namespaces.remove(&namespace);
        Ok(())
    }
}
