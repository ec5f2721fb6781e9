//! The key-value contract every backend implements

use crate::error::StorageError;
use crate::namespace::Namespace;
use serde_json::Value;
use std::sync::Arc;

/// Narrow, namespaced key-value contract
///
/// No atomicity is promised across calls. Implementations may be slow or
/// fail; policy for dealing with that lives in [`crate::Storage`].
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read a value, `None` when the key is absent
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, StorageError>;

    /// Write a value, replacing any previous one
    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), StorageError>;

    /// Delete a key; deleting an absent key is not an error
    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError>;

    /// List every key in the namespace
    async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError>;

    /// Delete every key in the namespace
    async fn clear(&self, namespace: Namespace) -> Result<(), StorageError>;
}

/// Shared handle to a backend
pub type SharedStore = Arc<dyn KeyValueStore>;
