//! Behaviour of the typed storage facade against slow and failing backends.

use mci_storage::{
    DegradedReason, KeyValueStore, MemoryStore, Namespace, Storage, StorageConfig, StorageError,
    WriteOutcome,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Backend whose writes take `delay` before landing
#[derive(Debug)]
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait::async_trait]
impl KeyValueStore for SlowStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(ns, key).await
    }
    async fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(ns, key, value).await
    }
    async fn remove(&self, ns: Namespace, key: &str) -> Result<(), StorageError> {
        self.inner.remove(ns, key).await
    }
    async fn list_keys(&self, ns: Namespace) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(ns).await
    }
    async fn clear(&self, ns: Namespace) -> Result<(), StorageError> {
        self.inner.clear(ns).await
    }
}

/// Backend that rejects every write
#[derive(Debug, Default)]
struct BrokenStore;

#[async_trait::async_trait]
impl KeyValueStore for BrokenStore {
    async fn get(&self, _: Namespace, _: &str) -> Result<Option<Value>, StorageError> {
        Ok(None)
    }
    async fn set(&self, _: Namespace, _: &str, _: Value) -> Result<(), StorageError> {
        Err(StorageError::Backend("disk full".to_string()))
    }
    async fn remove(&self, _: Namespace, _: &str) -> Result<(), StorageError> {
        Ok(())
    }
    async fn list_keys(&self, _: Namespace) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }
    async fn clear(&self, _: Namespace) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn fast_write_is_durable() {
    let storage = Storage::new(MemoryStore::shared());

    let outcome = storage.save(Namespace::JOBS, "j1", &json!({"status": "PENDING"})).await;
    assert_eq!(outcome, WriteOutcome::Durable);

    let loaded: Option<Value> = storage.load(Namespace::JOBS, "j1").await.unwrap();
    assert_eq!(loaded, Some(json!({"status": "PENDING"})));
}

#[tokio::test(start_paused = true)]
async fn slow_write_is_degraded_but_still_lands() {
    let backend = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_secs(1),
    });
    let storage = Storage::with_config(backend, StorageConfig::new().with_write_timeout_ms(250));

    let outcome = storage.save(Namespace::JOBS, "j1", &"queued").await;
    assert_eq!(
        outcome,
        WriteOutcome::Degraded(DegradedReason::TimedOut { timeout_ms: 250 })
    );

    // Not visible yet: the background write is still sleeping.
    let early: Option<String> = storage.load(Namespace::JOBS, "j1").await.unwrap();
    assert_eq!(early, None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let late: Option<String> = storage.load(Namespace::JOBS, "j1").await.unwrap();
    assert_eq!(late, Some("queued".to_string()));
}

#[tokio::test]
async fn failing_write_is_degraded_not_an_error() {
    let storage = Storage::new(Arc::new(BrokenStore));

    let outcome = storage.save(Namespace::ARTIFACTS, "a", &1_u32).await;
    match outcome {
        WriteOutcome::Degraded(DegradedReason::Failed(reason)) => assert!(reason.contains("disk full")),
        other => panic!("expected failed write, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_record_surfaces_serialization_error() {
    let backend = MemoryStore::shared();
    backend
        .set(Namespace::JOBS, "j1", json!({"unexpected": true}))
        .await
        .unwrap();
    let storage = Storage::new(backend);

    let result: Result<Option<u64>, _> = storage.load(Namespace::JOBS, "j1").await;
    assert!(matches!(result, Err(StorageError::Serialization { .. })));
}

#[tokio::test]
async fn clear_and_keys_pass_through() {
    let storage = Storage::new(MemoryStore::shared());
    storage.save(Namespace::VOLUMES, "b", &2).await;
    storage.save(Namespace::VOLUMES, "a", &1).await;

    assert_eq!(
        storage.keys(Namespace::VOLUMES).await.unwrap(),
        vec!["a".to_string(), "b".to_string()]
    );

    storage.delete(Namespace::VOLUMES, "a").await.unwrap();
    storage.clear(Namespace::VOLUMES).await.unwrap();
    assert!(storage.keys(Namespace::VOLUMES).await.unwrap().is_empty());
}
