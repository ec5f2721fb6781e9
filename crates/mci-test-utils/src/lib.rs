//! Testing utilities for MCI workspace
//!
//! Shared fakes: scripted stages, slow and failing stores, scripted chunk
//! fetchers.

#![allow(missing_docs)]

use async_trait::async_trait;
use mci_checkpoint::{ChunkFetcher, FetchError};
use mci_core::{Artifact, Stage, StageFailure, StageRegistry, WorkItem, WorkItemCatalog};
use mci_jobs::{LogSink, StageKind};
use mci_storage::{KeyValueStore, MemoryStore, Namespace, SharedStore, Storage, StorageError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn memory_storage() -> Storage {
    Storage::new(MemoryStore::shared())
}

pub fn catalog(ids: &[&str]) -> WorkItemCatalog {
    ids.iter().map(|id| WorkItem::new(*id, id.to_uppercase())).collect()
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Memory store whose writes take `delay` before landing
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }

    pub fn shared(delay: Duration) -> SharedStore {
        Arc::new(Self::new(delay))
    }
}

#[async_trait]
impl KeyValueStore for SlowStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(namespace, key).await
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(namespace, key, value).await
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
        self.inner.remove(namespace, key).await
    }

    async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(namespace).await
    }

    async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
        self.inner.clear(namespace).await
    }
}

/// Memory store whose writes can be switched to failing
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    rejecting: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(namespace, key).await
    }

    async fn set(&self, namespace: Namespace, key: &str, value: Value) -> Result<(), StorageError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("write rejected".to_string()));
        }
        self.inner.set(namespace, key, value).await
    }

    async fn remove(&self, namespace: Namespace, key: &str) -> Result<(), StorageError> {
        self.inner.remove(namespace, key).await
    }

    async fn list_keys(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(namespace).await
    }

    async fn clear(&self, namespace: Namespace) -> Result<(), StorageError> {
        self.inner.clear(namespace).await
    }
}

/// Store that reads nothing and rejects every write
#[derive(Debug, Default)]
pub struct FailingStore;

impl FailingStore {
    pub fn shared() -> SharedStore {
        Arc::new(Self)
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _namespace: Namespace, _key: &str) -> Result<Option<Value>, StorageError> {
        Ok(None)
    }

    async fn set(&self, _namespace: Namespace, _key: &str, _value: Value) -> Result<(), StorageError> {
        Err(StorageError::Backend("backend unavailable".to_string()))
    }

    async fn remove(&self, _namespace: Namespace, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Backend("backend unavailable".to_string()))
    }

    async fn list_keys(&self, _namespace: Namespace) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    async fn clear(&self, _namespace: Namespace) -> Result<(), StorageError> {
        Err(StorageError::Backend("backend unavailable".to_string()))
    }
}

/// Chunk fetcher with scripted failures
///
/// Volumes are `10 * key.len()`. A chunk fails while any of its keys still
/// has scripted failures left; `always_fail` keys never succeed.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    remaining_failures: Mutex<HashMap<String, usize>>,
    always_fail: HashSet<String>,
    omitted: HashSet<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` fetches that include `key`
    #[must_use]
    pub fn fail_times(self, key: &str, times: usize) -> Self {
        self.remaining_failures.lock().insert(key.to_string(), times);
        self
    }

    /// Fail every fetch that includes `key`
    #[must_use]
    pub fn always_fail(mut self, key: &str) -> Self {
        self.always_fail.insert(key.to_string());
        self
    }

    /// Leave `key` out of successful results
    #[must_use]
    pub fn omit(mut self, key: &str) -> Self {
        self.omitted.insert(key.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn volume_for(key: &str) -> u64 {
        10 * key.len() as u64
    }
}

#[async_trait]
impl ChunkFetcher for ScriptedFetcher {
    async fn fetch(&self, keys: &[String]) -> Result<HashMap<String, u64>, FetchError> {
        self.calls.lock().push(keys.to_vec());

        if let Some(key) = keys.iter().find(|k| self.always_fail.contains(*k)) {
            return Err(FetchError::failed(format!("permanent failure on {key}")));
        }
        {
            let mut remaining = self.remaining_failures.lock();
            for key in keys {
                if let Some(left) = remaining.get_mut(key) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(FetchError::RateLimited(format!("throttled on {key}")));
                    }
                }
            }
        }

        Ok(keys
            .iter()
            .filter(|k| !self.omitted.contains(*k))
            .map(|k| (k.clone(), Self::volume_for(k)))
            .collect())
    }
}

/// Ordered log of (stage, work item) invocations shared by scripted stages
pub type CallLog = Arc<Mutex<Vec<(StageKind, String)>>>;

/// Stage that echoes its inputs into the artifact payload
#[derive(Debug, Clone)]
pub struct ScriptedStage {
    kind: StageKind,
    fail_for: HashSet<String>,
    delay: Option<Duration>,
    calls: CallLog,
}

impl ScriptedStage {
    pub fn new(kind: StageKind, calls: CallLog) -> Self {
        Self {
            kind,
            fail_for: HashSet::new(),
            delay: None,
            calls,
        }
    }

    /// Fail whenever run for `work_item_id`
    #[must_use]
    pub fn failing_for(mut self, work_item_id: &str) -> Self {
        self.fail_for.insert(work_item_id.to_string());
        self
    }

    /// Take `delay` before finishing, returning early on cancellation
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn run(
        &self,
        work_item: &WorkItem,
        upstream: Option<&Artifact>,
        cancel: &CancellationToken,
        log: &dyn LogSink,
    ) -> Result<Artifact, StageFailure> {
        self.calls.lock().push((self.kind, work_item.id.clone()));
        log.log(&format!("{} running for {}", self.kind.label(), work_item.name)).await;

        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => return Err(StageFailure::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if self.fail_for.contains(&work_item.id) {
            return Err(StageFailure::failed(format!("{} exploded for {}", self.kind, work_item.id)));
        }

        let upstream_stage = upstream.map(|a| a.stage.as_str());
        Ok(Artifact::new(
            self.kind,
            work_item.id.clone(),
            json!({ "stage": self.kind, "item": work_item.id, "upstream": upstream_stage }),
        ))
    }
}

/// Registry of scripted stages for the whole pipeline
///
/// `failures` lists (work item, stage) pairs that fail.
pub fn scripted_registry(failures: &[(&str, StageKind)]) -> (StageRegistry, CallLog) {
    scripted_registry_with_delay(failures, None)
}

pub fn scripted_registry_with_delay(
    failures: &[(&str, StageKind)],
    delay: Option<Duration>,
) -> (StageRegistry, CallLog) {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StageRegistry::new();
    for kind in StageKind::PIPELINE {
        let mut stage = ScriptedStage::new(kind, Arc::clone(&calls));
        for (item, _) in failures.iter().filter(|(_, k)| *k == kind) {
            stage = stage.failing_for(item);
        }
        if let Some(delay) = delay {
            stage = stage.with_delay(delay);
        }
        registry.register(Arc::new(stage));
    }
    (registry, calls)
}
