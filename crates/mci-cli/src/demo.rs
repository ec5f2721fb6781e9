//! Deterministic stage and fetcher implementations used by the `mci` binary

use async_trait::async_trait;
use mci_checkpoint::{ChunkFetcher, FetchError};
use mci_core::{Artifact, Stage, StageFailure, StageKind, StageRegistry, WorkItem};
use mci_jobs::LogSink;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stable pseudo-random number derived from text
fn score(text: &str) -> u64 {
    text.bytes()
        .fold(17_u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
}

/// Stage that derives its artifact from the work item and upstream payload
pub(crate) struct DemoStage {
    kind: StageKind,
    failing: HashSet<String>,
    latency: Duration,
}

#[async_trait]
impl Stage for DemoStage {
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
        log.log(&format!("{} started for {}", self.kind.label(), work_item.name)).await;

        tokio::select! {
            () = cancel.cancelled() => return Err(StageFailure::Cancelled),
            () = tokio::time::sleep(self.latency) => {}
        }

        if self.failing.contains(&work_item.id) {
            return Err(StageFailure::failed(format!(
                "{} collaborator rejected {}",
                self.kind.label(),
                work_item.id
            )));
        }

        let seed = score(&format!("{}::{}", self.kind, work_item.id));
        let payload = json!({
            "workItem": work_item.name,
            "score": seed % 100,
            "basedOn": upstream.map(|a| a.stage),
        });
        log.log(&format!("{} produced score {}", self.kind.label(), seed % 100)).await;
        Ok(Artifact::new(self.kind, work_item.id.clone(), payload))
    }
}

/// Registry of demo stages; `failures` lists (work item, stage) pairs that fail
pub(crate) fn registry(failures: &[(String, StageKind)], latency: Duration) -> StageRegistry {
    let mut registry = StageRegistry::new();
    for kind in StageKind::PIPELINE {
        let failing = failures
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(item, _)| item.clone())
            .collect();
        registry.register(Arc::new(DemoStage {
            kind,
            failing,
            latency,
        }));
    }
    registry
}

/// Fetcher returning a stable volume per key
pub(crate) struct DemoFetcher;

#[async_trait]
impl ChunkFetcher for DemoFetcher {
    async fn fetch(&self, keys: &[String]) -> Result<HashMap<String, u64>, FetchError> {
        Ok(keys.iter().map(|k| (k.clone(), score(k) % 10_000)).collect())
    }
}
