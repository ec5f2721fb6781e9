//! Stage collaborator contract

use crate::artifact::Artifact;
use crate::error::StageFailure;
use crate::work_item::WorkItem;
use async_trait::async_trait;
use mci_jobs::{LogSink, StageKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One pipeline stage computation
///
/// Implementations receive the previous stage's artifact (absent for the
/// first stage), the plan's cancellation token and a sink for progress lines.
/// They should return [`StageFailure::Cancelled`] when they stop because the
/// token was tripped.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage kind this implementation produces
    fn kind(&self) -> StageKind;

    /// Produce the artifact for `work_item`
    async fn run(
        &self,
        work_item: &WorkItem,
        upstream: Option<&Artifact>,
        cancel: &CancellationToken,
        log: &dyn LogSink,
    ) -> Result<Artifact, StageFailure>;
}

/// Stage implementations by kind
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<StageKind, Arc<dyn Stage>>,
}

impl StageRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage, replacing any previous one of the same kind
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.kind(), stage);
    }

    /// With stage
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.register(stage);
        self
    }

    /// Implementation for a kind
    #[must_use]
    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn Stage>> {
        self.stages.get(&kind).cloned()
    }

    /// Whether every pipeline stage has an implementation
    #[must_use]
    pub fn covers_pipeline(&self) -> bool {
        StageKind::PIPELINE.iter().all(|kind| self.stages.contains_key(kind))
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.stages.keys().copied().collect();
        kinds.sort();
        f.debug_struct("StageRegistry").field("stages", &kinds).finish()
    }
}
