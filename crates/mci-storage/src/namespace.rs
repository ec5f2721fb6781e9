//! Storage namespaces

use std::fmt;

/// A namespace partitions keys so each store can list and clear its own
/// records without touching the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(&'static str);

impl Namespace {
    /// Job ledger records
    pub const JOBS: Namespace = Namespace("job");
    /// Frozen chunked jobs
    pub const CHUNKED_JOBS: Namespace = Namespace("chunked_job");
    /// Sub-unit checkpoints of decomposable stages
    pub const STAGE_CHECKPOINTS: Namespace = Namespace("stage_checkpoint");
    /// Cached stage artifacts
    pub const ARTIFACTS: Namespace = Namespace("artifact");
    /// Per-key results written by chunked jobs
    pub const VOLUMES: Namespace = Namespace("volume");

    /// Create a custom namespace
    #[inline]
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Namespace name
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
