//! Work items and the catalog plans are resolved against

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An independently analyzable unit (a category)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub name: String,
}

impl WorkItem {
    /// Create work item
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Known work items by id
#[derive(Debug, Clone, Default)]
pub struct WorkItemCatalog {
    items: BTreeMap<String, WorkItem>,
}

impl WorkItemCatalog {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a work item
    pub fn insert(&mut self, item: WorkItem) {
        self.items.insert(item.id.clone(), item);
    }

    /// With work item
    #[must_use]
    pub fn with_item(mut self, item: WorkItem) -> Self {
        self.insert(item);
        self
    }

    /// Look up a work item
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.items.get(id)
    }

    /// Number of work items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Work items in id order
    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }
}

impl FromIterator<WorkItem> for WorkItemCatalog {
    fn from_iter<I: IntoIterator<Item = WorkItem>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for item in iter {
            catalog.insert(item);
        }
        catalog
    }
}
