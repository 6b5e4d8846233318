use std::collections::HashSet;

use regex::Regex;

use super::ChangeEvent;
use super::OperationKind;

#[derive(Debug, Clone)]
pub enum CollectionMatch {
    Exact(String),
    Regex(Regex),
}

impl CollectionMatch {
    pub fn matches(
        &self,
        collection: &str,
    ) -> bool {
        match self {
            CollectionMatch::Exact(name) => name == collection,
            CollectionMatch::Regex(re) => re.is_match(collection),
        }
    }
}

/// Namespace interest of one task.
#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    pub collection: CollectionMatch,
    /// Restricts the operations delivered; empty means all of them
    pub operations: HashSet<OperationKind>,
}

impl NamespaceFilter {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: CollectionMatch::Exact(name.into()),
            operations: HashSet::new(),
        }
    }

    pub fn collection_regex(re: Regex) -> Self {
        Self {
            collection: CollectionMatch::Regex(re),
            operations: HashSet::new(),
        }
    }

    pub fn with_operations(
        mut self,
        ops: impl IntoIterator<Item = OperationKind>,
    ) -> Self {
        self.operations = ops.into_iter().collect();
        self
    }

    pub fn matches(
        &self,
        event: &ChangeEvent,
    ) -> bool {
        if !self.collection.matches(&event.collection) {
            return false;
        }
        // Snapshot rows and invalidations are never filtered by operation
        match event.operation {
            OperationKind::Snapshot | OperationKind::Invalidate => true,
            op => self.operations.is_empty() || self.operations.contains(&op),
        }
    }
}

/// Union of the filters of every task riding on one database cursor.
#[derive(Debug, Clone, Default)]
pub struct MergedFilter {
    entries: Vec<(String, NamespaceFilter)>,
}

impl MergedFilter {
    pub fn insert(
        &mut self,
        task_id: impl Into<String>,
        filter: NamespaceFilter,
    ) {
        self.entries.push((task_id.into(), filter));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any task wants the event; sources may use it to push filtering down.
    pub fn matches(
        &self,
        event: &ChangeEvent,
    ) -> bool {
        self.entries.iter().any(|(_, f)| f.matches(event))
    }

    /// Task ids whose filters match the event, in registration order.
    pub fn matching_tasks<'a>(
        &'a self,
        event: &'a ChangeEvent,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(_, f)| f.matches(event))
            .map(|(id, _)| id.as_str())
    }
}
