//! Mapping partitions onto concrete collection names.

use crate::store::Filter;

/// How partitions map to collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionStrategy {
    /// One collection for every partition; the natural fit for local
    /// persistent stores.
    Single {
        /// The collection name.
        name: String,
    },
    /// One collection per partition, `{base}_{partition}`; the natural
    /// fit for managed stores where collections are cheap.
    PerPartition {
        /// Optional base prefix. Without it the partition name alone is
        /// the collection name.
        base: Option<String>,
    },
}

/// What `delete_stale` should do for a set of stale partitions. The
/// strategy decides: per-partition collections are dropped whole, a
/// shared collection gets a filtered delete.
#[derive(Debug, Clone, PartialEq)]
pub enum StaleAction {
    /// Drop these collections entirely.
    DropCollections(Vec<String>),
    /// Delete the matching slice out of a shared collection.
    FilteredDelete {
        /// The shared collection.
        collection: String,
        /// Filter selecting the stale partitions' documents.
        filter: Filter,
    },
    /// Nothing stale to act on.
    None,
}

impl CollectionStrategy {
    /// The concrete collection a partition's documents land in.
    #[must_use]
    pub fn collection_for(&self, partition: &str) -> String {
        match self {
            Self::Single { name } => name.clone(),
            Self::PerPartition { base } => match base {
                Some(base) => format!("{base}_{partition}"),
                None => partition.to_string(),
            },
        }
    }

    /// Plans the stale cleanup for the given partitions.
    #[must_use]
    pub fn stale_action(&self, stale_partitions: &[String]) -> StaleAction {
        if stale_partitions.is_empty() {
            return StaleAction::None;
        }
        match self {
            Self::Single { name } => StaleAction::FilteredDelete {
                collection: name.clone(),
                filter: Filter::in_values("partition_name", stale_partitions.to_vec()),
            },
            Self::PerPartition { .. } => StaleAction::DropCollections(
                stale_partitions
                    .iter()
                    .map(|p| self.collection_for(p))
                    .collect(),
            ),
        }
    }
}
