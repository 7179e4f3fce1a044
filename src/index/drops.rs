//! Applying drop plans to the store and manifest.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::collection::CollectionStrategy;
use crate::error::Result;
use crate::manifest::ManifestStore;
use crate::store::{Filter, VectorStore};

/// Selection of one model's data to drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropSelection {
    /// Partitions whose documents go.
    pub partitions: Vec<String>,
    /// Schema versions whose documents go.
    pub schema_versions: Vec<u32>,
    /// Why.
    pub reason: String,
}

/// A drop plan file (`configs/drop/*.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropPlan {
    /// When the plan was generated.
    pub generated_at: DateTime<Utc>,
    /// Manifest the plan was derived from.
    pub source_manifest: String,
    /// Optional cutoff the generator applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    /// Model name → selection.
    pub models: BTreeMap<String, DropSelection>,
}

/// Result of applying one plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DropOutcome {
    /// Records deleted per model.
    pub deleted: BTreeMap<String, usize>,
}

/// The metadata filter selecting one model's drop slice:
/// `AND(model_name = M, partition_name ∈ P, schema_version ∈ V)`.
///
/// Empty partition or version lists drop their clause rather than
/// matching nothing.
#[must_use]
pub fn selection_filter(model: &str, selection: &DropSelection) -> Filter {
    let mut branches = vec![Filter::eq("model_name", model)];
    if !selection.partitions.is_empty() {
        branches.push(Filter::in_values(
            "partition_name",
            selection.partitions.clone(),
        ));
    }
    if !selection.schema_versions.is_empty() {
        branches.push(Filter::in_values(
            "schema_version",
            selection.schema_versions.clone(),
        ));
    }
    Filter::and(branches)
}

/// Applies a drop plan: deletes the selected slices from the store, flips
/// the manifest entries deleted, and appends one audit record.
pub async fn apply_drop(
    store: &dyn VectorStore,
    strategy: &CollectionStrategy,
    manifest: &ManifestStore,
    plan: &DropPlan,
    actor: &str,
) -> Result<DropOutcome> {
    let mut outcome = DropOutcome::default();
    let mut affected: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (model, selection) in &plan.models {
        let filter = selection_filter(model, selection);
        let mut deleted = 0usize;
        match strategy {
            CollectionStrategy::Single { name } => {
                deleted += store.delete(name, &filter).await?;
            }
            CollectionStrategy::PerPartition { .. } => {
                for partition in &selection.partitions {
                    let collection = strategy.collection_for(partition);
                    deleted += store.delete(&collection, &filter).await?;
                }
            }
        }
        info!(model = %model, deleted, "applied drop selection");
        outcome.deleted.insert(model.clone(), deleted);
        affected.insert(model.clone(), selection.partitions.clone());
    }

    // One audit entry for the whole plan; per-model reasons live in the
    // embedded config.
    let reason = plan
        .models
        .values()
        .map(|s| s.reason.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    manifest.mark_deleted(&affected, &reason, actor, serde_json::to_value(plan)?)?;

    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_filter_shape() {
        let selection = DropSelection {
            partitions: vec!["partition_00037".into(), "partition_00038".into()],
            schema_versions: vec![2, 3],
            reason: "schema upgrade".into(),
        };
        let filter = selection_filter("Table", &selection);
        let v = filter.to_value();
        assert_eq!(v["$and"][0]["model_name"]["$eq"], "Table");
        assert_eq!(v["$and"][1]["partition_name"]["$in"][1], "partition_00038");
        assert_eq!(v["$and"][2]["schema_version"]["$in"][0], 2);
    }

    #[test]
    fn test_empty_clauses_are_omitted() {
        let selection = DropSelection {
            partitions: vec![],
            schema_versions: vec![],
            reason: "all of it".into(),
        };
        let filter = selection_filter("Table", &selection);
        let v = filter.to_value();
        assert_eq!(v["$and"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_plan_round_trip() {
        let raw = r#"{
            "generated_at": "2026-03-01T10:00:00Z",
            "source_manifest": "data/manifest.json",
            "models": {
                "Table": {
                    "partitions": ["partition_00037"],
                    "schema_versions": [2],
                    "reason": "superseded"
                }
            }
        }"#;
        let plan: DropPlan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.models["Table"].partitions.len(), 1);
        assert!(plan.before.is_none());
    }
}
