//! The model ↔ collection routing map.
//!
//! Built by scanning every resume file under the output root. Only models
//! that actually contributed documents are routed; malformed resume files
//! are skipped with a warning. All lists are sorted so the config is
//! byte-stable across runs over the same state.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::Result;
use crate::index::{ResumeState, collection_from_filename};
use crate::io::{atomic_write_json, read_json_opt};

/// Routing entry for one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRoute {
    /// Collections holding this model's documents, sorted.
    pub collections: Vec<String>,
    /// Total documents across those collections.
    pub total_documents: u64,
    /// Partitions that contributed, sorted.
    pub partitions: Vec<String>,
}

/// Summary block of the config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfigMeta {
    /// Number of routed collections.
    pub total_collections: usize,
    /// Number of routed models.
    pub total_models: usize,
    /// When the config was generated.
    pub generated_at: Option<DateTime<Utc>>,
    /// Collection prefix the index run used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_prefix: Option<String>,
}

/// Bidirectional model ↔ collection map consumed by the query client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Model → route.
    pub model_to_collections: BTreeMap<String, ModelRoute>,
    /// Collection → models, each list sorted.
    pub collection_to_models: BTreeMap<String, Vec<String>>,
    /// Summary block.
    pub metadata: QueryConfigMeta,
}

impl QueryConfig {
    /// Scans `<out_root>/<partition>/*_resume_state.json` and builds the
    /// routing map.
    ///
    /// Models with `started == false` or `collection_count == 0` are
    /// excluded.
    pub fn build(out_root: &Path, collection_prefix: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        for entry in WalkDir::new(out_root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(collection) = collection_from_filename(file_name) else {
                continue;
            };
            let partition = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            let state: ResumeState = match read_json_opt(entry.path()) {
                Ok(Some(state)) => state,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "skipping unreadable resume state"
                    );
                    continue;
                }
            };

            for (model, progress) in &state.0 {
                if !progress.started || progress.collection_count == 0 {
                    continue;
                }
                let route = config.model_to_collections.entry(model.clone()).or_default();
                route.total_documents += progress.collection_count;
                if !route.collections.contains(&collection.to_string()) {
                    route.collections.push(collection.to_string());
                }
                if !route.partitions.contains(&partition) {
                    route.partitions.push(partition.clone());
                }
                let models = config
                    .collection_to_models
                    .entry(collection.to_string())
                    .or_default();
                if !models.contains(model) {
                    models.push(model.clone());
                }
            }
        }

        for route in config.model_to_collections.values_mut() {
            route.collections.sort();
            route.partitions.sort();
        }
        for models in config.collection_to_models.values_mut() {
            models.sort();
        }
        config.metadata = QueryConfigMeta {
            total_collections: config.collection_to_models.len(),
            total_models: config.model_to_collections.len(),
            generated_at: Some(Utc::now()),
            collection_prefix: collection_prefix.map(str::to_string),
        };
        Ok(config)
    }

    /// Loads a previously generated config file.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json_opt(path)
    }

    /// Writes the config atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }

    /// Every routed collection, sorted.
    #[must_use]
    pub fn all_collections(&self) -> Vec<String> {
        self.collection_to_models.keys().cloned().collect()
    }

    /// The collections to query for a model selection.
    ///
    /// `None` or an empty slice routes to every collection. Unknown
    /// models are logged and contribute nothing; each collection appears
    /// at most once.
    #[must_use]
    pub fn collections_for(&self, models: Option<&[String]>) -> Vec<String> {
        match models {
            None => self.all_collections(),
            Some([]) => self.all_collections(),
            Some(models) => {
                let mut out = Vec::new();
                for model in models {
                    match self.model_to_collections.get(model) {
                        Some(route) => {
                            for collection in &route.collections {
                                if !out.contains(collection) {
                                    out.push(collection.clone());
                                }
                            }
                        }
                        None => {
                            warn!(model = %model, "model not present in query config; ignoring");
                        }
                    }
                }
                out.sort();
                out
            }
        }
    }
}
