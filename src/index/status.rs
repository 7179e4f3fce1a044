//! Status classification for partition-model streams.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use super::report::ErrorReport;
use super::resume::{ModelProgress, ResumeState, ResumeStore};
use crate::error::Result;
use crate::index::CollectionStrategy;
use crate::manifest::PartitionEntry;

/// Lifecycle state of one model inside one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
    /// No resume entry, or one that never recorded a flush.
    NotStarted,
    /// Flushes have happened; the stream is not finished.
    Started,
    /// Every row reached the store.
    Complete,
    /// The last recorded failure has not been indexed past yet.
    Errored,
}

impl ModelStatus {
    /// Display label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Started => "STARTED",
            Self::Complete => "COMPLETE",
            Self::Errored => "ERRORED",
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies one model stream.
///
/// `max_error_row` is the largest row index across this model's error
/// reports, if any exist. A model stays `ERRORED` only while the resume
/// row index has not moved past that failure; once indexing progresses
/// beyond it, the state reverts to `STARTED` (or `COMPLETE`) without
/// touching the report files.
#[must_use]
pub fn classify(progress: Option<&ModelProgress>, max_error_row: Option<u64>) -> ModelStatus {
    if progress.is_some_and(|p| p.complete) {
        return ModelStatus::Complete;
    }
    let row_index = progress.map_or(0, |p| p.row_index);
    if max_error_row.is_some_and(|max| max >= row_index) {
        return ModelStatus::Errored;
    }
    if progress.is_some_and(|p| p.started) {
        ModelStatus::Started
    } else {
        ModelStatus::NotStarted
    }
}

/// Scans an errors directory, returning per-model maximum row indexes.
///
/// Unreadable report files are skipped with a warning so a damaged
/// report cannot block status reporting.
#[must_use]
pub fn scan_error_rows(errors_dir: &Path) -> BTreeMap<String, u64> {
    let mut out: BTreeMap<String, u64> = BTreeMap::new();
    let entries = match std::fs::read_dir(errors_dir) {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|e| e != "yaml") {
            continue;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable error report");
                continue;
            }
        };
        match serde_yaml::from_str::<ErrorReport>(&raw) {
            Ok(report) => {
                let max = out.entry(report.model_name.clone()).or_insert(0);
                *max = (*max).max(report.max_row());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unparsable error report");
            }
        }
    }
    out
}

/// Per-model status line inside a partition report.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatusEntry {
    /// Classified state.
    pub status: ModelStatus,
    /// Documents indexed by the most recent run(s).
    pub documents_indexed: u64,
    /// Documents contributed to the collection overall.
    pub collection_count: u64,
    /// Last fully flushed row.
    pub row_index: u64,
}

/// Status of every model in one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStatusReport {
    /// Partition name.
    pub partition: String,
    /// Collection its documents land in.
    pub collection: String,
    /// Per-model status, model name order.
    pub models: BTreeMap<String, ModelStatusEntry>,
}

/// Builds the status report for one manifest partition.
///
/// Models come from the manifest entry; resume and error data come from
/// the partition's output directory.
pub fn partition_status(
    out_root: &Path,
    partition: &PartitionEntry,
    strategy: &CollectionStrategy,
) -> Result<PartitionStatusReport> {
    let collection = strategy.collection_for(&partition.name);
    let resume = ResumeStore::new(out_root, &partition.name, &collection);
    let state: ResumeState = resume.load()?;
    let error_rows = scan_error_rows(&out_root.join(&partition.name).join("errors"));

    let mut models = BTreeMap::new();
    for name in partition.models.keys() {
        let progress = state.model(name);
        let status = classify(progress, error_rows.get(name).copied());
        models.insert(
            name.clone(),
            ModelStatusEntry {
                status,
                documents_indexed: progress.map_or(0, |p| p.documents_indexed),
                collection_count: progress.map_or(0, |p| p.collection_count),
                row_index: progress.map_or(0, |p| p.row_index),
            },
        );
    }

    Ok(PartitionStatusReport {
        partition: partition.name.clone(),
        collection,
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(started: bool, complete: bool, row_index: u64) -> ModelProgress {
        ModelProgress {
            started,
            complete,
            row_index,
            ..ModelProgress::default()
        }
    }

    #[test]
    fn test_absent_is_not_started() {
        assert_eq!(classify(None, None), ModelStatus::NotStarted);
    }

    #[test]
    fn test_complete_wins() {
        let p = progress(true, true, 1000);
        assert_eq!(classify(Some(&p), None), ModelStatus::Complete);
    }

    #[test]
    fn test_started_without_errors() {
        let p = progress(true, false, 300);
        assert_eq!(classify(Some(&p), None), ModelStatus::Started);
    }

    #[test]
    fn test_errored_while_not_past_failure() {
        let p = progress(true, false, 500);
        assert_eq!(classify(Some(&p), Some(500)), ModelStatus::Errored);
        assert_eq!(classify(Some(&p), Some(900)), ModelStatus::Errored);
    }

    #[test]
    fn test_recovers_once_indexed_past_failure() {
        // Error recorded at row 500, resume has moved to 700.
        let p = progress(true, false, 700);
        assert_eq!(classify(Some(&p), Some(500)), ModelStatus::Started);
    }

    #[test]
    fn test_error_before_any_flush() {
        // Validation failed on row 1; no resume entry was ever written.
        assert_eq!(classify(None, Some(1)), ModelStatus::Errored);
    }
}
