//! On-disk reports for failed flushes.
//!
//! Every irrecoverable flush failure writes one immutable YAML file under
//! `<out_root>/<partition>/errors/` before the error propagates, carrying
//! enough context to replay or diagnose the batch offline.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batch::Flush;
use super::resume::ModelProgress;
use crate::document::Metadata;
use crate::error::{IndexError, Result};
use crate::io::atomic_write;

/// Documents are clipped to this many characters in reports.
const DOCUMENT_CLIP: usize = 1000;

/// One failed flush, serialised to
/// `<out_root>/<partition>/errors/<model>_<timestamp>.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Model whose stream failed.
    pub model_name: String,
    /// Target collection.
    pub collection_name: String,
    /// Failure class label.
    pub reason: String,
    /// Prepared source path.
    pub source_csv: String,
    /// Number of documents in the failed batch.
    pub batch_size: usize,
    /// Ids of the batch documents.
    pub document_ids: Vec<String>,
    /// Batch document texts, clipped to 1000 characters each.
    pub documents: Vec<String>,
    /// Batch metadata.
    pub metadatas: Vec<Metadata>,
    /// 1-based source rows of the batch documents.
    pub row_numbers: Vec<u64>,
    /// Token counts per document.
    pub token_counts: Vec<usize>,
    /// Token sum of the batch.
    pub token_total: usize,
    /// Resume state at failure time.
    pub resume_state: ModelProgress,
    /// Machine-readable error kind.
    pub error_kind: String,
    /// Human-readable error message.
    pub error_message: String,
    /// Full source chain, outermost first.
    pub error_chain: Vec<String>,
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    /// Builds a report from a failed flush.
    #[must_use]
    pub fn from_flush(
        model: &str,
        collection: &str,
        source_csv: &Path,
        flush: &Flush,
        resume_state: &ModelProgress,
        error: &IndexError,
    ) -> Self {
        Self {
            model_name: model.to_string(),
            collection_name: collection.to_string(),
            reason: error.class().as_str().to_string(),
            source_csv: source_csv.display().to_string(),
            batch_size: flush.documents.len(),
            document_ids: flush.documents.iter().map(|d| d.id.clone()).collect(),
            documents: flush
                .documents
                .iter()
                .map(|d| clip(&d.text, DOCUMENT_CLIP))
                .collect(),
            metadatas: flush.documents.iter().map(|d| d.metadata.clone()).collect(),
            row_numbers: flush.documents.iter().map(|d| d.source_row).collect(),
            token_counts: flush.documents.iter().map(|d| d.token_count).collect(),
            token_total: flush.token_total,
            resume_state: resume_state.clone(),
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            error_chain: error.chain(),
            timestamp: Utc::now(),
        }
    }

    /// Builds a report for a failure with no batch in flight (validation,
    /// unreadable source).
    #[must_use]
    pub fn from_error(
        model: &str,
        collection: &str,
        source_csv: &Path,
        row: u64,
        resume_state: &ModelProgress,
        error: &IndexError,
    ) -> Self {
        Self {
            model_name: model.to_string(),
            collection_name: collection.to_string(),
            reason: error.class().as_str().to_string(),
            source_csv: source_csv.display().to_string(),
            batch_size: 0,
            document_ids: Vec::new(),
            documents: Vec::new(),
            metadatas: Vec::new(),
            row_numbers: vec![row],
            token_counts: Vec::new(),
            token_total: 0,
            resume_state: resume_state.clone(),
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            error_chain: error.chain(),
            timestamp: Utc::now(),
        }
    }

    /// Largest row number referenced by this report.
    #[must_use]
    pub fn max_row(&self) -> u64 {
        self.row_numbers.iter().copied().max().unwrap_or(0)
    }

    /// Writes the report under `errors_dir`, returning its path.
    ///
    /// File name: `<model>_<UTC %Y%m%dT%H%M%SZ>.yaml`, suffixed with a
    /// counter if a same-second report already exists.
    pub fn write(&self, errors_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(errors_dir).map_err(|e| IndexError::io(errors_dir, e))?;
        let stamp = self.timestamp.format("%Y%m%dT%H%M%SZ");
        let mut path = errors_dir.join(format!("{}_{stamp}.yaml", self.model_name));
        let mut n = 1;
        while path.exists() {
            path = errors_dir.join(format!("{}_{stamp}_{n}.yaml", self.model_name));
            n += 1;
        }
        let yaml = serde_yaml::to_string(self)?;
        atomic_write(&path, yaml.as_bytes()).map_err(|e| IndexError::io(&path, e))?;
        Ok(path)
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
