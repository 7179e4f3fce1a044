//! Per-partition, per-model checkpoints.
//!
//! A resume file lives at `<out_root>/<partition>/<collection>_resume_state.json`
//! and is written only after a successful vector-store flush, with the
//! same temp-file-and-rename discipline as every other state file. An
//! absent file is an empty state; a malformed one is treated as empty
//! with a warning so a damaged checkpoint degrades to a re-index, never
//! a crash.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IndexError, Result};
use crate::io::atomic_write_json;

/// Suffix shared by every resume file; the prefix is the collection name.
pub const RESUME_SUFFIX: &str = "_resume_state.json";

/// Identity of a prepared source file at checkpoint time.
///
/// A model whose recorded signature no longer matches its file is
/// restarted from offset zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSignature {
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    /// File size in bytes.
    pub size: u64,
}

impl SourceSignature {
    /// Reads the signature of a file on disk.
    pub fn probe(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| IndexError::io(path, e))?;
        let mtime = meta
            .modified()
            .map_err(|e| IndexError::io(path, e))?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Ok(Self {
            mtime,
            size: meta.len(),
        })
    }
}

/// Progress of one model inside one partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelProgress {
    /// Every row of the source has been flushed.
    #[serde(default)]
    pub complete: bool,
    /// At least one flush succeeded.
    #[serde(default)]
    pub started: bool,
    /// Documents indexed during the most recent run(s) of this model.
    #[serde(default)]
    pub documents_indexed: u64,
    /// Documents this model has contributed to the collection overall.
    #[serde(default)]
    pub collection_count: u64,
    /// Time of the last successful flush.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    /// Identity of the source when the checkpoint was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_signature: Option<SourceSignature>,
    /// First unread byte after the last fully flushed row.
    #[serde(default)]
    pub file_offset: u64,
    /// 1-based index of the last fully flushed row.
    #[serde(default)]
    pub row_index: u64,
    /// Header row captured on first open, used for header-less reopen.
    #[serde(default)]
    pub fieldnames: Vec<String>,
}

/// The whole resume document: model name → progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeState(pub BTreeMap<String, ModelProgress>);

impl ResumeState {
    /// Progress for a model, if any flush ever recorded one.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelProgress> {
        self.0.get(name)
    }

    /// Mutable progress entry, created on first access.
    pub fn model_mut(&mut self, name: &str) -> &mut ModelProgress {
        self.0.entry(name.to_string()).or_default()
    }

    /// Model names with recorded progress.
    pub fn models(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

/// Reads and writes one partition's resume file.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    /// Store for `<out_root>/<partition>/<collection>_resume_state.json`.
    #[must_use]
    pub fn new(out_root: &Path, partition: &str, collection: &str) -> Self {
        Self {
            path: out_root
                .join(partition)
                .join(format!("{collection}{RESUME_SUFFIX}")),
        }
    }

    /// The resume file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state. Absent → empty; malformed → empty with a warning.
    pub fn load(&self) -> Result<ResumeState> {
        let raw = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ResumeState::default());
            }
            Err(e) => return Err(IndexError::io(&self.path, e)),
        };
        match serde_json::from_slice(&raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "malformed resume state; treating as empty"
                );
                Ok(ResumeState::default())
            }
        }
    }

    /// Persists the state atomically. Called only after a successful
    /// flush.
    pub fn save(&self, state: &ResumeState) -> Result<()> {
        atomic_write_json(&self.path, state)
    }
}

/// Parses a resume file name back into its collection name.
#[must_use]
pub fn collection_from_filename(file_name: &str) -> Option<&str> {
    file_name.strip_suffix(RESUME_SUFFIX)
}
