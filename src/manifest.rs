//! The global partition registry.
//!
//! One JSON document holds every partition, its per-model schema versions
//! and lifecycle flags, plus the audit log of drops. All mutation goes
//! through [`ManifestStore`], which serialises writers with an exclusive
//! file lock (plus an in-process mutex) and stages every write through a
//! temp file and atomic rename. Readers take whole-file snapshots and
//! need no lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IndexError, Result};
use crate::io::{atomic_write_json, read_json_opt};

const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = "manifest.lock";

/// One model's entry inside a partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Schema version this partition was prepared under.
    pub schema_version: u32,
    /// Prepared CSV for this model.
    pub source_path: PathBuf,
    /// Digest sidecar written by the sanitiser, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_path: Option<PathBuf>,
    /// Superseded by a newer partition.
    #[serde(default)]
    pub stale: bool,
    /// Removed from the store by a drop.
    #[serde(default)]
    pub deleted: bool,
    /// When the drop happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Why the drop happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

/// Inputs for registering one model in a new partition.
#[derive(Debug, Clone)]
pub struct NewModel {
    /// Schema version of the prepared file.
    pub schema_version: u32,
    /// Prepared CSV path.
    pub source_path: PathBuf,
    /// Digest sidecar path.
    pub digest_path: Option<PathBuf>,
}

/// One registered partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Monotonic name, `partition_00037`.
    pub name: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Per-model entries.
    pub models: BTreeMap<String, ModelEntry>,
    /// Earlier partitions this one supersedes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

impl PartitionEntry {
    /// A partition is stale once every model in it is stale.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.models.is_empty() && self.models.values().all(|m| m.stale)
    }

    /// Models not yet dropped, in name order.
    pub fn live_models(&self) -> impl Iterator<Item = (&String, &ModelEntry)> {
        self.models.iter().filter(|(_, m)| !m.deleted)
    }
}

/// Audit record of one applied drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropAudit {
    /// When the drop was applied.
    pub performed_at: DateTime<Utc>,
    /// Who applied it.
    pub performed_by: String,
    /// The drop plan as supplied.
    pub config: Value,
    /// Model → partitions whose entries were flipped.
    pub affected: BTreeMap<String, Vec<String>>,
}

/// The whole registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Registered partitions, oldest first.
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
    /// Drop audit log.
    #[serde(default)]
    pub drops: Vec<DropAudit>,
}

impl Manifest {
    /// Looks a partition up by name.
    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&PartitionEntry> {
        self.partitions.iter().find(|p| p.name == name)
    }

    fn partition_mut(&mut self, name: &str) -> Option<&mut PartitionEntry> {
        self.partitions.iter_mut().find(|p| p.name == name)
    }

    /// Names of partitions whose every model is stale.
    #[must_use]
    pub fn stale_partitions(&self) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|p| p.is_stale())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Allocates the next monotonic partition name.
    #[must_use]
    pub fn next_partition_name(&self) -> String {
        let max = self
            .partitions
            .iter()
            .filter_map(|p| p.name.strip_prefix("partition_"))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("partition_{:05}", max + 1)
    }
}

/// Serialised access to the manifest file.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    lock_path: PathBuf,
    local: Mutex<()>,
}

impl ManifestStore {
    /// Manages `<root>/manifest.json`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            path: root.join(MANIFEST_FILE),
            lock_path: root.join(LOCK_FILE),
            local: Mutex::new(()),
        }
    }

    /// The manifest file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot read. An absent file is an empty manifest; no lock is
    /// taken, concurrent writers are tolerated because they replace the
    /// file atomically.
    pub fn read(&self) -> Result<Manifest> {
        Ok(read_json_opt(&self.path)?.unwrap_or_default())
    }

    /// Registers a new partition and returns its allocated name.
    ///
    /// `replaces` must name already-registered partitions; their models
    /// are flipped stale in the same write.
    pub fn append_partition(
        &self,
        models: BTreeMap<String, NewModel>,
        replaces: Vec<String>,
    ) -> Result<String> {
        self.mutate(|manifest| {
            for replaced in &replaces {
                if manifest.partition(replaced).is_none() {
                    return Err(IndexError::Manifest {
                        message: format!("replaced partition '{replaced}' is not registered"),
                    });
                }
            }
            let name = manifest.next_partition_name();
            let entry = PartitionEntry {
                name: name.clone(),
                created_at: Utc::now(),
                models: models
                    .iter()
                    .map(|(model, m)| {
                        (
                            model.clone(),
                            ModelEntry {
                                schema_version: m.schema_version,
                                source_path: m.source_path.clone(),
                                digest_path: m.digest_path.clone(),
                                stale: false,
                                deleted: false,
                                deleted_at: None,
                                drop_reason: None,
                            },
                        )
                    })
                    .collect(),
                replaces: replaces.clone(),
            };
            manifest.partitions.push(entry);
            for replaced in &replaces {
                if let Some(p) = manifest.partition_mut(replaced) {
                    for model in p.models.values_mut() {
                        model.stale = true;
                    }
                }
            }
            Ok(name)
        })
    }

    /// Flips every model of the named partitions stale.
    pub fn mark_stale(&self, partitions: &[String]) -> Result<()> {
        self.mutate(|manifest| {
            for name in partitions {
                let p = manifest
                    .partition_mut(name)
                    .ok_or_else(|| IndexError::Manifest {
                        message: format!("unknown partition '{name}'"),
                    })?;
                for model in p.models.values_mut() {
                    model.stale = true;
                }
            }
            Ok(())
        })
    }

    /// Flips `deleted` on the selected model-partition pairs and appends
    /// one audit record.
    ///
    /// `affected` maps model name → partition names. Every pair must
    /// reference a registered entry.
    pub fn mark_deleted(
        &self,
        affected: &BTreeMap<String, Vec<String>>,
        reason: &str,
        actor: &str,
        config: Value,
    ) -> Result<()> {
        self.mutate(|manifest| {
            let now = Utc::now();
            for (model, partitions) in affected {
                for name in partitions {
                    let p = manifest
                        .partition_mut(name)
                        .ok_or_else(|| IndexError::Manifest {
                            message: format!("unknown partition '{name}'"),
                        })?;
                    let entry = p.models.get_mut(model).ok_or_else(|| IndexError::Manifest {
                        message: format!("partition '{name}' has no model '{model}'"),
                    })?;
                    entry.deleted = true;
                    entry.deleted_at = Some(now);
                    entry.drop_reason = Some(reason.to_string());
                }
            }
            manifest.drops.push(DropAudit {
                performed_at: now,
                performed_by: actor.to_string(),
                config,
                affected: affected.clone(),
            });
            Ok(())
        })
    }

    /// Runs `apply` under the exclusive lock, persisting the result
    /// atomically. Nothing is written when `apply` fails.
    fn mutate<T>(&self, apply: impl FnOnce(&mut Manifest) -> Result<T>) -> Result<T> {
        let _in_process = self
            .local
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| IndexError::io(&self.lock_path, e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| IndexError::io(&self.lock_path, e))?;

        let result = (|| {
            let mut manifest = self.read()?;
            let out = apply(&mut manifest)?;
            atomic_write_json(&self.path, &manifest)?;
            Ok(out)
        })();

        // Released on close as well; unlocking early keeps the window tight.
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }
}
