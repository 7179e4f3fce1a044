//! Persistent single-machine vector store.
//!
//! Each collection is one JSONL file under the store root, rewritten
//! atomically after every mutation and loaded lazily on first touch.
//! Search semantics are shared with [`MemoryStore`](super::MemoryStore).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::memory::{Record, apply_upsert, run_get, run_query};
use super::{Filter, GetRequest, GetResponse, QueryResponse, VectorStore};
use crate::document::Metadata;
use crate::error::StoreError;
use crate::io::atomic_write;

const COLLECTION_EXT: &str = "jsonl";

/// On-disk row of a collection file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    id: String,
    document: String,
    metadata: Metadata,
}

/// File-backed [`VectorStore`] for the `single` collection strategy.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    collections: Mutex<HashMap<String, Vec<Record>>>,
}

impl LocalStore {
    /// Opens (or creates) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            collections: Mutex::new(HashMap::new()),
        })
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Vec<Record>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{COLLECTION_EXT}"))
    }

    /// Loads a collection into the cache if it exists on disk but has not
    /// been touched yet. Returns whether the collection exists at all.
    fn load_into<'g>(
        &self,
        guard: &'g mut HashMap<String, Vec<Record>>,
        name: &str,
    ) -> Result<Option<&'g mut Vec<Record>>, StoreError> {
        if !guard.contains_key(name) {
            let path = self.collection_path(name);
            match std::fs::read_to_string(&path) {
                Ok(raw) => {
                    let mut records = Vec::new();
                    for (lineno, line) in raw.lines().enumerate() {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<PersistedRecord>(line) {
                            Ok(p) => records.push(Record::new(p.id, p.document, p.metadata)),
                            Err(e) => {
                                warn!(
                                    collection = %name,
                                    line = lineno + 1,
                                    error = %e,
                                    "skipping unreadable record"
                                );
                            }
                        }
                    }
                    guard.insert(name.to_string(), records);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(guard.get_mut(name))
    }

    fn persist(&self, name: &str, records: &[Record]) -> Result<(), StoreError> {
        let mut out = String::new();
        for record in records {
            let line = serde_json::to_string(&PersistedRecord {
                id: record.id.clone(),
                document: record.document.clone(),
                metadata: record.metadata.clone(),
            })
            .map_err(|e| StoreError::InvalidRequest {
                message: format!("unserialisable record {}: {e}", record.id),
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        atomic_write(&self.collection_path(name), out.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut guard = self.guard();
        if self.load_into(&mut guard, name)?.is_none() {
            guard.insert(name.to_string(), Vec::new());
            self.persist(name, &[])?;
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut guard = self.guard();
        guard.remove(name);
        match std::fs::remove_file(self.collection_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == COLLECTION_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        let mut guard = self.guard();
        let records = self
            .load_into(&mut guard, collection)?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        apply_upsert(records, collection, ids, documents, metadatas)?;
        let snapshot = records.clone();
        drop(guard);
        self.persist(collection, &snapshot)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let mut guard = self.guard();
        let records = self
            .load_into(&mut guard, collection)?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let before = records.len();
        records.retain(|r| !filter.matches(&r.metadata));
        let removed = before - records.len();
        let snapshot = records.clone();
        drop(guard);
        self.persist(collection, &snapshot)?;
        Ok(removed)
    }

    async fn query(
        &self,
        collection: &str,
        texts: &[String],
        n_results: usize,
        filter: Option<&Filter>,
    ) -> Result<QueryResponse, StoreError> {
        let mut guard = self.guard();
        let records = self
            .load_into(&mut guard, collection)?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(run_query(records, texts, n_results, filter))
    }

    async fn get(&self, collection: &str, request: &GetRequest) -> Result<GetResponse, StoreError> {
        let mut guard = self.guard();
        let records = self
            .load_into(&mut guard, collection)?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(run_get(records, request))
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError> {
        let mut guard = self.guard();
        let records = self
            .load_into(&mut guard, collection)?
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(records
            .iter()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
            .count())
    }
}
