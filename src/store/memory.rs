//! In-process vector store.
//!
//! Backs tests and the local persistent store. Similarity is a
//! deterministic lexical distance (1 − Jaccard overlap of lower-cased
//! word sets) so results are reproducible everywhere with no model
//! downloads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use super::{Filter, GetRequest, GetResponse, QueryResponse, VectorStore};
use crate::document::Metadata;
use crate::error::StoreError;

/// One stored document.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) id: String,
    pub(crate) document: String,
    pub(crate) metadata: Metadata,
    words: BTreeSet<String>,
}

impl Record {
    pub(crate) fn new(id: String, document: String, metadata: Metadata) -> Self {
        let words = word_set(&document);
        Self {
            id,
            document,
            metadata,
            words,
        }
    }
}

fn word_set(text: &str) -> BTreeSet<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Distance between a query text and a document: `1 − |A∩B| / |A∪B|`
/// over lower-cased word sets. `0.0` is identical vocabulary, `1.0` is
/// disjoint.
#[must_use]
pub fn lexical_distance(query: &str, document: &str) -> f32 {
    distance_to(&word_set(query), &word_set(document))
}

#[allow(clippy::cast_precision_loss)]
fn distance_to(query: &BTreeSet<String>, doc: &BTreeSet<String>) -> f32 {
    let union = query.union(doc).count();
    if union == 0 {
        return 1.0;
    }
    let shared = query.intersection(doc).count();
    1.0 - (shared as f32 / union as f32)
}

/// In-memory [`VectorStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Vec<Record>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<Record>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared query evaluation over a collection's records.
pub(crate) fn run_query(
    records: &[Record],
    texts: &[String],
    n_results: usize,
    filter: Option<&Filter>,
) -> QueryResponse {
    let mut response = QueryResponse::default();
    for text in texts {
        let query_words = word_set(text);
        let mut scored: Vec<(f32, &Record)> = records
            .iter()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
            .map(|r| (distance_to(&query_words, &r.words), r))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.truncate(n_results);

        response.ids.push(scored.iter().map(|(_, r)| r.id.clone()).collect());
        response.distances.push(scored.iter().map(|(d, _)| *d).collect());
        response
            .documents
            .push(scored.iter().map(|(_, r)| r.document.clone()).collect());
        response
            .metadatas
            .push(scored.iter().map(|(_, r)| r.metadata.clone()).collect());
    }
    response
}

/// Shared `get` evaluation.
pub(crate) fn run_get(records: &[Record], request: &GetRequest) -> GetResponse {
    let mut hits: Vec<&Record> = records
        .iter()
        .filter(|r| {
            request
                .ids
                .as_ref()
                .is_none_or(|ids| ids.iter().any(|id| id == &r.id))
        })
        .filter(|r| {
            request
                .filter
                .as_ref()
                .is_none_or(|f| f.matches(&r.metadata))
        })
        .collect();
    if let Some(offset) = request.offset {
        hits = hits.into_iter().skip(offset).collect();
    }
    if let Some(limit) = request.limit {
        hits.truncate(limit);
    }
    GetResponse {
        ids: hits.iter().map(|r| r.id.clone()).collect(),
        documents: hits.iter().map(|r| r.document.clone()).collect(),
        metadatas: hits.iter().map(|r| r.metadata.clone()).collect(),
    }
}

/// Applies an upsert batch to a record list, checking in-batch duplicates
/// first so the call stays all-or-nothing.
pub(crate) fn apply_upsert(
    records: &mut Vec<Record>,
    collection: &str,
    ids: &[String],
    documents: &[String],
    metadatas: &[Metadata],
) -> Result<(), StoreError> {
    if ids.len() != documents.len() || ids.len() != metadatas.len() {
        return Err(StoreError::InvalidRequest {
            message: format!(
                "column lengths differ: {} ids, {} documents, {} metadatas",
                ids.len(),
                documents.len(),
                metadatas.len()
            ),
        });
    }
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            duplicates.insert(id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(StoreError::DuplicateIds {
            collection: collection.to_string(),
            ids: duplicates.into_iter().collect(),
        });
    }

    for ((id, document), metadata) in ids.iter().zip(documents).zip(metadatas) {
        let record = Record::new(id.clone(), document.clone(), metadata.clone());
        if let Some(existing) = records.iter_mut().find(|r| &r.id == id) {
            *existing = record;
        } else {
            records.push(record);
        }
    }
    Ok(())
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        self.guard().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        self.guard().remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.guard().keys().cloned().collect())
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        let mut guard = self.guard();
        let records = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        apply_upsert(records, collection, ids, documents, metadatas)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError> {
        let mut guard = self.guard();
        let records = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let before = records.len();
        records.retain(|r| !filter.matches(&r.metadata));
        Ok(before - records.len())
    }

    async fn query(
        &self,
        collection: &str,
        texts: &[String],
        n_results: usize,
        filter: Option<&Filter>,
    ) -> Result<QueryResponse, StoreError> {
        let guard = self.guard();
        let records = guard
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(run_query(records, texts, n_results, filter))
    }

    async fn get(&self, collection: &str, request: &GetRequest) -> Result<GetResponse, StoreError> {
        let guard = self.guard();
        let records = guard
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(run_get(records, request))
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError> {
        let guard = self.guard();
        let records = guard
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(records
            .iter()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.metadata)))
            .count())
    }
}
