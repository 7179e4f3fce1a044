//! The vector-store boundary.
//!
//! [`VectorStore`] is the abstract client the pipeline talks to. Managed
//! servers live behind it out of tree; in tree are [`MemoryStore`] (tests,
//! and the index behind the local store) and [`LocalStore`] (persistent
//! single-machine collections).

mod filter;
mod local;
mod memory;

pub use filter::{CmpOp, Filter};
pub use local::LocalStore;
pub use memory::{MemoryStore, lexical_distance};

use async_trait::async_trait;

use crate::document::Metadata;
use crate::error::StoreError;

/// Column-wise result of a similarity query: one row of vectors per input
/// text, inner vectors ordered by ascending distance.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    /// Document ids per query text.
    pub ids: Vec<Vec<String>>,
    /// Distances per query text (smaller is closer).
    pub distances: Vec<Vec<f32>>,
    /// Document texts per query text.
    pub documents: Vec<Vec<String>>,
    /// Metadata per query text.
    pub metadatas: Vec<Vec<Metadata>>,
}

/// Parameters of a `get` call. `ids` and `filter` compose (both must
/// match when both are set).
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    /// Restrict to these ids.
    pub ids: Option<Vec<String>>,
    /// Restrict by metadata.
    pub filter: Option<Filter>,
    /// Maximum records returned.
    pub limit: Option<usize>,
    /// Records skipped before `limit` applies.
    pub offset: Option<usize>,
}

/// Column-wise result of a `get` call.
#[derive(Debug, Clone, Default)]
pub struct GetResponse {
    /// Document ids.
    pub ids: Vec<String>,
    /// Document texts.
    pub documents: Vec<String>,
    /// Metadata.
    pub metadatas: Vec<Metadata>,
}

impl GetResponse {
    /// Number of records in the response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the response is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Abstract vector-store client.
///
/// One `upsert` call is atomic: it either applies all of its documents or
/// none. No atomicity is assumed across calls. Implementations manage
/// their own internal concurrency control.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the collection if it does not exist.
    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Drops a whole collection. Succeeds if it did not exist.
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Names of all existing collections, sorted.
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    /// Inserts or replaces documents by id.
    ///
    /// `ids`, `documents` and `metadatas` are parallel columns. Fails
    /// with [`StoreError::DuplicateIds`] when the batch repeats an id.
    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError>;

    /// Deletes documents matching the filter; returns how many.
    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize, StoreError>;

    /// Nearest documents for each query text.
    async fn query(
        &self,
        collection: &str,
        texts: &[String],
        n_results: usize,
        filter: Option<&Filter>,
    ) -> Result<QueryResponse, StoreError>;

    /// Fetches documents by id and/or filter.
    async fn get(&self, collection: &str, request: &GetRequest) -> Result<GetResponse, StoreError>;

    /// Counts documents, optionally under a filter.
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize, StoreError>;
}
