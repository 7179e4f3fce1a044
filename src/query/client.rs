//! Multi-collection query fan-out.
//!
//! One client serves queries over every collection the routing config
//! maps. Each call fans one sub-request per target collection out under a
//! bounded concurrency permit, tolerates partial failure (at least one
//! sub-request must succeed), and merges results by ascending distance.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::config::QueryConfig;
use crate::document::Metadata;
use crate::error::{IndexError, Result};
use crate::store::{Filter, GetRequest, GetResponse, VectorStore};

/// Default bound on concurrent sub-requests.
const DEFAULT_MAX_PARALLEL: usize = 8;

/// One merged query result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryHit {
    /// Document id, passed through unchanged from the owning collection.
    pub id: String,
    /// Distance reported by the store (smaller is closer).
    pub distance: f32,
    /// Document text.
    pub document: String,
    /// Document metadata.
    pub metadata: Metadata,
    /// Collection the hit came from.
    pub collection: String,
}

/// Client fanning queries across routed collections.
///
/// Collection handles are verified once and cached for the client's
/// lifetime. [`close`](Self::close) makes further calls fail; dropping
/// the client closes it on every exit path.
pub struct MultiCollectionClient {
    store: Arc<dyn VectorStore>,
    config: QueryConfig,
    max_parallel: usize,
    ensured: std::sync::Mutex<BTreeSet<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MultiCollectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCollectionClient")
            .field("collections", &self.config.metadata.total_collections)
            .field("max_parallel", &self.max_parallel)
            .finish_non_exhaustive()
    }
}

impl MultiCollectionClient {
    /// Connects over a store, verifying it is reachable.
    pub async fn connect(store: Arc<dyn VectorStore>, config: QueryConfig) -> Result<Self> {
        store.list_collections().await?;
        Ok(Self {
            store,
            config,
            max_parallel: DEFAULT_MAX_PARALLEL,
            ensured: std::sync::Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Overrides the fan-out bound.
    #[must_use]
    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    /// The routing config in use.
    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Closes the client; subsequent calls fail with
    /// [`IndexError::ClientClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ensured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        debug!("query client closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::ClientClosed);
        }
        Ok(())
    }

    /// Queries the routed collections and merges hits by ascending
    /// distance, keeping the top `n_results` per input text.
    pub async fn query(
        &self,
        texts: &[String],
        n_results: usize,
        models: Option<&[String]>,
        filter: Option<&Filter>,
    ) -> Result<Vec<Vec<QueryHit>>> {
        self.ensure_open()?;
        let targets = self.config.collections_for(models);
        if targets.is_empty() {
            return Ok(vec![Vec::new(); texts.len()]);
        }

        let texts_shared: Arc<Vec<String>> = Arc::new(texts.to_vec());
        let results = self
            .fan_out(&targets, move |store, collection| {
                let texts = Arc::clone(&texts_shared);
                let filter = filter.cloned();
                async move {
                    store
                        .query(&collection, &texts, n_results, filter.as_ref())
                        .await
                }
            })
            .await?;

        let mut merged: Vec<Vec<QueryHit>> = vec![Vec::new(); texts.len()];
        for (collection, response) in results {
            for (t, ids) in response.ids.iter().enumerate() {
                let Some(bucket) = merged.get_mut(t) else {
                    continue;
                };
                for (i, id) in ids.iter().enumerate() {
                    bucket.push(QueryHit {
                        id: id.clone(),
                        distance: response
                            .distances
                            .get(t)
                            .and_then(|d| d.get(i))
                            .copied()
                            .unwrap_or(f32::MAX),
                        document: response
                            .documents
                            .get(t)
                            .and_then(|d| d.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        metadata: response
                            .metadatas
                            .get(t)
                            .and_then(|m| m.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        collection: collection.clone(),
                    });
                }
            }
        }
        for bucket in &mut merged {
            bucket.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.collection.cmp(&b.collection))
                    .then_with(|| a.id.cmp(&b.id))
            });
            bucket.truncate(n_results);
        }
        Ok(merged)
    }

    /// Fetches documents across the routed collections, concatenated in
    /// collection order; `limit`/`offset` apply after concatenation.
    pub async fn get(
        &self,
        request: &GetRequest,
        models: Option<&[String]>,
    ) -> Result<GetResponse> {
        self.ensure_open()?;
        let targets = self.config.collections_for(models);
        if targets.is_empty() {
            return Ok(GetResponse::default());
        }

        // Sub-requests run unbounded; pagination applies to the merged
        // result, not per collection.
        let inner = GetRequest {
            ids: request.ids.clone(),
            filter: request.filter.clone(),
            limit: None,
            offset: None,
        };
        let inner = Arc::new(inner);
        let results = self
            .fan_out(&targets, move |store, collection| {
                let inner = Arc::clone(&inner);
                async move { store.get(&collection, &inner).await }
            })
            .await?;

        let mut combined = GetResponse::default();
        for (_, response) in results {
            combined.ids.extend(response.ids);
            combined.documents.extend(response.documents);
            combined.metadatas.extend(response.metadatas);
        }
        if let Some(offset) = request.offset {
            combined.ids.drain(..offset.min(combined.ids.len()));
            combined
                .documents
                .drain(..offset.min(combined.documents.len()));
            combined
                .metadatas
                .drain(..offset.min(combined.metadatas.len()));
        }
        if let Some(limit) = request.limit {
            combined.ids.truncate(limit);
            combined.documents.truncate(limit);
            combined.metadatas.truncate(limit);
        }
        Ok(combined)
    }

    /// Sums document counts across the routed collections.
    pub async fn count(&self, models: Option<&[String]>, filter: Option<&Filter>) -> Result<u64> {
        self.ensure_open()?;
        let targets = self.config.collections_for(models);
        if targets.is_empty() {
            return Ok(0);
        }
        let results = self
            .fan_out(&targets, move |store, collection| {
                let filter = filter.cloned();
                async move { store.count(&collection, filter.as_ref()).await }
            })
            .await?;
        Ok(results.into_iter().map(|(_, n)| n as u64).sum())
    }

    /// Runs one sub-request per target collection under the concurrency
    /// bound, in sorted target order.
    ///
    /// The overall call succeeds as long as at least one sub-request
    /// does; failed collections are logged and dropped from the merge.
    async fn fan_out<T, F, Fut>(
        &self,
        targets: &[String],
        request: F,
    ) -> Result<Vec<(String, T)>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn VectorStore>, String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, crate::error::StoreError>>
            + Send
            + 'static,
    {
        for collection in targets {
            self.ensure_handle(collection).await?;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles = Vec::with_capacity(targets.len());
        for collection in targets {
            let sem = Arc::clone(&semaphore);
            let fut = request(Arc::clone(&self.store), collection.clone());
            let name = collection.clone();
            handles.push((
                name,
                tokio::spawn(async move {
                    let _permit = sem.acquire().await;
                    fut.await
                }),
            ));
        }

        let mut successes = Vec::with_capacity(handles.len());
        let mut first_error: Option<IndexError> = None;
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(value)) => successes.push((name, value)),
                Ok(Err(store_err)) => {
                    warn!(collection = %name, error = %store_err, "sub-request failed");
                    if first_error.is_none() {
                        first_error = Some(store_err.into());
                    }
                }
                Err(join_err) => {
                    warn!(collection = %name, error = %join_err, "sub-request task failed");
                    if first_error.is_none() {
                        first_error = Some(IndexError::Join {
                            message: join_err.to_string(),
                        });
                    }
                }
            }
        }

        if successes.is_empty()
            && let Some(err) = first_error
        {
            return Err(err);
        }
        Ok(successes)
    }

    /// Verifies a collection handle once per client lifetime.
    async fn ensure_handle(&self, collection: &str) -> Result<()> {
        {
            let ensured = self
                .ensured
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if ensured.contains(collection) {
                return Ok(());
            }
        }
        self.store.ensure_collection(collection).await?;
        self.ensured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(collection.to_string());
        Ok(())
    }
}

impl Drop for MultiCollectionClient {
    fn drop(&mut self) {
        // Close on every exit path.
        self.closed.store(true, Ordering::SeqCst);
    }
}
