//! Bounded-parallel orchestration of partition indexers.
//!
//! Runs up to `W` partitions concurrently, one worker per partition, and
//! keeps workers independent: one partition's failure never cancels its
//! siblings. After all first-pass work completes, partitions whose every
//! failure was transient get exactly one retry.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::collection::{CollectionStrategy, StaleAction};
use super::partition::{ModelFailure, PartitionIndexer, PartitionJob, PartitionOutcome};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::model::ModelRegistry;
use crate::store::VectorStore;
use crate::text::Tokenizer;

/// Aggregate result of one orchestrator run.
#[derive(Debug, serde::Serialize)]
pub struct RunSummary {
    /// Final per-partition outcomes (post-retry where one happened).
    pub outcomes: Vec<PartitionOutcome>,
    /// Partitions that received the deferred transient retry.
    pub retried: Vec<String>,
}

impl RunSummary {
    /// Whether every partition finished clean.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| !o.failed())
    }

    /// Names of failed partitions.
    #[must_use]
    pub fn failed_partitions(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.failed())
            .map(|o| o.partition.as_str())
            .collect()
    }

    /// Documents upserted across all partitions.
    #[must_use]
    pub fn total_documents(&self) -> u64 {
        self.outcomes.iter().map(|o| o.documents_indexed).sum()
    }
}

/// Runs partition indexers with bounded fan-out and the single deferred
/// retry for transient failures.
pub struct IndexOrchestrator {
    indexer: Arc<PartitionIndexer>,
    store: Arc<dyn VectorStore>,
    strategy: CollectionStrategy,
    config: IndexConfig,
}

impl std::fmt::Debug for IndexOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOrchestrator")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl IndexOrchestrator {
    /// Creates an orchestrator and its shared indexer.
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn VectorStore>,
        tokenizer: Arc<dyn Tokenizer>,
        strategy: CollectionStrategy,
        config: IndexConfig,
        out_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        let indexer = Arc::new(PartitionIndexer::new(
            registry,
            Arc::clone(&store),
            tokenizer,
            strategy.clone(),
            config.clone(),
            out_root,
        ));
        Self {
            indexer,
            store,
            strategy,
            config,
        }
    }

    /// Indexes the given partitions.
    ///
    /// `stale_partitions` is consulted only when `delete_stale` is on:
    /// their data is removed before any worker starts, per the collection
    /// strategy (whole collections dropped, or a filtered delete out of
    /// the shared one).
    pub async fn run(
        &self,
        jobs: Vec<PartitionJob>,
        stale_partitions: &[String],
    ) -> Result<RunSummary> {
        if self.config.delete_stale {
            self.apply_stale_cleanup(stale_partitions).await?;
        }

        let jobs = dedup_jobs(jobs);
        let width = self.config.effective_width();
        info!(partitions = jobs.len(), width, "starting index run");

        let mut outcomes = self.fan_out(jobs.clone(), width).await;

        // Single deferred retry, transient failures only, after all other
        // work has completed.
        let retry_jobs: Vec<PartitionJob> = jobs
            .into_iter()
            .filter(|job| {
                outcomes
                    .iter()
                    .any(|o| o.partition == job.name && o.retryable())
            })
            .collect();
        let mut retried = Vec::new();
        if !retry_jobs.is_empty() {
            warn!(
                partitions = retry_jobs.len(),
                "retrying partitions that failed transiently"
            );
            for job in &retry_jobs {
                retried.push(job.name.clone());
            }
            let retry_outcomes = self.fan_out(retry_jobs, width).await;
            for retry in retry_outcomes {
                if let Some(slot) = outcomes.iter_mut().find(|o| o.partition == retry.partition) {
                    *slot = retry;
                }
            }
        }

        for outcome in &outcomes {
            if outcome.failed() {
                error!(
                    partition = %outcome.partition,
                    failures = outcome.failures.len(),
                    "partition failed"
                );
            }
        }

        Ok(RunSummary { outcomes, retried })
    }

    /// Fans partition workers out under a concurrency permit, one task
    /// per partition. Worker panics and join failures degrade to failed
    /// outcomes rather than poisoning the run.
    async fn fan_out(&self, jobs: Vec<PartitionJob>, width: usize) -> Vec<PartitionOutcome> {
        let semaphore = Arc::new(Semaphore::new(width.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let name = job.name.clone();
            let sem = Arc::clone(&semaphore);
            let indexer = Arc::clone(&self.indexer);
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.map_err(|e| IndexError::Join {
                    message: format!("semaphore closed: {e}"),
                })?;
                indexer.index_partition(&job).await
            });
            handles.push((name, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(err)) => outcomes.push(failed_outcome(&name, &err)),
                Err(join_err) => outcomes.push(failed_outcome(
                    &name,
                    &IndexError::Join {
                        message: join_err.to_string(),
                    },
                )),
            }
        }
        outcomes
    }

    async fn apply_stale_cleanup(&self, stale_partitions: &[String]) -> Result<()> {
        match self.strategy.stale_action(stale_partitions) {
            StaleAction::None => Ok(()),
            StaleAction::DropCollections(collections) => {
                for collection in collections {
                    info!(collection = %collection, "dropping stale collection");
                    self.store.delete_collection(&collection).await?;
                }
                Ok(())
            }
            StaleAction::FilteredDelete { collection, filter } => {
                self.store.ensure_collection(&collection).await?;
                let removed = self.store.delete(&collection, &filter).await?;
                info!(collection = %collection, removed, "deleted stale partition slice");
                Ok(())
            }
        }
    }
}

fn failed_outcome(partition: &str, err: &IndexError) -> PartitionOutcome {
    let mut outcome = PartitionOutcome {
        partition: partition.to_string(),
        documents_indexed: 0,
        batches_flushed: 0,
        models_completed: 0,
        models_skipped: 0,
        documents_skipped: 0,
        failures: Vec::new(),
    };
    outcome.failures.push(ModelFailure {
        model: String::from("*"),
        class: err.class(),
        message: err.to_string(),
    });
    outcome
}

fn dedup_jobs(jobs: Vec<PartitionJob>) -> Vec<PartitionJob> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::with_capacity(jobs.len());
    for job in jobs {
        if seen.insert(job.name.clone()) {
            out.push(job);
        } else {
            warn!(partition = %job.name, "duplicate partition job dropped");
        }
    }
    out
}
