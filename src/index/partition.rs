//! Streaming one partition's models into a collection.
//!
//! The indexer is fail-stop at partition granularity: the first
//! irrecoverable flush failure stops the whole partition. A validation
//! failure stops only the offending model's stream; remaining models
//! still run, and the partition is reported failed either way. The only
//! local retry is the duplicate-id path, which re-issues a single upsert
//! without the ids the store rejected.

use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::batch::{BatchAggregator, Flush};
use super::collection::CollectionStrategy;
use super::report::ErrorReport;
use super::resume::{ModelProgress, ResumeState, ResumeStore, SourceSignature};
use crate::config::IndexConfig;
use crate::document::{Document, DocumentBuilder, DocumentContext, Metadata};
use crate::error::{ErrorClass, IndexError, Result, StoreError};
use crate::manifest::PartitionEntry;
use crate::model::ModelRegistry;
use crate::store::{Filter, VectorStore};
use crate::text::Tokenizer;

/// One model's prepared source inside a partition.
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// Model name.
    pub model: String,
    /// Prepared CSV path.
    pub path: PathBuf,
    /// Schema version recorded in the manifest.
    pub schema_version: u32,
}

/// A unit of work for the orchestrator: one partition and its live model
/// sources in registry declaration order.
#[derive(Debug, Clone)]
pub struct PartitionJob {
    /// Partition name.
    pub name: String,
    /// Sources to index, stable order.
    pub models: Vec<ModelSource>,
}

impl PartitionJob {
    /// Builds a job from a manifest entry.
    ///
    /// Models follow the registry's declaration order; dropped models are
    /// excluded; relative source paths resolve against `data_root`.
    #[must_use]
    pub fn from_manifest(
        entry: &PartitionEntry,
        registry: &ModelRegistry,
        data_root: &Path,
    ) -> Self {
        let mut models = Vec::new();
        for spec in registry.iter() {
            let Some(model_entry) = entry.models.get(spec.name()) else {
                continue;
            };
            if model_entry.deleted {
                continue;
            }
            let path = if model_entry.source_path.is_absolute() {
                model_entry.source_path.clone()
            } else {
                data_root.join(&model_entry.source_path)
            };
            models.push(ModelSource {
                model: spec.name().to_string(),
                path,
                schema_version: model_entry.schema_version,
            });
        }
        Self {
            name: entry.name.clone(),
            models,
        }
    }
}

/// One model's failure inside a partition run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelFailure {
    /// The model whose stream failed.
    pub model: String,
    /// Failure classification.
    pub class: ErrorClass,
    /// Human-readable message.
    pub message: String,
}

/// Result of indexing one partition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PartitionOutcome {
    /// Partition name.
    pub partition: String,
    /// Documents upserted across all models this run.
    pub documents_indexed: u64,
    /// Batches flushed successfully.
    pub batches_flushed: u64,
    /// Models that finished (or were already complete and skipped).
    pub models_completed: usize,
    /// Models skipped because resume found them complete and unchanged.
    pub models_skipped: usize,
    /// Documents dropped because they stayed over the hard token limit.
    pub documents_skipped: u64,
    /// Failures, in occurrence order.
    pub failures: Vec<ModelFailure>,
}

impl PartitionOutcome {
    fn new(partition: String) -> Self {
        Self {
            partition,
            documents_indexed: 0,
            batches_flushed: 0,
            models_completed: 0,
            models_skipped: 0,
            documents_skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Whether anything failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Whether the orchestrator may enqueue this partition for its single
    /// deferred retry: every failure must be transient.
    #[must_use]
    pub fn retryable(&self) -> bool {
        self.failed() && self.failures.iter().all(|f| f.class.is_retryable())
    }
}

/// Per-model stream accounting.
#[derive(Debug, Default)]
struct ModelRun {
    documents: u64,
    batches: u64,
    skipped_docs: u64,
    skipped_model: bool,
}

/// Shared context for flush commits of one model stream.
struct FlushTarget<'a> {
    model: &'a str,
    collection: &'a str,
    source_path: &'a Path,
    errors_dir: &'a Path,
    resume_store: &'a ResumeStore,
    signature: SourceSignature,
}

/// Streams one partition's models into its collection with resume and
/// atomic progress.
pub struct PartitionIndexer {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn VectorStore>,
    strategy: CollectionStrategy,
    config: IndexConfig,
    builder: DocumentBuilder,
    out_root: PathBuf,
}

impl std::fmt::Debug for PartitionIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionIndexer")
            .field("strategy", &self.strategy)
            .field("out_root", &self.out_root)
            .finish_non_exhaustive()
    }
}

impl PartitionIndexer {
    /// Creates an indexer.
    #[must_use]
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn VectorStore>,
        tokenizer: Arc<dyn Tokenizer>,
        strategy: CollectionStrategy,
        config: IndexConfig,
        out_root: impl Into<PathBuf>,
    ) -> Self {
        let builder = DocumentBuilder::new(
            tokenizer,
            config.api_token_limit,
            config.truncation_strategy,
        );
        Self {
            registry,
            store,
            strategy,
            config,
            builder,
            out_root: out_root.into(),
        }
    }

    /// Indexes every model of the partition.
    ///
    /// Per-model failures land in the outcome; an `Err` here means the
    /// partition could not even start (collection creation or checkpoint
    /// I/O).
    pub async fn index_partition(&self, job: &PartitionJob) -> Result<PartitionOutcome> {
        let collection = self.strategy.collection_for(&job.name);
        self.store.ensure_collection(&collection).await?;

        let resume_store = ResumeStore::new(&self.out_root, &job.name, &collection);
        let mut state = resume_store.load()?;
        let mut outcome = PartitionOutcome::new(job.name.clone());

        for source in &job.models {
            match self
                .index_model(job, source, &collection, &resume_store, &mut state)
                .await
            {
                Ok(run) => {
                    outcome.documents_indexed += run.documents;
                    outcome.batches_flushed += run.batches;
                    outcome.documents_skipped += run.skipped_docs;
                    if run.skipped_model {
                        outcome.models_skipped += 1;
                    } else {
                        outcome.models_completed += 1;
                    }
                }
                Err(err) => {
                    let class = err.class();
                    outcome.failures.push(ModelFailure {
                        model: source.model.clone(),
                        class,
                        message: err.to_string(),
                    });
                    if class == ErrorClass::Validation {
                        // Only the offending model stream stops.
                        continue;
                    }
                    // Fail-stop: no further batches for any model of this
                    // partition.
                    break;
                }
            }
        }

        Ok(outcome)
    }

    #[allow(clippy::too_many_lines)]
    async fn index_model(
        &self,
        job: &PartitionJob,
        source: &ModelSource,
        collection: &str,
        resume_store: &ResumeStore,
        state: &mut ResumeState,
    ) -> Result<ModelRun> {
        let spec = Arc::clone(self.registry.require(&source.model)?);
        let signature = SourceSignature::probe(&source.path)?;
        let mut progress = state.model(&source.model).cloned().unwrap_or_default();
        let mut run = ModelRun::default();

        if self.config.resume {
            if progress.complete && progress.source_signature == Some(signature) {
                debug!(
                    model = %source.model,
                    partition = %job.name,
                    "complete and source unchanged; skipping"
                );
                run.skipped_model = true;
                return Ok(run);
            }
            if progress.source_signature.is_some_and(|s| s != signature) {
                warn!(
                    model = %source.model,
                    partition = %job.name,
                    "source changed since last checkpoint; restarting from offset 0"
                );
                progress = ModelProgress::default();
            } else if !progress.started {
                self.reconcile_collection_count(collection, &source.model, &mut progress)
                    .await;
            }
        } else {
            progress = ModelProgress::default();
        }

        let errors_dir = self.out_root.join(&job.name).join("errors");
        let target = FlushTarget {
            model: &source.model,
            collection,
            source_path: &source.path,
            errors_dir: &errors_dir,
            resume_store,
            signature,
        };

        let mut file =
            std::fs::File::open(&source.path).map_err(|e| IndexError::io(&source.path, e))?;

        // Reopen strategy: with a recorded offset and header row, seek
        // straight to the first unread byte and parse header-less.
        // Otherwise read from the top and recover the header. A legacy
        // state with rows but no offset falls back to skip-counting.
        let mut base_offset = 0u64;
        let mut to_skip = 0u64;
        let mut row = 0u64;
        let reader_fieldnames: Vec<String>;
        let mut reader = if progress.file_offset > 0 && !progress.fieldnames.is_empty() {
            file.seek(std::io::SeekFrom::Start(progress.file_offset))
                .map_err(|e| IndexError::io(&source.path, e))?;
            base_offset = progress.file_offset;
            row = progress.row_index;
            reader_fieldnames = progress.fieldnames.clone();
            csv::ReaderBuilder::new()
                .has_headers(false)
                .from_reader(file)
        } else {
            to_skip = progress.row_index;
            let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
            reader_fieldnames = reader
                .headers()
                .map_err(|e| IndexError::DataFormat {
                    path: source.path.clone(),
                    message: e.to_string(),
                })?
                .iter()
                .map(str::to_string)
                .collect();
            reader
        };
        progress.fieldnames = reader_fieldnames.clone();

        let bound = spec
            .bind(&reader_fieldnames)
            .map_err(|e| IndexError::Validation {
                model: source.model.clone(),
                source: e,
            })?;

        let ctx = DocumentContext {
            partition: job.name.clone(),
            schema_version: source.schema_version,
            source_path: source.path.display().to_string(),
        };
        let mut aggregator =
            BatchAggregator::new(self.config.batch_size_docs, self.config.batch_size_tokens);
        let mut record = csv::StringRecord::new();

        loop {
            let more = record_read(&mut reader, &mut record, &source.path)?;
            if !more {
                break;
            }
            let offset_after = base_offset + reader.position().byte();
            row += 1;
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            if let Some(n) = self.config.sample_every
                && row % n != 0
            {
                continue;
            }

            let values: Vec<&str> = record.iter().collect();
            let valid = match bound.validate(&values, row) {
                Ok(valid) => valid,
                Err(schema_err) => {
                    let err = IndexError::Validation {
                        model: source.model.clone(),
                        source: schema_err,
                    };
                    let report = ErrorReport::from_error(
                        &source.model,
                        collection,
                        &source.path,
                        row,
                        &progress,
                        &err,
                    );
                    match report.write(&errors_dir) {
                        Ok(path) => {
                            error!(
                                model = %source.model,
                                row,
                                report = %path.display(),
                                "row validation failed; stopping model stream"
                            );
                        }
                        Err(write_err) => {
                            error!(
                                model = %source.model,
                                row,
                                error = %write_err,
                                "row validation failed and the report could not be written"
                            );
                        }
                    }
                    return Err(err);
                }
            };

            match self.builder.build(&spec, &valid, &ctx, row, offset_after) {
                Some(document) => {
                    for flush in aggregator.push(document) {
                        let applied = self
                            .commit_flush(&target, flush, &mut progress, state)
                            .await?;
                        run.documents += applied;
                        run.batches += 1;
                    }
                }
                None => run.skipped_docs += 1,
            }
        }

        if let Some(flush) = aggregator.finish() {
            let applied = self
                .commit_flush(&target, flush, &mut progress, state)
                .await?;
            run.documents += applied;
            run.batches += 1;
        }

        progress.complete = true;
        progress.file_offset = signature.size;
        progress.source_signature = Some(signature);
        progress.indexed_at = Some(Utc::now());
        state.0.insert(source.model.clone(), progress);
        resume_store.save(state)?;
        info!(
            model = %source.model,
            partition = %job.name,
            documents = run.documents,
            batches = run.batches,
            "model stream complete"
        );

        Ok(run)
    }

    /// Seeds `collection_count` from the store when resuming without a
    /// checkpoint but with records already present for the model.
    async fn reconcile_collection_count(
        &self,
        collection: &str,
        model: &str,
        progress: &mut ModelProgress,
    ) {
        if progress.collection_count > 0 {
            return;
        }
        let filter = Filter::eq("model_name", model);
        match self.store.count(collection, Some(&filter)).await {
            Ok(0) | Err(_) => {}
            Ok(existing) => {
                info!(
                    model,
                    collection, existing, "seeding collection count from existing records"
                );
                progress.collection_count = existing as u64;
            }
        }
    }

    /// Applies one flush: upsert (with the single duplicate-id retry),
    /// then checkpoint. On failure an error report is written before the
    /// error propagates; the checkpoint is not advanced, so the batch is
    /// replayed on resume.
    async fn commit_flush(
        &self,
        target: &FlushTarget<'_>,
        flush: Flush,
        progress: &mut ModelProgress,
        state: &mut ResumeState,
    ) -> Result<u64> {
        match self.upsert_batch(target, &flush).await {
            Ok(applied) => {
                if let Some(last) = flush.documents.last() {
                    progress.row_index = last.source_row;
                    progress.file_offset = last.source_offset;
                }
                progress.started = true;
                progress.documents_indexed += applied;
                progress.collection_count += applied;
                progress.indexed_at = Some(Utc::now());
                progress.source_signature = Some(target.signature);
                state.0.insert(target.model.to_string(), progress.clone());
                target.resume_store.save(state)?;
                info!(
                    model = %target.model,
                    collection = %target.collection,
                    reason = %flush.reason,
                    batch = flush.documents.len(),
                    tokens = flush.token_total,
                    "flushed batch"
                );
                Ok(applied)
            }
            Err(err) => {
                let report = ErrorReport::from_flush(
                    target.model,
                    target.collection,
                    target.source_path,
                    &flush,
                    progress,
                    &err,
                );
                match report.write(target.errors_dir) {
                    Ok(path) => {
                        error!(
                            model = %target.model,
                            collection = %target.collection,
                            report = %path.display(),
                            "flush failed; error report written"
                        );
                    }
                    Err(write_err) => {
                        error!(
                            model = %target.model,
                            error = %write_err,
                            "flush failed and the report could not be written"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Issues the upsert under the configured deadline. On a
    /// duplicate-id rejection the reported ids are removed and the upsert
    /// retried exactly once; any other failure propagates untouched.
    async fn upsert_batch(&self, target: &FlushTarget<'_>, flush: &Flush) -> Result<u64> {
        let docs: Vec<&Document> = flush.documents.iter().collect();
        match self.timed_upsert(target.collection, &docs).await {
            Ok(()) => Ok(docs.len() as u64),
            Err(IndexError::Store(StoreError::DuplicateIds { ids, .. })) => {
                warn!(
                    model = %target.model,
                    duplicates = ids.len(),
                    "store rejected duplicate ids; retrying batch without them"
                );
                let keep: Vec<&Document> = flush
                    .documents
                    .iter()
                    .filter(|d| !ids.contains(&d.id))
                    .collect();
                if keep.is_empty() {
                    return Ok(0);
                }
                self.timed_upsert(target.collection, &keep).await?;
                Ok(keep.len() as u64)
            }
            Err(err) => Err(err),
        }
    }

    async fn timed_upsert(&self, collection: &str, docs: &[&Document]) -> Result<()> {
        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let metadatas: Vec<Metadata> = docs.iter().map(|d| d.metadata.clone()).collect();
        let upsert = self.store.upsert(collection, &ids, &texts, &metadatas);
        match tokio::time::timeout(self.config.request_timeout, upsert).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IndexError::Store(StoreError::Transient {
                message: format!(
                    "upsert deadline of {:?} exceeded",
                    self.config.request_timeout
                ),
            })),
        }
    }
}

fn record_read<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    record: &mut csv::StringRecord,
    path: &Path,
) -> Result<bool> {
    reader
        .read_record(record)
        .map_err(|e| IndexError::DataFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}
