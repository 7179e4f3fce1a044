//! Partix: a partitioned, fail-stop, resumable indexing pipeline for
//! external vector stores.
//!
//! The pipeline consumes prepared tabular partitions registered in a
//! [`manifest`](crate::manifest), validates rows against a
//! [`model`](crate::model) registry, enforces per-document token budgets
//! with the [`text`](crate::text) truncation engine, batches upserts
//! against an abstract [`store`](crate::store), and checkpoints progress
//! per partition-model stream so interrupted runs resume byte-accurately.
//! The [`query`](crate::query) layer fans requests back out across every
//! collection an index run produced and merges results by distance.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use partix::config::IndexConfig;
//! use partix::index::{CollectionStrategy, IndexOrchestrator};
//! use partix::model::ModelRegistry;
//! use partix::store::MemoryStore;
//! use partix::text::HeuristicTokenizer;
//!
//! # async fn run(jobs: Vec<partix::index::PartitionJob>) -> partix::Result<()> {
//! let registry = Arc::new(ModelRegistry::from_path("models.yaml")?);
//! let orchestrator = IndexOrchestrator::new(
//!     registry,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(HeuristicTokenizer),
//!     CollectionStrategy::Single { name: "docs".into() },
//!     IndexConfig::from_env(),
//!     "out",
//! );
//! let summary = orchestrator.run(jobs, &[]).await?;
//! assert!(summary.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod io;
pub mod manifest;
pub mod model;
pub mod query;
pub mod store;
pub mod text;

pub use error::{ErrorClass, IndexError, Result, SchemaError, StoreError};
