//! The indexing core: resumable partition streams, batching, and the
//! bounded-parallel orchestrator.

mod batch;
mod collection;
mod drops;
mod orchestrator;
mod partition;
mod report;
mod resume;
mod status;

pub use batch::{BatchAggregator, Flush, FlushReason};
pub use collection::{CollectionStrategy, StaleAction};
pub use drops::{DropOutcome, DropPlan, DropSelection, apply_drop, selection_filter};
pub use orchestrator::{IndexOrchestrator, RunSummary};
pub use partition::{ModelFailure, ModelSource, PartitionIndexer, PartitionJob, PartitionOutcome};
pub use report::ErrorReport;
pub use resume::{
    ModelProgress, RESUME_SUFFIX, ResumeState, ResumeStore, SourceSignature,
    collection_from_filename,
};
pub use status::{
    ModelStatus, ModelStatusEntry, PartitionStatusReport, classify, partition_status,
    scan_error_rows,
};
