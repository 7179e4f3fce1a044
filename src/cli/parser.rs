//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::text::TruncationStrategy;

/// Partix: partitioned, resumable vector-store indexing.
///
/// Streams prepared partitions into collections with fine-grained
/// checkpoints, and fans queries back out across them.
#[derive(Parser, Debug)]
#[command(name = "partix")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding `manifest.json` and the prepared partitions.
    #[arg(long, env = "PARTIX_DATA_ROOT", default_value = "data", global = true)]
    pub data_root: PathBuf,

    /// Directory for resume state, error reports, and the query config.
    #[arg(long, env = "PARTIX_OUT_ROOT", default_value = "out", global = true)]
    pub out_root: PathBuf,

    /// Directory of the local vector store.
    ///
    /// Defaults to `<out-root>/store`.
    #[arg(long, env = "PARTIX_STORE_PATH", global = true)]
    pub store_path: Option<PathBuf>,

    /// Collection strategy.
    #[arg(
        long,
        value_enum,
        env = "PARTIX_STRATEGY",
        default_value = "single",
        global = true
    )]
    pub strategy: StrategyArg,

    /// Collection name (single strategy) or base prefix (per-partition).
    #[arg(long, env = "PARTIX_COLLECTION", global = true)]
    pub collection: Option<String>,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Collection strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// One collection for every partition.
    Single,
    /// One collection per partition.
    PerPartition,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index registered partitions into the vector store.
    #[command(after_help = r#"Examples:
  partix index --models models.yaml                   # index everything
  partix index --models models.yaml --resume          # skip completed models
  partix index --partitions partition_00037           # one partition
  partix index --parallel 4 --strategy per-partition --collection docs
"#)]
    Index {
        /// Model registry file.
        #[arg(long, env = "PARTIX_MODELS", default_value = "models.yaml")]
        models: PathBuf,

        /// Partitions to index (default: every live partition).
        #[arg(long, value_delimiter = ',')]
        partitions: Option<Vec<String>>,

        /// Skip completed models whose source signature matches.
        #[arg(long)]
        resume: bool,

        /// Drop stale partitions' data before indexing.
        #[arg(long)]
        delete_stale: bool,

        /// Partitions indexed concurrently (default 1).
        #[arg(long)]
        parallel: Option<usize>,

        /// Maximum documents per upsert.
        #[arg(long)]
        batch_docs: Option<usize>,

        /// Token-sum safety threshold per batch.
        #[arg(long)]
        batch_tokens: Option<usize>,

        /// Hard per-document token ceiling.
        #[arg(long)]
        token_limit: Option<usize>,

        /// Default truncation strategy (end, start, middle_out,
        /// sentences, auto).
        #[arg(long)]
        truncation: Option<TruncationStrategy>,

        /// Deterministic sampling: index every Nth row (forces one
        /// worker).
        #[arg(long)]
        sample_every: Option<u64>,
    },

    /// Show per-partition, per-model indexing status.
    Status,

    /// Build the model-to-collection query config from resume state.
    QueryConfig {
        /// Output path (default `<out-root>/query_config.json`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Query the indexed collections.
    #[command(after_help = r#"Examples:
  partix query "customer orders"
  partix query "invoice columns" -k 5 --models Table,Field
"#)]
    Query {
        /// Query text.
        text: String,

        /// Maximum merged results.
        #[arg(short = 'k', long, default_value_t = 10)]
        n_results: usize,

        /// Restrict to these models' collections.
        #[arg(long, value_delimiter = ',')]
        models: Option<Vec<String>>,

        /// Query config path (default `<out-root>/query_config.json`).
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Drop operations.
    #[command(subcommand)]
    Drop(DropCommands),

    /// Manifest operations.
    #[command(subcommand)]
    Manifest(ManifestCommands),
}

/// Drop subcommands.
#[derive(Subcommand, Debug)]
pub enum DropCommands {
    /// Apply a drop plan to the store and manifest.
    Apply {
        /// Drop plan file.
        plan: PathBuf,

        /// Recorded in the audit log.
        #[arg(long, env = "PARTIX_ACTOR", default_value = "cli")]
        actor: String,
    },
}

/// Manifest subcommands.
#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Print the manifest.
    Show,
}
