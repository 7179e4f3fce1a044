//! CLI command implementations.
//!
//! Contains the business logic for each CLI command.

#![allow(clippy::too_many_lines)]

use std::fmt::Write as FmtWrite;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::parser::{Cli, Commands, DropCommands, ManifestCommands, StrategyArg};
use crate::config::{IndexConfig, IndexConfigBuilder};
use crate::error::{IndexError, Result};
use crate::index::{
    CollectionStrategy, DropPlan, IndexOrchestrator, PartitionJob, apply_drop, partition_status,
};
use crate::manifest::{Manifest, ManifestStore};
use crate::model::ModelRegistry;
use crate::query::{MultiCollectionClient, QueryConfig};
use crate::store::{LocalStore, VectorStore};
use crate::text::HeuristicTokenizer;

/// Default collection name for the single strategy.
const DEFAULT_COLLECTION: &str = "partix";
/// Default query config file name under the output root.
const QUERY_CONFIG_FILE: &str = "query_config.json";

/// Rendered output plus the process-level success flag.
#[derive(Debug)]
pub struct CommandResult {
    /// What to print.
    pub output: String,
    /// `false` turns into a non-zero exit.
    pub success: bool,
}

impl CommandResult {
    fn ok(output: String) -> Self {
        Self {
            output,
            success: true,
        }
    }
}

/// Executes the parsed CLI command.
pub async fn execute(cli: &Cli) -> Result<CommandResult> {
    let json = cli.format.eq_ignore_ascii_case("json");
    match &cli.command {
        Commands::Index {
            models,
            partitions,
            resume,
            delete_stale,
            parallel,
            batch_docs,
            batch_tokens,
            token_limit,
            truncation,
            sample_every,
        } => {
            let config = build_index_config(
                *resume,
                *delete_stale,
                *parallel,
                *batch_docs,
                *batch_tokens,
                *token_limit,
                *truncation,
                *sample_every,
            );
            cmd_index(cli, models, partitions.as_deref(), config, json).await
        }
        Commands::Status => cmd_status(cli, json),
        Commands::QueryConfig { output } => cmd_query_config(cli, output.as_deref(), json),
        Commands::Query {
            text,
            n_results,
            models,
            config,
        } => cmd_query(cli, text, *n_results, models.as_deref(), config.as_deref(), json).await,
        Commands::Drop(DropCommands::Apply { plan, actor }) => {
            cmd_drop_apply(cli, plan, actor, json).await
        }
        Commands::Manifest(ManifestCommands::Show) => cmd_manifest_show(cli, json),
    }
}

#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn build_index_config(
    resume: bool,
    delete_stale: bool,
    parallel: Option<usize>,
    batch_docs: Option<usize>,
    batch_tokens: Option<usize>,
    token_limit: Option<usize>,
    truncation: Option<crate::text::TruncationStrategy>,
    sample_every: Option<u64>,
) -> IndexConfig {
    let mut builder: IndexConfigBuilder = IndexConfig::builder();
    if resume {
        builder = builder.resume(true);
    }
    if delete_stale {
        builder = builder.delete_stale(true);
    }
    if let Some(n) = parallel {
        builder = builder.parallel_partitions(n);
    }
    if let Some(n) = batch_docs {
        builder = builder.batch_size_docs(n);
    }
    if let Some(n) = batch_tokens {
        builder = builder.batch_size_tokens(n);
    }
    if let Some(n) = token_limit {
        builder = builder.api_token_limit(n);
    }
    if let Some(s) = truncation {
        builder = builder.truncation_strategy(s);
    }
    if let Some(n) = sample_every {
        builder = builder.sample_every(n);
    }
    builder.from_env().build()
}

fn strategy_for(cli: &Cli) -> CollectionStrategy {
    match cli.strategy {
        StrategyArg::Single => CollectionStrategy::Single {
            name: cli
                .collection
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        },
        StrategyArg::PerPartition => CollectionStrategy::PerPartition {
            base: cli.collection.clone(),
        },
    }
}

fn open_store(cli: &Cli) -> Result<Arc<dyn VectorStore>> {
    let path = cli
        .store_path
        .clone()
        .unwrap_or_else(|| cli.out_root.join("store"));
    Ok(Arc::new(LocalStore::open(path)?))
}

fn query_config_path(cli: &Cli, explicit: Option<&std::path::Path>) -> PathBuf {
    explicit.map_or_else(|| cli.out_root.join(QUERY_CONFIG_FILE), PathBuf::from)
}

fn read_manifest(cli: &Cli) -> Result<(ManifestStore, Manifest)> {
    let store = ManifestStore::new(&cli.data_root);
    let manifest = store.read()?;
    Ok((store, manifest))
}

async fn cmd_index(
    cli: &Cli,
    models_path: &std::path::Path,
    partitions: Option<&[String]>,
    config: IndexConfig,
    json: bool,
) -> Result<CommandResult> {
    let registry = Arc::new(ModelRegistry::from_path(models_path)?);
    let (_, manifest) = read_manifest(cli)?;

    let selected: Vec<_> = match partitions {
        Some(names) => {
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                let entry = manifest
                    .partition(name)
                    .ok_or_else(|| IndexError::Manifest {
                        message: format!("unknown partition '{name}'"),
                    })?;
                out.push(entry);
            }
            out
        }
        None => manifest
            .partitions
            .iter()
            .filter(|p| !p.is_stale() && p.live_models().count() > 0)
            .collect(),
    };

    let jobs: Vec<PartitionJob> = selected
        .iter()
        .map(|p| PartitionJob::from_manifest(p, &registry, &cli.data_root))
        .collect();
    let stale = manifest.stale_partitions();

    let orchestrator = IndexOrchestrator::new(
        registry,
        open_store(cli)?,
        Arc::new(HeuristicTokenizer),
        strategy_for(cli),
        config,
        &cli.out_root,
    );
    let summary = orchestrator.run(jobs, &stale).await?;
    let success = summary.succeeded();

    let output = if json {
        serde_json::to_string_pretty(&summary)?
    } else {
        let mut out = String::new();
        for outcome in &summary.outcomes {
            let state = if outcome.failed() { "FAILED" } else { "ok" };
            let _ = writeln!(
                out,
                "{:<20} {:>8} docs {:>5} batches  {state}",
                outcome.partition, outcome.documents_indexed, outcome.batches_flushed
            );
            for failure in &outcome.failures {
                let _ = writeln!(
                    out,
                    "    {} [{}]: {}",
                    failure.model, failure.class, failure.message
                );
            }
        }
        let _ = writeln!(
            out,
            "{} partition(s), {} document(s) indexed{}",
            summary.outcomes.len(),
            summary.total_documents(),
            if summary.retried.is_empty() {
                String::new()
            } else {
                format!(", retried: {}", summary.retried.join(", "))
            }
        );
        out
    };

    Ok(CommandResult { output, success })
}

fn cmd_status(cli: &Cli, json: bool) -> Result<CommandResult> {
    let (_, manifest) = read_manifest(cli)?;
    let strategy = strategy_for(cli);
    let mut reports = Vec::with_capacity(manifest.partitions.len());
    for partition in &manifest.partitions {
        reports.push(partition_status(&cli.out_root, partition, &strategy)?);
    }

    let output = if json {
        serde_json::to_string_pretty(&reports)?
    } else if reports.is_empty() {
        "no partitions registered".to_string()
    } else {
        let mut out = String::new();
        for report in &reports {
            let _ = writeln!(out, "{} -> {}", report.partition, report.collection);
            for (model, entry) in &report.models {
                let _ = writeln!(
                    out,
                    "    {:<24} {:<12} {:>8} docs  row {}",
                    model, entry.status, entry.collection_count, entry.row_index
                );
            }
        }
        out
    };
    Ok(CommandResult::ok(output))
}

fn cmd_query_config(
    cli: &Cli,
    output_path: Option<&std::path::Path>,
    json: bool,
) -> Result<CommandResult> {
    let config = QueryConfig::build(&cli.out_root, cli.collection.as_deref())?;
    let path = query_config_path(cli, output_path);
    config.save(&path)?;

    let output = if json {
        serde_json::to_string_pretty(&config)?
    } else {
        format!(
            "wrote {} ({} models, {} collections)",
            path.display(),
            config.metadata.total_models,
            config.metadata.total_collections
        )
    };
    Ok(CommandResult::ok(output))
}

async fn cmd_query(
    cli: &Cli,
    text: &str,
    n_results: usize,
    models: Option<&[String]>,
    config_path: Option<&std::path::Path>,
    json: bool,
) -> Result<CommandResult> {
    let path = query_config_path(cli, config_path);
    let config = QueryConfig::load(&path)?.ok_or_else(|| IndexError::Manifest {
        message: format!(
            "query config not found at {}; run `partix query-config` first",
            path.display()
        ),
    })?;

    let client = MultiCollectionClient::connect(open_store(cli)?, config).await?;
    let result = client
        .query(&[text.to_string()], n_results, models, None)
        .await;
    client.close();
    let hits = result?;

    let output = if json {
        serde_json::to_string_pretty(&hits)?
    } else {
        let Some(first) = hits.first() else {
            return Ok(CommandResult::ok("no results".to_string()));
        };
        if first.is_empty() {
            "no results".to_string()
        } else {
            let mut out = String::new();
            for hit in first {
                let _ = writeln!(
                    out,
                    "{:.4}  {:<28} [{}]  {}",
                    hit.distance,
                    hit.id,
                    hit.collection,
                    snippet(&hit.document, 80)
                );
            }
            out
        }
    };
    Ok(CommandResult::ok(output))
}

async fn cmd_drop_apply(
    cli: &Cli,
    plan_path: &std::path::Path,
    actor: &str,
    json: bool,
) -> Result<CommandResult> {
    let plan: DropPlan =
        crate::io::read_json_opt(plan_path)?.ok_or_else(|| IndexError::Manifest {
            message: format!("drop plan not found: {}", plan_path.display()),
        })?;
    let store = open_store(cli)?;
    let (manifest_store, _) = read_manifest(cli)?;
    let outcome = apply_drop(
        store.as_ref(),
        &strategy_for(cli),
        &manifest_store,
        &plan,
        actor,
    )
    .await?;

    let output = if json {
        serde_json::to_string_pretty(&outcome)?
    } else {
        let mut out = String::new();
        for (model, deleted) in &outcome.deleted {
            let _ = writeln!(out, "{model}: {deleted} record(s) deleted");
        }
        out
    };
    Ok(CommandResult::ok(output))
}

fn cmd_manifest_show(cli: &Cli, json: bool) -> Result<CommandResult> {
    let (_, manifest) = read_manifest(cli)?;
    let output = if json {
        serde_json::to_string_pretty(&manifest)?
    } else {
        let mut out = String::new();
        for partition in &manifest.partitions {
            let flags = if partition.is_stale() { " (stale)" } else { "" };
            let _ = writeln!(out, "{}{flags}", partition.name);
            for (model, entry) in &partition.models {
                let mut state = String::new();
                if entry.stale {
                    state.push_str(" stale");
                }
                if entry.deleted {
                    state.push_str(" deleted");
                }
                let _ = writeln!(
                    out,
                    "    {:<24} v{:<3} {}{state}",
                    model,
                    entry.schema_version,
                    entry.source_path.display()
                );
            }
        }
        let _ = writeln!(out, "{} drop(s) recorded", manifest.drops.len());
        out
    };
    Ok(CommandResult::ok(output))
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push('…');
    out
}
