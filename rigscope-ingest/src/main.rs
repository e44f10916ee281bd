//! rigscope-ingest - batch ingestion of hardware-test results
//!
//! Reads a CSV batch exported by the test rig, resolves every row into the
//! Project → PBA → Rework → Submission → RunID → Capture → Waveform
//! hierarchy, summarizes waveform captures, and writes the batch back out
//! with one foreign-key column per level.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rigscope_common::config::{load_config, TomlConfig};
use rigscope_common::logging::init_logging;
use rigscope_common::store::{MemoryDocumentStore, SqliteDocumentStore};
use rigscope_common::DocumentStore;
use rigscope_ingest::services::{RecomputeOutcome, SignalSettings};
use rigscope_ingest::utils::retry_transient;
use rigscope_ingest::{IngestOrchestrator, RawBatch, WaveformProcessor, WaveformRecomputer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command-line arguments for rigscope-ingest
#[derive(Parser, Debug)]
#[command(name = "rigscope-ingest")]
#[command(about = "Ingest hardware-test batches into the rigscope document store")]
#[command(version)]
struct Args {
    /// Config file (overrides RIGSCOPE_CONFIG and the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite document store path (overrides database_path from config)
    #[arg(short, long, global = true, env = "RIGSCOPE_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a CSV batch and write it back with foreign-key columns
    Ingest {
        /// Input CSV batch
        input: PathBuf,

        /// Annotated output CSV (default: <input>_ingested.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resolve against an in-memory store; nothing is persisted
        #[arg(long)]
        dry_run: bool,
    },
    /// Recompute stored waveform summaries with the current settings
    Recompute {
        /// Waveform ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting rigscope-ingest v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Ingest {
            input,
            output,
            dry_run,
        } => {
            let output = output.unwrap_or_else(|| default_output_path(&input));
            if dry_run {
                info!("Dry run: resolving against an in-memory store");
                let store = Arc::new(MemoryDocumentStore::new());
                run_ingest(store, &config, &input, &output).await
            } else {
                let store = open_store(args.database, &config).await?;
                run_ingest(store, &config, &input, &output).await
            }
        }
        Command::Recompute { ids } => {
            let store = open_store(args.database, &config).await?;
            run_recompute(store, &config, &ids).await
        }
    }
}

async fn open_store(database: Option<PathBuf>, config: &TomlConfig) -> Result<Arc<SqliteDocumentStore>> {
    let db_path = database.unwrap_or_else(|| config.database_path());
    info!("Database: {}", db_path.display());

    let pool = rigscope_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    Ok(Arc::new(SqliteDocumentStore::new(pool)))
}

async fn run_ingest<S: DocumentStore + 'static>(
    store: Arc<S>,
    config: &TomlConfig,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let batch = RawBatch::from_csv_path(input)
        .with_context(|| format!("Failed to read batch {}", input.display()))?;
    info!("Batch: {} ({} rows)", input.display(), batch.len());

    let orchestrator = IngestOrchestrator::new(store, &config.ingest, config.columns.clone());

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing in-flight work");
            ctrl_c_token.cancel();
        }
    });

    let report = retry_transient("batch ingestion", config.ingest.max_retry_wait_ms, || {
        orchestrator.ingest(&batch, &cancel_token)
    })
    .await
    .context("Batch ingestion failed")?;

    let annotated = report.annotate(&batch)?;
    annotated
        .write_csv_path(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} rows: {} resolved, {} rejected, {} documents created{} -> {}",
        batch.len(),
        report.resolved_count(),
        report.rejected_count(),
        report.created_count(),
        if report.cancelled { " (cancelled)" } else { "" },
        output.display()
    );
    Ok(())
}

async fn run_recompute<S: DocumentStore + 'static>(
    store: Arc<S>,
    config: &TomlConfig,
    ids: &[String],
) -> Result<()> {
    let processor = WaveformProcessor::new(SignalSettings::from(&config.ingest));
    let recomputer = WaveformRecomputer::new(store, processor);

    let outcomes = recomputer
        .recompute_all(ids)
        .await
        .context("Waveform recomputation failed")?;

    for (id, outcome) in outcomes {
        match outcome {
            RecomputeOutcome::Updated => println!("{}: updated", id),
            RecomputeOutcome::Unchanged => println!("{}: unchanged", id),
            RecomputeOutcome::NotFound => println!("{}: not found", id),
            RecomputeOutcome::Failed(e) => println!("{}: failed ({})", id, e),
            RecomputeOutcome::Corrupt(reason) => println!("{}: unreadable document ({})", id, reason),
        }
    }
    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    input.with_file_name(format!("{}_ingested.csv", stem))
}
