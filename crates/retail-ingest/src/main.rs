//! Retail Ingest - incremental merge batch job

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use retail_common::logging::{init_logging, LogConfig, LogLevel};
use retail_ingest::config::{EtlMode, IngestConfig, RunContext};
use retail_ingest::error::IngestError;
use retail_ingest::pipeline::Pipeline;
use retail_ingest::simulate::simulate_file;
use retail_ingest::source::BatchArchive;
use retail_ingest::store::{CsvSnapshotStore, SnapshotStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "retail-ingest")]
#[command(author, version, about = "Incremental merge of retail order lines")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge a raw batch into the snapshot
    Run {
        /// Newly acquired raw batch (CSV)
        #[arg(short, long)]
        input: PathBuf,

        /// incremental | refresh
        #[arg(short, long)]
        mode: Option<EtlMode>,

        /// Previous raw batch; defaults to the latest archived batch
        #[arg(short, long)]
        previous: Option<PathBuf>,

        /// Archive of consumed raw batches
        #[arg(long)]
        batch_dir: Option<PathBuf>,

        /// Snapshot location
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        /// Leave the snapshot untouched when nothing changed
        #[arg(long)]
        skip_empty: bool,

        /// Do not archive the input after a successful run
        #[arg(long)]
        no_archive: bool,
    },

    /// Write a synthetic follow-up batch for trying incremental runs
    Simulate {
        /// Base batch; defaults to the latest archived batch
        #[arg(short, long)]
        from: Option<PathBuf>,

        /// Where to write the simulated batch
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        batch_dir: Option<PathBuf>,
    },

    /// Summarize the current snapshot
    Inspect {
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct SnapshotSummary {
    location: PathBuf,
    generation: Option<String>,
    rows: usize,
    distinct_identities: usize,
    max_version: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("retail-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Failed to load configuration")?;

    if let Err(e) = execute(cli.command, config).await {
        let kind = e.downcast_ref::<IngestError>().map(IngestError::kind);
        error!(error = %e, kind, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn execute(command: Command, mut config: IngestConfig) -> Result<()> {
    match command {
        Command::Run {
            input,
            mode,
            previous,
            batch_dir,
            snapshot_dir,
            skip_empty,
            no_archive,
        } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(dir) = batch_dir {
                config.batch_dir = dir;
            }
            if let Some(dir) = snapshot_dir {
                config.snapshot_dir = dir;
            }
            config.validate()?;

            let archive = BatchArchive::new(&config.batch_dir);
            let previous = match (config.mode, previous) {
                (EtlMode::Incremental, None) => archive.latest().await?,
                (_, previous) => previous,
            };

            let ctx = RunContext::new(&config, input).with_previous_batch(previous);
            info!(
                run_id = %ctx.run_id,
                mode = %ctx.mode,
                input = %ctx.input.display(),
                previous = ?ctx.previous_batch,
                "Starting run"
            );

            let stats = Pipeline::for_context(&ctx)
                .with_skip_empty(skip_empty)
                .run(&ctx)
                .await
                .with_context(|| format!("Run {} failed", ctx.run_id))?;

            if !no_archive {
                archive.archive(&ctx.input, Utc::now()).await?;
            }

            println!("{}", serde_json::to_string_pretty(&stats)?);
            info!(run_id = %ctx.run_id, elapsed_ms = stats.elapsed_ms, "Run complete");
        },
        Command::Simulate {
            from,
            output,
            batch_dir,
        } => {
            if let Some(dir) = batch_dir {
                config.batch_dir = dir;
            }
            let from = match from {
                Some(from) => from,
                None => BatchArchive::new(&config.batch_dir)
                    .latest()
                    .await?
                    .with_context(|| {
                        format!("No archived batch in {} to simulate from", config.batch_dir.display())
                    })?,
            };

            let simulated = simulate_file(&from, &output, Local::now().naive_local()).await?;
            println!("{}", output.display());
            info!(rows = simulated.len(), "Simulation complete");
        },
        Command::Inspect { snapshot_dir } => {
            if let Some(dir) = snapshot_dir {
                config.snapshot_dir = dir;
            }
            let store = CsvSnapshotStore::new(&config.snapshot_dir);
            let generation = store.current_generation().await?;
            let records = store.load().await?;

            let summary = SnapshotSummary {
                location: store.location().to_path_buf(),
                generation,
                rows: records.len(),
                distinct_identities: records
                    .iter()
                    .map(|r| r.identity.as_str())
                    .collect::<HashSet<_>>()
                    .len(),
                max_version: records.iter().map(|r| r.version).max(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        },
    }

    Ok(())
}
