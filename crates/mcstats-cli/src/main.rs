use std::future::Future;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use mcstats_sync::{SyncRunSummary, DEFAULT_CONFIG_PATH};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mcstats")]
#[command(about = "Sync Minecraft player statistics into MySQL")]
struct Cli {
    /// YAML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Acquire the stats source and write every player in one transaction.
    Sync {
        /// Run against an in-memory store instead of the configured database.
        #[arg(long)]
        dry_run: bool,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create missing tables and columns, then exit.
    Schema,
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Dropping the run on Ctrl-C releases the staging directory and rolls back the transaction.
async fn interruptible<T>(run: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => bail!("interrupted; no changes were committed"),
    }
}

fn print_summary(summary: &SyncRunSummary, dry_run: bool) {
    println!(
        "{}sync complete: run_id={} players={} skipped={} files={} schema_changes={}",
        if dry_run { "dry-run " } else { "" },
        summary.run_id,
        summary.players_processed,
        summary.files_skipped,
        summary.files_discovered,
        summary.schema.changes.len()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        json: false,
    }) {
        Commands::Sync { dry_run, json } => {
            let summary = interruptible(mcstats_sync::run_sync_once(&cli.config, dry_run)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary, dry_run);
            }
        }
        Commands::Schema => {
            let report = interruptible(mcstats_sync::ensure_schema_once(&cli.config)).await?;
            println!(
                "schema ready: created_tables={} added_columns={}",
                report.created_tables(),
                report.added_columns()
            );
        }
    }

    Ok(())
}
