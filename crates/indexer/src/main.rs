//! Burn ledger indexer
//!
//! This binary provides:
//! - Incremental burn ingestion into a rolling 30-day ledger
//! - Coverage integrity analysis
//! - Gap backfill
//! - A status view of the persisted state

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use burnledger_indexer::clock::{SharedClock, SystemClock};
use burnledger_indexer::config::{Config, LoggingConfig};
use burnledger_indexer::listener::{LogFetcher, RpcProvider};
use burnledger_indexer::retry::Failfast;
use burnledger_indexer::storage::Storage;
use burnledger_indexer::updater::{self, IncrementalUpdater};

#[derive(Parser)]
#[command(name = "burnledger")]
#[command(version, about = "Gap-resistant ERC-20 burn ledger", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "burnledger.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill gaps, scan new blocks and save the ledger
    Run,

    /// Check coverage integrity and write the gap report
    Analyze,

    /// Backfill coverage gaps only
    Backfill {
        /// Largest gaps to process (defaults to backfill.max_gaps_per_run)
        #[arg(long)]
        max_gaps: Option<usize>,
    },

    /// Show ledger and coverage status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config);
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(cli.debug, &logging)?;

    info!("Burn ledger indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_update(config?).await?,
        Commands::Analyze => analyze(config?).await?,
        Commands::Backfill { max_gaps } => backfill(config?, max_gaps).await?,
        Commands::Status => show_status(config).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("burnledger_indexer=debug,burnledger=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "burnledger_indexer={level},burnledger={level}",
                level = logging.level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .context("Failed to install JSON logger")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to install logger")?;
    }

    Ok(())
}

/// Wire the updater against the configured RPC endpoints.
async fn build_updater(config: &Config) -> Result<IncrementalUpdater<RpcProvider>> {
    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC endpoints: {}", config.network.rpc_urls.len());
    info!("  Token: {}", config.token.address);
    info!("  Burn address: {}", config.token.burn_address);
    info!("  Data dir: {}", config.storage.data_dir.display());
    if !config.coverage.auto_sync {
        info!("  Coverage auto-sync disabled (strict mode)");
    }

    let storage = Storage::open(&config.storage.data_dir)
        .await
        .context("Failed to open data directory")?;

    let provider = RpcProvider::new(&config.network, &config.token)
        .context("Failed to create RPC provider")?;

    let clock: SharedClock = Arc::new(SystemClock);
    let fetcher = Arc::new(LogFetcher::new(
        Arc::new(provider),
        Failfast::from_config(clock.clone(), &config.retry),
        config.sync.chunk_size,
        config.token.decimals,
    ));

    Ok(IncrementalUpdater::new(config, storage, fetcher, clock))
}

async fn run_update(config: Config) -> Result<()> {
    let updater = build_updater(&config).await?;
    let summary = updater.run().await;
    for endpoint in updater.fetcher().source().endpoint_status() {
        if endpoint.total_failures > 0 {
            warn!(
                "RPC {}: {} failures, {} successes",
                endpoint.url, endpoint.total_failures, endpoint.total_successes
            );
        }
    }
    let summary = summary?;

    if let Some(range) = summary.scanned {
        info!("Scanned blocks {}", range);
    }
    info!(
        "Backfill: {} gaps closed, {} burns recovered, {} chunks left open",
        summary.backfill.gaps_closed,
        summary.backfill.burns_recovered,
        summary.backfill.failed_chunks.len()
    );
    info!(
        "New burns: {} ({:.2}), snapshot {}",
        summary.merge.added, summary.merge.amount_added, summary.manifest.latest
    );
    if !summary.backfill.failed_chunks.is_empty() {
        warn!("Some gap chunks could not be fetched; they will be retried next run");
    }

    Ok(())
}

async fn analyze(config: Config) -> Result<()> {
    let updater = build_updater(&config).await?;
    let report = updater.analyze().await?;

    println!("\n=== Gap Analysis ===\n");
    println!("  Ranges: {}", report.stats.total_ranges);
    println!("  Gaps: {}", report.stats.total_gaps);
    println!("  Gap blocks: {}", report.stats.gap_blocks);
    println!("  Coverage: {:.2}%", report.stats.coverage_percent);
    for issue in &report.issues {
        println!("  [{:?}] {}", issue.severity, issue.message);
    }
    for recommendation in &report.recommendations {
        println!("  -> {}", recommendation);
    }
    println!();

    Ok(())
}

async fn backfill(config: Config, max_gaps: Option<usize>) -> Result<()> {
    let updater = build_updater(&config).await?;
    let summary = updater.backfill_only(max_gaps).await?;

    println!("\n=== Backfill ===\n");
    println!("  Gaps processed: {}", summary.backfill.gaps_processed.len());
    println!("  Gaps closed: {}", summary.backfill.gaps_closed);
    println!("  Burns recovered: {}", summary.backfill.burns_recovered);
    println!("  Amount recovered: {:.2}", summary.backfill.amount_recovered);
    println!("  Failed chunks: {}", summary.backfill.failed_chunks.len());
    println!("  Remaining gaps: {}", summary.coverage.gaps().len());
    if let Some(manifest) = summary.manifest {
        println!("  Snapshot: {}", manifest.latest);
    }
    println!();

    Ok(())
}

async fn show_status(config: Result<Config>) -> Result<()> {
    // Fall back to the default data dir ONLY if the config file doesn't exist
    let data_dir = match config {
        Ok(config) => config.storage.data_dir,
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });
            if !is_not_found {
                return Err(e).context("Failed to load config file");
            }
            info!("Config file not found, using default data dir: data");
            "data".into()
        }
    };

    let storage = Storage::open(&data_dir).await?;
    let status = updater::status(&storage).await?;

    println!("\n=== Burn Ledger Status ===\n");
    println!("Ledger:");
    match status.last_processed_block {
        Some(block) => println!("  Last Processed Block: {}", block),
        None => println!("  No ledger yet"),
    }
    if let Some((start, end)) = status.window {
        println!("  Window: {} to {}", start, end);
    }
    println!("  Total Burned (window): {:.2}", status.total_burned);
    println!("  Burns Recorded: {}", status.transactions);

    println!("\nCoverage:");
    println!("  Ranges: {}", status.coverage.total_ranges);
    println!("  Gaps: {}", status.coverage.total_gaps);
    println!("  Gap Blocks: {}", status.coverage.gap_blocks);
    if let (Some(first), Some(last)) = (status.coverage.first_block, status.coverage.last_block) {
        println!("  Blocks: {} to {}", first, last);
    }

    println!("\nFiles:");
    println!("  Data Dir: {}", storage.data_dir().display());
    println!("  Snapshots: {}", status.storage.snapshot_count);
    if let Some(manifest) = status.storage.manifest {
        println!(
            "  Latest: {} ({}, {})",
            manifest.latest,
            manifest.update_type,
            manifest.timestamp.to_rfc3339()
        );
    }
    println!(
        "  Coverage File: {}",
        if status.storage.has_coverage { "yes" } else { "no" }
    );
    println!();

    Ok(())
}
