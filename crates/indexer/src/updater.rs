//! Run pipeline: coverage check, gap backfill, forward scan and merge.
//!
//! A run either persists a validated ledger together with its coverage, or
//! persists nothing. The ledger snapshot is written before the coverage file,
//! so a crash between the two leaves coverage behind the ledger, which the
//! next run's auto-sync or backfill repairs.

use std::sync::Arc;

use anyhow::{Context, Result};
use burnledger_core::{
    validate_integrity, BlockRange, CoverageSet, CoverageStats, HistoricalCutoff, Ledger,
    MergeStats, TotalCorrection, WindowShift,
};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::backfill::{BackfillOutcome, GapBackfillService};
use crate::clock::SharedClock;
use crate::config::{Config, SyncConfig};
use crate::listener::{ChainSource, LogFetcher};
use crate::report::{BackfillLog, GapAnalysisReport};
use crate::retry::BoundedRetry;
use crate::storage::{SnapshotManifest, Storage, StorageStats, UpdateType};
use crate::tracker::{CoverageTracker, LoadedCoverage};

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Integrity report taken before backfill.
    pub report: GapAnalysisReport,
    /// Backfill outcome.
    pub backfill: BackfillOutcome,
    /// Range scanned forward, if the head was at or past the resume point.
    pub scanned: Option<BlockRange>,
    /// Merge of the forward scan.
    pub merge: MergeStats,
    /// Window maintenance.
    pub window: WindowShift,
    /// Stored total that had to be corrected.
    pub correction: Option<TotalCorrection>,
    /// Snapshot written.
    pub manifest: SnapshotManifest,
    /// Ledger as saved.
    pub ledger: Ledger,
    /// Coverage as saved.
    pub coverage: CoverageSet,
}

/// Result of a backfill-only run.
#[derive(Debug, Clone)]
pub struct BackfillSummary {
    /// Backfill outcome.
    pub backfill: BackfillOutcome,
    /// Snapshot written, if anything was backfilled.
    pub manifest: Option<SnapshotManifest>,
    /// Coverage after the backfill.
    pub coverage: CoverageSet,
}

/// Persisted state at a glance. Reads local files only.
#[derive(Debug, Clone)]
pub struct Status {
    /// Files in the data directory.
    pub storage: StorageStats,
    /// Ledger resume pointer.
    pub last_processed_block: Option<u64>,
    /// Window bounds.
    pub window: Option<(NaiveDate, NaiveDate)>,
    /// Window burn total.
    pub total_burned: f64,
    /// Recorded burns.
    pub transactions: usize,
    /// Coverage summary.
    pub coverage: CoverageStats,
}

/// Drives a run over a chain source.
pub struct IncrementalUpdater<S> {
    storage: Storage,
    tracker: CoverageTracker,
    fetcher: Arc<LogFetcher<S>>,
    backfill: GapBackfillService<S>,
    clock: SharedClock,
    sync: SyncConfig,
}

impl<S: ChainSource> IncrementalUpdater<S> {
    /// Wire an updater from configuration.
    pub fn new(
        config: &Config,
        storage: Storage,
        fetcher: Arc<LogFetcher<S>>,
        clock: SharedClock,
    ) -> Self {
        let backfill = GapBackfillService::new(
            fetcher.clone(),
            BoundedRetry::from_config(clock.clone(), &config.backfill, &config.retry),
            config.backfill.chunk_size,
            config.backfill.max_gaps_per_run,
        );

        Self {
            tracker: CoverageTracker::new(storage.clone(), config.coverage.auto_sync),
            storage,
            fetcher,
            backfill,
            clock,
            sync: config.sync.clone(),
        }
    }

    /// Fetcher shared by the scan and the backfill.
    pub fn fetcher(&self) -> &Arc<LogFetcher<S>> {
        &self.fetcher
    }

    /// Full run: integrity report, backfill, forward scan, merge, validation
    /// and save. A validation failure aborts before anything is written.
    pub async fn run(&self) -> Result<RunSummary> {
        let now = self.clock.now();
        let today = now.date_naive();

        let (mut ledger, update_type) = match self.storage.load_ledger().await? {
            Some(ledger) => (ledger, UpdateType::Incremental),
            None => (self.fresh_ledger(today).await, UpdateType::Full),
        };
        info!(
            "Ledger: {} days, {} burns, resume at block {}",
            ledger.day_buckets.len(),
            ledger.transaction_count(),
            ledger.last_processed_block
        );

        let LoadedCoverage { mut coverage, .. } = self.tracker.load(&ledger).await?;
        let report = self.analyze_coverage(&coverage, &ledger, now).await?;

        let backfill = self.backfill.run(&mut coverage, &mut ledger).await;
        if !backfill.gaps_processed.is_empty() {
            BackfillLog::new(&backfill, &coverage, now)
                .save(&self.storage)
                .await?;
        }

        // Backfill may repair history; the immutability baseline starts here.
        let baseline = ledger.clone();

        let head = self.fetcher.head().await;
        let start = ledger.last_processed_block;
        let scanned = if head >= start {
            let range = BlockRange::new(start, head)?;
            info!("Incremental scan of blocks {} ({} blocks)", range, range.len());
            Some(range)
        } else {
            warn!(
                "Chain head {} is behind resume block {}, skipping scan",
                head, start
            );
            None
        };

        let merge = match scanned {
            Some(range) => {
                let events = self.fetcher.fetch_range(range).await?;
                let merge = ledger.merge_events(&events);
                info!(
                    "Merged {} new burns ({:.2}), {} duplicates skipped",
                    merge.added, merge.amount_added, merge.duplicates
                );
                merge
            }
            None => MergeStats::default(),
        };

        let window = ledger.maintain_window(today);
        if window.shifted_days > 0 {
            info!(
                "Window shifted {} days, dropped {} days, filled {} empty days",
                window.shifted_days,
                window.dropped.len(),
                window.filled
            );
        }

        let correction = ledger.recompute_totals();
        if let Some(c) = &correction {
            warn!(
                "Total burned corrected from {:.4} to {:.4}",
                c.previous, c.recomputed
            );
        }

        let supply = self.fetcher.total_supply().await;
        ledger.set_total_supply(supply);

        // A fresh ledger has no earlier history to protect.
        let validation = match update_type {
            UpdateType::Full => ledger.validate_structure(),
            _ => ledger.validate_against(&baseline, &HistoricalCutoff::new(now)),
        };
        if let Err(e) = validation {
            error!("Validation failed, nothing saved: {}", e);
            return Err(e).context("Ledger validation failed");
        }

        if let Some(range) = scanned {
            coverage.add(range);
            ledger.last_processed_block = range.end;
        }
        ledger.last_incremental_update = Some(now);
        ledger.fetched_at = Some(now);

        let manifest = self
            .storage
            .save_ledger(&ledger, update_type, now)
            .await?;
        self.tracker.save(&coverage, now).await?;

        info!(
            "Run complete: {:.2} burned over {} days ({:.4}% of supply), resume at block {}",
            ledger.total_burned,
            ledger.day_buckets.len(),
            ledger.burn_percentage,
            ledger.last_processed_block
        );

        Ok(RunSummary {
            report,
            backfill,
            scanned,
            merge,
            window,
            correction,
            manifest,
            ledger,
            coverage,
        })
    }

    /// Integrity report only. Writes the report and the reconciled coverage.
    pub async fn analyze(&self) -> Result<GapAnalysisReport> {
        let now = self.clock.now();
        let ledger = self.storage.load_ledger().await?.unwrap_or_default();
        let LoadedCoverage { coverage, .. } = self.tracker.load(&ledger).await?;

        let report = self.analyze_coverage(&coverage, &ledger, now).await?;
        self.tracker.save(&coverage, now).await?;
        Ok(report)
    }

    /// Backfill only, with an optional gap limit. Historical days may be
    /// amended; the window and day count are still enforced.
    pub async fn backfill_only(&self, max_gaps: Option<usize>) -> Result<BackfillSummary> {
        let now = self.clock.now();
        let mut ledger = self
            .storage
            .load_ledger()
            .await?
            .context("No ledger found, run a full update first")?;
        let LoadedCoverage { mut coverage, .. } = self.tracker.load(&ledger).await?;

        let backfill = match max_gaps {
            Some(limit) => {
                self.backfill
                    .run_limited(&mut coverage, &mut ledger, limit)
                    .await
            }
            None => self.backfill.run(&mut coverage, &mut ledger).await,
        };
        if backfill.gaps_processed.is_empty() {
            return Ok(BackfillSummary {
                backfill,
                manifest: None,
                coverage,
            });
        }

        ledger.maintain_window(now.date_naive());
        if let Some(c) = ledger.recompute_totals() {
            warn!(
                "Total burned corrected from {:.4} to {:.4}",
                c.previous, c.recomputed
            );
        }
        ledger
            .validate_structure()
            .context("Ledger validation failed")?;
        ledger.fetched_at = Some(now);

        let manifest = self
            .storage
            .save_ledger(&ledger, UpdateType::Backfill, now)
            .await?;
        self.tracker.save(&coverage, now).await?;
        BackfillLog::new(&backfill, &coverage, now)
            .save(&self.storage)
            .await?;

        Ok(BackfillSummary {
            backfill,
            manifest: Some(manifest),
            coverage,
        })
    }

    async fn analyze_coverage(
        &self,
        coverage: &CoverageSet,
        ledger: &Ledger,
        now: DateTime<Utc>,
    ) -> Result<GapAnalysisReport> {
        let issues = validate_integrity(coverage, ledger);
        let report = GapAnalysisReport::new(coverage, issues, now);
        report.log_summary();
        report.save(&self.storage).await?;
        Ok(report)
    }

    async fn fresh_ledger(&self, today: NaiveDate) -> Ledger {
        let start = if self.sync.start_block > 0 {
            self.sync.start_block
        } else {
            self.fetcher
                .head()
                .await
                .saturating_sub(self.sync.initial_lookback_blocks)
        };
        info!("No ledger found, starting a new one at block {}", start);

        let mut ledger = Ledger::with_window_ending(today);
        ledger.last_processed_block = start;
        ledger
    }
}

/// Summarize persisted state without touching the chain.
pub async fn status(storage: &Storage) -> Result<Status> {
    let stats = storage.stats().await?;
    let ledger = storage.load_ledger().await?;
    let coverage = match storage.load_coverage().await? {
        crate::storage::Loaded::Found(file) => file.coverage(),
        _ => CoverageSet::default(),
    };

    Ok(Status {
        storage: stats,
        last_processed_block: ledger.as_ref().map(|l| l.last_processed_block),
        window: ledger
            .as_ref()
            .and_then(|l| Some((l.start_date()?, l.end_date()?))),
        total_burned: ledger.as_ref().map_or(0.0, |l| l.total_burned),
        transactions: ledger.as_ref().map_or(0, Ledger::transaction_count),
        coverage: coverage.stats(),
    })
}
