//! Gap backfill.
//!
//! Re-scans the largest coverage gaps in small chunks. Each chunk gets a
//! bounded number of attempts; a chunk that still fails stays uncovered and is
//! picked up again by a later run.

use std::sync::Arc;

use burnledger_core::{BlockRange, CoverageSet, Gap, Ledger};
use serde::Serialize;
use tracing::{info, warn};

use crate::listener::{ChainSource, LogFetcher};
use crate::retry::BoundedRetry;

/// What happened to one gap.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapReport {
    /// The gap as detected before backfill.
    pub gap: Gap,
    /// Burns added to the ledger.
    pub burns_found: usize,
    /// Amount added to the ledger.
    pub amount_recovered: f64,
    /// Sub-chunks scanned successfully.
    pub chunks_scanned: usize,
    /// Sub-chunks that exhausted their attempts.
    pub failed_chunks: Vec<BlockRange>,
}

impl GapReport {
    /// Every sub-chunk was scanned.
    pub fn is_closed(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

/// Summary of a backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillOutcome {
    /// Per-gap detail, largest gap first.
    pub gaps_processed: Vec<GapReport>,
    /// Gaps with no failed sub-chunk.
    pub gaps_closed: usize,
    /// Burns added to the ledger.
    pub burns_recovered: usize,
    /// Amount added to the ledger.
    pub amount_recovered: f64,
    /// Sub-chunks left uncovered.
    pub failed_chunks: Vec<BlockRange>,
}

/// Fills coverage gaps.
pub struct GapBackfillService<S> {
    fetcher: Arc<LogFetcher<S>>,
    retry: BoundedRetry,
    chunk_size: u64,
    max_gaps: usize,
}

impl<S: ChainSource> GapBackfillService<S> {
    /// Create a new backfill service.
    pub fn new(
        fetcher: Arc<LogFetcher<S>>,
        retry: BoundedRetry,
        chunk_size: u64,
        max_gaps: usize,
    ) -> Self {
        Self {
            fetcher,
            retry,
            chunk_size: chunk_size.max(1),
            max_gaps,
        }
    }

    /// Backfill up to `max_gaps` of the largest gaps in `coverage`, merging
    /// recovered burns into `ledger`. Every scanned sub-chunk is added to
    /// `coverage`.
    pub async fn run(&self, coverage: &mut CoverageSet, ledger: &mut Ledger) -> BackfillOutcome {
        self.run_limited(coverage, ledger, self.max_gaps).await
    }

    /// [`run`](Self::run) with an explicit gap limit.
    pub async fn run_limited(
        &self,
        coverage: &mut CoverageSet,
        ledger: &mut Ledger,
        max_gaps: usize,
    ) -> BackfillOutcome {
        let gaps = coverage.gaps_by_size();
        let mut outcome = BackfillOutcome::default();
        if gaps.is_empty() {
            info!("No gaps to backfill");
            return outcome;
        }

        let selected: Vec<Gap> = gaps.iter().copied().take(max_gaps).collect();
        info!(
            "Found {} gaps, backfilling the {} largest",
            gaps.len(),
            selected.len()
        );

        for gap in selected {
            let report = self.backfill_gap(gap, coverage, ledger).await;

            if report.is_closed() {
                outcome.gaps_closed += 1;
            }
            outcome.burns_recovered += report.burns_found;
            outcome.amount_recovered += report.amount_recovered;
            outcome
                .failed_chunks
                .extend(report.failed_chunks.iter().copied());
            outcome.gaps_processed.push(report);
        }

        info!(
            "Backfill complete: {}/{} gaps closed, {} burns ({:.2}) recovered, {} gaps remaining",
            outcome.gaps_closed,
            outcome.gaps_processed.len(),
            outcome.burns_recovered,
            outcome.amount_recovered,
            coverage.gaps().len()
        );
        outcome
    }

    async fn backfill_gap(
        &self,
        gap: Gap,
        coverage: &mut CoverageSet,
        ledger: &mut Ledger,
    ) -> GapReport {
        info!(
            "Backfilling gap {}-{} ({} blocks, ~{:.1}h)",
            gap.start,
            gap.end,
            gap.size,
            gap.hours()
        );

        let mut report = GapReport {
            gap,
            burns_found: 0,
            amount_recovered: 0.0,
            chunks_scanned: 0,
            failed_chunks: Vec::new(),
        };

        for chunk in gap.range().chunks(self.chunk_size) {
            let result = self
                .retry
                .run(&format!("backfill chunk {}", chunk), || {
                    self.fetcher.try_fetch_chunk(chunk)
                })
                .await;

            match result {
                Ok(events) => {
                    // Burns dated before the window would be dropped on the next shift.
                    let window_start = ledger.start_date();
                    let in_window: Vec<_> = events
                        .into_iter()
                        .filter(|e| window_start.map_or(true, |start| e.date() >= start))
                        .collect();
                    let stats = ledger.merge_events(&in_window);
                    coverage.add(chunk);
                    report.chunks_scanned += 1;
                    report.burns_found += stats.added;
                    report.amount_recovered += stats.amount_added;
                    if stats.added > 0 {
                        info!(
                            "Chunk {}: recovered {} burns ({:.2})",
                            chunk, stats.added, stats.amount_added
                        );
                    }
                }
                Err(e) => {
                    warn!("Chunk {} left open: {}", chunk, e);
                    report.failed_chunks.push(chunk);
                }
            }
        }

        report
    }
}
