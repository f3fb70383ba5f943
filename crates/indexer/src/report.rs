//! Gap analysis and backfill reports.

use anyhow::Result;
use burnledger_core::{BlockRange, CoverageSet, CoverageStats, Gap, IntegrityIssue, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::backfill::{BackfillOutcome, GapReport};
use crate::storage::{Storage, BACKFILL_LOG_FILE, GAP_REPORT_FILE};

/// Gaps listed individually in the log summary.
const TOP_GAPS: usize = 5;

/// A gap with its approximate duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapEntry {
    /// First missing block.
    pub start: u64,
    /// Last missing block.
    pub end: u64,
    /// Missing block count.
    pub size: u64,
    /// Approximate hours at 12 s per block.
    pub hours: f64,
}

impl From<Gap> for GapEntry {
    fn from(gap: Gap) -> Self {
        Self {
            start: gap.start,
            end: gap.end,
            size: gap.size,
            hours: gap.hours(),
        }
    }
}

/// Contents of `gap-analysis-report.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysisReport {
    /// When the analysis ran.
    pub timestamp: DateTime<Utc>,
    /// Covered ranges.
    pub ranges: Vec<BlockRange>,
    /// Gaps, largest first.
    pub gaps: Vec<GapEntry>,
    /// Integrity issues.
    pub issues: Vec<IntegrityIssue>,
    /// Coverage summary.
    pub stats: CoverageStats,
    /// Suggested follow-ups.
    pub recommendations: Vec<String>,
}

impl GapAnalysisReport {
    /// Build the report for `coverage`.
    pub fn new(coverage: &CoverageSet, issues: Vec<IntegrityIssue>, now: DateTime<Utc>) -> Self {
        let gaps: Vec<GapEntry> = coverage.gaps_by_size().into_iter().map(Into::into).collect();
        let stats = coverage.stats();

        let mut recommendations = Vec::new();
        if !gaps.is_empty() {
            recommendations.push(format!("Run backfill for {} gaps", gaps.len()));
            recommendations.push(format!(
                "Estimated backfill time: {:.0} seconds",
                stats.gap_blocks as f64 / 1000.0 * 2.0
            ));
        }
        if issues.iter().any(|i| i.severity == Severity::Critical) {
            recommendations.push("Address critical issues immediately".to_string());
        }

        Self {
            timestamp: now,
            ranges: coverage.ranges().to_vec(),
            gaps,
            issues,
            stats,
            recommendations,
        }
    }

    /// Highest severity among the issues.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// Log the report.
    pub fn log_summary(&self) {
        match (self.stats.first_block, self.stats.last_block) {
            (Some(first), Some(last)) => info!(
                "Coverage: {} ranges, blocks {} to {}, {} blocks covered ({:.2}%)",
                self.stats.total_ranges,
                first,
                last,
                self.stats.covered_blocks,
                self.stats.coverage_percent
            ),
            _ => info!("Coverage: no processed ranges"),
        }

        if self.gaps.is_empty() {
            info!("No gaps detected");
        } else {
            warn!(
                "{} gaps detected ({} blocks)",
                self.gaps.len(),
                self.stats.gap_blocks
            );
            for gap in self.gaps.iter().take(TOP_GAPS) {
                warn!(
                    "  gap {}-{}: {} blocks (~{:.1} hours)",
                    gap.start, gap.end, gap.size, gap.hours
                );
            }
        }

        for issue in &self.issues {
            match issue.severity {
                Severity::Warning => warn!("Integrity: {}", issue.message),
                Severity::Error | Severity::Critical => {
                    error!("Integrity ({:?}): {}", issue.severity, issue.message)
                }
            }
        }
        for recommendation in &self.recommendations {
            info!("Recommendation: {}", recommendation);
        }
    }

    /// Write `gap-analysis-report.json`.
    pub async fn save(&self, storage: &Storage) -> Result<()> {
        storage.write_json(GAP_REPORT_FILE, self).await
    }
}

/// Contents of `backfill-log.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillLog {
    /// When the backfill ran.
    pub timestamp: DateTime<Utc>,
    /// Per-gap detail.
    pub gaps_processed: Vec<GapReport>,
    /// Gaps fully scanned.
    pub gaps_closed: usize,
    /// Burns added to the ledger.
    pub total_burns_found: usize,
    /// Amount added to the ledger.
    pub total_amount_recovered: f64,
    /// Sub-chunks left open.
    pub failed_chunks: Vec<BlockRange>,
    /// Gaps still open after the run.
    pub remaining_gaps: usize,
}

impl BackfillLog {
    /// Build the log from a backfill outcome and the coverage after it.
    pub fn new(outcome: &BackfillOutcome, coverage: &CoverageSet, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            gaps_processed: outcome.gaps_processed.clone(),
            gaps_closed: outcome.gaps_closed,
            total_burns_found: outcome.burns_recovered,
            total_amount_recovered: outcome.amount_recovered,
            failed_chunks: outcome.failed_chunks.clone(),
            remaining_gaps: coverage.gaps().len(),
        }
    }

    /// Write `backfill-log.json`.
    pub async fn save(&self, storage: &Storage) -> Result<()> {
        storage.write_json(BACKFILL_LOG_FILE, self).await
    }
}
