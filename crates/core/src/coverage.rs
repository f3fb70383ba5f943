//! Block-range coverage: which blocks have already been scanned for burns.
//!
//! A [`CoverageSet`] keeps its ranges sorted, non-overlapping and non-adjacent.
//! The free functions mirror the set operations for callers that work on plain
//! range lists (persisted files, reports).

use serde::{Deserialize, Serialize};

use crate::constants::{CRITICAL_GAP_SIZE, DRIFT_TOLERANCE};
use crate::ledger::Ledger;
use crate::types::{BlockRange, Gap};

/// Sort and coalesce ranges. Overlapping or adjacent ranges are folded together.
///
/// The result depends only on the set of input ranges, not their order, and
/// merging an already merged list returns it unchanged.
pub fn merge_ranges(ranges: &[BlockRange]) -> Vec<BlockRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<BlockRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Gaps between consecutive ranges of a sorted range list.
pub fn detect_gaps(ranges: &[BlockRange]) -> Vec<Gap> {
    ranges
        .windows(2)
        .filter(|pair| pair[1].start > pair[0].end.saturating_add(1))
        .map(|pair| Gap::new(pair[0].end + 1, pair[1].start - 1))
        .collect()
}

/// Append `start..=end` and re-merge.
pub fn add_processed_range(
    mut ranges: Vec<BlockRange>,
    start: u64,
    end: u64,
) -> crate::Result<Vec<BlockRange>> {
    ranges.push(BlockRange::new(start, end)?);
    Ok(merge_ranges(&ranges))
}

/// Check coverage against the ledger's resume pointer. Issues are reported,
/// never raised: callers decide whether to halt.
pub fn validate_integrity(coverage: &CoverageSet, ledger: &Ledger) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    let gaps = coverage.gaps();

    if !gaps.is_empty() {
        let gap_blocks: u64 = gaps.iter().map(|g| g.size).sum();
        issues.push(IntegrityIssue {
            kind: IssueKind::Gaps,
            severity: Severity::Warning,
            message: format!("Found {} gaps totaling {} blocks", gaps.len(), gap_blocks),
            gaps: gaps.clone(),
        });
    }

    if let Some(max_end) = coverage.max_end() {
        let last = ledger.last_processed_block;
        if last > 0 && last.abs_diff(max_end) > DRIFT_TOLERANCE {
            issues.push(IntegrityIssue {
                kind: IssueKind::Mismatch,
                severity: Severity::Error,
                message: format!(
                    "lastProcessedBlock ({last}) doesn't match ranges end ({max_end})"
                ),
                gaps: Vec::new(),
            });
        }
    }

    let large: Vec<Gap> = gaps
        .into_iter()
        .filter(|g| g.size > CRITICAL_GAP_SIZE)
        .collect();
    if !large.is_empty() {
        issues.push(IntegrityIssue {
            kind: IssueKind::LargeGaps,
            severity: Severity::Critical,
            message: format!(
                "{} gaps larger than {} blocks detected",
                large.len(),
                CRITICAL_GAP_SIZE
            ),
            gaps: large,
        });
    }

    issues
}

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Coverage is incomplete but recoverable by backfill.
    Warning,
    /// Coverage and ledger disagree.
    Error,
    /// Large unscanned spans.
    Critical,
}

/// What an integrity issue is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Any gap between ranges.
    Gaps,
    /// Ledger resume pointer drifted from the coverage end.
    Mismatch,
    /// Gaps above the critical size.
    LargeGaps,
}

/// A reported coverage problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Issue category.
    #[serde(rename = "type")]
    pub kind: IssueKind,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Gaps the issue refers to, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<Gap>,
}

/// Summary numbers for a coverage set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStats {
    /// Number of disjoint ranges.
    pub total_ranges: usize,
    /// Number of gaps.
    pub total_gaps: usize,
    /// Blocks inside gaps.
    pub gap_blocks: u64,
    /// Blocks inside ranges.
    pub covered_blocks: u64,
    /// First covered block.
    pub first_block: Option<u64>,
    /// Last covered block.
    pub last_block: Option<u64>,
    /// Covered blocks over the first-to-last span, in percent.
    pub coverage_percent: f64,
}

/// Set of scanned block ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<BlockRange>", into = "Vec<BlockRange>")]
pub struct CoverageSet {
    ranges: Vec<BlockRange>,
}

impl From<Vec<BlockRange>> for CoverageSet {
    fn from(ranges: Vec<BlockRange>) -> Self {
        Self::from_ranges(ranges)
    }
}

impl From<CoverageSet> for Vec<BlockRange> {
    fn from(set: CoverageSet) -> Self {
        set.ranges
    }
}

impl CoverageSet {
    /// Build a set from arbitrary ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = BlockRange>) -> Self {
        let ranges: Vec<BlockRange> = ranges.into_iter().collect();
        Self {
            ranges: merge_ranges(&ranges),
        }
    }

    /// Group observed block numbers into ranges, treating blocks at most
    /// `tolerance` apart as one continuous scan.
    pub fn from_blocks(blocks: impl IntoIterator<Item = u64>, tolerance: u64) -> Self {
        let mut blocks: Vec<u64> = blocks.into_iter().collect();
        blocks.sort_unstable();
        blocks.dedup();

        let mut ranges: Vec<BlockRange> = Vec::new();
        for block in blocks {
            match ranges.last_mut() {
                Some(current) if block - current.end <= tolerance => current.end = block,
                _ => ranges.push(BlockRange::single(block)),
            }
        }
        Self::from_ranges(ranges)
    }

    /// The merged ranges, ascending.
    pub fn ranges(&self) -> &[BlockRange] {
        &self.ranges
    }

    /// Whether nothing has been scanned yet.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Record `range` as scanned.
    pub fn add(&mut self, range: BlockRange) {
        self.ranges.push(range);
        self.ranges = merge_ranges(&self.ranges);
    }

    /// Gaps between the covered ranges.
    pub fn gaps(&self) -> Vec<Gap> {
        detect_gaps(&self.ranges)
    }

    /// Gaps sorted by size, largest first.
    pub fn gaps_by_size(&self) -> Vec<Gap> {
        let mut gaps = self.gaps();
        gaps.sort_by(|a, b| b.size.cmp(&a.size).then(a.start.cmp(&b.start)));
        gaps
    }

    /// Lowest covered block.
    pub fn min_start(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.start)
    }

    /// Highest covered block.
    pub fn max_end(&self) -> Option<u64> {
        self.ranges.last().map(|r| r.end)
    }

    /// End of the first range: coverage is contiguous from the first scanned
    /// block up to here.
    pub fn last_continuous_block(&self) -> u64 {
        self.ranges.first().map(|r| r.end).unwrap_or(0)
    }

    /// Whether `block` was scanned.
    pub fn contains(&self, block: u64) -> bool {
        let idx = self.ranges.partition_point(|r| r.end < block);
        self.ranges.get(idx).is_some_and(|r| r.contains(block))
    }

    /// Coverage summary.
    pub fn stats(&self) -> CoverageStats {
        let gaps = self.gaps();
        let covered_blocks: u64 = self.ranges.iter().map(BlockRange::len).sum();
        let coverage_percent = match (self.min_start(), self.max_end()) {
            (Some(first), Some(last)) => covered_blocks as f64 / (last - first + 1) as f64 * 100.0,
            _ => 0.0,
        };

        CoverageStats {
            total_ranges: self.ranges.len(),
            total_gaps: gaps.len(),
            gap_blocks: gaps.iter().map(|g| g.size).sum(),
            covered_blocks,
            first_block: self.min_start(),
            last_block: self.max_end(),
            coverage_percent,
        }
    }
}
