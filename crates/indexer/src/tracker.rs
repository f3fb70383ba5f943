//! Block-range coverage tracker.
//!
//! Loads the persisted coverage, rebuilding it from the ledger when the file is
//! absent or unreadable, and reconciles it with the ledger's resume pointer.

use anyhow::Result;
use burnledger_core::{BlockRange, CoverageSet, Ledger, BOOTSTRAP_GAP_TOLERANCE};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::storage::{Loaded, Storage};

/// Where the loaded coverage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageSource {
    /// Read from the coverage file.
    File,
    /// Rebuilt from block numbers recorded in the ledger.
    Bootstrapped,
}

/// Coverage as loaded at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCoverage {
    /// The coverage set.
    pub coverage: CoverageSet,
    /// Origin of the ranges.
    pub source: CoverageSource,
    /// Range added by auto-sync, if any.
    pub synced: Option<BlockRange>,
}

/// Loads, reconciles and saves coverage.
#[derive(Debug, Clone)]
pub struct CoverageTracker {
    storage: Storage,
    auto_sync: bool,
}

impl CoverageTracker {
    /// Create a tracker. With `auto_sync` off, drift between the ledger and
    /// the coverage end is left for integrity validation to report.
    pub fn new(storage: Storage, auto_sync: bool) -> Self {
        Self { storage, auto_sync }
    }

    /// Load coverage for `ledger`.
    pub async fn load(&self, ledger: &Ledger) -> Result<LoadedCoverage> {
        let (mut coverage, source) = match self.storage.load_coverage().await? {
            Loaded::Found(file) => {
                let coverage = file.coverage();
                info!(
                    "Loaded {} processed ranges (last continuous block {})",
                    coverage.len(),
                    coverage.last_continuous_block()
                );
                (coverage, CoverageSource::File)
            }
            Loaded::Missing => {
                info!("No coverage file, rebuilding from ledger");
                (bootstrap(ledger), CoverageSource::Bootstrapped)
            }
            Loaded::Corrupt(e) => {
                warn!("Coverage file unreadable ({}), rebuilding from ledger", e);
                (bootstrap(ledger), CoverageSource::Bootstrapped)
            }
        };

        let synced = if self.auto_sync {
            sync_to_ledger(&mut coverage, ledger.last_processed_block)
        } else {
            None
        };

        Ok(LoadedCoverage {
            coverage,
            source,
            synced,
        })
    }

    /// Persist coverage.
    pub async fn save(&self, coverage: &CoverageSet, now: DateTime<Utc>) -> Result<()> {
        let file = self.storage.save_coverage(coverage, now).await?;
        info!(
            "Saved {} processed ranges ({} gaps)",
            file.ranges.len(),
            file.total_gaps
        );
        Ok(())
    }
}

/// Rebuild coverage from the blocks of recorded burns.
pub fn bootstrap(ledger: &Ledger) -> CoverageSet {
    let coverage = CoverageSet::from_blocks(ledger.block_numbers(), BOOTSTRAP_GAP_TOLERANCE);
    info!(
        "Bootstrapped {} ranges from {} recorded burns",
        coverage.len(),
        ledger.transaction_count()
    );
    coverage
}

/// Mark `[max_end + 1, last_processed_block]` as scanned when the ledger is
/// ahead of the coverage. Empty coverage is left alone.
pub fn sync_to_ledger(coverage: &mut CoverageSet, last_processed_block: u64) -> Option<BlockRange> {
    let max_end = coverage.max_end()?;
    if last_processed_block <= max_end {
        return None;
    }

    let range = BlockRange::new(max_end + 1, last_processed_block).ok()?;
    warn!(
        "Auto-sync: ledger processed up to {} but coverage ends at {}, marking {} as scanned",
        last_processed_block, max_end, range
    );
    coverage.add(range);
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::COVERAGE_FILE;
    use burnledger_core::{validate_integrity, BurnEvent, B256};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn r(start: u64, end: u64) -> BlockRange {
        BlockRange::new(start, end).unwrap()
    }

    fn ledger_with_blocks(blocks: &[u64], last_processed_block: u64) -> Ledger {
        let day = NaiveDate::from_ymd_opt(2025, 8, 29).unwrap();
        let mut ledger = Ledger::with_window_ending(day);
        let events: Vec<BurnEvent> = blocks
            .iter()
            .enumerate()
            .map(|(i, &block)| BurnEvent {
                hash: B256::with_last_byte(i as u8 + 1),
                block_number: block,
                timestamp: day.and_hms_opt(8, 0, 0).unwrap().and_utc().timestamp() as u64,
                amount: 1.0,
                from_address: Default::default(),
            })
            .collect();
        ledger.merge_events(&events);
        ledger.last_processed_block = last_processed_block;
        ledger
    }

    async fn storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).await.unwrap();
        (dir, storage)
    }

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_756_458_000, 0).unwrap()
    }

    #[tokio::test]
    async fn test_auto_sync_extends_to_ledger_pointer() {
        let (_dir, storage) = storage().await;
        storage
            .save_coverage(&CoverageSet::from_ranges([r(500, 800)]), now())
            .await
            .unwrap();
        let ledger = ledger_with_blocks(&[], 1_000);

        let loaded = CoverageTracker::new(storage, true)
            .load(&ledger)
            .await
            .unwrap();

        assert_eq!(loaded.source, CoverageSource::File);
        assert_eq!(loaded.synced, Some(r(801, 1_000)));
        assert_eq!(loaded.coverage.ranges(), &[r(500, 1_000)]);
        assert!(loaded.coverage.gaps().is_empty());
    }

    #[tokio::test]
    async fn test_strict_mode_reports_drift() {
        let (_dir, storage) = storage().await;
        storage
            .save_coverage(&CoverageSet::from_ranges([r(500, 800)]), now())
            .await
            .unwrap();
        let ledger = ledger_with_blocks(&[], 1_000);

        let loaded = CoverageTracker::new(storage, false)
            .load(&ledger)
            .await
            .unwrap();

        assert_eq!(loaded.synced, None);
        assert_eq!(loaded.coverage.ranges(), &[r(500, 800)]);
        let issues = validate_integrity(&loaded.coverage, &ledger);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, burnledger_core::IssueKind::Mismatch);
    }

    #[tokio::test]
    async fn test_bootstrap_when_file_missing() {
        let (_dir, storage) = storage().await;
        let ledger = ledger_with_blocks(&[1_000, 1_050, 1_100, 5_000], 5_000);

        let loaded = CoverageTracker::new(storage, true)
            .load(&ledger)
            .await
            .unwrap();

        assert_eq!(loaded.source, CoverageSource::Bootstrapped);
        assert_eq!(loaded.coverage.ranges(), &[r(1_000, 1_100), r(5_000, 5_000)]);
        assert_eq!(loaded.synced, None);
    }

    #[tokio::test]
    async fn test_bootstrap_when_file_corrupt() {
        let (dir, storage) = storage().await;
        std::fs::write(dir.path().join(COVERAGE_FILE), b"not json").unwrap();
        let ledger = ledger_with_blocks(&[2_000], 2_500);

        let loaded = CoverageTracker::new(storage, true)
            .load(&ledger)
            .await
            .unwrap();

        assert_eq!(loaded.source, CoverageSource::Bootstrapped);
        assert_eq!(loaded.coverage.ranges(), &[r(2_000, 2_500)]);
    }

    #[test]
    fn test_sync_skips_empty_coverage() {
        let mut coverage = CoverageSet::default();
        assert_eq!(sync_to_ledger(&mut coverage, 1_000), None);
        assert!(coverage.is_empty());
    }
}
