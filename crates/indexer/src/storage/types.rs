//! On-disk document types for the storage layer.

use burnledger_core::{BlockRange, CoverageSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of run produced a ledger snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    /// Regular run: backfill plus forward scan.
    Incremental,
    /// Gap backfill only.
    Backfill,
    /// Ledger rebuilt from scratch.
    Full,
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::Backfill => write!(f, "backfill"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Pointer to the newest ledger snapshot (`data-manifest.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    /// File name of the newest snapshot, relative to the data directory.
    pub latest: String,

    /// When the snapshot was written.
    pub timestamp: DateTime<Utc>,

    /// Snapshot version (unix milliseconds).
    pub version: i64,

    /// Run that produced the snapshot.
    pub update_type: UpdateType,
}

/// Persisted coverage (`processed-ranges.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageFile {
    /// Scanned ranges, merged and ascending.
    pub ranges: Vec<BlockRange>,

    /// End of the first range.
    #[serde(default)]
    pub last_continuous_block: u64,

    /// Number of gaps at save time.
    #[serde(default)]
    pub total_gaps: usize,

    /// When the file was written.
    pub last_updated: DateTime<Utc>,
}

impl CoverageFile {
    /// Snapshot a coverage set.
    pub fn new(coverage: &CoverageSet, now: DateTime<Utc>) -> Self {
        Self {
            ranges: coverage.ranges().to_vec(),
            last_continuous_block: coverage.last_continuous_block(),
            total_gaps: coverage.gaps().len(),
            last_updated: now,
        }
    }

    /// The ranges as a coverage set. Unmerged input is merged.
    pub fn coverage(&self) -> CoverageSet {
        CoverageSet::from_ranges(self.ranges.iter().copied())
    }
}

/// Result of reading a document that may be absent or unreadable.
#[derive(Debug)]
pub enum Loaded<T> {
    /// Parsed successfully.
    Found(T),
    /// No file on disk.
    Missing,
    /// File exists but could not be parsed.
    Corrupt(String),
}

/// Files present in the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of versioned ledger snapshots.
    pub snapshot_count: usize,

    /// Manifest contents, if present and readable.
    pub manifest: Option<SnapshotManifest>,

    /// Whether a coverage file exists.
    pub has_coverage: bool,
}
