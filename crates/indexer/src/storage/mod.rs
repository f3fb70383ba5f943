//! Storage layer for the burn ledger indexer.
//!
//! Everything lives as JSON documents in one data directory:
//! - Ledger snapshots (`burn-data-v<millis>.json`) plus the manifest and a
//!   legacy copy
//! - Block-range coverage (`processed-ranges.json`)
//! - Gap analysis and backfill reports
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a partially written file.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod coverage;
pub mod ledger;
pub mod types;

pub use types::*;

/// Versioned snapshot file prefix.
pub const SNAPSHOT_PREFIX: &str = "burn-data-v";
/// Snapshot pointer.
pub const MANIFEST_FILE: &str = "data-manifest.json";
/// Unversioned copy of the newest ledger.
pub const LEGACY_LEDGER_FILE: &str = "burn-data.json";
/// Coverage ranges.
pub const COVERAGE_FILE: &str = "processed-ranges.json";
/// Integrity report of the last run.
pub const GAP_REPORT_FILE: &str = "gap-analysis-report.json";
/// Backfill log of the last run.
pub const BACKFILL_LOG_FILE: &str = "backfill-log.json";

/// File-backed storage rooted at a data directory.
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Open the data directory, creating it if needed.
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        info!("Using data directory: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    /// The data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of `name` inside the data directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Serialize `value` as pretty JSON and atomically replace `name`.
    pub async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize {}", name))?;
        self.write_atomic(name, &bytes).await
    }

    /// Read and parse `name`. Missing files and parse failures are reported
    /// separately; other I/O errors are returned.
    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Loaded<T>> {
        let Some(bytes) = self.read_bytes(name).await? else {
            return Ok(Loaded::Missing);
        };
        Ok(match serde_json::from_slice(&bytes) {
            Ok(value) => Loaded::Found(value),
            Err(e) => Loaded::Corrupt(e.to_string()),
        })
    }

    /// Raw file contents, or `None` if the file does not exist.
    pub async fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name);
        let tmp = self.path(&format!(".{}.tmp", name));

        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;

        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Summary of the files in the data directory.
    pub async fn stats(&self) -> Result<StorageStats> {
        let mut snapshot_count = 0;
        let mut entries = tokio::fs::read_dir(&self.data_dir)
            .await
            .with_context(|| format!("Failed to list {}", self.data_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(".json") {
                snapshot_count += 1;
            }
        }

        let manifest = match self.read_json::<SnapshotManifest>(MANIFEST_FILE).await? {
            Loaded::Found(manifest) => Some(manifest),
            Loaded::Missing | Loaded::Corrupt(_) => None,
        };

        Ok(StorageStats {
            snapshot_count,
            manifest,
            has_coverage: tokio::fs::try_exists(self.path(COVERAGE_FILE))
                .await
                .unwrap_or(false),
        })
    }
}
