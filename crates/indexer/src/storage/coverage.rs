//! Coverage file persistence.

use anyhow::Result;
use burnledger_core::CoverageSet;
use chrono::{DateTime, Utc};

use super::{CoverageFile, Loaded, Storage, COVERAGE_FILE};

impl Storage {
    /// Read `processed-ranges.json`.
    pub async fn load_coverage(&self) -> Result<Loaded<CoverageFile>> {
        self.read_json(COVERAGE_FILE).await
    }

    /// Atomically replace `processed-ranges.json`.
    pub async fn save_coverage(
        &self,
        coverage: &CoverageSet,
        now: DateTime<Utc>,
    ) -> Result<CoverageFile> {
        let file = CoverageFile::new(coverage, now);
        self.write_json(COVERAGE_FILE, &file).await?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burnledger_core::BlockRange;
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_coverage_file_shape() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).await.unwrap();
        let coverage = CoverageSet::from_ranges([
            BlockRange::new(500, 800).unwrap(),
            BlockRange::new(1_200, 1_500).unwrap(),
        ]);
        let now = DateTime::<Utc>::from_timestamp(1_756_458_000, 0).unwrap();

        storage.save_coverage(&coverage, now).await.unwrap();

        let raw: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(COVERAGE_FILE)).unwrap())
                .unwrap();
        assert_eq!(raw["ranges"][0]["start"], 500);
        assert_eq!(raw["ranges"][1]["end"], 1_500);
        assert_eq!(raw["lastContinuousBlock"], 800);
        assert_eq!(raw["totalGaps"], 1);
        assert!(raw["lastUpdated"].is_string());

        match storage.load_coverage().await.unwrap() {
            Loaded::Found(file) => assert_eq!(file.coverage(), coverage),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reversed_range_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join(COVERAGE_FILE),
            br#"{"ranges":[{"start":900,"end":100}],"lastUpdated":"2025-08-29T00:00:00Z"}"#,
        )
        .unwrap();

        assert!(matches!(
            storage.load_coverage().await.unwrap(),
            Loaded::Corrupt(_)
        ));
    }
}
