//! Ledger snapshots, manifest and legacy-schema migration.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use burnledger_core::constants::LEDGER_SCHEMA_VERSION;
use burnledger_core::Ledger;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{
    Loaded, SnapshotManifest, Storage, UpdateType, LEGACY_LEDGER_FILE, MANIFEST_FILE,
    SNAPSHOT_PREFIX,
};

/// Fields written for dashboard readers and recomputed on every save.
const DERIVED_FIELDS: [&str; 2] = ["startDate", "endDate"];

impl Storage {
    /// Load the newest ledger: the manifest's snapshot, else the legacy file.
    ///
    /// Returns `None` when no ledger has been written yet. An unreadable
    /// ledger is an error, never an empty ledger.
    pub async fn load_ledger(&self) -> Result<Option<Ledger>> {
        match self.read_json::<SnapshotManifest>(MANIFEST_FILE).await? {
            Loaded::Found(manifest) => {
                if let Some(bytes) = self.read_bytes(&manifest.latest).await? {
                    info!("Loading ledger snapshot {}", manifest.latest);
                    return parse_ledger(&bytes)
                        .with_context(|| format!("Failed to load {}", manifest.latest))
                        .map(Some);
                }
                warn!(
                    "Manifest points at missing snapshot {}, falling back to {}",
                    manifest.latest, LEGACY_LEDGER_FILE
                );
            }
            Loaded::Corrupt(e) => warn!("Ignoring unreadable {}: {}", MANIFEST_FILE, e),
            Loaded::Missing => {}
        }

        match self.read_bytes(LEGACY_LEDGER_FILE).await? {
            Some(bytes) => {
                info!("Loading ledger from {}", LEGACY_LEDGER_FILE);
                parse_ledger(&bytes)
                    .with_context(|| format!("Failed to load {}", LEGACY_LEDGER_FILE))
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    /// Write a versioned snapshot and the legacy copy, then move the manifest
    /// to the new snapshot.
    pub async fn save_ledger(
        &self,
        ledger: &Ledger,
        update_type: UpdateType,
        now: DateTime<Utc>,
    ) -> Result<SnapshotManifest> {
        let version = now.timestamp_millis();
        let latest = format!("{}{}.json", SNAPSHOT_PREFIX, version);
        let document = ledger_document(ledger)?;

        self.write_json(&latest, &document).await?;
        self.write_json(LEGACY_LEDGER_FILE, &document).await?;

        let manifest = SnapshotManifest {
            latest,
            timestamp: now,
            version,
            update_type,
        };
        self.write_json(MANIFEST_FILE, &manifest).await?;

        info!(
            "Saved ledger snapshot {} ({} update)",
            manifest.latest, update_type
        );
        Ok(manifest)
    }
}

fn ledger_document(ledger: &Ledger) -> Result<Value> {
    let mut document = serde_json::to_value(ledger).context("Failed to serialize ledger")?;
    if let Some(obj) = document.as_object_mut() {
        if let Some(start) = ledger.start_date() {
            obj.insert("startDate".into(), Value::String(start.to_string()));
        }
        if let Some(end) = ledger.end_date() {
            obj.insert("endDate".into(), Value::String(end.to_string()));
        }
    }
    Ok(document)
}

/// Parse a ledger document of any known schema version.
pub fn parse_ledger(bytes: &[u8]) -> Result<Ledger> {
    let document: Value = serde_json::from_slice(bytes).context("Ledger is not valid JSON")?;
    migrate_ledger(document)
}

/// Bring a ledger document to the current schema and deserialize it.
///
/// Version 0 is the unversioned shape: `dailyBurns` with `amountTinc` totals
/// and transactions keyed by `from`, without block numbers or timestamps.
pub fn migrate_ledger(mut document: Value) -> Result<Ledger> {
    let obj = document
        .as_object_mut()
        .context("Ledger document is not a JSON object")?;

    let version = obj
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if version > u64::from(LEDGER_SCHEMA_VERSION) {
        bail!(
            "Ledger schema version {} is newer than supported version {}",
            version,
            LEDGER_SCHEMA_VERSION
        );
    }
    if version == 0 {
        migrate_v0(obj)?;
        info!("Migrated legacy ledger to schema version {}", LEDGER_SCHEMA_VERSION);
    }

    for field in DERIVED_FIELDS {
        obj.remove(field);
    }

    let mut ledger: Ledger =
        serde_json::from_value(document).context("Ledger does not match the schema")?;
    ledger.day_buckets.sort_by_key(|b| b.date);
    if version == 0 {
        // Legacy aggregates were written independently of the transaction lists.
        for bucket in &mut ledger.day_buckets {
            bucket.recompute();
        }
    }
    Ok(ledger)
}

fn migrate_v0(obj: &mut Map<String, Value>) -> Result<()> {
    if let Some(days) = obj.remove("dailyBurns") {
        obj.entry("dayBuckets").or_insert(days);
    }

    let days = obj
        .get_mut("dayBuckets")
        .and_then(Value::as_array_mut)
        .context("Legacy ledger has no day list")?;

    for day in days.iter_mut() {
        let day = day
            .as_object_mut()
            .context("Legacy day entry is not an object")?;
        rename_key(day, "amountTinc", "totalAmount");

        let transactions = day
            .entry("transactions")
            .or_insert_with(|| Value::Array(Vec::new()));
        let count = match transactions.as_array_mut() {
            Some(txs) => {
                for tx in txs.iter_mut().filter_map(Value::as_object_mut) {
                    rename_key(tx, "from", "fromAddress");
                    tx.entry("fromAddress")
                        .or_insert_with(|| Value::String(Address::ZERO.to_string()));
                    tx.entry("blockNumber").or_insert(Value::from(0u64));
                    tx.entry("timestamp").or_insert(Value::from(0u64));
                }
                txs.len()
            }
            None => 0,
        };
        day.entry("transactionCount").or_insert(Value::from(count));
        day.entry("totalAmount").or_insert(Value::from(0.0));
    }

    obj.insert("schemaVersion".into(), Value::from(LEDGER_SCHEMA_VERSION));
    Ok(())
}

fn rename_key(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = obj.remove(from) {
        obj.entry(to).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burnledger_core::{BurnEvent, B256};
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;

    const HASH_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn legacy_document() -> Value {
        json!({
            "startDate": "2025-07-31",
            "endDate": "2025-08-01",
            "totalBurned": 12.5,
            "totalSupply": 1000.0,
            "burnPercentage": 1.25,
            "lastProcessedBlock": 23_000_000u64,
            "holderStats": { "totalHolders": 4242 },
            "dailyBurns": [
                {
                    "date": "2025-08-01",
                    "amountTinc": 0.0,
                    "transactionCount": 0,
                    "transactions": []
                },
                {
                    "date": "2025-07-31",
                    "amountTinc": 12.5,
                    "transactionCount": 1,
                    "transactions": [
                        {
                            "hash": HASH_A,
                            "amount": 12.5,
                            "from": "0x1111111111111111111111111111111111111111"
                        }
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_migrate_legacy_ledger() {
        let ledger = migrate_ledger(legacy_document()).unwrap();

        assert_eq!(ledger.schema_version, LEDGER_SCHEMA_VERSION);
        assert_eq!(ledger.day_buckets.len(), 2);
        // Sorted ascending after migration.
        assert_eq!(
            ledger.day_buckets[0].date,
            NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()
        );
        let tx = &ledger.day_buckets[0].transactions[0];
        assert_eq!(tx.amount, 12.5);
        assert_eq!(tx.block_number, 0);
        assert_eq!(ledger.last_processed_block, 23_000_000);

        // Collaborator data survives, derived fields do not.
        assert_eq!(ledger.extra["holderStats"]["totalHolders"], 4242);
        assert!(!ledger.extra.contains_key("startDate"));
        assert!(!ledger.extra.contains_key("dailyBurns"));

        // Legacy entries without a block number do not feed coverage bootstrap.
        assert_eq!(ledger.block_numbers().count(), 0);
    }

    #[test]
    fn test_migration_recomputes_legacy_aggregates() {
        let mut doc = legacy_document();
        doc["dailyBurns"][1]["amountTinc"] = json!(99.0);
        doc["dailyBurns"][1]["transactionCount"] = json!(4);

        let ledger = migrate_ledger(doc).unwrap();

        let day = &ledger.day_buckets[0];
        assert_eq!(day.total_amount, 12.5);
        assert_eq!(day.transaction_count, 1);
    }

    #[test]
    fn test_collaborator_fields_survive_load() {
        let mut doc = legacy_document();
        doc["fromCache"] = json!(true);

        let ledger = migrate_ledger(doc).unwrap();

        assert_eq!(ledger.extra["fromCache"], true);
        assert!(!ledger.extra.contains_key("endDate"));
    }

    #[test]
    fn test_reject_future_schema() {
        let doc = json!({ "schemaVersion": 99, "dayBuckets": [] });
        assert!(migrate_ledger(doc).is_err());
    }

    #[tokio::test]
    async fn test_save_then_load_uses_manifest() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).await.unwrap();

        let end = NaiveDate::from_ymd_opt(2025, 8, 29).unwrap();
        let mut ledger = Ledger::with_window_ending(end);
        ledger.merge_events(&[BurnEvent {
            hash: B256::repeat_byte(0xaa),
            block_number: 23_240_000,
            timestamp: end.and_hms_opt(9, 0, 0).unwrap().and_utc().timestamp() as u64,
            amount: 751.61,
            from_address: Default::default(),
        }]);
        ledger.recompute_totals();

        let now = DateTime::<Utc>::from_timestamp(1_756_458_000, 0).unwrap();
        let manifest = storage
            .save_ledger(&ledger, UpdateType::Incremental, now)
            .await
            .unwrap();
        assert_eq!(manifest.latest, "burn-data-v1756458000000.json");
        assert!(dir.path().join(&manifest.latest).exists());
        assert!(dir.path().join(LEGACY_LEDGER_FILE).exists());

        let written: Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(&manifest.latest)).unwrap(),
        )
        .unwrap();
        assert_eq!(written["endDate"], "2025-08-29");
        assert_eq!(written["startDate"], "2025-07-31");

        let loaded = storage.load_ledger().await.unwrap().unwrap();
        assert_eq!(loaded, ledger);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_legacy_file() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join(LEGACY_LEDGER_FILE),
            serde_json::to_vec(&legacy_document()).unwrap(),
        )
        .unwrap();

        let ledger = storage.load_ledger().await.unwrap().unwrap();
        assert_eq!(ledger.total_burned, 12.5);
    }

    #[tokio::test]
    async fn test_load_empty_dir_and_corrupt_ledger() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).await.unwrap();
        assert!(storage.load_ledger().await.unwrap().is_none());

        std::fs::write(dir.path().join(LEGACY_LEDGER_FILE), b"{").unwrap();
        assert!(storage.load_ledger().await.is_err());
    }
}
