//! Shared constants for coverage tracking and ledger maintenance.

/// Number of calendar days kept in the ledger window.
pub const WINDOW_DAYS: u32 = 30;

/// Smallest day count a persisted ledger may have (window-shift slack).
pub const MIN_WINDOW_DAYS: usize = 29;

/// Largest day count a persisted ledger may have (window-shift slack).
pub const MAX_WINDOW_DAYS: usize = 31;

/// Buckets older than this many hours are historical and must not change.
pub const HISTORICAL_CUTOFF_HOURS: i64 = 120;

/// Tolerance when comparing historical bucket amounts.
pub const AMOUNT_TOLERANCE: f64 = 0.001;

/// Stored totals further than this from the recomputed window sum are reported
/// as corrections.
pub const TOTAL_CORRECTION_EPSILON: f64 = 1.0;

/// Maximum distance between observed burn blocks that still counts as one
/// scanned range when bootstrapping coverage from the ledger.
pub const BOOTSTRAP_GAP_TOLERANCE: u64 = 100;

/// Allowed drift between the ledger resume pointer and the coverage end.
pub const DRIFT_TOLERANCE: u64 = 100;

/// Gaps larger than this are reported as critical.
pub const CRITICAL_GAP_SIZE: u64 = 5000;

/// Approximate mainnet block time, used only for human-readable reports.
pub const SECONDS_PER_BLOCK: u64 = 12;

/// Current on-disk ledger schema version.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;
