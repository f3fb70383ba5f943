//! Error types for the core crate.

use chrono::NaiveDate;
use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A block range whose start lies after its end.
    #[error("Invalid block range: start {start} > end {end}")]
    InvalidRange {
        /// First block of the range.
        start: u64,
        /// Last block of the range.
        end: u64,
    },

    /// A ledger validation failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

/// Fatal ledger validation failures. Any of these must prevent the ledger from
/// being persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// The window does not hold an acceptable number of days.
    #[error("Ledger window has {count} days (expected {min}..={max})")]
    DayCountOutOfRange {
        /// Actual number of day buckets.
        count: usize,
        /// Minimum accepted.
        min: usize,
        /// Maximum accepted.
        max: usize,
    },

    /// One or more historical buckets were altered.
    #[error("Historical data integrity violation: {} change(s) detected", .0.len())]
    HistoricalDataModified(Vec<HistoricalChange>),
}

/// A single change to a bucket that is past the historical cutoff.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoricalChange {
    /// The day disappeared without being shifted out of the window.
    Missing {
        /// Bucket date.
        date: NaiveDate,
    },
    /// The day's burned amount changed.
    Amount {
        /// Bucket date.
        date: NaiveDate,
        /// Amount before the merge.
        before: f64,
        /// Amount after the merge.
        after: f64,
    },
    /// The day's transaction count changed.
    Count {
        /// Bucket date.
        date: NaiveDate,
        /// Count before the merge.
        before: usize,
        /// Count after the merge.
        after: usize,
    },
}

impl std::fmt::Display for HistoricalChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { date } => write!(f, "Missing historical day: {date}"),
            Self::Amount {
                date,
                before,
                after,
            } => write!(f, "Historical amount changed for {date}: {before} -> {after}"),
            Self::Count {
                date,
                before,
                after,
            } => write!(
                f,
                "Historical transaction count changed for {date}: {before} -> {after}"
            ),
        }
    }
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
