//! # Burn Ledger Core
//!
//! Core types and pure algorithms for tracking ERC-20 burn events over a rolling
//! 30-day window.
//!
//! This crate holds no I/O. It provides the building blocks the indexer drives:
//!
//! ## Features
//!
//! - **Block ranges**: [`BlockRange`], [`Gap`] and the gap-free [`CoverageSet`]
//! - **Coverage checks**: merge, gap detection and integrity validation
//! - **Ledger**: [`DayBucket`] aggregation, hash-deduplicated merges, window
//!   maintenance and the historical-immutability check
//! - **Constants**: window size, cutoffs and tolerances shared by every component

#![warn(missing_docs)]

pub mod constants;
pub mod coverage;
pub mod error;
pub mod ledger;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use coverage::{
    add_processed_range, detect_gaps, merge_ranges, validate_integrity, CoverageSet,
    CoverageStats, IntegrityIssue, IssueKind, Severity,
};
pub use error::{CoreError, HistoricalChange, LedgerError, Result};
pub use ledger::{
    bucket_events, HistoricalCutoff, Ledger, MergeStats, TotalCorrection, WindowShift,
};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256};
