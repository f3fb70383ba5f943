//! Gap-resistant ERC-20 burn ingestion.
//!
//! This crate provides:
//! - A failfast retry primitive with capped exponential backoff
//! - Chunked `Transfer` log fetching over a pool of RPC endpoints
//! - Block-range coverage tracking with bootstrap and auto-sync
//! - Gap backfill with bounded retries
//! - The incremental merge pipeline that keeps the 30-day ledger current
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  burnledger run                        │
//! │                                        │
//! │  Storage ──► CoverageTracker           │
//! │  (ledger,    load / bootstrap /        │
//! │   ranges)    auto-sync                 │
//! │                 │                      │
//! │                 ▼                      │
//! │          integrity report              │
//! │                 │                      │
//! │                 ▼                      │
//! │        GapBackfillService ◄──┐         │
//! │                 │            │         │
//! │                 ▼            │         │
//! │          forward scan ──► LogFetcher   │
//! │                 │        (Failfast)    │
//! │                 ▼            │         │
//! │   merge, window, recompute,  ▼         │
//! │   immutability check    Ethereum RPC   │
//! │                 │                      │
//! │                 ▼                      │
//! │   ledger snapshot, then coverage       │
//! └────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backfill;
pub mod clock;
pub mod config;
pub mod listener;
pub mod report;
pub mod retry;
pub mod storage;
pub mod tracker;
pub mod updater;

// Re-export common types
pub use burnledger_core::*;
