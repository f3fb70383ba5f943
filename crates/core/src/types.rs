//! Core types for the burn ledger.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::SECONDS_PER_BLOCK;
use crate::error::CoreError;

/// An inclusive range of block numbers.
///
/// Deserialization goes through [`BlockRange::new`] so a reversed range can
/// never enter the system from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBlockRange")]
pub struct BlockRange {
    /// First block (inclusive).
    pub start: u64,
    /// Last block (inclusive).
    pub end: u64,
}

#[derive(Deserialize)]
struct RawBlockRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawBlockRange> for BlockRange {
    type Error = CoreError;

    fn try_from(raw: RawBlockRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl BlockRange {
    /// Create a new range, validating `start <= end`.
    pub fn new(start: u64, end: u64) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Single-block range.
    pub const fn single(block: u64) -> Self {
        Self {
            start: block,
            end: block,
        }
    }

    /// Number of blocks in the range.
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges always hold at least one block.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `block` lies inside the range.
    pub const fn contains(&self, block: u64) -> bool {
        block >= self.start && block <= self.end
    }

    /// Split the range into consecutive sub-ranges of at most `chunk_size` blocks.
    pub fn chunks(&self, chunk_size: u64) -> Vec<BlockRange> {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut from = self.start;
        loop {
            let to = from.saturating_add(chunk_size - 1).min(self.end);
            chunks.push(BlockRange {
                start: from,
                end: to,
            });
            if to == self.end {
                break;
            }
            from = to + 1;
        }
        chunks
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// An unscanned block range between two covered ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// First missing block.
    pub start: u64,
    /// Last missing block.
    pub end: u64,
    /// Number of missing blocks (`end - start + 1`).
    pub size: u64,
}

impl Gap {
    /// Create a gap covering `start..=end`.
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            size: end - start + 1,
        }
    }

    /// The gap as a block range.
    pub const fn range(&self) -> BlockRange {
        BlockRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Approximate wall-clock span of the gap.
    pub fn hours(&self) -> f64 {
        (self.size * SECONDS_PER_BLOCK) as f64 / 3600.0
    }
}

/// An ERC-20 transfer to the burn address.
///
/// The transaction hash is the identity key: a mined transaction never changes,
/// so two events with the same hash are the same burn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnEvent {
    /// Transaction hash.
    pub hash: B256,
    /// Block the transfer was mined in.
    pub block_number: u64,
    /// Block timestamp (unix seconds).
    pub timestamp: u64,
    /// Burned amount in token units.
    pub amount: f64,
    /// Sender of the burn.
    pub from_address: Address,
}

impl BurnEvent {
    /// UTC calendar day of the event.
    pub fn date(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp(self.timestamp as i64, 0)
            .unwrap_or_default()
            .date_naive()
    }
}

/// All burns of one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    /// Calendar date (`YYYY-MM-DD`).
    pub date: NaiveDate,
    /// Sum of `transactions[].amount`.
    pub total_amount: f64,
    /// Length of `transactions`.
    pub transaction_count: usize,
    /// Burns of the day.
    #[serde(default)]
    pub transactions: Vec<BurnEvent>,
}

impl DayBucket {
    /// An empty day.
    pub const fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_amount: 0.0,
            transaction_count: 0,
            transactions: Vec::new(),
        }
    }

    /// Whether a transaction with `hash` is already recorded for this day.
    pub fn contains(&self, hash: &B256) -> bool {
        self.transactions.iter().any(|tx| tx.hash == *hash)
    }

    /// Append a burn and update the aggregates. Duplicates are the caller's concern.
    pub fn push(&mut self, event: BurnEvent) {
        self.total_amount += event.amount;
        self.transaction_count += 1;
        self.transactions.push(event);
    }

    /// Recompute aggregates from the transaction list.
    pub fn recompute(&mut self) {
        self.total_amount = self.transactions.iter().map(|tx| tx.amount).sum();
        self.transaction_count = self.transactions.len();
    }
}
