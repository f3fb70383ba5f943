//! Chain access for burn ingestion.
//!
//! This module provides:
//! - Transfer event decoding and amount scaling
//! - An endpoint pool with per-endpoint health
//! - The [`ChainSource`] seam and its alloy-backed implementation
//! - The chunked, failfast [`LogFetcher`]

pub mod endpoints;
pub mod events;
pub mod fetcher;
pub mod provider;

use anyhow::Result;
use async_trait::async_trait;

pub use endpoints::{EndpointPool, EndpointStatus};
pub use events::BurnLog;
pub use fetcher::LogFetcher;
pub use provider::RpcProvider;

/// Raw chain queries. Each call is a single attempt; retry policy lives in
/// the caller.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block number (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64>;

    /// Burn transfers in `[from, to]` (`eth_getLogs`).
    async fn burn_logs(&self, from: u64, to: u64) -> Result<Vec<BurnLog>>;

    /// Timestamp of `block` in seconds (`eth_getBlockByNumber`).
    async fn block_timestamp(&self, block: u64) -> Result<u64>;

    /// Token total supply in token units (`eth_call totalSupply()`).
    async fn total_supply(&self) -> Result<f64>;
}
