//! Chunked burn log fetching.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use burnledger_core::{BlockRange, BurnEvent};
use tracing::{debug, info};

use super::events::BurnLog;
use super::ChainSource;
use crate::retry::Failfast;

/// Fetches burn events over arbitrary block ranges in bounded chunks.
pub struct LogFetcher<S> {
    source: Arc<S>,
    failfast: Failfast,
    chunk_size: u64,
    decimals: u8,
}

impl<S: ChainSource> LogFetcher<S> {
    /// Create a new fetcher.
    pub fn new(source: Arc<S>, failfast: Failfast, chunk_size: u64, decimals: u8) -> Self {
        Self {
            source,
            failfast,
            chunk_size: chunk_size.max(1),
            decimals,
        }
    }

    /// Chain source used by this fetcher.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Current chain head. Retries until the node answers.
    pub async fn head(&self) -> u64 {
        self.failfast
            .run("eth_blockNumber", || self.source.block_number())
            .await
    }

    /// Token total supply. Retries until the node answers.
    pub async fn total_supply(&self) -> f64 {
        self.failfast
            .run("eth_call totalSupply()", || self.source.total_supply())
            .await
    }

    /// All burn events in `range`. Every RPC call is retried until it
    /// succeeds, so the result always covers the whole range. A log that
    /// cannot be turned into an event fails the fetch instead of being dropped.
    pub async fn fetch_range(&self, range: BlockRange) -> Result<Vec<BurnEvent>> {
        let chunks = range.chunks(self.chunk_size);
        info!(
            "Fetching burns for blocks {} ({} chunks of up to {} blocks)",
            range,
            chunks.len(),
            self.chunk_size
        );

        let mut events = Vec::new();
        for chunk in chunks {
            let logs = self
                .failfast
                .run(&format!("eth_getLogs {}", chunk), || {
                    self.source.burn_logs(chunk.start, chunk.end)
                })
                .await;

            let mut timestamps = HashMap::new();
            for log in logs {
                let timestamp = match timestamps.get(&log.block_number) {
                    Some(ts) => *ts,
                    None => {
                        let block = log.block_number;
                        let ts = self
                            .failfast
                            .run(&format!("eth_getBlockByNumber {}", block), || {
                                self.source.block_timestamp(block)
                            })
                            .await;
                        timestamps.insert(block, ts);
                        ts
                    }
                };
                events.push(self.to_event(log, timestamp)?);
            }
            debug!("Chunk {} done, {} burns so far", chunk, events.len());
        }

        info!("Found {} burns in blocks {}", events.len(), range);
        Ok(events)
    }

    /// Fetch one chunk with a single attempt per call. Used where the caller
    /// owns the retry budget.
    pub async fn try_fetch_chunk(&self, range: BlockRange) -> Result<Vec<BurnEvent>> {
        let logs = self.source.burn_logs(range.start, range.end).await?;

        let mut timestamps = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let timestamp = match timestamps.get(&log.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.source.block_timestamp(log.block_number).await?;
                    timestamps.insert(log.block_number, ts);
                    ts
                }
            };
            events.push(self.to_event(log, timestamp)?);
        }
        Ok(events)
    }

    fn to_event(&self, log: BurnLog, timestamp: u64) -> Result<BurnEvent> {
        let hash = log.tx_hash;
        log.into_event(timestamp, self.decimals)
            .with_context(|| format!("Failed to convert burn {}", hash))
    }
}
