//! ERC-20 Transfer decoding for burn detection.

use alloy::primitives::{utils::format_units, Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use burnledger_core::BurnEvent;

// ERC-20 Transfer event and the totalSupply() view
sol! {
    /// ERC-20 Transfer event
    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    /// ERC-20 supply view
    interface IERC20 {
        function totalSupply() external view returns (uint256 supply);
    }
}

/// A decoded burn log, before its block timestamp is known.
#[derive(Debug, Clone, PartialEq)]
pub struct BurnLog {
    /// Transaction hash
    pub tx_hash: B256,

    /// Block number where the transfer occurred
    pub block_number: u64,

    /// Sender of the burned tokens
    pub from: Address,

    /// Raw token amount (smallest unit)
    pub value: U256,
}

impl BurnLog {
    /// Parse a Transfer log. Fails if the log is not a Transfer or lacks block
    /// coordinates.
    pub fn from_log(log: &Log) -> Result<Self> {
        let event = Transfer::decode_log(log.as_ref(), true)
            .context("Failed to decode Transfer event")?;

        let block_number = log.block_number.context("Log missing block_number")?;
        let tx_hash = log
            .transaction_hash
            .context("Log missing transaction_hash")?;

        Ok(Self {
            tx_hash,
            block_number,
            from: event.from,
            value: event.value,
        })
    }

    /// Attach the block timestamp and scale the amount by token decimals.
    pub fn into_event(self, timestamp: u64, decimals: u8) -> Result<BurnEvent> {
        Ok(BurnEvent {
            hash: self.tx_hash,
            block_number: self.block_number,
            timestamp,
            amount: scale_amount(self.value, decimals)?,
            from_address: self.from,
        })
    }
}

/// Decode every log of a burn query. The query is filtered on the Transfer
/// topic and burn address, so a log that does not decode fails the batch.
pub fn decode_burn_logs(logs: &[Log]) -> Result<Vec<BurnLog>> {
    logs.iter()
        .map(|log| {
            BurnLog::from_log(log).with_context(|| {
                format!(
                    "Undecodable Transfer log in tx {:?}",
                    log.transaction_hash
                )
            })
        })
        .collect()
}

/// Convert a raw token amount to token units.
pub fn scale_amount(value: U256, decimals: u8) -> Result<f64> {
    let formatted = format_units(value, decimals)
        .with_context(|| format!("Failed to format amount {value} with {decimals} decimals"))?;
    formatted
        .parse::<f64>()
        .with_context(|| format!("Failed to parse formatted amount '{formatted}'"))
}
