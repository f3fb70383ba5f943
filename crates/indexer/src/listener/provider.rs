//! alloy-backed [`ChainSource`] over an endpoint pool.

use std::future::Future;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log, TransactionInput, TransactionRequest};
use alloy::sol_types::{SolCall, SolEvent};
use alloy::transports::http::{Client, Http};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::endpoints::{EndpointPool, EndpointStatus};
use super::events::{decode_burn_logs, scale_amount, BurnLog, Transfer, IERC20};
use super::ChainSource;
use crate::config::{NetworkConfig, TokenConfig};

type HttpProvider = RootProvider<Http<Client>>;

/// HTTP RPC provider for querying Ethereum.
pub struct RpcProvider {
    pool: EndpointPool<HttpProvider>,
    token: Address,
    burn_address: Address,
    decimals: u8,
}

impl RpcProvider {
    /// Create a provider for every configured RPC URL.
    pub fn new(network: &NetworkConfig, token: &TokenConfig) -> Result<Self> {
        let mut endpoints = Vec::with_capacity(network.rpc_urls.len());
        for rpc_url in &network.rpc_urls {
            let url = rpc_url
                .parse()
                .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;
            endpoints.push((rpc_url.clone(), ProviderBuilder::new().on_http(url)));
        }

        let pool = EndpointPool::new(endpoints);
        if pool.is_empty() {
            anyhow::bail!("At least one RPC URL is required");
        }

        Ok(Self {
            pool,
            token: token.address,
            burn_address: token.burn_address,
            decimals: token.decimals,
        })
    }

    /// Health of each endpoint.
    pub fn endpoint_status(&self) -> Vec<EndpointStatus> {
        self.pool.status()
    }

    /// Run one call against the healthiest endpoint and record the outcome.
    async fn with_endpoint<'a, T, F, Fut>(&'a self, method: &str, call: F) -> Result<T>
    where
        F: FnOnce(&'a HttpProvider) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (idx, endpoint) = self
            .pool
            .select()
            .ok_or_else(|| anyhow!("No RPC endpoints configured"))?;

        match call(endpoint.client()).await {
            Ok(value) => {
                self.pool.record_success(idx);
                Ok(value)
            }
            Err(e) => {
                self.pool.record_failure(idx);
                debug!("{} failed on {}: {:#}", method, endpoint.url(), e);
                Err(e.context(format!("{} via {}", method, endpoint.url())))
            }
        }
    }
}

#[async_trait]
impl ChainSource for RpcProvider {
    async fn block_number(&self) -> Result<u64> {
        self.with_endpoint("eth_blockNumber", |provider| async move {
            provider
                .get_block_number()
                .await
                .context("Failed to get block number")
        })
        .await
    }

    async fn burn_logs(&self, from: u64, to: u64) -> Result<Vec<BurnLog>> {
        let filter = Filter::new()
            .address(self.token)
            .event_signature(Transfer::SIGNATURE_HASH)
            .topic2(self.burn_address.into_word())
            .from_block(from)
            .to_block(to);

        let logs: Vec<Log> = self
            .with_endpoint("eth_getLogs", |provider| {
                let filter = &filter;
                async move {
                    provider
                        .get_logs(filter)
                        .await
                        .context("Failed to fetch logs from RPC")
                }
            })
            .await?;

        decode_burn_logs(&logs)
            .with_context(|| format!("Bad burn log in blocks {}-{}", from, to))
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        self.with_endpoint("eth_getBlockByNumber", |provider| async move {
            let block_data = provider
                .get_block_by_number(
                    BlockNumberOrTag::Number(block),
                    BlockTransactionsKind::Hashes,
                )
                .await
                .with_context(|| format!("Failed to get block {}", block))?
                .with_context(|| format!("Block {} not found", block))?;
            Ok(block_data.header.timestamp)
        })
        .await
    }

    async fn total_supply(&self) -> Result<f64> {
        let request = TransactionRequest::default()
            .to(self.token)
            .input(TransactionInput::new(Bytes::from(
                IERC20::totalSupplyCall {}.abi_encode(),
            )));

        let raw = self
            .with_endpoint("eth_call totalSupply", |provider| {
                let request = &request;
                async move {
                    provider
                        .call(request)
                        .await
                        .context("Failed to call totalSupply()")
                }
            })
            .await?;

        let supply = IERC20::totalSupplyCall::abi_decode_returns(&raw, true)
            .context("Failed to decode totalSupply() result")?
            .supply;
        scale_amount(supply, self.decimals)
    }
}
