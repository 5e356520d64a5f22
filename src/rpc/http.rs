//! HTTP JSON-RPC client.
//!
//! Wraps Alloy's HTTP `RootProvider` and implements [`ChainClient`] and
//! [`ForkControl`] on top of it. Outbound requests can be throttled with a
//! `governor` rate limiter so a single cycle's fan-out stays under the
//! provider's request quota.
//!
//! ## Example
//!
//! ```no_run
//! use dex_state_sync::rpc::{ChainClient, RpcClient};
//! use dex_state_sync::error::TrackerResult;
//!
//! # async fn example() -> TrackerResult<()> {
//! let client = RpcClient::connect("https://eth-mainnet.g.alchemy.com/v2/API_KEY", Some(25))?;
//! let head = client.block_number().await?;
//! println!("Latest block: {head}");
//! # Ok(())
//! # }
//! ```

use super::{ChainClient, ForkControl};
use crate::error::{TrackerError, TrackerResult};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider as AlloyProvider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionRequest};
use alloy::transports::http::{Client, Http};
use futures_util::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Type alias for the HTTP provider.
pub type Provider = RootProvider<Http<Client>>;

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new RPC provider connected via HTTP.
///
/// # Errors
///
/// Returns an error if the RPC URL cannot be parsed.
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub fn create_provider(rpc_url: &str) -> TrackerResult<Provider> {
    // Log only the host, never the API key path
    let host = rpc_url.split("/v2/").next().unwrap_or("unknown");
    tracing::Span::current().record("rpc_host", host);
    debug!(rpc_host = host, "Creating HTTP provider");

    let url = rpc_url.parse().map_err(|e| {
        TrackerError::config(
            format!("Failed to parse RPC URL for host '{host}'"),
            Some(Box::new(e)),
        )
    })?;

    Ok(ProviderBuilder::new().on_http(url))
}

/// Chain client backed by an HTTP provider.
#[derive(Clone)]
pub struct RpcClient {
    provider: Provider,
    limiter: Option<SharedRateLimiter>,
}

impl RpcClient {
    /// Connect to `rpc_url`, optionally throttled to `requests_per_second`.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC URL cannot be parsed.
    pub fn connect(rpc_url: &str, requests_per_second: Option<u32>) -> TrackerResult<Self> {
        let provider = create_provider(rpc_url)?;
        let limiter = requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));

        info!(
            throttled = limiter.is_some(),
            "RPC client initialized successfully"
        );

        Ok(Self { provider, limiter })
    }

    /// Access the underlying provider.
    #[must_use]
    pub const fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn fork_request(&self, method: &'static str, amount: u64) -> TrackerResult<()> {
        self.throttle().await;
        self.provider
            .raw_request::<_, serde_json::Value>(method.into(), vec![format!("{amount:#x}")])
            .await
            .map_err(|e| TrackerError::rpc(format!("{method} failed"), Some(Box::new(e))))?;
        debug!(method, amount, "Fork advanced");
        Ok(())
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("throttled", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl ChainClient for RpcClient {
    fn block_number(&self) -> BoxFuture<'_, TrackerResult<u64>> {
        Box::pin(async move {
            self.throttle().await;
            self.provider.get_block_number().await.map_err(|e| {
                TrackerError::rpc("Failed to fetch latest block number", Some(Box::new(e)))
            })
        })
    }

    fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<B256>,
    ) -> BoxFuture<'_, TrackerResult<Vec<Log>>> {
        Box::pin(async move {
            self.throttle().await;
            let topic_count = topics.len();
            let filter = Filter::new()
                .event_signature(topics)
                .from_block(from_block)
                .to_block(to_block);

            let start = std::time::Instant::now();
            let logs = self.provider.get_logs(&filter).await.map_err(|e| {
                TrackerError::rpc(
                    format!("Failed to fetch logs for blocks {from_block}-{to_block}"),
                    Some(Box::new(e)),
                )
            })?;

            debug!(
                from_block,
                to_block,
                topic_count,
                logs = logs.len(),
                duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Fetched logs"
            );
            Ok(logs)
        })
    }

    fn call(&self, to: Address, input: Bytes) -> BoxFuture<'_, TrackerResult<Bytes>> {
        Box::pin(async move {
            self.throttle().await;
            let request = TransactionRequest::default()
                .to(to)
                .input(TransactionInput::new(input));
            self.provider
                .call(&request)
                .await
                .map_err(|e| TrackerError::rpc(format!("eth_call to {to} failed"), Some(Box::new(e))))
        })
    }
}

impl ForkControl for RpcClient {
    fn advance_time(&self, seconds: u64) -> BoxFuture<'_, TrackerResult<()>> {
        Box::pin(self.fork_request("evm_increaseTime", seconds))
    }

    fn advance_blocks(&self, blocks: u64) -> BoxFuture<'_, TrackerResult<()>> {
        Box::pin(self.fork_request("evm_increaseBlocks", blocks))
    }
}
