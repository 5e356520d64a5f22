//! Chain access for the synchronizer.
//!
//! Everything above this module talks to the chain through [`ChainClient`],
//! the three calls the pipeline needs: the head block number, `eth_getLogs`
//! over an inclusive range, and a read-only `eth_call`. A time-travel fork
//! additionally implements [`ForkControl`].
//!
//! # Architecture
//!
//! ```text
//!   SyncController ──► ChainClient ◄── RpcClient (HTTP, rate limited)
//!                          ▲
//!                      ForkControl ◄── RpcClient pointed at a fork node
//! ```
//!
//! The traits return boxed futures so they can be used as trait objects
//! (`Arc<dyn ChainClient>`) and swapped for an in-memory chain in tests.

pub mod http;

pub use http::{create_provider, Provider, RpcClient};

use crate::error::{TrackerError, TrackerResult};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolCall;
use futures_util::future::BoxFuture;

/// Read access to a chain.
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    fn block_number(&self) -> BoxFuture<'_, TrackerResult<u64>>;

    /// Logs in `[from_block, to_block]` (inclusive) whose first topic is any
    /// of `topics`, in chain order.
    fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<B256>,
    ) -> BoxFuture<'_, TrackerResult<Vec<Log>>>;

    /// Read-only call against the latest state.
    fn call(&self, to: Address, input: Bytes) -> BoxFuture<'_, TrackerResult<Bytes>>;
}

/// Administrative control of a forked, time-travel node.
pub trait ForkControl: ChainClient {
    /// Move the fork clock forward.
    fn advance_time(&self, seconds: u64) -> BoxFuture<'_, TrackerResult<()>>;

    /// Mine `blocks` empty blocks.
    fn advance_blocks(&self, blocks: u64) -> BoxFuture<'_, TrackerResult<()>>;
}

/// ABI-encode `call`, send it to `to` and decode the return values.
///
/// # Errors
///
/// Returns the RPC error from the call, or a decoding error when the
/// returned bytes do not match the call's return types.
pub async fn eth_call<C: SolCall + Send>(
    chain: &dyn ChainClient,
    to: Address,
    call: C,
) -> TrackerResult<C::Return> {
    let output = chain.call(to, call.abi_encode().into()).await?;
    C::abi_decode_returns(&output, true).map_err(|e| {
        TrackerError::decoding(
            format!("Failed to decode {} return from {to}", C::SIGNATURE),
            Some(Box::new(e)),
        )
    })
}
