//! # DEX Pool State Synchronizer
//!
//! Keeps an in-memory, reorg-safe view of decentralized-exchange pool state
//! (reserves, concentrated-liquidity price points, fees) in sync with an
//! EVM chain, using [Alloy](https://github.com/alloy-rs/alloy) for chain
//! access and ABI decoding.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! 1. **Subscriptions** ([`subscription`]): one event topic plus its decoder
//! 2. **Exchange adapters** ([`exchanges`]): per-protocol strategy tables for
//!    tokens, fees, state reads and event decoding
//! 3. **Log gatherer** ([`gatherer`]): one `eth_getLogs` per distinct topic,
//!    fanned out concurrently, merged in chain order
//! 4. **Pool store** ([`store`]): keyed, idempotent view with maintenance passes
//! 5. **Sync controller** ([`sync`]): the polling state machine with reorg
//!    delay, replay/fork support and periodic terraforming
//!
//! Supporting modules: [`config`], [`error`], [`events`], [`rpc`],
//! [`reorg`], [`bootstrap`], [`tokens`], [`cache`], [`snapshot`],
//! [`observability`] and [`cli`].
//!
//! ## Quick Start
//!
//! ```bash
//! RPC_URL=https://eth.example/rpc cargo run --release -- run
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::TrackerResult<T>`](error::TrackerResult):
//!
//! ```rust
//! use dex_state_sync::error::{TrackerError, TrackerResult};
//!
//! fn example() -> TrackerResult<()> {
//!     Err(TrackerError::config("EXCHANGES must name at least one exchange", None))
//! }
//! assert!(example().is_err());
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test
//! # Network-dependent tests
//! RPC_URL=... cargo test -- --ignored
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod exchanges;
pub mod gatherer;
pub mod observability;
pub mod reorg;
pub mod rpc;
pub mod snapshot;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod tokens;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
