//! Event bindings and the update records they decode into.
//!
//! Event signatures are declared with Alloy's `sol!` macro so topics and
//! decoders are generated at compile time. Each family's decoder turns a raw
//! log into an [`UpdateRecord`], the unit the pool store applies.
//!
//! Records are totally ordered by [`OrderingKey`] (block number, then log
//! index). A pool only ever moves forward along that order.
//!
//! ## Example
//!
//! ```
//! use dex_state_sync::events::{order_records, EventKind, OrderingKey, Payload, UpdateRecord};
//! use alloy::primitives::{Address, U256};
//!
//! let record = |block, index, r0: u64| UpdateRecord {
//!     pool_key: Address::ZERO,
//!     block_number: block,
//!     log_index: index,
//!     kind: EventKind::Sync,
//!     payload: Payload::Reserves { reserve0: U256::from(r0), reserve1: U256::ZERO },
//! };
//!
//! let mut records = vec![record(10, 5, 2), record(10, 2, 1)];
//! order_records(&mut records);
//! assert_eq!(records[0].ordering_key(), OrderingKey::new(10, 2));
//! ```

use crate::error::{TrackerError, TrackerResult};
use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

sol! {
    /// Constant-product pair and factory events.
    interface IUniswapV2 {
        /// Emitted after every swap, mint or burn with the new reserves.
        event Sync(uint112 reserve0, uint112 reserve1);

        event PairCreated(address indexed token0, address indexed token1, address pair, uint256 allPairsLength);
    }

    /// Concentrated-liquidity pool and factory events.
    interface IUniswapV3 {
        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );

        event PoolCreated(
            address indexed token0,
            address indexed token1,
            uint24 indexed fee,
            int24 tickSpacing,
            address pool
        );
    }

    /// Solidly-style pair and factory events.
    interface ISolidly {
        /// Solidly forks widen reserves to uint256, which changes the topic.
        event Sync(uint256 reserve0, uint256 reserve1);

        event PairCreated(address indexed token0, address indexed token1, bool stable, address pair, uint256 allPairsLength);

        /// Velodrome/Aerodrome v2 factories.
        event PoolCreated(address indexed token0, address indexed token1, bool indexed stable, address pool, uint256 allPoolsLength);

        event SetCustomFee(address indexed pool, uint256 fee);
    }

    /// Xfai single-sided pool factory.
    interface IXfai {
        event PoolCreated(address indexed token, address indexed pool, uint256 allPoolsSize);
    }
}

/// What an update record changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Pool state (reserves, price, liquidity) changed.
    Sync,
    /// A factory created a pool.
    Created,
    /// A pool's fee changed.
    FeeChanged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Created => write!(f, "created"),
            Self::FeeChanged => write!(f, "fee_changed"),
        }
    }
}

/// Position of a log in the chain.
///
/// Derived ordering compares the block first, then the log index.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OrderingKey {
    /// Block the log was emitted in
    pub block_number: u64,
    /// Index of the log within its block
    pub log_index: u64,
}

impl OrderingKey {
    /// Key of bootstrap data, older than any real log.
    pub const ZERO: Self = Self::new(0, 0);

    /// Create a key.
    #[must_use]
    pub const fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.block_number, self.log_index)
    }
}

/// Minimal description of a pool, enough for an adapter to resolve the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    /// Exchange the pool belongs to
    pub exchange_name: String,
    /// Pool contract address
    pub address: Address,
    /// First token, when the creation event carries it
    pub token0: Option<Address>,
    /// Second token, when the creation event carries it
    pub token1: Option<Address>,
    /// Raw fee, when the creation event carries it
    pub fee_raw: Option<U256>,
}

impl PoolDescriptor {
    /// Descriptor with only an address; everything else is resolved on chain.
    #[must_use]
    pub fn bare(exchange_name: impl Into<String>, address: Address) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            address,
            token0: None,
            token1: None,
            fee_raw: None,
        }
    }
}

/// Decoded event contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Reserve pair of a constant-product style pool.
    Reserves {
        /// Reserve of token0
        reserve0: U256,
        /// Reserve of token1
        reserve1: U256,
    },
    /// Price, in-range liquidity and tick of a concentrated-liquidity pool.
    Concentrated {
        /// Square root price as a Q64.96
        sqrt_price_x96: U256,
        /// Active liquidity
        liquidity: u128,
        /// Current tick
        tick: i32,
    },
    /// New pool fee.
    Fee {
        /// Fee as reported by the contract
        raw: U256,
        /// Fee as a fraction of the traded amount
        fraction: f64,
    },
    /// A pool was created.
    Created(PoolDescriptor),
}

/// One decoded log, keyed by the pool it affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Address of the pool the record applies to
    pub pool_key: Address,
    /// Block the log was emitted in
    pub block_number: u64,
    /// Index of the log within its block
    pub log_index: u64,
    /// What the record changes
    pub kind: EventKind,
    /// Decoded contents
    pub payload: Payload,
}

impl UpdateRecord {
    /// Create a record at the position of `log`.
    ///
    /// # Errors
    ///
    /// Returns a decoding error for pending logs that lack a block number or
    /// log index.
    pub fn at_log(log: &Log, pool_key: Address, kind: EventKind, payload: Payload) -> TrackerResult<Self> {
        let block_number = log.block_number.ok_or_else(|| {
            TrackerError::decoding(format!("Log from {} has no block number", log.address()), None)
        })?;
        let log_index = log.log_index.ok_or_else(|| {
            TrackerError::decoding(format!("Log from {} has no log index", log.address()), None)
        })?;

        Ok(Self {
            pool_key,
            block_number,
            log_index,
            kind,
            payload,
        })
    }

    /// Position of the record in the chain.
    #[must_use]
    pub const fn ordering_key(&self) -> OrderingKey {
        OrderingKey::new(self.block_number, self.log_index)
    }
}

/// Sort records into chain order.
///
/// The sort is stable, so records sharing a key keep their arrival order.
pub fn order_records(records: &mut [UpdateRecord]) {
    records.sort_by_key(UpdateRecord::ordering_key);
}

/// Decode `log` as event `E`.
///
/// # Errors
///
/// Returns a decoding error when the topics or data do not match `E`.
pub fn decode_event<E: SolEvent>(log: &Log) -> TrackerResult<E> {
    E::decode_log_data(log.data(), true).map_err(|e| {
        TrackerError::decoding(
            format!("Failed to decode {} from {}", E::SIGNATURE, log.address()),
            Some(Box::new(e)),
        )
    })
}
