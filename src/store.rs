//! Materialized pool state.
//!
//! The [`PoolStore`] is the keyed view every cycle writes into. It is owned
//! exclusively by the sync controller.
//!
//! ## Invariants
//!
//! - Pools are keyed by canonical id, the keccak256 of
//!   `"<exchange> <address> <token0>/<token1>"`.
//! - After [`PoolStore::deduplicate`], every address maps to exactly one
//!   active pool. Collisions keep the pool observed first (lowest
//!   `first_seen_block`, then lowest canonical id).
//! - A record only mutates a pool when its ordering key is strictly greater
//!   than the pool's `last_updated`, which makes [`PoolStore::apply`]
//!   idempotent.
//! - Pools leave the active set only through maintenance passes. Excluded
//!   pools are remembered by address so they are not resolved again.
//!
//! ## Example
//!
//! ```
//! use dex_state_sync::events::{EventKind, Payload, UpdateRecord};
//! use dex_state_sync::store::{Pool, PoolState, PoolStore};
//! use alloy::primitives::{address, U256};
//!
//! let pair = address!("0d4a11d5EEaaC28EC3F61d100daF4d40471f1852");
//! let mut store = PoolStore::new();
//! store.upsert_from_bootstrap(Pool::new(
//!     "uniswap_v2",
//!     pair,
//!     address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
//!     address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
//!     "0.003".to_string(),
//!     0.003,
//!     PoolState::Uninitialized,
//!     0,
//! ));
//!
//! let report = store.apply(&[UpdateRecord {
//!     pool_key: pair,
//!     block_number: 100,
//!     log_index: 0,
//!     kind: EventKind::Sync,
//!     payload: Payload::Reserves { reserve0: U256::from(1), reserve1: U256::from(2) },
//! }]);
//! assert_eq!(report.applied, 1);
//! assert_eq!(store.get_by_address(&pair).map(|p| p.last_updated_block()), Some(100));
//! ```

use crate::events::{OrderingKey, Payload, UpdateRecord};
use crate::snapshot::PoolSnapshot;
use crate::tokens::TokenRegistry;
use alloy::primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// On-chain state of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolState {
    /// No state observed yet.
    Uninitialized,
    /// Reserve pair.
    Reserves {
        /// Reserve of token0
        reserve0: U256,
        /// Reserve of token1
        reserve1: U256,
    },
    /// Concentrated-liquidity price point.
    Concentrated {
        /// Square root price as a Q64.96
        sqrt_price_x96: U256,
        /// Active liquidity
        liquidity: u128,
        /// Current tick
        tick: i32,
    },
}

impl PoolState {
    /// Whether the pool can be traded against.
    #[must_use]
    pub fn has_liquidity(&self) -> bool {
        match self {
            Self::Uninitialized => false,
            Self::Reserves { reserve0, reserve1 } => !reserve0.is_zero() && !reserve1.is_zero(),
            Self::Concentrated { liquidity, .. } => *liquidity > 0,
        }
    }
}

/// A materialized pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// keccak256 of the pool descriptor
    pub canonical_id: B256,
    /// Pool contract
    pub address: Address,
    /// Exchange the pool belongs to
    pub exchange_name: String,
    /// First token
    pub token0: Address,
    /// Second token
    pub token1: Address,
    /// Fee as displayed
    pub fee: String,
    /// Fee as a fraction of the traded amount
    pub fee_float: f64,
    /// Current state
    pub state: PoolState,
    /// Key of the last record applied
    pub last_updated: OrderingKey,
    /// Block the pool was first observed at
    pub first_seen_block: u64,
}

impl Pool {
    /// Create a pool. Its canonical id is derived from the descriptor.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        exchange_name: impl Into<String>,
        address: Address,
        token0: Address,
        token1: Address,
        fee: String,
        fee_float: f64,
        state: PoolState,
        first_seen_block: u64,
    ) -> Self {
        let exchange_name = exchange_name.into();
        Self {
            canonical_id: canonical_id(&exchange_name, address, token0, token1),
            address,
            exchange_name,
            token0,
            token1,
            fee,
            fee_float,
            state,
            last_updated: OrderingKey::ZERO,
            first_seen_block,
        }
    }

    /// Block of the last record applied.
    #[must_use]
    pub const fn last_updated_block(&self) -> u64 {
        self.last_updated.block_number
    }

    /// Whether `other` trades identically: same tokens, fee and state.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn same_market(&self, other: &Self) -> bool {
        self.address == other.address
            && self.token0 == other.token0
            && self.token1 == other.token1
            && self.fee_float == other.fee_float
            && self.state == other.state
    }

    fn apply(&mut self, payload: &Payload, key: OrderingKey) {
        match payload {
            Payload::Reserves { reserve0, reserve1 } => {
                self.state = PoolState::Reserves {
                    reserve0: *reserve0,
                    reserve1: *reserve1,
                };
            }
            Payload::Concentrated {
                sqrt_price_x96,
                liquidity,
                tick,
            } => {
                self.state = PoolState::Concentrated {
                    sqrt_price_x96: *sqrt_price_x96,
                    liquidity: *liquidity,
                    tick: *tick,
                };
            }
            Payload::Fee { fraction, .. } => {
                self.fee = fraction.to_string();
                self.fee_float = *fraction;
            }
            // Creation carries metadata only; the store inserts those pools separately.
            Payload::Created(_) => return,
        }
        self.last_updated = key;
    }
}

/// Tokens and fee of a pool as read from chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetadata {
    /// First token
    pub token0: Address,
    /// Second token
    pub token1: Address,
    /// Fee as displayed
    pub fee: String,
    /// Fee as a fraction of the traded amount
    pub fee_float: f64,
}

/// Canonical id of a pool descriptor.
#[must_use]
pub fn canonical_id(exchange_name: &str, address: Address, token0: Address, token1: Address) -> B256 {
    keccak256(format!("{exchange_name} {address} {token0}/{token1}"))
}

/// Why a pool is not in the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Tokens or fee could not be resolved.
    MetadataUnresolved,
    /// A token is not in the registry.
    UnknownToken,
    /// The pool holds no liquidity. Revived by a newer state update.
    ZeroLiquidity,
    /// The pool's exchange is not enabled.
    DisabledExchange,
}

/// A pool outside the active set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedPool {
    /// Exchange the pool belongs to
    pub exchange_name: String,
    /// Why it was excluded
    pub reason: ExclusionReason,
    /// The pool, when it was resolved before exclusion
    pub pool: Option<Pool>,
}

/// Outcome of inserting a bootstrap pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The pool is new.
    Inserted,
    /// A pool with the same canonical id already exists.
    Duplicate,
    /// The address is remembered as excluded.
    KnownInvalid,
}

/// Counters from one [`PoolStore::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Records that mutated a pool
    pub applied: usize,
    /// Records at or behind the pool's last update
    pub stale: usize,
    /// Records for pools the store does not track
    pub unknown: usize,
    /// Zero-liquidity pools brought back by a record
    pub revived: usize,
}

/// Counters from one maintenance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Pools dropped as duplicates
    pub duplicates: usize,
    /// Pools of disabled exchanges
    pub disabled_exchange: usize,
    /// Pools with a token outside the registry
    pub unknown_token: usize,
    /// Pools without liquidity
    pub zero_liquidity: usize,
}

impl MaintenanceReport {
    /// Total pools removed from the active set.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.duplicates + self.disabled_exchange + self.unknown_token + self.zero_liquidity
    }
}

/// Keyed, idempotent pool view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStore {
    pools: HashMap<B256, Pool>,
    by_address: HashMap<Address, B256>,
    excluded: HashMap<Address, ExcludedPool>,
}

impl PoolStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether there are no active pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Number of excluded pools.
    #[must_use]
    pub fn excluded_len(&self) -> usize {
        self.excluded.len()
    }

    /// Active pool by canonical id.
    #[must_use]
    pub fn get(&self, canonical_id: &B256) -> Option<&Pool> {
        self.pools.get(canonical_id)
    }

    /// Active pool at `address`.
    #[must_use]
    pub fn get_by_address(&self, address: &Address) -> Option<&Pool> {
        self.by_address.get(address).and_then(|cid| self.pools.get(cid))
    }

    /// Exclusion entry for `address`.
    #[must_use]
    pub fn excluded(&self, address: &Address) -> Option<&ExcludedPool> {
        self.excluded.get(address)
    }

    /// Whether `address` is remembered as excluded.
    #[must_use]
    pub fn is_known_invalid(&self, address: &Address) -> bool {
        self.excluded.contains_key(address)
    }

    /// Whether the store knows `address`, active or excluded.
    #[must_use]
    pub fn knows(&self, address: &Address) -> bool {
        self.by_address.contains_key(address) || self.excluded.contains_key(address)
    }

    /// Iterate active pools in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    /// Exchanges with at least one active pool.
    #[must_use]
    pub fn exchanges(&self) -> HashSet<String> {
        self.pools.values().map(|p| p.exchange_name.clone()).collect()
    }

    /// Insert a pool resolved from the bootstrap dataset.
    ///
    /// Repeated canonical ids keep the earliest observation. Call
    /// [`PoolStore::deduplicate`] after a bulk load.
    pub fn upsert_from_bootstrap(&mut self, pool: Pool) -> UpsertOutcome {
        if self.excluded.contains_key(&pool.address) {
            return UpsertOutcome::KnownInvalid;
        }

        if let Some(existing) = self.pools.get_mut(&pool.canonical_id) {
            existing.first_seen_block = existing.first_seen_block.min(pool.first_seen_block);
            return UpsertOutcome::Duplicate;
        }

        self.by_address.entry(pool.address).or_insert(pool.canonical_id);
        self.pools.insert(pool.canonical_id, pool);
        UpsertOutcome::Inserted
    }

    /// Insert a pool discovered from a creation event.
    ///
    /// Returns `false` when the address is already known.
    pub fn insert_created(&mut self, pool: Pool) -> bool {
        if self.knows(&pool.address) {
            return false;
        }
        self.by_address.insert(pool.address, pool.canonical_id);
        self.pools.insert(pool.canonical_id, pool);
        true
    }

    /// Remember that `address` could not be resolved.
    pub fn mark_invalid(&mut self, exchange_name: impl Into<String>, address: Address) {
        self.excluded.insert(
            address,
            ExcludedPool {
                exchange_name: exchange_name.into(),
                reason: ExclusionReason::MetadataUnresolved,
                pool: None,
            },
        );
    }

    /// Replace the tokens and fee of the active pool at `address`.
    ///
    /// State, `last_updated` and `first_seen_block` are kept. A token change
    /// moves the pool to its new canonical id; it is refused when another
    /// pool already holds that id. Returns whether anything changed.
    pub fn refresh_metadata(&mut self, address: Address, metadata: PoolMetadata) -> bool {
        let Some(cid) = self.by_address.get(&address).copied() else {
            return false;
        };
        let Some(pool) = self.pools.get(&cid) else {
            return false;
        };
        let fee_changed = pool.fee != metadata.fee || pool.fee_float.to_bits() != metadata.fee_float.to_bits();
        let tokens_changed = pool.token0 != metadata.token0 || pool.token1 != metadata.token1;
        if !fee_changed && !tokens_changed {
            return false;
        }

        let new_cid = canonical_id(&pool.exchange_name, address, metadata.token0, metadata.token1);
        if new_cid != cid && self.pools.contains_key(&new_cid) {
            warn!(pool = %address, "Refreshed tokens collide with another pool, keeping old metadata");
            return false;
        }

        let Some(mut pool) = self.pools.remove(&cid) else {
            return false;
        };
        pool.token0 = metadata.token0;
        pool.token1 = metadata.token1;
        pool.fee = metadata.fee;
        pool.fee_float = metadata.fee_float;
        pool.canonical_id = new_cid;
        self.by_address.insert(address, new_cid);
        self.pools.insert(new_cid, pool);
        true
    }

    /// Apply records in the given order.
    ///
    /// Callers sort with [`crate::events::order_records`] first. Applying the
    /// same records twice leaves the store unchanged.
    pub fn apply(&mut self, records: &[UpdateRecord]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for record in records {
            if matches!(record.payload, Payload::Created(_)) {
                continue;
            }

            let key = record.ordering_key();
            let cid = match self.by_address.get(&record.pool_key) {
                Some(cid) => *cid,
                None => match self.revive(record.pool_key, key) {
                    Some(cid) => {
                        report.revived += 1;
                        cid
                    }
                    None => {
                        report.unknown += 1;
                        continue;
                    }
                },
            };

            let Some(pool) = self.pools.get_mut(&cid) else {
                report.unknown += 1;
                continue;
            };

            if key <= pool.last_updated {
                report.stale += 1;
                continue;
            }

            pool.apply(&record.payload, key);
            report.applied += 1;
        }

        debug!(
            applied = report.applied,
            stale = report.stale,
            unknown = report.unknown,
            revived = report.revived,
            "Applied update records"
        );
        report
    }

    fn revive(&mut self, address: Address, key: OrderingKey) -> Option<B256> {
        let eligible = matches!(
            self.excluded.get(&address),
            Some(ExcludedPool {
                reason: ExclusionReason::ZeroLiquidity,
                pool: Some(pool),
                ..
            }) if pool.last_updated < key
        );
        if !eligible {
            return None;
        }

        let pool = self.excluded.remove(&address)?.pool?;
        let cid = pool.canonical_id;
        self.by_address.insert(address, cid);
        self.pools.insert(cid, pool);
        Some(cid)
    }

    /// Keep one pool per address.
    ///
    /// Returns the number of pools dropped.
    pub fn deduplicate(&mut self) -> usize {
        let mut winners: HashMap<Address, B256> = HashMap::with_capacity(self.pools.len());

        for (cid, pool) in &self.pools {
            let replace = winners.get(&pool.address).map_or(true, |current| {
                self.pools
                    .get(current)
                    .map_or(true, |held| (pool.first_seen_block, *cid) < (held.first_seen_block, *current))
            });
            if replace {
                winners.insert(pool.address, *cid);
            }
        }

        let before = self.pools.len();
        self.pools.retain(|cid, pool| winners.get(&pool.address) == Some(cid));
        self.by_address = winners;

        let dropped = before - self.pools.len();
        if dropped > 0 {
            info!(dropped, "Removed duplicate pools");
        }
        dropped
    }

    /// Move every pool matching `should_drop` out of the active set.
    ///
    /// Returns the number of pools removed.
    pub fn purge<F>(&mut self, reason: ExclusionReason, should_drop: F) -> usize
    where
        F: Fn(&Pool) -> bool,
    {
        let doomed: Vec<B256> = self
            .pools
            .iter()
            .filter(|(_, pool)| should_drop(pool))
            .map(|(cid, _)| *cid)
            .collect();

        for cid in &doomed {
            if let Some(pool) = self.pools.remove(cid) {
                if self.by_address.get(&pool.address) == Some(cid) {
                    self.by_address.remove(&pool.address);
                }
                self.excluded.insert(
                    pool.address,
                    ExcludedPool {
                        exchange_name: pool.exchange_name.clone(),
                        reason,
                        pool: Some(pool),
                    },
                );
            }
        }

        doomed.len()
    }

    /// Deduplicate, then drop pools of disabled exchanges, pools with unknown
    /// tokens and pools without liquidity.
    ///
    /// An empty token registry skips the unknown-token pass.
    pub fn run_maintenance<F>(&mut self, tokens: &TokenRegistry, is_enabled: F) -> MaintenanceReport
    where
        F: Fn(&str) -> bool,
    {
        let duplicates = self.deduplicate();
        let disabled_exchange = self.purge(ExclusionReason::DisabledExchange, |pool| {
            !is_enabled(&pool.exchange_name)
        });
        let unknown_token = if tokens.is_empty() {
            0
        } else {
            self.purge(ExclusionReason::UnknownToken, |pool| {
                !tokens.contains(&pool.token0) || !tokens.contains(&pool.token1)
            })
        };
        let zero_liquidity = self.purge(ExclusionReason::ZeroLiquidity, |pool| {
            !pool.state.has_liquidity()
        });

        let report = MaintenanceReport {
            duplicates,
            disabled_exchange,
            unknown_token,
            zero_liquidity,
        };
        if report.total() > 0 {
            debug!(?report, "Maintenance removed pools");
        }
        report
    }

    /// Immutable view of the active pools.
    #[must_use]
    pub fn snapshot(&self, block_number: u64, tokens: Arc<TokenRegistry>) -> PoolSnapshot {
        let pools: BTreeMap<B256, Pool> = self
            .pools
            .iter()
            .map(|(cid, pool)| (*cid, pool.clone()))
            .collect();
        PoolSnapshot::new(block_number, Arc::new(pools), tokens)
    }
}
