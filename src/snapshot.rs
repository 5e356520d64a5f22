//! Read-only pool views handed to the downstream search.
//!
//! A [`PoolSnapshot`] is detached from the store: later cycles never mutate
//! a snapshot already handed off. Consumers receive snapshots through
//! [`SnapshotConsumer`] once a cycle's maintenance has finished.

use crate::store::Pool;
use crate::tokens::TokenRegistry;
use alloy::primitives::{Address, B256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Immutable `canonical id -> pool` view plus the token registry.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    block_number: u64,
    pools: Arc<BTreeMap<B256, Pool>>,
    tokens: Arc<TokenRegistry>,
}

impl PoolSnapshot {
    /// Create a snapshot as of `block_number`.
    #[must_use]
    pub const fn new(block_number: u64, pools: Arc<BTreeMap<B256, Pool>>, tokens: Arc<TokenRegistry>) -> Self {
        Self {
            block_number,
            pools,
            tokens,
        }
    }

    /// Last block reflected in the snapshot.
    #[must_use]
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Pools by canonical id.
    #[must_use]
    pub fn pools(&self) -> &BTreeMap<B256, Pool> {
        &self.pools
    }

    /// Token registry.
    #[must_use]
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Pool by canonical id.
    #[must_use]
    pub fn get(&self, canonical_id: &B256) -> Option<&Pool> {
        self.pools.get(canonical_id)
    }

    /// Pool at `address`.
    #[must_use]
    pub fn get_by_address(&self, address: &Address) -> Option<&Pool> {
        self.pools.values().find(|pool| pool.address == *address)
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the snapshot holds no pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Whether both snapshots present the same market, ignoring the block
    /// and the keys of the last applied records.
    #[must_use]
    pub fn same_pools_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pools, &other.pools)
            || (self.pools.len() == other.pools.len()
                && self
                    .pools
                    .iter()
                    .zip(other.pools.iter())
                    .all(|((id, pool), (other_id, other_pool))| id == other_id && pool.same_market(other_pool)))
    }
}

/// Receives a fresh snapshot after every cycle.
pub trait SnapshotConsumer: Send {
    /// Called with the view of a completed cycle.
    fn on_snapshot(&mut self, snapshot: PoolSnapshot);
}

/// Consumer that only logs the hand-off.
#[derive(Debug, Default)]
pub struct LoggingConsumer;

impl SnapshotConsumer for LoggingConsumer {
    fn on_snapshot(&mut self, snapshot: PoolSnapshot) {
        info!(
            block = snapshot.block_number(),
            pools = snapshot.len(),
            tokens = snapshot.tokens().len(),
            "Pool snapshot ready"
        );
    }
}

/// Publishes the latest snapshot to a task holding the receiver.
impl SnapshotConsumer for watch::Sender<Option<PoolSnapshot>> {
    fn on_snapshot(&mut self, snapshot: PoolSnapshot) {
        self.send_replace(Some(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PoolState;
    use alloy::primitives::address;

    fn snapshot(block: u64, pools: Vec<Pool>) -> PoolSnapshot {
        PoolSnapshot::new(
            block,
            Arc::new(pools.into_iter().map(|p| (p.canonical_id, p)).collect()),
            Arc::new(TokenRegistry::default()),
        )
    }

    fn pool() -> Pool {
        Pool::new(
            "uniswap_v2",
            address!("000000000000000000000000000000000000000A"),
            Address::ZERO,
            Address::ZERO,
            "0.003".to_string(),
            0.003,
            PoolState::Uninitialized,
            0,
        )
    }

    #[test]
    fn test_same_pools_ignores_block() {
        assert!(snapshot(1, vec![pool()]).same_pools_as(&snapshot(2, vec![pool()])));
        assert!(!snapshot(1, vec![pool()]).same_pools_as(&snapshot(1, vec![])));
    }

    #[test]
    fn test_same_pools_ignores_update_key() {
        let mut touched = pool();
        touched.last_updated = crate::events::OrderingKey::new(7, 1);
        assert!(snapshot(1, vec![pool()]).same_pools_as(&snapshot(1, vec![touched.clone()])));

        touched.fee_float = 0.01;
        assert!(!snapshot(1, vec![pool()]).same_pools_as(&snapshot(1, vec![touched])));
    }

    #[test]
    fn test_watch_consumer_publishes_latest() {
        let (mut tx, rx) = watch::channel(None);
        tx.on_snapshot(snapshot(1, vec![]));
        tx.on_snapshot(snapshot(2, vec![pool()]));

        let latest = rx.borrow();
        assert_eq!(latest.as_ref().map(PoolSnapshot::block_number), Some(2));
    }
}
