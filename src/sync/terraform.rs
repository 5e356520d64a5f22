//! Periodic re-derivation of the pool dataset from factory creation events.
//!
//! A pass scans `[from_block, to_block]` for creation events of every
//! enabled exchange with a known factory, in `max_block_fetch` chunks, and
//! resolves the new pools into the store. Pools already active are re-read
//! through their adapter so fee and token changes are picked up, then the
//! dataset is rebuilt from the refreshed rows plus the discovered ones.
//!
//! Passes are best effort: a failed chunk aborts the pass and the
//! controller tries again at the next scheduled cycle. A pool whose
//! metadata cannot be re-read keeps its previous values.

use super::context::SyncContext;
use crate::bootstrap::{merge_rows, populate_store, resolve_descriptors, StaticPoolRow};
use crate::error::{TrackerError, TrackerResult};
use crate::events::{Payload, PoolDescriptor};
use crate::exchanges::ExchangeAdapter;
use crate::gatherer::EventGatherer;
use crate::rpc::ChainClient;
use crate::store::{PoolMetadata, PoolStore};
use alloy::primitives::Address;
use futures_util::future::try_join;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

/// Counters from one terraform pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerraformReport {
    /// First block scanned
    pub from_block: u64,
    /// Last block scanned
    pub to_block: u64,
    /// Creation events seen
    pub created_events: usize,
    /// Rows added to the dataset
    pub new_rows: usize,
    /// Pools added to the store
    pub inserted: usize,
    /// Pools that could not be resolved
    pub failed: usize,
    /// Active pools whose tokens or fee changed
    pub refreshed: usize,
    /// Active pools whose metadata could not be re-read
    pub refresh_failed: usize,
}

pub(crate) async fn terraform(
    ctx: &mut SyncContext,
    store: &mut PoolStore,
    from_block: u64,
    to_block: u64,
) -> TrackerResult<TerraformReport> {
    let mut report = TerraformReport {
        from_block,
        to_block,
        ..TerraformReport::default()
    };

    let existing: Vec<(String, Address)> = store
        .iter()
        .map(|pool| (pool.exchange_name.clone(), pool.address))
        .collect();

    let descriptors = discover(ctx, from_block, to_block).await?;
    report.created_events = descriptors.len();
    let discovered: Vec<StaticPoolRow> = descriptors
        .iter()
        .map(|(descriptor, _)| StaticPoolRow::from_descriptor(descriptor))
        .collect();

    let resolutions = resolve_descriptors(
        &*ctx.state_chain,
        &ctx.adapters,
        store,
        descriptors,
        ctx.settings.max_concurrency,
    )
    .await;
    let populated = populate_store(store, resolutions);
    report.inserted = populated.inserted;
    report.failed = populated.failed;

    for (address, result) in read_metadata(ctx, existing).await {
        match result {
            Ok(metadata) => {
                if store.refresh_metadata(address, metadata) {
                    report.refreshed += 1;
                }
            }
            Err(error) => {
                warn!(pool = %address, error = %error, "Metadata refresh failed, keeping previous values");
                report.refresh_failed += 1;
            }
        }
    }

    let before = ctx.dataset.len();
    ctx.dataset = rebuild_dataset(&ctx.dataset, store, discovered);
    report.new_rows = ctx.dataset.len() - before;

    info!(
        from_block,
        to_block,
        created = report.created_events,
        new_rows = report.new_rows,
        inserted = report.inserted,
        refreshed = report.refreshed,
        refresh_failed = report.refresh_failed,
        "Terraform pass complete"
    );
    Ok(report)
}

/// Creation events in `[from_block, to_block]`, with the block of each.
async fn discover(ctx: &SyncContext, from_block: u64, to_block: u64) -> TrackerResult<Vec<(PoolDescriptor, u64)>> {
    let gatherer = EventGatherer::for_creations(&ctx.adapters, &ctx.deployed, ctx.settings.max_concurrency);
    if gatherer.is_empty() || from_block > to_block {
        debug!("No creation events to scan");
        return Ok(Vec::new());
    }

    let mut descriptors = Vec::new();
    let step = ctx.settings.max_block_fetch.max(1);
    let mut chunk_start = from_block;
    while chunk_start <= to_block {
        let chunk_end = to_block.min(chunk_start.saturating_add(step - 1));
        let output = gatherer.gather(&*ctx.chain, chunk_start, chunk_end).await?;
        descriptors.extend(output.records.into_iter().filter_map(|record| match record.payload {
            Payload::Created(descriptor) => Some((descriptor, record.block_number)),
            _ => None,
        }));
        chunk_start = chunk_end.saturating_add(1);
        if chunk_end == u64::MAX {
            break;
        }
    }
    Ok(descriptors)
}

/// Re-read tokens and fee of `pools`, at most `max_concurrency` at a time.
async fn read_metadata(
    ctx: &SyncContext,
    pools: Vec<(String, Address)>,
) -> Vec<(Address, TrackerResult<PoolMetadata>)> {
    let chain = &*ctx.state_chain;
    let adapters = &ctx.adapters;

    stream::iter(pools)
        .map(|(exchange_name, address)| async move {
            let result = match adapters.get(&exchange_name) {
                Some(adapter) => pool_metadata(adapter, chain, address).await,
                None => Err(TrackerError::config(
                    format!("Exchange {exchange_name} is not enabled"),
                    None,
                )),
            };
            (address, result)
        })
        .buffer_unordered(ctx.settings.max_concurrency.max(1))
        .collect()
        .await
}

async fn pool_metadata(
    adapter: &ExchangeAdapter,
    chain: &dyn ChainClient,
    address: Address,
) -> TrackerResult<PoolMetadata> {
    let tokens = try_join(
        adapter.resolve_token0(chain, address),
        adapter.resolve_token1(chain, address),
    );
    let ((token0, token1), (fee, fee_float)) = try_join(tokens, adapter.resolve_fee(chain, address)).await?;
    Ok(PoolMetadata {
        token0,
        token1,
        fee,
        fee_float,
    })
}

/// Dataset rows carrying the store's current tokens, followed by the
/// discovered rows not already present.
fn rebuild_dataset(
    dataset: &[StaticPoolRow],
    store: &PoolStore,
    discovered: Vec<StaticPoolRow>,
) -> Vec<StaticPoolRow> {
    let current: Vec<StaticPoolRow> = dataset
        .iter()
        .map(|row| match store.get_by_address(&row.address) {
            Some(pool) if pool.exchange_name == row.exchange_name => StaticPoolRow {
                token0: Some(pool.token0),
                token1: Some(pool.token1),
                ..row.clone()
            },
            _ => row.clone(),
        })
        .collect();
    merge_rows(&current, discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, IUniswapV2, UpdateRecord};
    use crate::exchanges::abi::{IPairTokens, IPoolFeeFactory};
    use crate::exchanges::{AdapterSet, DeployedContracts};
    use crate::store::{Pool, PoolState};
    use crate::sync::context::SyncSettings;
    use crate::test_utils::MockChain;
    use crate::tokens::TokenRegistry;
    use alloy::primitives::{address, U256};
    use alloy::sol_types::SolValue;
    use std::collections::HashMap;
    use std::sync::Arc;

    const FACTORY: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");
    const PAIR: Address = address!("000000000000000000000000000000000000000A");
    const TOKEN0: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const TOKEN1: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

    fn context(chain: Arc<MockChain>, max_block_fetch: u64) -> SyncContext {
        exchange_context(chain, "uniswap_v2", max_block_fetch)
    }

    fn exchange_context(chain: Arc<MockChain>, exchange: &str, max_block_fetch: u64) -> SyncContext {
        let names = vec![exchange.to_string()];
        let deployed = DeployedContracts::new(HashMap::from([(exchange.to_string(), FACTORY)]));
        let adapters = AdapterSet::from_names(&names, &deployed, Address::ZERO).unwrap();
        SyncContext::new(
            chain,
            adapters,
            deployed,
            TokenRegistry::default(),
            Vec::new(),
            SyncSettings {
                max_block_fetch,
                ..SyncSettings::default()
            },
        )
    }

    fn pair_created() -> IUniswapV2::PairCreated {
        IUniswapV2::PairCreated {
            token0: TOKEN0,
            token1: TOKEN1,
            pair: PAIR,
            allPairsLength: U256::from(1u64),
        }
    }

    #[tokio::test]
    async fn test_terraform_discovers_created_pools_in_chunks() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.emit(FACTORY, &pair_created(), 250, 3);
        let mut ctx = context(Arc::clone(&chain), 100);
        let mut store = PoolStore::new();

        let report = terraform(&mut ctx, &mut store, 1, 400).await.unwrap();

        assert_eq!(report.created_events, 1);
        assert_eq!(report.new_rows, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(ctx.dataset().len(), 1);
        assert_eq!(store.get_by_address(&PAIR).map(|p| p.first_seen_block), Some(250));
        assert_eq!(chain.fetches().len(), 4);
        assert_eq!(chain.max_requested_block(), Some(400));
    }

    #[tokio::test]
    async fn test_terraform_skips_known_pools() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.emit(FACTORY, &pair_created(), 250, 3);
        let mut ctx = context(Arc::clone(&chain), 1_000);
        let mut store = PoolStore::new();

        terraform(&mut ctx, &mut store, 1, 400).await.unwrap();
        let again = terraform(&mut ctx, &mut store, 1, 400).await.unwrap();

        assert_eq!(again.created_events, 1);
        assert_eq!(again.new_rows, 0);
        assert_eq!(again.inserted, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_terraform_refreshes_changed_factory_fee() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.respond(PAIR, &IPairTokens::token0Call {}, TOKEN0.abi_encode());
        chain.respond(PAIR, &IPairTokens::token1Call {}, TOKEN1.abi_encode());
        chain.respond(FACTORY, &IPoolFeeFactory::getFeeCall { pool: PAIR }, U256::from(30u64).abi_encode());

        let mut ctx = exchange_context(Arc::clone(&chain), "stratum_v2", 1_000);
        ctx.dataset = vec![StaticPoolRow {
            address: PAIR,
            exchange_name: "stratum_v2".to_string(),
            token0: None,
            token1: None,
            fee_raw: None,
        }];
        let mut store = PoolStore::new();
        store.upsert_from_bootstrap(Pool::new(
            "stratum_v2",
            PAIR,
            TOKEN0,
            TOKEN1,
            "0.003".to_string(),
            0.003,
            PoolState::Uninitialized,
            0,
        ));
        store.apply(&[UpdateRecord {
            pool_key: PAIR,
            block_number: 120,
            log_index: 4,
            kind: EventKind::Sync,
            payload: Payload::Reserves {
                reserve0: U256::from(10u64),
                reserve1: U256::from(20u64),
            },
        }]);
        let before = store.get_by_address(&PAIR).cloned().unwrap();

        let unchanged = terraform(&mut ctx, &mut store, 1, 400).await.unwrap();
        assert_eq!(unchanged.refreshed, 0);
        assert_eq!(unchanged.refresh_failed, 0);

        chain.respond(FACTORY, &IPoolFeeFactory::getFeeCall { pool: PAIR }, U256::from(10u64).abi_encode());
        let report = terraform(&mut ctx, &mut store, 401, 800).await.unwrap();

        assert_eq!(report.refreshed, 1);
        let pool = store.get_by_address(&PAIR).unwrap();
        assert_eq!(pool.fee_float, 0.001);
        assert_eq!(pool.fee, "0.001");
        assert_eq!(pool.last_updated, before.last_updated);
        assert_eq!(pool.state, before.state);
        assert_eq!(ctx.dataset().len(), 1);
        assert_eq!(ctx.dataset()[0].token0, Some(TOKEN0));
    }

    #[tokio::test]
    async fn test_terraform_keeps_metadata_when_refresh_fails() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.emit(FACTORY, &pair_created(), 250, 3);
        let mut ctx = context(Arc::clone(&chain), 1_000);
        let mut store = PoolStore::new();
        terraform(&mut ctx, &mut store, 1, 400).await.unwrap();
        let before = store.get_by_address(&PAIR).cloned();

        let report = terraform(&mut ctx, &mut store, 401, 800).await.unwrap();

        assert_eq!(report.refresh_failed, 1);
        assert_eq!(report.refreshed, 0);
        assert_eq!(store.get_by_address(&PAIR).cloned(), before);
    }
}
