//! Gatherer, store and cursor behavior across a cycle.
//!
//! These tests drive the pipeline against an in-memory chain and check the
//! guarantees the snapshot consumer relies on: one fetch per topic, ordered
//! and idempotent application, and a window that never crosses the safe head.

mod common;

use alloy::primitives::{Address, U256};
use alloy::sol_types::{SolEvent, SolValue};
use common::{live_settings, replay_settings, row, sync_event, v2_controller, PAIR_A, PAIR_B, USDT, WETH};
use dex_state_sync::events::{order_records, EventKind, IUniswapV2, Payload, UpdateRecord};
use dex_state_sync::exchanges::abi::IUniswapV2Pair;
use dex_state_sync::reorg::{plan_window, SyncCursor, SyncMode};
use dex_state_sync::snapshot::LoggingConsumer;
use dex_state_sync::store::{Pool, PoolState, PoolStore};
use dex_state_sync::sync::SyncController;
use dex_state_sync::test_utils::MockChain;
use std::collections::HashMap;
use std::sync::Arc;

fn reserves(reserve0: u64, reserve1: u64) -> PoolState {
    PoolState::Reserves {
        reserve0: U256::from(reserve0),
        reserve1: U256::from(reserve1),
    }
}

fn reserve_record(pool: Address, block_number: u64, log_index: u64, reserve0: u64) -> UpdateRecord {
    UpdateRecord {
        pool_key: pool,
        block_number,
        log_index,
        kind: EventKind::Sync,
        payload: Payload::Reserves {
            reserve0: U256::from(reserve0),
            reserve1: U256::from(1u64),
        },
    }
}

fn store_with_pool() -> PoolStore {
    let mut store = PoolStore::new();
    store.upsert_from_bootstrap(Pool::new(
        "uniswap_v2",
        PAIR_A,
        WETH,
        USDT,
        "0.003".to_string(),
        0.003,
        PoolState::Uninitialized,
        0,
    ));
    store
}

/// Two exchanges sharing the `Sync` topic cause a single fetch per window.
#[tokio::test]
async fn test_shared_topic_is_fetched_once() {
    let chain = Arc::new(MockChain::new(1_000));
    chain.emit(PAIR_A, &sync_event(10, 20), 950, 0);
    chain.emit(PAIR_B, &sync_event(30, 40), 951, 0);

    let context = common::context(
        Arc::clone(&chain),
        &["uniswap_v2", "sushiswap_v2"],
        HashMap::new(),
        vec![row("uniswap_v2", PAIR_A), row("sushiswap_v2", PAIR_B)],
        live_settings(),
    );
    let mut controller = SyncController::new(context);
    controller.init().await.unwrap();
    assert_eq!(controller.subscribed_topics(), vec![IUniswapV2::Sync::SIGNATURE_HASH]);

    let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    assert_eq!(chain.fetch_count(IUniswapV2::Sync::SIGNATURE_HASH), 1);
    assert_eq!(report.apply.applied, 2);
    assert_eq!(
        controller.store().get_by_address(&PAIR_B).map(|p| p.state.clone()),
        Some(reserves(30, 40))
    );
}

/// Records for the same pool end in the state of the highest key, whatever
/// order they arrived in.
#[test]
fn test_arrival_order_does_not_matter() {
    for arrival in [[(10, 2, 1), (10, 5, 2)], [(10, 5, 2), (10, 2, 1)]] {
        let mut records: Vec<UpdateRecord> = arrival
            .iter()
            .map(|(block, index, r0)| reserve_record(PAIR_A, *block, *index, *r0))
            .collect();
        order_records(&mut records);

        let mut store = store_with_pool();
        store.apply(&records);

        let pool = store.get_by_address(&PAIR_A).unwrap();
        assert_eq!(pool.state, reserves(2, 1));
        assert_eq!(pool.last_updated.log_index, 5);
    }
}

/// Applying the same batch twice changes nothing the second time.
#[test]
fn test_reapplying_records_is_a_no_op() {
    let records = vec![
        reserve_record(PAIR_A, 10, 2, 1),
        reserve_record(PAIR_A, 11, 0, 7),
    ];

    let mut store = store_with_pool();
    let first = store.apply(&records);
    let after_first = store.get_by_address(&PAIR_A).cloned();
    let second = store.apply(&records);

    assert_eq!(first.applied, 2);
    assert_eq!(second.applied, 0);
    assert_eq!(second.stale, 2);
    assert_eq!(store.get_by_address(&PAIR_A).cloned(), after_first);
}

/// No request ever reaches past `head - reorg_delay`, and the cursor stays there.
#[tokio::test]
async fn test_requests_stay_below_safe_head() {
    let chain = Arc::new(MockChain::new(1_000));
    chain.emit(PAIR_A, &sync_event(10, 20), 998, 0);
    chain.emit(PAIR_A, &sync_event(99, 99), 999, 0);

    let mut controller = v2_controller(Arc::clone(&chain), vec![row("uniswap_v2", PAIR_A)], live_settings());
    controller.init().await.unwrap();
    for _ in 0..3 {
        controller.run_cycle(&mut LoggingConsumer).await.unwrap();
    }

    assert_eq!(chain.max_requested_block(), Some(998));
    assert_eq!(controller.cursor().last_block_processed(), 998);
    assert_eq!(
        controller.store().get_by_address(&PAIR_A).map(|p| p.state.clone()),
        Some(reserves(10, 20))
    );
}

/// The next cycle picks up where the head moved to.
#[tokio::test]
async fn test_cursor_follows_moving_head() {
    let chain = Arc::new(MockChain::new(1_000));
    chain.emit(PAIR_A, &sync_event(10, 20), 950, 0);
    let mut controller = v2_controller(Arc::clone(&chain), vec![row("uniswap_v2", PAIR_A)], live_settings());
    controller.init().await.unwrap();
    controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    chain.set_head(1_010);
    chain.emit(PAIR_A, &sync_event(11, 21), 1_005, 3);
    let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    let window = report.window.unwrap();
    assert_eq!((window.from_block, window.to_block), (999, 1_008));
    assert_eq!(
        controller.store().get_by_address(&PAIR_A).map(|p| p.last_updated_block()),
        Some(1_005)
    );
}

/// A failed fetch is retried over the same range on the next cycle.
#[tokio::test]
async fn test_failed_window_is_retried() {
    let chain = Arc::new(MockChain::new(1_000));
    chain.emit(PAIR_A, &sync_event(10, 20), 950, 0);
    let mut controller = v2_controller(Arc::clone(&chain), vec![row("uniswap_v2", PAIR_A)], live_settings());
    controller.init().await.unwrap();

    chain.fail_topic(IUniswapV2::Sync::SIGNATURE_HASH);
    assert!(controller.run_cycle(&mut LoggingConsumer).await.is_err());
    chain.heal_topic(IUniswapV2::Sync::SIGNATURE_HASH);
    let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    let fetches = chain.fetches();
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0].from_block, fetches[1].from_block);
    assert_eq!(fetches[0].to_block, fetches[1].to_block);
    assert_eq!(report.apply.applied, 1);
}

/// A `Sync` repeating the current reserves is applied but leaves the
/// market unchanged.
#[tokio::test]
async fn test_identical_reserves_flag_stagnant_cycle() {
    let chain = Arc::new(MockChain::new(1_000));
    chain.emit(PAIR_A, &sync_event(10, 20), 950, 0);
    let mut controller = v2_controller(Arc::clone(&chain), vec![row("uniswap_v2", PAIR_A)], live_settings());
    controller.init().await.unwrap();
    let first = controller.run_cycle(&mut LoggingConsumer).await.unwrap();
    assert!(!first.stagnant);

    chain.set_head(1_010);
    chain.emit(PAIR_A, &sync_event(10, 20), 1_005, 0);
    let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    assert_eq!(report.apply.applied, 1);
    assert!(report.stagnant);
    assert_eq!(
        controller.store().get_by_address(&PAIR_A).map(|p| p.last_updated_block()),
        Some(1_005)
    );
}

/// Logs of untracked pools alone never count as a stagnant cycle.
#[tokio::test]
async fn test_untracked_logs_are_not_stagnant() {
    let chain = Arc::new(MockChain::new(1_000));
    chain.emit(PAIR_A, &sync_event(10, 20), 950, 0);
    let mut controller = v2_controller(Arc::clone(&chain), vec![row("uniswap_v2", PAIR_A)], live_settings());
    controller.init().await.unwrap();
    controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    chain.set_head(1_010);
    chain.emit(PAIR_B, &sync_event(30, 40), 1_003, 0);
    let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();

    assert_eq!(report.records, 1);
    assert_eq!(report.apply.unknown, 1);
    assert_eq!(report.apply.applied, 0);
    assert!(!report.stagnant);
}

/// The first cycle compares against the bootstrapped pools, and the run
/// summary counts the stagnant cycle.
#[tokio::test]
async fn test_first_cycle_compares_against_bootstrap() {
    let chain = Arc::new(MockChain::new(5_000));
    chain.respond(
        PAIR_A,
        &IUniswapV2Pair::getReservesCall {},
        (U256::from(10u64), U256::from(20u64), U256::ZERO).abi_encode_sequence(),
    );
    chain.emit(PAIR_A, &sync_event(10, 20), 100, 0);

    let mut controller = v2_controller(Arc::clone(&chain), vec![row("uniswap_v2", PAIR_A)], replay_settings(100));
    let summary = controller.run(&mut LoggingConsumer).await.unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.stagnant_cycles, 1);
    assert_eq!(
        controller.store().get_by_address(&PAIR_A).map(|p| p.state.clone()),
        Some(reserves(10, 20))
    );
}

/// Window planning is pure and matches the cursor arithmetic.
#[test]
fn test_plan_window_respects_delay_and_limit() {
    let cursor = SyncCursor::new(0, 2, SyncMode::Live);
    let window = plan_window(&cursor, 1_000, 100).unwrap();
    assert_eq!((window.from_block, window.to_block), (1, 100));

    let cursor = SyncCursor::new(998, 2, SyncMode::Live);
    assert!(plan_window(&cursor, 1_000, 100).is_none());
}
