//! Shared fixtures for the integration tests.
//!
//! Everything runs against [`MockChain`], so no node is needed.

#![allow(dead_code)]

use alloy::primitives::{address, Address, Uint};
use dex_state_sync::bootstrap::StaticPoolRow;
use dex_state_sync::events::IUniswapV2;
use dex_state_sync::exchanges::{AdapterSet, DeployedContracts};
use dex_state_sync::sync::{SyncContext, SyncController, SyncSettings};
use dex_state_sync::test_utils::MockChain;
use dex_state_sync::tokens::TokenRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const FACTORY: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");
pub const PAIR_A: Address = address!("000000000000000000000000000000000000000A");
pub const PAIR_B: Address = address!("000000000000000000000000000000000000000B");
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

/// Constant-product `Sync` event.
pub fn sync_event(reserve0: u64, reserve1: u64) -> IUniswapV2::Sync {
    IUniswapV2::Sync {
        reserve0: Uint::<112, 2>::from(reserve0),
        reserve1: Uint::<112, 2>::from(reserve1),
    }
}

/// Dataset row with both tokens known.
pub fn row(exchange_name: &str, address: Address) -> StaticPoolRow {
    StaticPoolRow {
        address,
        exchange_name: exchange_name.to_string(),
        token0: Some(WETH),
        token1: Some(USDT),
        fee_raw: None,
    }
}

/// Settings for a live run that never sleeps or terraforms.
pub fn live_settings() -> SyncSettings {
    SyncSettings {
        max_block_fetch: 100,
        reorg_delay: 2,
        poll_interval: Duration::ZERO,
        pool_data_update_frequency: None,
        ..SyncSettings::default()
    }
}

/// Settings for a single-cycle replay ending at `block`.
pub fn replay_settings(block: u64) -> SyncSettings {
    SyncSettings {
        reorg_delay: 0,
        poll_interval: Duration::ZERO,
        replay_from_block: Some(block),
        pool_data_update_frequency: None,
        ..SyncSettings::default()
    }
}

/// Context over `chain` for `exchanges`, with optional factories.
pub fn context(
    chain: Arc<MockChain>,
    exchanges: &[&str],
    factories: HashMap<String, Address>,
    dataset: Vec<StaticPoolRow>,
    settings: SyncSettings,
) -> SyncContext {
    let names: Vec<String> = exchanges.iter().map(|name| (*name).to_string()).collect();
    let deployed = DeployedContracts::new(factories);
    let adapters = AdapterSet::from_names(&names, &deployed, Address::ZERO).unwrap();
    SyncContext::new(chain, adapters, deployed, TokenRegistry::default(), dataset, settings)
}

/// Controller over `chain` for uniswap_v2 only.
pub fn v2_controller(chain: Arc<MockChain>, dataset: Vec<StaticPoolRow>, settings: SyncSettings) -> SyncController {
    SyncController::new(context(chain, &["uniswap_v2"], HashMap::new(), dataset, settings))
}
