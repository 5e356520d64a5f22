//! Tests against a real JSON-RPC endpoint.
//!
//! Run with:
//! ```bash
//! RPC_URL=https://eth-mainnet.g.alchemy.com/v2/KEY cargo test --test live_rpc -- --ignored
//! ```

use alloy::primitives::address;
use dex_state_sync::bootstrap::StaticPoolRow;
use dex_state_sync::exchanges::{AdapterSet, DeployedContracts};
use dex_state_sync::gatherer::EventGatherer;
use dex_state_sync::rpc::{ChainClient, RpcClient};
use dex_state_sync::store::PoolState;
use std::collections::HashMap;
use std::sync::Arc;

fn client() -> RpcClient {
    let url = std::env::var("RPC_URL").expect("RPC_URL must be set");
    RpcClient::connect(&url, Some(5)).unwrap()
}

/// The head is readable and logs of a busy pair come back decoded.
#[tokio::test]
#[ignore = "Requires RPC_URL"]
async fn test_gather_recent_uniswap_v2_syncs() {
    let chain = client();
    let head = chain.block_number().await.unwrap();
    assert!(head > 0);

    let names = vec!["uniswap_v2".to_string()];
    let mut deployed = DeployedContracts::new(HashMap::new());
    deployed.set_initialized(names.iter().cloned());
    let deployed = Arc::new(deployed);
    let adapters = AdapterSet::from_names(&names, &deployed, address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")).unwrap();
    let gatherer = EventGatherer::for_adapters(&adapters, &deployed, 4);

    let output = gatherer.gather(&chain, head - 12, head - 2).await.unwrap();
    assert_eq!(output.dropped_logs, 0);
    assert!(output
        .records
        .windows(2)
        .all(|pair| pair[0].ordering_key() <= pair[1].ordering_key()));
}

/// USDC/WETH resolves tokens, fee and reserves from chain.
#[tokio::test]
#[ignore = "Requires RPC_URL"]
async fn test_resolve_known_pair() {
    let chain = client();
    let names = vec!["uniswap_v2".to_string()];
    let deployed = DeployedContracts::new(HashMap::new());
    let adapters = AdapterSet::from_names(&names, &deployed, address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")).unwrap();

    let row = StaticPoolRow {
        address: address!("B4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc"),
        exchange_name: "uniswap_v2".to_string(),
        token0: None,
        token1: None,
        fee_raw: None,
    };
    let adapter = adapters.get("uniswap_v2").unwrap();
    let pool = adapter.resolve_pool(&chain, &row.descriptor(), 0).await.unwrap();

    assert_eq!(pool.token0, address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"));
    assert_eq!(pool.token1, address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"));
    assert!((pool.fee_float - 0.003).abs() < 1e-12);
    assert!(matches!(pool.state, PoolState::Reserves { .. }));
}
