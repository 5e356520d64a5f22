//! Bootstrap dataset loading and pool resolution.
//!
//! The static dataset is a JSON array with one row per pool:
//!
//! ```json
//! [
//!   { "address": "0x0d4a11d5EEaaC28EC3F61d100daF4d40471f1852", "exchange_name": "uniswap_v2" },
//!   { "address": "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640", "exchange_name": "uniswap_v3",
//!     "token0": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
//!     "token1": "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", "fee_raw": 500 }
//! ]
//! ```
//!
//! Missing tokens and fees are resolved on chain through the exchange
//! adapter. Resolution runs concurrently; results are inserted into the
//! store afterwards, so the outcome does not depend on completion order.

use crate::error::{TrackerError, TrackerResult};
use crate::events::PoolDescriptor;
use crate::exchanges::AdapterSet;
use crate::rpc::ChainClient;
use crate::store::{Pool, PoolStore, UpsertOutcome};
use alloy::primitives::{Address, U256};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// One row of the static pool dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPoolRow {
    /// Pool contract
    pub address: Address,
    /// Exchange the pool belongs to
    pub exchange_name: String,
    /// First token, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token0: Option<Address>,
    /// Second token, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token1: Option<Address>,
    /// Raw fee in the exchange's fee decimals, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_raw: Option<u64>,
}

impl StaticPoolRow {
    /// Descriptor handed to the adapter.
    #[must_use]
    pub fn descriptor(&self) -> PoolDescriptor {
        PoolDescriptor {
            exchange_name: self.exchange_name.clone(),
            address: self.address,
            token0: self.token0,
            token1: self.token1,
            fee_raw: self.fee_raw.map(U256::from),
        }
    }

    /// Row for a pool discovered on chain.
    ///
    /// Fees above `u64::MAX` are dropped and resolved on chain instead.
    #[must_use]
    pub fn from_descriptor(descriptor: &PoolDescriptor) -> Self {
        Self {
            address: descriptor.address,
            exchange_name: descriptor.exchange_name.clone(),
            token0: descriptor.token0,
            token1: descriptor.token1,
            fee_raw: descriptor.fee_raw.and_then(|fee| u64::try_from(fee).ok()),
        }
    }
}

/// Load the static dataset.
///
/// # Errors
///
/// Returns a configuration error if the file cannot be read or parsed.
pub fn load_static_pool_data(path: &Path) -> TrackerResult<Vec<StaticPoolRow>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TrackerError::config(
            format!("Failed to read static pool data: {}", path.display()),
            Some(Box::new(e)),
        )
    })?;
    let rows: Vec<StaticPoolRow> = serde_json::from_str(&contents).map_err(|e| {
        TrackerError::config(
            format!("Failed to parse static pool data: {}", path.display()),
            Some(Box::new(e)),
        )
    })?;

    info!(rows = rows.len(), path = %path.display(), "Loaded static pool data");
    Ok(rows)
}

/// Keep the rows of enabled exchanges.
#[must_use]
pub fn filter_enabled(rows: Vec<StaticPoolRow>, adapters: &AdapterSet) -> Vec<StaticPoolRow> {
    let before = rows.len();
    let rows: Vec<StaticPoolRow> = rows
        .into_iter()
        .filter(|row| adapters.is_enabled(&row.exchange_name))
        .collect();

    if rows.len() < before {
        info!(skipped = before - rows.len(), "Skipped rows of disabled exchanges");
    }
    rows
}

/// Merge `additions` into `dataset`, keeping the first row per
/// `(exchange_name, address)`.
#[must_use]
pub fn merge_rows(dataset: &[StaticPoolRow], additions: Vec<StaticPoolRow>) -> Vec<StaticPoolRow> {
    let mut seen: HashSet<(String, Address)> = dataset
        .iter()
        .map(|row| (row.exchange_name.clone(), row.address))
        .collect();
    let mut merged = dataset.to_vec();

    for row in additions {
        if seen.insert((row.exchange_name.clone(), row.address)) {
            merged.push(row);
        }
    }
    merged
}

/// Result of resolving one row.
#[derive(Debug)]
pub enum Resolution {
    /// The pool is ready to insert.
    Resolved(Pool),
    /// Metadata could not be resolved.
    Failed {
        /// Exchange of the row
        exchange_name: String,
        /// Pool contract
        address: Address,
        /// What went wrong
        error: TrackerError,
    },
}

/// Counters from [`populate_store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Pools inserted
    pub inserted: usize,
    /// Rows that repeated a known pool
    pub duplicates: usize,
    /// Rows that could not be resolved
    pub failed: usize,
}

/// Resolve `rows` concurrently, all observed at `first_seen_block`.
pub async fn resolve_rows(
    chain: &dyn ChainClient,
    adapters: &AdapterSet,
    store: &PoolStore,
    rows: &[StaticPoolRow],
    first_seen_block: u64,
    max_concurrency: usize,
) -> Vec<Resolution> {
    let descriptors = rows
        .iter()
        .map(|row| (row.descriptor(), first_seen_block))
        .collect();
    resolve_descriptors(chain, adapters, store, descriptors, max_concurrency).await
}

/// Resolve `(descriptor, first_seen_block)` pairs concurrently.
///
/// Descriptors whose address the store already knows (active or excluded)
/// are skipped, so known-invalid pools are not retried. Repeated
/// `(exchange_name, address)` pairs are resolved once, keeping the first.
pub async fn resolve_descriptors(
    chain: &dyn ChainClient,
    adapters: &AdapterSet,
    store: &PoolStore,
    descriptors: Vec<(PoolDescriptor, u64)>,
    max_concurrency: usize,
) -> Vec<Resolution> {
    let total = descriptors.len();
    let mut seen: HashSet<(String, Address)> = HashSet::with_capacity(total);
    let pending: Vec<(PoolDescriptor, u64)> = descriptors
        .into_iter()
        .filter(|(descriptor, _)| {
            !store.knows(&descriptor.address) && adapters.is_enabled(&descriptor.exchange_name)
        })
        .filter(|(descriptor, _)| seen.insert((descriptor.exchange_name.clone(), descriptor.address)))
        .collect();
    debug!(total, pending = pending.len(), "Resolving pool descriptors");

    stream::iter(pending)
        .map(|(descriptor, first_seen_block)| async move {
            let result = match adapters.get(&descriptor.exchange_name) {
                Some(adapter) => adapter.resolve_pool(chain, &descriptor, first_seen_block).await,
                None => Err(TrackerError::config(
                    format!("Exchange {} is not enabled", descriptor.exchange_name),
                    None,
                )),
            };
            match result {
                Ok(pool) => Resolution::Resolved(pool),
                Err(error) => Resolution::Failed {
                    exchange_name: descriptor.exchange_name,
                    address: descriptor.address,
                    error,
                },
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await
}

/// Insert resolved pools and remember failures, then deduplicate.
pub fn populate_store(store: &mut PoolStore, resolutions: Vec<Resolution>) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    for resolution in resolutions {
        match resolution {
            Resolution::Resolved(pool) => match store.upsert_from_bootstrap(pool) {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Duplicate | UpsertOutcome::KnownInvalid => report.duplicates += 1,
            },
            Resolution::Failed {
                exchange_name,
                address,
                error,
            } => {
                warn!(exchange = %exchange_name, pool = %address, error = %error, "Pool metadata unresolved, marking invalid");
                store.mark_invalid(exchange_name, address);
                report.failed += 1;
            }
        }
    }

    report.duplicates += store.deduplicate();
    info!(
        inserted = report.inserted,
        duplicates = report.duplicates,
        failed = report.failed,
        pools = store.len(),
        "Bootstrap complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::DeployedContracts;
    use crate::test_utils::MockChain;
    use alloy::primitives::address;

    const PAIR: Address = address!("000000000000000000000000000000000000000A");
    const TOKEN0: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const TOKEN1: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

    fn row(exchange: &str, address: Address) -> StaticPoolRow {
        StaticPoolRow {
            address,
            exchange_name: exchange.to_string(),
            token0: Some(TOKEN0),
            token1: Some(TOKEN1),
            fee_raw: None,
        }
    }

    fn adapters(names: &[&str]) -> AdapterSet {
        let names: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
        AdapterSet::from_names(&names, &DeployedContracts::default(), Address::ZERO).unwrap()
    }

    #[test]
    fn test_load_static_pool_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pools.json");
        std::fs::write(
            &path,
            r#"[{"address": "0x000000000000000000000000000000000000000A", "exchange_name": "uniswap_v2"}]"#,
        )
        .unwrap();

        let rows = load_static_pool_data(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, PAIR);
        assert_eq!(rows[0].token0, None);
    }

    #[test]
    fn test_missing_dataset_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_static_pool_data(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(TrackerError::ConfigError { .. })));
    }

    #[test]
    fn test_filter_enabled_drops_other_exchanges() {
        let rows = vec![row("uniswap_v2", PAIR), row("nile_v2", PAIR)];
        let kept = filter_enabled(rows, &adapters(&["uniswap_v2"]));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].exchange_name, "uniswap_v2");
    }

    #[test]
    fn test_merge_rows_keeps_first() {
        let dataset = vec![row("uniswap_v2", PAIR)];
        let mut changed = row("uniswap_v2", PAIR);
        changed.fee_raw = Some(1);
        let merged = merge_rows(&dataset, vec![changed, row("sushiswap_v2", PAIR)]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].fee_raw, None);
    }

    #[tokio::test]
    async fn test_duplicate_rows_resolve_to_one_pool() {
        let chain = MockChain::new(10);
        let adapters = adapters(&["uniswap_v2"]);
        let mut store = PoolStore::new();
        let rows = vec![row("uniswap_v2", PAIR), row("uniswap_v2", PAIR)];

        let resolutions = resolve_rows(&chain, &adapters, &store, &rows, 0, 4).await;
        assert_eq!(resolutions.len(), 1);
        let report = populate_store(&mut store, resolutions);

        assert_eq!(store.len(), 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 0);
    }

    #[tokio::test]
    async fn test_duplicate_unresolvable_rows_fail_once() {
        let chain = MockChain::new(10);
        let adapters = adapters(&["uniswap_v2"]);
        let mut store = PoolStore::new();
        let unresolvable = StaticPoolRow {
            token0: None,
            token1: None,
            ..row("uniswap_v2", PAIR)
        };
        let descriptors = vec![(unresolvable.descriptor(), 5), (unresolvable.descriptor(), 9)];

        let resolutions = resolve_descriptors(&chain, &adapters, &store, descriptors, 4).await;
        assert_eq!(resolutions.len(), 1);
        let report = populate_store(&mut store, resolutions);

        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 0);
        assert!(store.is_known_invalid(&PAIR));
        assert!(store.get_by_address(&PAIR).is_none());
    }

    #[tokio::test]
    async fn test_same_address_on_two_exchanges_is_resolved_per_exchange() {
        let chain = MockChain::new(10);
        let adapters = adapters(&["uniswap_v2", "sushiswap_v2"]);
        let store = PoolStore::new();
        let rows = vec![row("uniswap_v2", PAIR), row("sushiswap_v2", PAIR), row("uniswap_v2", PAIR)];

        let resolutions = resolve_rows(&chain, &adapters, &store, &rows, 0, 4).await;
        assert_eq!(resolutions.len(), 2);
    }

    #[tokio::test]
    async fn test_unresolvable_row_is_marked_invalid_and_skipped_later() {
        let chain = MockChain::new(10);
        let adapters = adapters(&["uniswap_v2"]);
        let mut store = PoolStore::new();
        let rows = vec![StaticPoolRow {
            token0: None,
            token1: None,
            ..row("uniswap_v2", PAIR)
        }];

        let resolutions = resolve_rows(&chain, &adapters, &store, &rows, 0, 4).await;
        let report = populate_store(&mut store, resolutions);
        assert_eq!(report.failed, 1);
        assert!(store.is_known_invalid(&PAIR));

        let again = resolve_rows(&chain, &adapters, &store, &rows, 0, 4).await;
        assert!(again.is_empty());
    }
}
