//! Configuration management for the pool state synchronizer.
//!
//! Configuration is loaded from environment variables (after reading an
//! optional `.env` file with `dotenvy`) and can then be overridden from the
//! command line. All operations return [`TrackerResult`]; every problem is a
//! [`TrackerError::ConfigError`], which is fatal at startup.
//!
//! ## Environment Variables
//!
//! Required (one of):
//! - `RPC_URL`: HTTP JSON-RPC endpoint
//! - `ALCHEMY_API_KEY`: used to build the Alchemy mainnet URL when `RPC_URL` is unset
//!
//! Optional (with defaults):
//! - `EXCHANGES`: comma-separated exchange names
//!   (default: `uniswap_v2,sushiswap_v2,uniswap_v3,velodrome_v2,aerodrome_v2`)
//! - `POLL_INTERVAL_SECS`: sleep between cycles (default: 12)
//! - `MAX_BLOCK_FETCH`: provider max blocks per `eth_getLogs` (default: 2000)
//! - `REORG_DELAY`: blocks withheld behind the head (default: 2)
//! - `TIMEOUT_SECS`: wall-clock budget for the whole run (default: unbounded)
//! - `DRY_RUN`: stop right after bootstrap (default: false)
//! - `REPLAY_FROM_BLOCK`: replay starting at this block (default: live)
//! - `FORK_RPC_URL`: time-travel node used during replay (default: none)
//! - `INCREMENT_TIME` / `INCREMENT_BLOCKS`: fork advancement per cycle (default: 1 / 1)
//! - `POOL_DATA_UPDATE_FREQUENCY`: terraform every N cycles, `-1` disables (default: 2)
//! - `TERRAFORM_LOOKBACK_BLOCKS`: first terraform scan depth (default: 50000)
//! - `STATIC_POOL_DATA`, `TOKENS_FILE`, `FACTORIES_FILE`: dataset paths
//! - `CACHE_DIR`: enables the cache artifact and pool data export
//! - `USE_CACHED_EVENTS`: read cached ranges instead of fetching (default: false)
//! - `MAX_CONCURRENCY`: bound on concurrent fetches and resolutions (default: 16)
//! - `RPC_REQUESTS_PER_SECOND`: outbound throttle, 0 disables (default: 25)
//! - `WRAPPED_NATIVE_TOKEN`: counter-asset for single-token pools (default: WETH)
//!
//! ## Example
//!
//! ```no_run
//! use dex_state_sync::config::Config;
//! use dex_state_sync::error::TrackerResult;
//!
//! # fn main() -> TrackerResult<()> {
//! let config = Config::from_env()?;
//! println!("RPC URL: {}", config.rpc_url());
//! # Ok(())
//! # }
//! ```

use crate::error::{TrackerError, TrackerResult};
use alloy::primitives::{address, Address};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_EXCHANGES: &str = "uniswap_v2,sushiswap_v2,uniswap_v3,velodrome_v2,aerodrome_v2";

/// Mainnet WETH.
const DEFAULT_WRAPPED_NATIVE: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

/// Main configuration struct for the synchronizer.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint used for log fetching
    rpc_url: String,

    /// Enabled exchange names, in priority order
    exchanges: Vec<String>,

    /// Sleep between cycles in live mode
    poll_interval_secs: u64,

    /// Maximum blocks per `eth_getLogs` call
    max_block_fetch: u64,

    /// Blocks withheld behind the chain head
    reorg_delay: u64,

    /// Wall-clock budget for the run
    timeout_secs: Option<u64>,

    /// Stop after bootstrap
    dry_run: bool,

    /// First block of a historical replay
    replay_from_block: Option<u64>,

    /// Fork node used during replay
    fork_rpc_url: Option<String>,

    /// Seconds the fork clock advances per cycle
    increment_time: u64,

    /// Blocks the fork advances per cycle
    increment_blocks: u64,

    /// Terraform every N cycles
    pool_data_update_frequency: Option<u64>,

    /// Blocks scanned by the first terraform pass
    terraform_lookback_blocks: u64,

    static_pool_data: PathBuf,
    tokens_file: PathBuf,
    factories_file: PathBuf,

    /// Directory for the cache artifact
    cache_dir: Option<PathBuf>,

    /// Replay cached ranges instead of fetching
    use_cached_events: bool,

    /// Bound on concurrent fetches and metadata resolutions
    max_concurrency: usize,

    /// Outbound throttle, `None` when unlimited
    rpc_requests_per_second: Option<u32>,

    /// Counter-asset for single-token pools
    wrapped_native_token: Address,
}

/// Command-line overrides applied on top of the environment.
///
/// Every `None` leaves the environment value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Overrides `RPC_URL`
    pub rpc_url: Option<String>,
    /// Overrides `EXCHANGES`
    pub exchanges: Option<Vec<String>>,
    /// Overrides `POLL_INTERVAL_SECS`
    pub poll_interval_secs: Option<u64>,
    /// Overrides `MAX_BLOCK_FETCH`
    pub max_block_fetch: Option<u64>,
    /// Overrides `REORG_DELAY`
    pub reorg_delay: Option<u64>,
    /// Overrides `TIMEOUT_SECS`
    pub timeout_secs: Option<u64>,
    /// Forces a dry run when `true`
    pub dry_run: bool,
    /// Overrides `REPLAY_FROM_BLOCK`
    pub replay_from_block: Option<u64>,
    /// Overrides `FORK_RPC_URL`
    pub fork_rpc_url: Option<String>,
    /// Overrides `CACHE_DIR`
    pub cache_dir: Option<PathBuf>,
    /// Forces cached-event replay when `true`
    pub use_cached_events: bool,
    /// Overrides `STATIC_POOL_DATA`
    pub static_pool_data: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Applies defaults for optional variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> TrackerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// [`Config::from_env`] passes the process environment; tests pass a map.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> TrackerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let rpc_url = match (get("RPC_URL"), get("ALCHEMY_API_KEY")) {
            (Some(url), _) => url,
            (None, Some(key)) if key != "your_alchemy_api_key_here" => {
                format!("https://eth-mainnet.g.alchemy.com/v2/{key}")
            }
            _ => {
                return Err(TrackerError::config(
                    "RPC_URL or ALCHEMY_API_KEY environment variable is required",
                    None,
                ))
            }
        };

        let exchanges = parse_exchange_list(&get("EXCHANGES").unwrap_or_else(|| DEFAULT_EXCHANGES.to_string()));

        let pool_data_update_frequency = parse_or::<i64>(get("POOL_DATA_UPDATE_FREQUENCY"), "POOL_DATA_UPDATE_FREQUENCY", 2)?;

        let rpc_requests_per_second = parse_or::<u32>(get("RPC_REQUESTS_PER_SECOND"), "RPC_REQUESTS_PER_SECOND", 25)?;

        let wrapped_native_token = match get("WRAPPED_NATIVE_TOKEN") {
            Some(raw) => Address::from_str(raw.trim()).map_err(|e| {
                TrackerError::config(
                    format!("WRAPPED_NATIVE_TOKEN must be a valid address, got: {raw}"),
                    Some(Box::new(e)),
                )
            })?,
            None => DEFAULT_WRAPPED_NATIVE,
        };

        let config = Self {
            rpc_url,
            exchanges,
            poll_interval_secs: parse_or(get("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS", 12)?,
            max_block_fetch: parse_or(get("MAX_BLOCK_FETCH"), "MAX_BLOCK_FETCH", 2000)?,
            reorg_delay: parse_or(get("REORG_DELAY"), "REORG_DELAY", 2)?,
            timeout_secs: parse_opt(get("TIMEOUT_SECS"), "TIMEOUT_SECS")?,
            dry_run: parse_or(get("DRY_RUN"), "DRY_RUN", false)?,
            replay_from_block: parse_opt(get("REPLAY_FROM_BLOCK"), "REPLAY_FROM_BLOCK")?,
            fork_rpc_url: get("FORK_RPC_URL"),
            increment_time: parse_or(get("INCREMENT_TIME"), "INCREMENT_TIME", 1)?,
            increment_blocks: parse_or(get("INCREMENT_BLOCKS"), "INCREMENT_BLOCKS", 1)?,
            pool_data_update_frequency: u64::try_from(pool_data_update_frequency)
                .ok()
                .filter(|n| *n > 0),
            terraform_lookback_blocks: parse_or(
                get("TERRAFORM_LOOKBACK_BLOCKS"),
                "TERRAFORM_LOOKBACK_BLOCKS",
                50_000,
            )?,
            static_pool_data: get("STATIC_POOL_DATA")
                .unwrap_or_else(|| "./data/static_pool_data.json".to_string())
                .into(),
            tokens_file: get("TOKENS_FILE")
                .unwrap_or_else(|| "./data/tokens.json".to_string())
                .into(),
            factories_file: get("FACTORIES_FILE")
                .unwrap_or_else(|| "./data/factories.json".to_string())
                .into(),
            cache_dir: get("CACHE_DIR").map(PathBuf::from),
            use_cached_events: parse_or(get("USE_CACHED_EVENTS"), "USE_CACHED_EVENTS", false)?,
            max_concurrency: parse_or(get("MAX_CONCURRENCY"), "MAX_CONCURRENCY", 16)?,
            rpc_requests_per_second: Some(rpc_requests_per_second).filter(|n| *n > 0),
            wrapped_native_token,
        };

        config.validated()
    }

    /// Apply command-line overrides and re-validate.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the combined values are inconsistent.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> TrackerResult<Self> {
        if let Some(url) = overrides.rpc_url {
            self.rpc_url = url;
        }
        if let Some(exchanges) = overrides.exchanges {
            self.exchanges = exchanges;
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.poll_interval_secs = secs;
        }
        if let Some(max) = overrides.max_block_fetch {
            self.max_block_fetch = max;
        }
        if let Some(delay) = overrides.reorg_delay {
            self.reorg_delay = delay;
        }
        if overrides.timeout_secs.is_some() {
            self.timeout_secs = overrides.timeout_secs;
        }
        if overrides.replay_from_block.is_some() {
            self.replay_from_block = overrides.replay_from_block;
        }
        if overrides.fork_rpc_url.is_some() {
            self.fork_rpc_url = overrides.fork_rpc_url;
        }
        if overrides.cache_dir.is_some() {
            self.cache_dir = overrides.cache_dir;
        }
        if let Some(path) = overrides.static_pool_data {
            self.static_pool_data = path;
        }
        self.dry_run |= overrides.dry_run;
        self.use_cached_events |= overrides.use_cached_events;

        self.validated()
    }

    fn validated(mut self) -> TrackerResult<Self> {
        if self.exchanges.is_empty() {
            return Err(TrackerError::config("EXCHANGES must name at least one exchange", None));
        }
        if self.max_block_fetch == 0 {
            return Err(TrackerError::config("MAX_BLOCK_FETCH must be at least 1", None));
        }
        if self.max_concurrency == 0 {
            return Err(TrackerError::config("MAX_CONCURRENCY must be at least 1", None));
        }
        if self.use_cached_events && self.cache_dir.is_none() {
            return Err(TrackerError::config(
                "USE_CACHED_EVENTS requires CACHE_DIR to be set",
                None,
            ));
        }
        if self.fork_rpc_url.is_some() && self.replay_from_block.is_none() {
            return Err(TrackerError::config(
                "FORK_RPC_URL is only used together with REPLAY_FROM_BLOCK",
                None,
            ));
        }

        // Replayed blocks are already final and nothing should wait between them.
        if self.replay_from_block.is_some() {
            self.poll_interval_secs = 0;
            self.reorg_delay = 0;
        }

        Ok(self)
    }

    /// Get the JSON-RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the enabled exchange names.
    #[must_use]
    pub fn exchanges(&self) -> &[String] {
        &self.exchanges
    }

    /// Get the polling interval in seconds.
    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Get the provider max blocks per call.
    #[must_use]
    pub const fn max_block_fetch(&self) -> u64 {
        self.max_block_fetch
    }

    /// Get the reorg delay in blocks.
    #[must_use]
    pub const fn reorg_delay(&self) -> u64 {
        self.reorg_delay
    }

    /// Get the wall-clock budget.
    #[must_use]
    pub const fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Check if this is a dry run.
    #[must_use]
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Get the replay start block.
    #[must_use]
    pub const fn replay_from_block(&self) -> Option<u64> {
        self.replay_from_block
    }

    /// Get the fork node URL.
    #[must_use]
    pub fn fork_rpc_url(&self) -> Option<&str> {
        self.fork_rpc_url.as_deref()
    }

    /// Get the fork time increment in seconds.
    #[must_use]
    pub const fn increment_time(&self) -> u64 {
        self.increment_time
    }

    /// Get the fork block increment.
    #[must_use]
    pub const fn increment_blocks(&self) -> u64 {
        self.increment_blocks
    }

    /// Get the terraform frequency in cycles.
    #[must_use]
    pub const fn pool_data_update_frequency(&self) -> Option<u64> {
        self.pool_data_update_frequency
    }

    /// Get the first terraform pass depth.
    #[must_use]
    pub const fn terraform_lookback_blocks(&self) -> u64 {
        self.terraform_lookback_blocks
    }

    /// Get the bootstrap dataset path.
    #[must_use]
    pub fn static_pool_data(&self) -> &Path {
        &self.static_pool_data
    }

    /// Get the token registry path.
    #[must_use]
    pub fn tokens_file(&self) -> &Path {
        &self.tokens_file
    }

    /// Get the factory address map path.
    #[must_use]
    pub fn factories_file(&self) -> &Path {
        &self.factories_file
    }

    /// Get the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Check if cached events are replayed instead of fetched.
    #[must_use]
    pub const fn use_cached_events(&self) -> bool {
        self.use_cached_events
    }

    /// Get the concurrency bound.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the outbound request throttle.
    #[must_use]
    pub const fn rpc_requests_per_second(&self) -> Option<u32> {
        self.rpc_requests_per_second
    }

    /// Get the wrapped native token address.
    #[must_use]
    pub const fn wrapped_native_token(&self) -> Address {
        self.wrapped_native_token
    }
}

/// Split a comma-separated exchange list, dropping blanks and duplicates.
#[must_use]
pub fn parse_exchange_list(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> TrackerResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse_opt(raw, key)?.unwrap_or(default))
}

fn parse_opt<T>(raw: Option<String>, key: &str) -> TrackerResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|e| {
            TrackerError::config(format!("{key} has an invalid value: {value}"), Some(Box::new(e)))
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> TrackerResult<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_config_requires_rpc_source() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("ALCHEMY_API_KEY", "your_alchemy_api_key_here")]).is_err());
    }

    #[test]
    fn test_config_rpc_url_construction() {
        let config = config_from(&[("ALCHEMY_API_KEY", "test_api_key")]).unwrap();
        assert_eq!(
            config.rpc_url(),
            "https://eth-mainnet.g.alchemy.com/v2/test_api_key"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = config_from(&[("RPC_URL", "http://localhost:8545")]).unwrap();
        assert_eq!(config.rpc_url(), "http://localhost:8545");
        assert_eq!(config.exchanges().len(), 5);
        assert_eq!(config.poll_interval_secs(), 12);
        assert_eq!(config.max_block_fetch(), 2000);
        assert_eq!(config.reorg_delay(), 2);
        assert_eq!(config.pool_data_update_frequency(), Some(2));
        assert_eq!(config.rpc_requests_per_second(), Some(25));
        assert_eq!(config.wrapped_native_token(), DEFAULT_WRAPPED_NATIVE);
        assert!(!config.dry_run());
    }

    #[test]
    fn test_negative_update_frequency_disables_terraform() {
        let config = config_from(&[
            ("RPC_URL", "http://localhost:8545"),
            ("POOL_DATA_UPDATE_FREQUENCY", "-1"),
        ])
        .unwrap();
        assert_eq!(config.pool_data_update_frequency(), None);
    }

    #[test]
    fn test_replay_forces_zero_delay_and_interval() {
        let config = config_from(&[
            ("RPC_URL", "http://localhost:8545"),
            ("REPLAY_FROM_BLOCK", "19000000"),
            ("REORG_DELAY", "5"),
        ])
        .unwrap();
        assert_eq!(config.replay_from_block(), Some(19_000_000));
        assert_eq!(config.reorg_delay(), 0);
        assert_eq!(config.poll_interval_secs(), 0);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = config_from(&[
            ("RPC_URL", "http://localhost:8545"),
            ("MAX_BLOCK_FETCH", "lots"),
        ])
        .unwrap_err();
        assert!(matches!(err, TrackerError::ConfigError { .. }));
    }

    #[test]
    fn test_cached_events_require_cache_dir() {
        assert!(config_from(&[
            ("RPC_URL", "http://localhost:8545"),
            ("USE_CACHED_EVENTS", "true"),
        ])
        .is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = config_from(&[("RPC_URL", "http://localhost:8545")])
            .unwrap()
            .with_overrides(ConfigOverrides {
                exchanges: Some(vec!["nile_v2".to_string()]),
                max_block_fetch: Some(500),
                dry_run: true,
                ..ConfigOverrides::default()
            })
            .unwrap();
        assert_eq!(config.exchanges(), ["nile_v2".to_string()]);
        assert_eq!(config.max_block_fetch(), 500);
        assert!(config.dry_run());
    }

    #[test]
    fn test_parse_exchange_list_dedups() {
        assert_eq!(
            parse_exchange_list(" uniswap_v2, ,uniswap_v3,uniswap_v2 "),
            vec!["uniswap_v2".to_string(), "uniswap_v3".to_string()]
        );
    }
}
