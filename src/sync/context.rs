//! Everything a sync run needs, owned in one place.

use crate::bootstrap::{filter_enabled, load_static_pool_data, StaticPoolRow};
use crate::cache::EventCache;
use crate::config::Config;
use crate::error::TrackerResult;
use crate::exchanges::{AdapterSet, DeployedContracts};
use crate::reorg::SyncMode;
use crate::rpc::{ChainClient, ForkControl, RpcClient};
use crate::tokens::TokenRegistry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Loop and window settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Maximum blocks per `eth_getLogs` call
    pub max_block_fetch: u64,
    /// Blocks withheld below the head
    pub reorg_delay: u64,
    /// Sleep between live cycles
    pub poll_interval: Duration,
    /// Wall-clock limit checked between cycles
    pub timeout: Option<Duration>,
    /// Stop right after bootstrap
    pub dry_run: bool,
    /// Block to replay from
    pub replay_from_block: Option<u64>,
    /// Seconds the fork clock advances per cycle
    pub increment_time: u64,
    /// Blocks the fork mines per cycle
    pub increment_blocks: u64,
    /// Terraform every this many cycles
    pub pool_data_update_frequency: Option<u64>,
    /// Blocks the first terraform scans back from the cursor
    pub terraform_lookback_blocks: u64,
    /// Serve covered ranges from the event cache
    pub use_cached_events: bool,
    /// Bound on concurrent RPC fan-out
    pub max_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_block_fetch: 2000,
            reorg_delay: 2,
            poll_interval: Duration::from_secs(12),
            timeout: None,
            dry_run: false,
            replay_from_block: None,
            increment_time: 1,
            increment_blocks: 1,
            pool_data_update_frequency: Some(2),
            terraform_lookback_blocks: 50_000,
            use_cached_events: false,
            max_concurrency: 16,
        }
    }
}

impl SyncSettings {
    /// Settings of a validated configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_block_fetch: config.max_block_fetch(),
            reorg_delay: config.reorg_delay(),
            poll_interval: Duration::from_secs(config.poll_interval_secs()),
            timeout: config.timeout_secs().map(Duration::from_secs),
            dry_run: config.dry_run(),
            replay_from_block: config.replay_from_block(),
            increment_time: config.increment_time(),
            increment_blocks: config.increment_blocks(),
            pool_data_update_frequency: config.pool_data_update_frequency(),
            terraform_lookback_blocks: config.terraform_lookback_blocks(),
            use_cached_events: config.use_cached_events(),
            max_concurrency: config.max_concurrency(),
        }
    }

    /// Mode implied by the replay setting.
    #[must_use]
    pub const fn mode(&self) -> SyncMode {
        if self.replay_from_block.is_some() {
            SyncMode::Replay
        } else {
            SyncMode::Live
        }
    }
}

/// Providers, adapters and datasets of one run.
///
/// Logs always come from `chain`. Head, metadata and pool state come from
/// `state_chain`, which is the fork when one is attached.
pub struct SyncContext {
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) state_chain: Arc<dyn ChainClient>,
    pub(crate) fork: Option<Arc<dyn ForkControl>>,
    pub(crate) adapters: AdapterSet,
    pub(crate) deployed: Arc<DeployedContracts>,
    pub(crate) tokens: Arc<TokenRegistry>,
    pub(crate) dataset: Vec<StaticPoolRow>,
    pub(crate) cache: Option<EventCache>,
    pub(crate) settings: SyncSettings,
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("adapters", &self.adapters.len())
            .field("tokens", &self.tokens.len())
            .field("dataset", &self.dataset.len())
            .field("fork", &self.fork.is_some())
            .field("cache", &self.cache.as_ref().map(EventCache::dir))
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Context reading everything from `chain`.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        adapters: AdapterSet,
        deployed: DeployedContracts,
        tokens: TokenRegistry,
        dataset: Vec<StaticPoolRow>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            state_chain: Arc::clone(&chain),
            chain,
            fork: None,
            adapters,
            deployed: Arc::new(deployed),
            tokens: Arc::new(tokens),
            dataset,
            cache: None,
            settings,
        }
    }

    /// Attach a fork for head, metadata and time control.
    #[must_use]
    pub fn with_fork<F: ForkControl + 'static>(mut self, fork: Arc<F>) -> Self {
        self.state_chain = Arc::clone(&fork) as Arc<dyn ChainClient>;
        self.fork = Some(fork as Arc<dyn ForkControl>);
        self
    }

    /// Attach an event cache.
    #[must_use]
    pub fn with_cache(mut self, cache: EventCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the context of a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unreadable data files, unsupported
    /// exchanges or invalid RPC URLs, and a cache error if the cache
    /// directory cannot be created.
    pub fn from_config(config: &Config) -> TrackerResult<Self> {
        let exchanges = config.exchanges();
        let deployed = DeployedContracts::load(config.factories_file())?.restricted_to(exchanges);
        let adapters = AdapterSet::from_names(exchanges, &deployed, config.wrapped_native_token())?;
        let tokens = TokenRegistry::load(config.tokens_file())?;
        let dataset = filter_enabled(load_static_pool_data(config.static_pool_data())?, &adapters);

        let chain = Arc::new(RpcClient::connect(config.rpc_url(), config.rpc_requests_per_second())?);
        let mut context = Self::new(
            chain,
            adapters,
            deployed,
            tokens,
            dataset,
            SyncSettings::from_config(config),
        );

        if let Some(fork_url) = config.fork_rpc_url() {
            info!(fork = fork_url, "Using fork for chain head and metadata");
            let fork = Arc::new(RpcClient::connect(fork_url, None)?);
            context = context.with_fork(fork);
        }
        if let Some(dir) = config.cache_dir() {
            context = context.with_cache(EventCache::open(dir)?);
        }

        Ok(context)
    }

    /// Settings of the run.
    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Enabled adapters.
    #[must_use]
    pub const fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Token registry.
    #[must_use]
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Current pool dataset, including pools discovered since startup.
    #[must_use]
    pub fn dataset(&self) -> &[StaticPoolRow] {
        &self.dataset
    }

    /// Whether a fork is attached.
    #[must_use]
    pub const fn has_fork(&self) -> bool {
        self.fork.is_some()
    }
}
