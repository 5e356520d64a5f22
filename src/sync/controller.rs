//! The polling state machine.
//!
//! ```text
//!   INIT ──► STEADY_LIVE ──────────────┐
//!     │                                 ├──► STOPPED
//!     └────► REPLAY_FORK ──────────────┘
//! ```
//!
//! Each cycle plans a reorg-safe window, gathers its records (from the
//! cache or the chain), resolves newly created pools, applies the records,
//! runs maintenance and hands a snapshot to the consumer. The cursor only
//! advances once all of that has succeeded; a failed cycle is logged and
//! the same range is retried on the next one.

use super::context::SyncContext;
use super::terraform::{terraform, TerraformReport};
use crate::bootstrap::{
    merge_rows, populate_store, resolve_descriptors, resolve_rows, BootstrapReport, Resolution, StaticPoolRow,
};
use crate::error::TrackerResult;
use crate::events::{Payload, UpdateRecord};
use crate::gatherer::EventGatherer;
use crate::reorg::{plan_window, BlockWindow, SyncCursor, SyncMode};
use crate::snapshot::{PoolSnapshot, SnapshotConsumer};
use crate::store::{ApplyReport, MaintenanceReport, PoolStore};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Bootstrap not done yet.
    Init,
    /// Following the live head.
    SteadyLive,
    /// Replaying history, with or without a fork.
    ReplayFork,
    /// Finished.
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::SteadyLive => write!(f, "steady_live"),
            Self::ReplayFork => write!(f, "replay_fork"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why [`SyncController::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Dry run finished bootstrapping.
    DryRun,
    /// Replay without a fork processed its single cycle.
    ReplayComplete,
    /// The wall-clock limit was reached.
    Timeout,
    /// Ctrl-C.
    Shutdown,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Window fetched, `None` when the safe head had not moved
    pub window: Option<BlockWindow>,
    /// Records gathered
    pub records: usize,
    /// Logs dropped as undecodable
    pub dropped_logs: usize,
    /// Whether the records came from the event cache
    pub from_cache: bool,
    /// Pools inserted from creation events
    pub created: usize,
    /// Outcome of applying the records
    pub apply: ApplyReport,
    /// Outcome of maintenance
    pub maintenance: MaintenanceReport,
    /// Active pools after the cycle
    pub pools: usize,
    /// Records were applied but the snapshot did not change
    pub stagnant: bool,
}

/// Totals of a [`SyncController::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles that completed
    pub cycles: u64,
    /// Cycles that failed and were retried
    pub failed_cycles: u64,
    /// Cycles that applied records without changing the snapshot
    pub stagnant_cycles: u64,
    /// Terraform passes that completed
    pub terraforms: u64,
    /// Outcome of the bootstrap
    pub bootstrap: BootstrapReport,
    /// Cursor position at exit
    pub last_block_processed: u64,
    /// Active pools at exit
    pub pools: usize,
    /// Why the run ended
    pub stop_reason: Option<StopReason>,
}

struct Fetched {
    records: Vec<UpdateRecord>,
    dropped_logs: usize,
    from_cache: bool,
}

/// Drives gatherer, store and consumer through the sync cycle.
#[derive(Debug)]
pub struct SyncController {
    ctx: SyncContext,
    store: PoolStore,
    gatherer: EventGatherer,
    cursor: SyncCursor,
    state: ControllerState,
    latest: Option<PoolSnapshot>,
    terraform_checkpoint: Option<u64>,
    cycles: u64,
}

impl SyncController {
    /// Controller in the `Init` state.
    #[must_use]
    pub fn new(ctx: SyncContext) -> Self {
        let settings = ctx.settings.clone();
        let gatherer = EventGatherer::for_adapters(&ctx.adapters, &ctx.deployed, settings.max_concurrency);
        Self {
            ctx,
            store: PoolStore::new(),
            gatherer,
            cursor: SyncCursor::new(0, settings.reorg_delay, settings.mode()),
            state: ControllerState::Init,
            latest: None,
            terraform_checkpoint: None,
            cycles: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    /// Current cursor.
    #[must_use]
    pub const fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// The pool store.
    #[must_use]
    pub const fn store(&self) -> &PoolStore {
        &self.store
    }

    /// The run context.
    #[must_use]
    pub const fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Snapshot handed off by the last successful cycle.
    #[must_use]
    pub const fn latest_snapshot(&self) -> Option<&PoolSnapshot> {
        self.latest.as_ref()
    }

    /// Topics subscribed for the next cycle.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<alloy::primitives::B256> {
        self.gatherer.topics()
    }

    /// Bootstrap the store from the dataset and position the cursor.
    ///
    /// The cursor starts `max_block_fetch` blocks below the anchor, which is
    /// the replay block or the current safe head. A dry run stops here.
    ///
    /// # Errors
    ///
    /// Returns the RPC error when the head cannot be read.
    pub async fn init(&mut self) -> TrackerResult<BootstrapReport> {
        let settings = self.ctx.settings.clone();

        let resolutions = resolve_rows(
            &*self.ctx.state_chain,
            &self.ctx.adapters,
            &self.store,
            &self.ctx.dataset,
            0,
            settings.max_concurrency,
        )
        .await;
        let report = populate_store(&mut self.store, resolutions);
        self.refresh_subscriptions();

        if settings.dry_run {
            info!(pools = self.store.len(), "Dry run, stopping after bootstrap");
            self.state = ControllerState::Stopped;
            return Ok(report);
        }

        let anchor = match settings.replay_from_block {
            Some(block) => block,
            None => {
                let head = self.ctx.state_chain.block_number().await?;
                head.saturating_sub(settings.reorg_delay)
            }
        };
        let mode = settings.mode();
        self.cursor = SyncCursor::new(
            anchor.saturating_sub(settings.max_block_fetch),
            settings.reorg_delay,
            mode,
        );
        self.state = match mode {
            SyncMode::Live => ControllerState::SteadyLive,
            SyncMode::Replay => ControllerState::ReplayFork,
        };

        info!(
            state = %self.state,
            start_block = self.cursor.last_block_processed() + 1,
            pools = self.store.len(),
            topics = self.gatherer.topics().len(),
            "Controller initialized"
        );
        Ok(report)
    }

    /// Run one cycle and hand the resulting snapshot to `consumer`.
    ///
    /// # Errors
    ///
    /// Returns the RPC error of a failed head read or log fetch. The cursor
    /// and the store are unchanged in that case.
    pub async fn run_cycle<C>(&mut self, consumer: &mut C) -> TrackerResult<CycleReport>
    where
        C: SnapshotConsumer + ?Sized,
    {
        let head = self.current_head().await?;
        let window = plan_window(&self.cursor, head, self.ctx.settings.max_block_fetch);
        let mut report = CycleReport {
            window,
            ..CycleReport::default()
        };

        // Without a previous hand-off, the bootstrapped store is the baseline.
        let baseline = self.latest.is_none().then(|| {
            self.store
                .snapshot(self.cursor.last_block_processed(), Arc::clone(&self.ctx.tokens))
        });

        match window {
            Some(window) => {
                let fetched = self.fetch_records(window).await?;
                report.records = fetched.records.len();
                report.dropped_logs = fetched.dropped_logs;
                report.from_cache = fetched.from_cache;
                report.created = self.insert_created_pools(&fetched.records).await;
                report.apply = self.store.apply(&fetched.records);
            }
            None => debug!(head, last = self.cursor.last_block_processed(), "Safe head has not advanced"),
        }

        let adapters = &self.ctx.adapters;
        report.maintenance = self
            .store
            .run_maintenance(&self.ctx.tokens, |name| adapters.is_enabled(name));

        let block = window.map_or(self.cursor.last_block_processed(), |w| w.to_block);
        let snapshot = self.store.snapshot(block, Arc::clone(&self.ctx.tokens));
        report.pools = snapshot.len();
        let ingested = report.apply.applied + report.apply.revived + report.created;
        if ingested > 0 {
            if let Some(previous) = self.latest.as_ref().or(baseline.as_ref()) {
                if previous.same_pools_as(&snapshot) {
                    report.stagnant = true;
                    warn!(ingested, block, "Records applied but pool state did not change");
                }
            }
        }

        if let Some(window) = window {
            self.cursor.commit(window);
        }
        consumer.on_snapshot(snapshot.clone());
        if let Some(cache) = &self.ctx.cache {
            if let Err(e) = cache.write_pool_data(&snapshot) {
                warn!(error = %e, "Failed to write pool data");
            }
        }
        self.latest = Some(snapshot);
        self.refresh_subscriptions();

        info!(
            window = ?window.map(|w| w.to_string()),
            records = report.records,
            applied = report.apply.applied,
            created = report.created,
            removed = report.maintenance.total(),
            pools = report.pools,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until a stop condition is met.
    ///
    /// Failed cycles are logged and retried. Terraform passes run every
    /// `pool_data_update_frequency` cycles.
    ///
    /// # Errors
    ///
    /// Returns non-transient errors from initialization.
    pub async fn run<C>(&mut self, consumer: &mut C) -> TrackerResult<RunSummary>
    where
        C: SnapshotConsumer + ?Sized,
    {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        while self.state == ControllerState::Init {
            match self.init().await {
                Ok(report) => summary.bootstrap = report,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Initialization failed, retrying");
                    if self.timed_out(started) {
                        return Ok(self.finish(summary, StopReason::Timeout));
                    }
                    tokio::time::sleep(self.ctx.settings.poll_interval.max(Duration::from_secs(1))).await;
                }
                Err(e) => return Err(e),
            }
        }

        if self.state == ControllerState::Stopped {
            return Ok(self.finish(summary, StopReason::DryRun));
        }

        let reason = loop {
            self.cycles += 1;
            let span = info_span!("cycle", index = self.cycles, mode = %self.cursor.mode());

            match self.run_cycle(consumer).instrument(span.clone()).await {
                Ok(report) => {
                    summary.cycles += 1;
                    if report.stagnant {
                        summary.stagnant_cycles += 1;
                    }
                    if summary.cycles == 1 {
                        info!(
                            pools = report.pools,
                            block = self.cursor.last_block_processed(),
                            "Initial data sync finished, handing off to search"
                        );
                    }
                }
                Err(e) => {
                    summary.failed_cycles += 1;
                    warn!(parent: &span, error = %e, transient = e.is_transient(), "Cycle failed, retrying range next cycle");
                }
            }

            if self.terraform_due() {
                match self.terraform_pass().instrument(span.clone()).await {
                    Ok(_) => summary.terraforms += 1,
                    Err(e) => warn!(parent: &span, error = %e, "Terraform pass failed"),
                }
            }

            if self.cursor.mode() == SyncMode::Replay && self.ctx.fork.is_none() {
                break StopReason::ReplayComplete;
            }
            if self.timed_out(started) {
                info!(elapsed_secs = started.elapsed().as_secs(), "Timeout reached, stopping");
                break StopReason::Timeout;
            }

            self.advance_fork().await;

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break StopReason::Shutdown;
                }
                () = tokio::time::sleep(self.ctx.settings.poll_interval) => {}
            }
        };

        Ok(self.finish(summary, reason))
    }

    fn finish(&mut self, mut summary: RunSummary, reason: StopReason) -> RunSummary {
        self.state = ControllerState::Stopped;
        summary.last_block_processed = self.cursor.last_block_processed();
        summary.pools = self.store.len();
        summary.stop_reason = Some(reason);
        info!(
            ?reason,
            cycles = summary.cycles,
            failed = summary.failed_cycles,
            last_block = summary.last_block_processed,
            pools = summary.pools,
            "Sync stopped"
        );
        summary
    }

    fn timed_out(&self, started: Instant) -> bool {
        self.ctx
            .settings
            .timeout
            .is_some_and(|timeout| started.elapsed() >= timeout)
    }

    fn terraform_due(&self) -> bool {
        self.ctx
            .settings
            .pool_data_update_frequency
            .is_some_and(|every| every > 0 && self.cycles % every == 0)
    }

    async fn current_head(&self) -> TrackerResult<u64> {
        match self.ctx.settings.replay_from_block {
            Some(block) if self.ctx.fork.is_none() => Ok(block),
            _ => self.ctx.state_chain.block_number().await,
        }
    }

    async fn fetch_records(&self, window: BlockWindow) -> TrackerResult<Fetched> {
        if self.ctx.settings.use_cached_events {
            if let Some(cache) = &self.ctx.cache {
                match cache.load(window.from_block, window.to_block) {
                    Ok(Some(records)) => {
                        debug!(%window, "Serving window from event cache");
                        return Ok(Fetched {
                            records,
                            dropped_logs: 0,
                            from_cache: true,
                        });
                    }
                    Ok(None) => debug!(%window, "Window not cached, fetching"),
                    Err(e) => warn!(error = %e, "Event cache unreadable, fetching"),
                }
            }
        }

        let output = self
            .gatherer
            .gather(&*self.ctx.chain, window.from_block, window.to_block)
            .await?;
        if let Some(cache) = &self.ctx.cache {
            if let Err(e) = cache.save(window.from_block, window.to_block, &output.records) {
                warn!(error = %e, "Failed to cache window");
            }
        }

        Ok(Fetched {
            records: output.records,
            dropped_logs: output.dropped_logs,
            from_cache: false,
        })
    }

    async fn insert_created_pools(&mut self, records: &[UpdateRecord]) -> usize {
        let descriptors: Vec<_> = records
            .iter()
            .filter_map(|record| match &record.payload {
                Payload::Created(descriptor) => Some((descriptor.clone(), record.block_number)),
                _ => None,
            })
            .collect();
        if descriptors.is_empty() {
            return 0;
        }

        let rows: Vec<StaticPoolRow> = descriptors
            .iter()
            .map(|(descriptor, _)| StaticPoolRow::from_descriptor(descriptor))
            .collect();
        self.ctx.dataset = merge_rows(&self.ctx.dataset, rows);

        let resolutions = resolve_descriptors(
            &*self.ctx.state_chain,
            &self.ctx.adapters,
            &self.store,
            descriptors,
            self.ctx.settings.max_concurrency,
        )
        .await;

        let mut inserted = 0;
        for resolution in resolutions {
            match resolution {
                Resolution::Resolved(pool) => {
                    let address = pool.address;
                    if self.store.insert_created(pool) {
                        debug!(pool = %address, "Pool created");
                        inserted += 1;
                    }
                }
                Resolution::Failed {
                    exchange_name,
                    address,
                    error,
                } => {
                    warn!(exchange = %exchange_name, pool = %address, error = %error, "Created pool unresolved, marking invalid");
                    self.store.mark_invalid(exchange_name, address);
                }
            }
        }
        inserted
    }

    async fn terraform_pass(&mut self) -> TrackerResult<TerraformReport> {
        let to_block = self.cursor.last_block_processed();
        let from_block = self.terraform_checkpoint.map_or_else(
            || to_block.saturating_sub(self.ctx.settings.terraform_lookback_blocks),
            |checkpoint| checkpoint + 1,
        );

        let report = terraform(&mut self.ctx, &mut self.store, from_block, to_block).await?;
        self.terraform_checkpoint = Some(to_block);
        self.refresh_subscriptions();
        Ok(report)
    }

    async fn advance_fork(&self) {
        let Some(fork) = &self.ctx.fork else {
            return;
        };
        let settings = &self.ctx.settings;
        if let Err(e) = fork.advance_time(settings.increment_time).await {
            warn!(error = %e, "Failed to advance fork time");
        }
        if let Err(e) = fork.advance_blocks(settings.increment_blocks).await {
            warn!(error = %e, "Failed to advance fork blocks");
        }
    }

    /// Mark exchanges with pools as initialized and rebuild the gatherer.
    ///
    /// Initialization is sticky so purged pools can still be revived.
    fn refresh_subscriptions(&mut self) {
        let active = self.store.exchanges();
        let initialized: Vec<String> = self
            .ctx
            .adapters
            .iter()
            .map(|adapter| adapter.name())
            .filter(|name| self.ctx.deployed.is_initialized(name) || active.contains(*name))
            .map(str::to_string)
            .collect();

        Arc::make_mut(&mut self.ctx.deployed).set_initialized(initialized);
        self.gatherer = EventGatherer::for_adapters(
            &self.ctx.adapters,
            &self.ctx.deployed,
            self.ctx.settings.max_concurrency,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::IUniswapV2;
    use crate::exchanges::{AdapterSet, DeployedContracts};
    use crate::snapshot::LoggingConsumer;
    use crate::sync::context::SyncSettings;
    use crate::test_utils::MockChain;
    use crate::tokens::TokenRegistry;
    use alloy::primitives::{address, Address, Uint, U256};
    use alloy::sol_types::SolEvent;
    use std::collections::HashMap;

    const PAIR: Address = address!("000000000000000000000000000000000000000A");
    const TOKEN0: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const TOKEN1: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

    fn sync(r0: u64, r1: u64) -> IUniswapV2::Sync {
        IUniswapV2::Sync {
            reserve0: Uint::<112, 2>::from(r0),
            reserve1: Uint::<112, 2>::from(r1),
        }
    }

    fn controller(chain: Arc<MockChain>, settings: SyncSettings) -> SyncController {
        let names = vec!["uniswap_v2".to_string()];
        let deployed = DeployedContracts::new(HashMap::new());
        let adapters = AdapterSet::from_names(&names, &deployed, Address::ZERO).unwrap();
        let dataset = vec![StaticPoolRow {
            address: PAIR,
            exchange_name: "uniswap_v2".to_string(),
            token0: Some(TOKEN0),
            token1: Some(TOKEN1),
            fee_raw: None,
        }];
        SyncController::new(SyncContext::new(
            chain,
            adapters,
            deployed,
            TokenRegistry::default(),
            dataset,
            settings,
        ))
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            max_block_fetch: 100,
            reorg_delay: 2,
            poll_interval: Duration::ZERO,
            pool_data_update_frequency: None,
            ..SyncSettings::default()
        }
    }

    #[tokio::test]
    async fn test_init_positions_cursor_below_safe_head() {
        let chain = Arc::new(MockChain::new(1_000));
        let mut controller = controller(chain, settings());

        let report = controller.init().await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(controller.state(), ControllerState::SteadyLive);
        assert_eq!(controller.cursor().last_block_processed(), 898);
        assert_eq!(controller.subscribed_topics(), vec![IUniswapV2::Sync::SIGNATURE_HASH]);
    }

    #[tokio::test]
    async fn test_cycle_applies_and_advances() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.emit(PAIR, &sync(1_000, 2_000), 950, 0);
        let mut controller = controller(Arc::clone(&chain), settings());
        controller.init().await.unwrap();

        let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();
        assert_eq!(report.window, Some(BlockWindow { from_block: 899, to_block: 998 }));
        assert_eq!(report.apply.applied, 1);
        assert_eq!(controller.cursor().last_block_processed(), 998);
        assert_eq!(controller.latest_snapshot().map(PoolSnapshot::len), Some(1));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cursor() {
        let chain = Arc::new(MockChain::new(1_000));
        let mut controller = controller(Arc::clone(&chain), settings());
        controller.init().await.unwrap();
        chain.fail_topic(IUniswapV2::Sync::SIGNATURE_HASH);

        assert!(controller.run_cycle(&mut LoggingConsumer).await.is_err());
        assert_eq!(controller.cursor().last_block_processed(), 898);
        assert!(controller.latest_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_caught_up_cycle_hands_off_without_fetching() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.emit(PAIR, &sync(1_000, 2_000), 950, 0);
        let mut controller = controller(Arc::clone(&chain), settings());
        controller.init().await.unwrap();
        controller.run_cycle(&mut LoggingConsumer).await.unwrap();
        let fetches = chain.fetches().len();

        let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();
        assert_eq!(report.window, None);
        assert_eq!(chain.fetches().len(), fetches);
        assert_eq!(report.pools, 1);
        assert_eq!(controller.latest_snapshot().map(PoolSnapshot::block_number), Some(998));
    }

    #[tokio::test]
    async fn test_pool_without_reserves_is_purged() {
        let chain = Arc::new(MockChain::new(1_000));
        let mut controller = controller(Arc::clone(&chain), settings());
        controller.init().await.unwrap();

        let report = controller.run_cycle(&mut LoggingConsumer).await.unwrap();
        assert_eq!(report.maintenance.zero_liquidity, 1);
        assert!(controller.store().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_stops_after_bootstrap() {
        let chain = Arc::new(MockChain::new(1_000));
        let mut controller = controller(
            Arc::clone(&chain),
            SyncSettings {
                dry_run: true,
                ..settings()
            },
        );

        let summary = controller.run(&mut LoggingConsumer).await.unwrap();
        assert_eq!(summary.stop_reason, Some(StopReason::DryRun));
        assert_eq!(summary.cycles, 0);
        assert!(chain.fetches().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_stops_live_run() {
        let chain = Arc::new(MockChain::new(1_000));
        chain.emit(PAIR, &sync(1_000, 2_000), 950, 0);
        let mut controller = controller(
            Arc::clone(&chain),
            SyncSettings {
                timeout: Some(Duration::ZERO),
                ..settings()
            },
        );

        let summary = controller.run(&mut LoggingConsumer).await.unwrap();
        assert_eq!(summary.stop_reason, Some(StopReason::Timeout));
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.last_block_processed, 998);
        assert_eq!(
            controller.store().get_by_address(&PAIR).map(|p| p.state.clone()),
            Some(crate::store::PoolState::Reserves {
                reserve0: U256::from(1_000u64),
                reserve1: U256::from(2_000u64),
            })
        );
    }
}
