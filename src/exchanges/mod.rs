//! Exchange adapters.
//!
//! Every supported exchange is described by a static [`AdapterSpec`]: a family
//! tag, its fee decimals and a table of strategy functions for fee, token and
//! state resolution plus the events it listens to. Adding a fork means adding
//! one `AdapterSpec` row, and a new fee getter means one new strategy function; no
//! existing strategy changes.
//!
//! An [`ExchangeAdapter`] binds an `AdapterSpec` to the deployment it runs against (the
//! factory address and the chain's wrapped native token).
//!
//! # Families
//!
//! | Family | Module | Exchanges |
//! |---|---|---|
//! | constant product | [`uniswap_v2`] | `uniswap_v2`, `sushiswap_v2`, `pancakeswap_v2` |
//! | concentrated liquidity | [`uniswap_v3`] | `uniswap_v3`, `sushiswap_v3` |
//! | Solidly forks | [`solidly_v2`] | `velodrome_v2`, `aerodrome_v2`, `equalizer_v2`, ... |
//! | custom AMM | [`solidly_v2`] | `xfai_v0` |

pub mod abi;
pub mod solidly_v2;
pub mod uniswap_v2;
pub mod uniswap_v3;

use crate::error::{TrackerError, TrackerResult};
use crate::events::{EventKind, PoolDescriptor, UpdateRecord};
use crate::rpc::{eth_call, ChainClient};
use crate::store::{Pool, PoolState};
use crate::subscription::Subscription;
use abi::IPairTokens;
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use futures_util::future::{try_join, BoxFuture};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Protocol family an exchange belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeFamily {
    /// Uniswap V2 style `x * y = k` pairs.
    ConstantProduct,
    /// Uniswap V3 style ticked liquidity.
    ConcentratedLiquidity,
    /// Solidly forks with stable and volatile pairs.
    Solidly,
    /// Anything else with its own pool shape.
    CustomAmm,
}

impl fmt::Display for ExchangeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConstantProduct => "constant_product",
            Self::ConcentratedLiquidity => "concentrated_liquidity",
            Self::Solidly => "solidly",
            Self::CustomAmm => "custom_amm",
        };
        f.write_str(name)
    }
}

/// A pool being resolved, as seen by strategy functions.
pub struct PoolHandle<'a> {
    /// Chain used for view calls
    pub chain: &'a dyn ChainClient,
    /// Pool contract
    pub address: Address,
    /// Factory of the pool's exchange, if deployed
    pub factory: Option<Address>,
    /// Counter-asset for single-token pools
    pub wrapped_native: Address,
    /// Exchange the pool belongs to
    pub spec: &'static AdapterSpec,
}

impl PoolHandle<'_> {
    /// Factory address, required by factory-side fee getters.
    ///
    /// # Errors
    ///
    /// Returns a metadata error when no factory is configured.
    pub fn factory(&self) -> TrackerResult<Address> {
        self.factory.ok_or_else(|| {
            TrackerError::metadata(
                format!("No factory configured for {}", self.spec.name),
                None,
            )
        })
    }
}

/// Fee strategy: raw fee in the exchange's fee decimals.
pub type FeeFn = for<'a> fn(&'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>>;

/// Token strategy.
pub type TokenFn = for<'a> fn(&'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<Address>>;

/// Current on-chain state of a pool.
pub type StateFn = for<'a> fn(&'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<PoolState>>;

/// Pure log decoder.
pub type DecodeFn = fn(&Log, &DecodeContext) -> TrackerResult<UpdateRecord>;

/// An event an exchange listens to and how to decode it.
#[derive(Clone, Copy)]
pub struct EventBinding {
    /// First topic of the event
    pub topic: B256,
    /// What the event changes
    pub kind: EventKind,
    /// Decoder
    pub decode: DecodeFn,
}

impl fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBinding")
            .field("topic", &self.topic)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Static description of one exchange.
pub struct AdapterSpec {
    /// Exchange name used in configuration and datasets
    pub name: &'static str,
    /// Protocol family
    pub family: ExchangeFamily,
    /// Fee fraction = raw / 10^`fee_decimals`
    pub fee_decimals: u32,
    /// Fee used by exchanges whose fee is fixed at deployment
    pub constant_fee_raw: u64,
    /// Fee strategy
    pub get_fee: FeeFn,
    /// First token strategy
    pub get_token0: TokenFn,
    /// Second token strategy
    pub get_token1: TokenFn,
    /// State strategy
    pub fetch_state: StateFn,
    /// Events this exchange's pools and factory emit
    pub events: &'static [EventBinding],
}

impl fmt::Debug for AdapterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSpec")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("fee_decimals", &self.fee_decimals)
            .finish_non_exhaustive()
    }
}

/// Every supported exchange.
pub fn supported() -> impl Iterator<Item = &'static AdapterSpec> {
    uniswap_v2::SPECS
        .iter()
        .chain(uniswap_v3::SPECS.iter())
        .chain(solidly_v2::SPECS.iter())
}

/// Find the adapter table entry of exchange `name`.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static AdapterSpec> {
    supported().find(|spec| spec.name == name)
}

/// Convert a raw fee into a fraction of the traded amount.
///
/// # Errors
///
/// Returns a metadata error when `raw` is not below `10^decimals`, i.e. the
/// fee would take the whole traded amount or more.
pub fn fee_fraction(raw: U256, decimals: u32) -> TrackerResult<f64> {
    let one = U256::from(10u64).checked_pow(U256::from(decimals)).unwrap_or(U256::MAX);
    if raw >= one {
        return Err(TrackerError::metadata(
            format!("Fee {raw} is not below 1e{decimals}"),
            None,
        ));
    }
    let raw = u128::try_from(raw)
        .map_err(|_| TrackerError::metadata(format!("Fee {raw} is out of range"), None))?;
    let scale = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));

    #[allow(clippy::cast_precision_loss)]
    Ok(raw as f64 / scale)
}

/// Everything a decoder may need besides the log.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    /// Exchange owning the subscription
    pub exchange_name: String,
    /// Fee decimals of the owning exchange
    pub fee_decimals: u32,
    /// Factory to exchange routing for creation events
    pub deployed: Arc<DeployedContracts>,
}

impl DecodeContext {
    /// Name of the enabled exchange whose factory is `factory`.
    ///
    /// # Errors
    ///
    /// Returns a decoding error for logs from factories that are not
    /// configured, including factories of disabled exchanges.
    pub fn exchange_for_factory(&self, factory: Address) -> TrackerResult<String> {
        self.deployed
            .exchange_for_factory(factory)
            .map(str::to_string)
            .ok_or_else(|| {
                TrackerError::decoding(format!("Creation log from unknown factory {factory}"), None)
            })
    }
}

/// Factory addresses of the enabled exchanges and which of them have pools.
///
/// An exchange is initialized once the store holds at least one of its
/// pools; only initialized exchanges contribute subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployedContracts {
    factories: HashMap<String, Address>,
    initialized: HashSet<String>,
}

impl DeployedContracts {
    /// Create from a factory map.
    #[must_use]
    pub fn new(factories: HashMap<String, Address>) -> Self {
        Self {
            factories,
            initialized: HashSet::new(),
        }
    }

    /// Load the factory map from a JSON object of `name -> address`.
    ///
    /// A missing file yields an empty map, which disables creation tracking.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file exists but is not valid.
    pub fn load(path: &Path) -> TrackerResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Factory file not found, pool creation events will be ignored");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::config(
                format!("Failed to read factory file: {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        let factories: HashMap<String, Address> = serde_json::from_str(&contents).map_err(|e| {
            TrackerError::config(
                format!("Failed to parse factory file: {}", path.display()),
                Some(Box::new(e)),
            )
        })?;

        debug!(count = factories.len(), "Loaded factory addresses");
        Ok(Self::new(factories))
    }

    /// Keep only the factories of `enabled` exchanges.
    #[must_use]
    pub fn restricted_to(mut self, enabled: &[String]) -> Self {
        self.factories.retain(|name, _| enabled.contains(name));
        self.initialized.retain(|name| enabled.contains(name));
        self
    }

    /// Factory of exchange `name`.
    #[must_use]
    pub fn factory(&self, name: &str) -> Option<Address> {
        self.factories.get(name).copied()
    }

    /// Exchange whose factory is `factory`.
    #[must_use]
    pub fn exchange_for_factory(&self, factory: Address) -> Option<&str> {
        self.factories
            .iter()
            .find(|(_, address)| **address == factory)
            .map(|(name, _)| name.as_str())
    }

    /// Record that exchange `name` has at least one pool.
    pub fn mark_initialized(&mut self, name: impl Into<String>) {
        self.initialized.insert(name.into());
    }

    /// Replace the initialized set.
    pub fn set_initialized<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initialized = names.into_iter().map(Into::into).collect();
    }

    /// Whether exchange `name` has at least one pool.
    #[must_use]
    pub fn is_initialized(&self, name: &str) -> bool {
        self.initialized.contains(name)
    }
}

/// An exchange bound to its deployment.
#[derive(Debug, Clone)]
pub struct ExchangeAdapter {
    spec: &'static AdapterSpec,
    factory: Option<Address>,
    wrapped_native: Address,
}

impl ExchangeAdapter {
    /// Bind `spec` to a deployment.
    #[must_use]
    pub const fn new(spec: &'static AdapterSpec, factory: Option<Address>, wrapped_native: Address) -> Self {
        Self {
            spec,
            factory,
            wrapped_native,
        }
    }

    /// Exchange name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Protocol family.
    #[must_use]
    pub const fn family(&self) -> ExchangeFamily {
        self.spec.family
    }

    /// Fee decimals.
    #[must_use]
    pub const fn fee_decimals(&self) -> u32 {
        self.spec.fee_decimals
    }

    /// Factory address, if deployed.
    #[must_use]
    pub const fn factory(&self) -> Option<Address> {
        self.factory
    }

    fn handle<'a>(&self, chain: &'a dyn ChainClient, pool: Address) -> PoolHandle<'a> {
        PoolHandle {
            chain,
            address: pool,
            factory: self.factory,
            wrapped_native: self.wrapped_native,
            spec: self.spec,
        }
    }

    fn decode_context(&self, deployed: &Arc<DeployedContracts>) -> Arc<DecodeContext> {
        Arc::new(DecodeContext {
            exchange_name: self.name().to_string(),
            fee_decimals: self.fee_decimals(),
            deployed: Arc::clone(deployed),
        })
    }

    /// Subscriptions this exchange contributes to a cycle.
    ///
    /// Uninitialized exchanges contribute nothing. Creation events are only
    /// subscribed when the factory is known.
    #[must_use]
    pub fn enumerate_subscriptions(&self, deployed: &Arc<DeployedContracts>) -> Vec<Subscription> {
        if !deployed.is_initialized(self.name()) {
            return Vec::new();
        }

        let context = self.decode_context(deployed);
        self.spec
            .events
            .iter()
            .filter(|binding| binding.kind != EventKind::Created || self.factory.is_some())
            .map(|binding| Subscription::new(self.family(), binding, Arc::clone(&context)))
            .collect()
    }

    /// Creation subscriptions, regardless of initialization.
    ///
    /// Used by terraforming to discover pools of exchanges that have none yet.
    #[must_use]
    pub fn creation_subscriptions(&self, deployed: &Arc<DeployedContracts>) -> Vec<Subscription> {
        if self.factory.is_none() {
            return Vec::new();
        }

        let context = self.decode_context(deployed);
        self.spec
            .events
            .iter()
            .filter(|binding| binding.kind == EventKind::Created)
            .map(|binding| Subscription::new(self.family(), binding, Arc::clone(&context)))
            .collect()
    }

    /// Resolve the fee of `pool` as a display string and a fraction.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying fee strategy.
    pub async fn resolve_fee(&self, chain: &dyn ChainClient, pool: Address) -> TrackerResult<(String, f64)> {
        let handle = self.handle(chain, pool);
        let raw = (self.spec.get_fee)(&handle).await?;
        let fraction = fee_fraction(raw, self.fee_decimals())?;
        Ok((fraction.to_string(), fraction))
    }

    /// Resolve the first token of `pool`.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying token strategy.
    pub async fn resolve_token0(&self, chain: &dyn ChainClient, pool: Address) -> TrackerResult<Address> {
        let handle = self.handle(chain, pool);
        (self.spec.get_token0)(&handle).await
    }

    /// Resolve the second token of `pool`.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying token strategy.
    pub async fn resolve_token1(&self, chain: &dyn ChainClient, pool: Address) -> TrackerResult<Address> {
        let handle = self.handle(chain, pool);
        (self.spec.get_token1)(&handle).await
    }

    /// Read the current state of `pool`.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying state strategy.
    pub async fn fetch_state(&self, chain: &dyn ChainClient, pool: Address) -> TrackerResult<PoolState> {
        let handle = self.handle(chain, pool);
        (self.spec.fetch_state)(&handle).await
    }

    /// Decode a creation log into a pool descriptor.
    ///
    /// # Errors
    ///
    /// Returns a decoding error when the log is not one of this exchange's
    /// creation events or comes from an unknown factory.
    pub fn parse_pool_created_event(
        &self,
        log: &Log,
        deployed: &Arc<DeployedContracts>,
    ) -> TrackerResult<PoolDescriptor> {
        let topic = log.topics().first().copied().unwrap_or_default();
        let binding = self
            .spec
            .events
            .iter()
            .find(|binding| binding.kind == EventKind::Created && binding.topic == topic)
            .ok_or_else(|| {
                TrackerError::decoding(
                    format!("{} has no creation event with topic {topic}", self.name()),
                    None,
                )
            })?;

        let record = (binding.decode)(log, &self.decode_context(deployed))?;
        match record.payload {
            crate::events::Payload::Created(descriptor) => Ok(descriptor),
            _ => Err(TrackerError::decoding("Creation decoder returned a non-creation record", None)),
        }
    }

    /// Resolve everything a [`Pool`] needs from a descriptor.
    ///
    /// Tokens and fee carried by the descriptor are used as is; missing ones
    /// are read from chain. A failed state read is not fatal: the pool starts
    /// uninitialized and the next event fills it in.
    ///
    /// # Errors
    ///
    /// Returns a metadata error when tokens or fee cannot be resolved.
    pub async fn resolve_pool(
        &self,
        chain: &dyn ChainClient,
        descriptor: &PoolDescriptor,
        first_seen_block: u64,
    ) -> TrackerResult<Pool> {
        let address = descriptor.address;
        let wrap = |what: &str, e: TrackerError| {
            TrackerError::metadata(
                format!("Failed to resolve {what} of {} pool {address}", self.name()),
                Some(Box::new(e)),
            )
        };

        let token0 = async {
            match descriptor.token0 {
                Some(token) => Ok(token),
                None => self.resolve_token0(chain, address).await,
            }
        };
        let token1 = async {
            match descriptor.token1 {
                Some(token) => Ok(token),
                None => self.resolve_token1(chain, address).await,
            }
        };
        let (token0, token1) = try_join(token0, token1).await.map_err(|e| wrap("tokens", e))?;

        let (fee, fee_float) = match descriptor.fee_raw {
            Some(raw) => {
                let fraction = fee_fraction(raw, self.fee_decimals())?;
                (fraction.to_string(), fraction)
            }
            None => self.resolve_fee(chain, address).await.map_err(|e| wrap("fee", e))?,
        };

        let state = match self.fetch_state(chain, address).await {
            Ok(state) => state,
            Err(e) => {
                debug!(pool = %address, error = %e, "Initial state unavailable");
                PoolState::Uninitialized
            }
        };

        Ok(Pool::new(
            self.name(),
            address,
            token0,
            token1,
            fee,
            fee_float,
            state,
            first_seen_block,
        ))
    }
}

/// Token strategy for pools exposing `token0()`.
pub(crate) fn pair_token0<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<Address>> {
    Box::pin(async move { Ok(eth_call(pool.chain, pool.address, IPairTokens::token0Call {}).await?._0) })
}

/// Token strategy for pools exposing `token1()`.
pub(crate) fn pair_token1<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<Address>> {
    Box::pin(async move { Ok(eth_call(pool.chain, pool.address, IPairTokens::token1Call {}).await?._0) })
}

/// The enabled exchanges, in configuration order.
///
/// Order matters: when two exchanges share an event topic, the first one
/// owns its decoder.
#[derive(Debug, Clone, Default)]
pub struct AdapterSet {
    adapters: Vec<ExchangeAdapter>,
}

impl AdapterSet {
    /// Build adapters for `names`, bound to the factories in `deployed`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported exchange name.
    pub fn from_names(
        names: &[String],
        deployed: &DeployedContracts,
        wrapped_native: Address,
    ) -> TrackerResult<Self> {
        let adapters = names
            .iter()
            .map(|name| {
                let spec = lookup(name).ok_or_else(|| {
                    let known: Vec<&str> = supported().map(|spec| spec.name).collect();
                    TrackerError::config(
                        format!("Unsupported exchange '{name}', expected one of: {}", known.join(", ")),
                        None,
                    )
                })?;
                Ok(ExchangeAdapter::new(spec, deployed.factory(name), wrapped_native))
            })
            .collect::<TrackerResult<Vec<_>>>()?;

        Ok(Self { adapters })
    }

    /// Adapter of exchange `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExchangeAdapter> {
        self.adapters.iter().find(|adapter| adapter.name() == name)
    }

    /// Whether exchange `name` is enabled.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &ExchangeAdapter> {
        self.adapters.iter()
    }

    /// Number of enabled exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no exchange is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
