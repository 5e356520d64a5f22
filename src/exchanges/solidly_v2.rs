//! Solidly forks and the Xfai custom AMM.
//!
//! Solidly forks share pool shape and events but each factory exposes the
//! fee differently:
//!
//! | Exchange | Fee getter | Decimals |
//! |---|---|---|
//! | `velocimeter_v2`, `stratum_v2` | `factory.getFee(pool)` | 4 |
//! | `equalizer_v2` | `factory.getRealFee(pool)` | 4 |
//! | `scale_v2` | `factory.getRealFee(pool)` | 18 |
//! | `velodrome_v2`, `aerodrome_v2` | `factory.getFee(pool, pool.stable())` | 4 |
//! | `cleopatra_v2` | `factory.getPairFee(pool, pool.stable())` | 4 |
//! | `lynex_v2` | `factory.getFee(pool.stable())` | 4 |
//! | `nile_v2` | `factory.pairFee(pool)` | 4 |
//! | `xfai_v0` | `pool.getXfaiCore().getTotalFee()` | 4 |
//!
//! Xfai pools hold a single token against the chain's wrapped native token;
//! their `Sync` carries `(reserve, weight)` and shares the Solidly topic.

use super::abi::{
    IPairFeeFactory, IPoolFeeFactory, IRealFeeFactory, ISolidlyPair, IStableFeeFactory,
    IStableOnlyFeeFactory, IXfaiCore, IXfaiPool, INileFactory,
};
use super::{
    fee_fraction, pair_token0, pair_token1, AdapterSpec, DecodeContext, EventBinding,
    ExchangeFamily, FeeFn, PoolHandle,
};
use crate::error::TrackerResult;
use crate::events::{decode_event, EventKind, ISolidly, IXfai, Payload, PoolDescriptor, UpdateRecord};
use crate::rpc::eth_call;
use crate::store::PoolState;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use futures_util::future::BoxFuture;

const SYNC: EventBinding = EventBinding {
    topic: <ISolidly::Sync as SolEvent>::SIGNATURE_HASH,
    kind: EventKind::Sync,
    decode: decode_sync,
};

const PAIR_EVENTS: &[EventBinding] = &[
    SYNC,
    EventBinding {
        topic: <ISolidly::PairCreated as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Created,
        decode: decode_pair_created,
    },
];

const POOL_EVENTS: &[EventBinding] = &[
    SYNC,
    EventBinding {
        topic: <ISolidly::PoolCreated as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Created,
        decode: decode_pool_created,
    },
    EventBinding {
        topic: <ISolidly::SetCustomFee as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::FeeChanged,
        decode: decode_set_custom_fee,
    },
];

const XFAI_EVENTS: &[EventBinding] = &[
    SYNC,
    EventBinding {
        topic: <IXfai::PoolCreated as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Created,
        decode: decode_xfai_pool_created,
    },
];

const fn solidly(name: &'static str, fee_decimals: u32, get_fee: FeeFn, events: &'static [EventBinding]) -> AdapterSpec {
    AdapterSpec {
        name,
        family: ExchangeFamily::Solidly,
        fee_decimals,
        constant_fee_raw: 0,
        get_fee,
        get_token0: pair_token0,
        get_token1: pair_token1,
        fetch_state: solidly_reserves,
        events,
    }
}

/// Solidly forks and Xfai.
pub static SPECS: &[AdapterSpec] = &[
    solidly("velocimeter_v2", 4, factory_get_fee, PAIR_EVENTS),
    solidly("stratum_v2", 4, factory_get_fee, PAIR_EVENTS),
    solidly("equalizer_v2", 4, factory_get_real_fee, PAIR_EVENTS),
    solidly("scale_v2", 18, factory_get_real_fee, PAIR_EVENTS),
    solidly("velodrome_v2", 4, factory_get_fee_with_stable, POOL_EVENTS),
    solidly("aerodrome_v2", 4, factory_get_fee_with_stable, POOL_EVENTS),
    solidly("cleopatra_v2", 4, factory_get_pair_fee, PAIR_EVENTS),
    solidly("lynex_v2", 4, factory_get_fee_by_stable, PAIR_EVENTS),
    solidly("nile_v2", 4, factory_pair_fee, PAIR_EVENTS),
    AdapterSpec {
        name: "xfai_v0",
        family: ExchangeFamily::CustomAmm,
        fee_decimals: 4,
        constant_fee_raw: 0,
        get_fee: xfai_core_fee,
        get_token0: xfai_pool_token,
        get_token1: wrapped_native,
        fetch_state: xfai_states,
        events: XFAI_EVENTS,
    },
];

async fn is_stable(pool: &PoolHandle<'_>) -> TrackerResult<bool> {
    Ok(eth_call(pool.chain, pool.address, ISolidlyPair::stableCall {}).await?._0)
}

fn factory_get_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let call = IPoolFeeFactory::getFeeCall { pool: pool.address };
        Ok(eth_call(pool.chain, pool.factory()?, call).await?._0)
    })
}

fn factory_get_real_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let call = IRealFeeFactory::getRealFeeCall { pool: pool.address };
        Ok(eth_call(pool.chain, pool.factory()?, call).await?._0)
    })
}

fn factory_get_fee_with_stable<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let factory = pool.factory()?;
        let call = IStableFeeFactory::getFeeCall {
            pool: pool.address,
            stable: is_stable(pool).await?,
        };
        Ok(eth_call(pool.chain, factory, call).await?._0)
    })
}

fn factory_get_pair_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let factory = pool.factory()?;
        let call = IPairFeeFactory::getPairFeeCall {
            pool: pool.address,
            stable: is_stable(pool).await?,
        };
        Ok(eth_call(pool.chain, factory, call).await?._0)
    })
}

fn factory_get_fee_by_stable<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let factory = pool.factory()?;
        let call = IStableOnlyFeeFactory::getFeeCall {
            stable: is_stable(pool).await?,
        };
        Ok(eth_call(pool.chain, factory, call).await?._0)
    })
}

fn factory_pair_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let call = INileFactory::pairFeeCall { pool: pool.address };
        Ok(eth_call(pool.chain, pool.factory()?, call).await?._0)
    })
}

fn xfai_core_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let core = eth_call(pool.chain, pool.address, IXfaiPool::getXfaiCoreCall {}).await?._0;
        Ok(eth_call(pool.chain, core, IXfaiCore::getTotalFeeCall {}).await?._0)
    })
}

fn xfai_pool_token<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<Address>> {
    Box::pin(async move { Ok(eth_call(pool.chain, pool.address, IXfaiPool::poolTokenCall {}).await?._0) })
}

fn wrapped_native<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<Address>> {
    Box::pin(async move { Ok(pool.wrapped_native) })
}

fn solidly_reserves<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<PoolState>> {
    Box::pin(async move {
        let ret = eth_call(pool.chain, pool.address, ISolidlyPair::getReservesCall {}).await?;
        Ok(PoolState::Reserves {
            reserve0: ret.reserve0,
            reserve1: ret.reserve1,
        })
    })
}

fn xfai_states<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<PoolState>> {
    Box::pin(async move {
        let ret = eth_call(pool.chain, pool.address, IXfaiPool::getStatesCall {}).await?;
        Ok(PoolState::Reserves {
            reserve0: ret.reserve,
            reserve1: ret.weight,
        })
    })
}

fn decode_sync(log: &Log, _context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: ISolidly::Sync = decode_event(log)?;
    UpdateRecord::at_log(
        log,
        log.address(),
        EventKind::Sync,
        Payload::Reserves {
            reserve0: event.reserve0,
            reserve1: event.reserve1,
        },
    )
}

fn created(log: &Log, context: &DecodeContext, pool: Address, token0: Address, token1: Option<Address>) -> TrackerResult<UpdateRecord> {
    let descriptor = PoolDescriptor {
        exchange_name: context.exchange_for_factory(log.address())?,
        address: pool,
        token0: Some(token0),
        token1,
        fee_raw: None,
    };
    UpdateRecord::at_log(log, pool, EventKind::Created, Payload::Created(descriptor))
}

fn decode_pair_created(log: &Log, context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: ISolidly::PairCreated = decode_event(log)?;
    created(log, context, event.pair, event.token0, Some(event.token1))
}

fn decode_pool_created(log: &Log, context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: ISolidly::PoolCreated = decode_event(log)?;
    created(log, context, event.pool, event.token0, Some(event.token1))
}

fn decode_xfai_pool_created(log: &Log, context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: IXfai::PoolCreated = decode_event(log)?;
    // The counter-asset is resolved through the adapter's wrapped native token.
    created(log, context, event.pool, event.token, None)
}

fn decode_set_custom_fee(log: &Log, context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: ISolidly::SetCustomFee = decode_event(log)?;
    UpdateRecord::at_log(
        log,
        event.pool,
        EventKind::FeeChanged,
        Payload::Fee {
            raw: event.fee,
            fraction: fee_fraction(event.fee, context.fee_decimals)?,
        },
    )
}
