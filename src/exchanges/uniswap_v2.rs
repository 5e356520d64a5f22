//! Constant-product exchanges (Uniswap V2 and forks).
//!
//! Fees are fixed per deployment and expressed in millionths, the same unit
//! concentrated-liquidity pools use.

use super::abi::IUniswapV2Pair;
use super::{pair_token0, pair_token1, AdapterSpec, DecodeContext, EventBinding, ExchangeFamily, PoolHandle};
use crate::error::TrackerResult;
use crate::events::{decode_event, EventKind, IUniswapV2, Payload, PoolDescriptor, UpdateRecord};
use crate::rpc::eth_call;
use crate::store::PoolState;
use alloy::primitives::U256;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use futures_util::future::BoxFuture;

const EVENTS: &[EventBinding] = &[
    EventBinding {
        topic: <IUniswapV2::Sync as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Sync,
        decode: decode_sync,
    },
    EventBinding {
        topic: <IUniswapV2::PairCreated as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Created,
        decode: decode_pair_created,
    },
];

const fn spec(name: &'static str, fee_millionths: u64) -> AdapterSpec {
    AdapterSpec {
        name,
        family: ExchangeFamily::ConstantProduct,
        fee_decimals: 6,
        constant_fee_raw: fee_millionths,
        get_fee: pinned_fee,
        get_token0: pair_token0,
        get_token1: pair_token1,
        fetch_state: reserves,
        events: EVENTS,
    }
}

/// Constant-product exchanges.
pub static SPECS: &[AdapterSpec] = &[
    spec("uniswap_v2", 3000),
    spec("sushiswap_v2", 3000),
    spec("pancakeswap_v2", 2500),
];

fn pinned_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move { Ok(U256::from(pool.spec.constant_fee_raw)) })
}

fn reserves<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<PoolState>> {
    Box::pin(async move {
        let ret = eth_call(pool.chain, pool.address, IUniswapV2Pair::getReservesCall {}).await?;
        Ok(PoolState::Reserves {
            reserve0: U256::from(ret.reserve0),
            reserve1: U256::from(ret.reserve1),
        })
    })
}

fn decode_sync(log: &Log, _context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: IUniswapV2::Sync = decode_event(log)?;
    UpdateRecord::at_log(
        log,
        log.address(),
        EventKind::Sync,
        Payload::Reserves {
            reserve0: U256::from(event.reserve0),
            reserve1: U256::from(event.reserve1),
        },
    )
}

fn decode_pair_created(log: &Log, context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: IUniswapV2::PairCreated = decode_event(log)?;
    let descriptor = PoolDescriptor {
        exchange_name: context.exchange_for_factory(log.address())?,
        address: event.pair,
        token0: Some(event.token0),
        token1: Some(event.token1),
        fee_raw: None,
    };
    UpdateRecord::at_log(log, event.pair, EventKind::Created, Payload::Created(descriptor))
}
