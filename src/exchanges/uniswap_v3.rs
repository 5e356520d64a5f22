//! Concentrated-liquidity exchanges (Uniswap V3 and forks).

use super::abi::IUniswapV3Pool;
use super::{pair_token0, pair_token1, AdapterSpec, DecodeContext, EventBinding, ExchangeFamily, PoolHandle};
use crate::error::{TrackerError, TrackerResult};
use crate::events::{decode_event, EventKind, IUniswapV3, Payload, PoolDescriptor, UpdateRecord};
use crate::rpc::eth_call;
use crate::store::PoolState;
use alloy::primitives::U256;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use futures_util::future::{try_join, BoxFuture};

const EVENTS: &[EventBinding] = &[
    EventBinding {
        topic: <IUniswapV3::Swap as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Sync,
        decode: decode_swap,
    },
    EventBinding {
        topic: <IUniswapV3::PoolCreated as SolEvent>::SIGNATURE_HASH,
        kind: EventKind::Created,
        decode: decode_pool_created,
    },
];

const fn spec(name: &'static str) -> AdapterSpec {
    AdapterSpec {
        name,
        family: ExchangeFamily::ConcentratedLiquidity,
        fee_decimals: 6,
        constant_fee_raw: 0,
        get_fee: pool_fee,
        get_token0: pair_token0,
        get_token1: pair_token1,
        fetch_state: slot0,
        events: EVENTS,
    }
}

/// Concentrated-liquidity exchanges.
pub static SPECS: &[AdapterSpec] = &[spec("uniswap_v3"), spec("sushiswap_v3")];

fn tick_to_i32<T>(tick: T) -> TrackerResult<i32>
where
    i32: TryFrom<T>,
{
    i32::try_from(tick).map_err(|_| TrackerError::decoding("Tick does not fit in 24 bits", None))
}

fn pool_fee<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<U256>> {
    Box::pin(async move {
        let ret = eth_call(pool.chain, pool.address, IUniswapV3Pool::feeCall {}).await?;
        Ok(U256::from(ret._0))
    })
}

fn slot0<'a>(pool: &'a PoolHandle<'a>) -> BoxFuture<'a, TrackerResult<PoolState>> {
    Box::pin(async move {
        let (slot0, liquidity) = try_join(
            eth_call(pool.chain, pool.address, IUniswapV3Pool::slot0Call {}),
            eth_call(pool.chain, pool.address, IUniswapV3Pool::liquidityCall {}),
        )
        .await?;

        Ok(PoolState::Concentrated {
            sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
            liquidity: liquidity._0,
            tick: tick_to_i32(slot0.tick)?,
        })
    })
}

fn decode_swap(log: &Log, _context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: IUniswapV3::Swap = decode_event(log)?;
    UpdateRecord::at_log(
        log,
        log.address(),
        EventKind::Sync,
        Payload::Concentrated {
            sqrt_price_x96: U256::from(event.sqrtPriceX96),
            liquidity: event.liquidity,
            tick: tick_to_i32(event.tick)?,
        },
    )
}

fn decode_pool_created(log: &Log, context: &DecodeContext) -> TrackerResult<UpdateRecord> {
    let event: IUniswapV3::PoolCreated = decode_event(log)?;
    let descriptor = PoolDescriptor {
        exchange_name: context.exchange_for_factory(log.address())?,
        address: event.pool,
        token0: Some(event.token0),
        token1: Some(event.token1),
        fee_raw: Some(U256::from(event.fee)),
    };
    UpdateRecord::at_log(log, event.pool, EventKind::Created, Payload::Created(descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::{lookup, DeployedContracts, ExchangeAdapter};
    use crate::test_utils::{event_log, MockChain};
    use alloy::primitives::{address, Address, Uint};
    use alloy::sol_types::SolValue;
    use std::collections::HashMap;
    use std::sync::Arc;

    const FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
    const POOL: Address = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");

    fn context() -> DecodeContext {
        DecodeContext {
            exchange_name: "uniswap_v3".to_string(),
            fee_decimals: 6,
            deployed: Arc::new(DeployedContracts::new(HashMap::from([(
                "uniswap_v3".to_string(),
                FACTORY,
            )]))),
        }
    }

    #[test]
    fn test_decode_pool_created_carries_fee_tier() {
        let event = IUniswapV3::PoolCreated {
            token0: USDC,
            token1: WETH,
            fee: 500u32.try_into().unwrap(),
            tickSpacing: 10i32.try_into().unwrap(),
            pool: POOL,
        };
        let record = decode_pool_created(&event_log(FACTORY, &event, 12_376_729, 0), &context()).unwrap();

        assert_eq!(record.pool_key, POOL);
        let Payload::Created(descriptor) = record.payload else {
            unreachable!("creation decoder must return a descriptor");
        };
        assert_eq!(descriptor.fee_raw, Some(U256::from(500u64)));
        assert_eq!(descriptor.exchange_name, "uniswap_v3");
    }

    #[test]
    fn test_decode_swap_reads_price_and_liquidity() {
        let event = IUniswapV3::Swap {
            sender: Address::ZERO,
            recipient: Address::ZERO,
            amount0: alloy::primitives::I256::ZERO,
            amount1: alloy::primitives::I256::ZERO,
            sqrtPriceX96: Uint::<160, 3>::from(1u64 << 40),
            liquidity: 123_456,
            tick: (-887i32).try_into().unwrap(),
        };
        let record = decode_swap(&event_log(POOL, &event, 10, 2), &context()).unwrap();

        assert_eq!(
            record.payload,
            Payload::Concentrated {
                sqrt_price_x96: U256::from(1u64 << 40),
                liquidity: 123_456,
                tick: -887,
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_fee_reads_pool_fee() {
        let chain = MockChain::new(100);
        chain.respond(POOL, &IUniswapV3Pool::feeCall {}, U256::from(3000u64).abi_encode());

        let adapter = ExchangeAdapter::new(lookup("uniswap_v3").unwrap(), Some(FACTORY), WETH);
        let (display, fraction) = adapter.resolve_fee(&chain, POOL).await.unwrap();
        assert_eq!(display, "0.003");
        assert_eq!(fraction, 0.003);
    }
}
