//! View functions called during metadata and state resolution.

use alloy::sol;

sol! {
    /// Token getters shared by Uniswap V2/V3 and Solidly pools.
    interface IPairTokens {
        function token0() external view returns (address);
        function token1() external view returns (address);
    }

    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }

    interface IUniswapV3Pool {
        function fee() external view returns (uint24);
        function liquidity() external view returns (uint128);
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
    }

    interface ISolidlyPair {
        function stable() external view returns (bool);
        function getReserves() external view returns (uint256 reserve0, uint256 reserve1, uint256 blockTimestampLast);
    }

    /// `getFee(pool)` factories (Velocimeter, Stratum).
    interface IPoolFeeFactory {
        function getFee(address pool) external view returns (uint256);
    }

    /// `getRealFee(pool)` factories (Equalizer, Scale).
    interface IRealFeeFactory {
        function getRealFee(address pool) external view returns (uint256);
    }

    /// `getFee(pool, stable)` factories (Velodrome, Aerodrome).
    interface IStableFeeFactory {
        function getFee(address pool, bool stable) external view returns (uint256);
    }

    interface IPairFeeFactory {
        function getPairFee(address pool, bool stable) external view returns (uint256);
    }

    /// Lynex prices by pool type only.
    interface IStableOnlyFeeFactory {
        function getFee(bool stable) external view returns (uint256);
    }

    interface INileFactory {
        function pairFee(address pool) external view returns (uint256);
    }

    interface IXfaiPool {
        function poolToken() external view returns (address);
        function getXfaiCore() external view returns (address);
        function getStates() external view returns (uint256 reserve, uint256 weight);
    }

    interface IXfaiCore {
        function getTotalFee() external view returns (uint256);
    }
}
