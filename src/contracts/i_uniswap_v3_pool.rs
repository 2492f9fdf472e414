use ethers::prelude::*;

// Read-only subset of the pool interface. Types match the Solidity declarations exactly
// (uint160 sqrtPriceX96, int24 tick, uint24 fee, uint128 liquidity); widening them
// breaks decoding silently.
abigen!(
    IUniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function liquidity() external view returns (uint128)
        function token0() external view returns (address)
        function token1() external view returns (address)
        function fee() external view returns (uint24)
    ]"#,
);
