// Concentrated-liquidity math used by the quote engine and the TWAP source.
use crate::types::conversions::{mul_div, price_scale};
use ethers::types::{U256, U512};
use std::convert::TryFrom;

/// Uniswap V3 constants
pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;
pub const MIN_SQRT_RATIO: U256 = U256([4295128739, 0, 0, 0]); // sqrt(1.0001^-887272) * 2^96
pub const MAX_SQRT_RATIO: U256 = U256([6743328256752651558, 17280870778742802505, 4294805859, 0]); // sqrt(1.0001^887272) * 2^96

/// Q96 fixed point constant (2^96)
pub const Q96: U256 = U256([0, 0, 4294967296, 0]);

// sqrt(1.0001^-(2^i)) in Q128.128, one entry per bit of |tick|.
const TICK_FACTORS: [u128; 19] = [
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

/// Calculate sqrt price from tick (TickMath.getSqrtRatioAtTick equivalent).
/// Returns `None` outside `[MIN_TICK, MAX_TICK]`.
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Option<U256> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return None;
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001u128)
    } else {
        U256::one() << 128
    };
    for (bit, factor) in TICK_FACTORS.iter().enumerate() {
        if abs_tick & (1u32 << (bit + 1)) != 0 {
            // ratio <= 2^128 and factor < 2^128, so the product fits in 256 bits
            ratio = (ratio * U256::from(*factor)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::max_value() / ratio;
    }

    let remainder = ratio & U256::from(u32::MAX);
    let sqrt_price = (ratio >> 32) + if remainder.is_zero() { U256::zero() } else { U256::one() };
    Some(sqrt_price)
}

/// Spot price of token1 in token0 units scaled by 1e18: `sqrtP^2 / 2^192 * 1e18`.
pub fn sqrt_price_to_price(sqrt_price_x96: U256) -> U256 {
    if sqrt_price_x96.is_zero() {
        return U256::zero();
    }
    let squared = U512::from(sqrt_price_x96) * U512::from(sqrt_price_x96);
    let scaled = squared * U512::from(price_scale());
    let q192 = U512::one() << 192;
    U256::try_from(scaled / q192).unwrap_or_else(|_| U256::max_value())
}

/// Virtual reserves of the active range: `x = L * 2^96 / sqrtP`, `y = L * sqrtP / 2^96`.
/// Returns `None` when there is no liquidity or no price.
pub fn virtual_reserves(liquidity: u128, sqrt_price_x96: U256) -> Option<(U256, U256)> {
    if liquidity == 0 || sqrt_price_x96.is_zero() {
        return None;
    }
    let l = U256::from(liquidity);
    let x = mul_div(l, Q96, sqrt_price_x96)?;
    let y = mul_div(l, sqrt_price_x96, Q96)?;
    if x.is_zero() || y.is_zero() {
        return None;
    }
    Some((x, y))
}

/// Determine if swap is zero_for_one based on token addresses
pub fn is_zero_for_one(token_in: ethers::types::Address, token0: ethers::types::Address) -> bool {
    token_in == token0
}
