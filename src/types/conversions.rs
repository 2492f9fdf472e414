use ethers::types::{Address, U256, U512};
use std::convert::TryFrom;
use std::str::FromStr;

/// Basis-point denominator (10000 = 100%).
pub const BPS: u32 = 10_000;
/// Pip denominator for pool fees (1e6 = 100%).
pub const PIPS: u32 = 1_000_000;
/// Fixed-point scale of every oracle price.
pub const PRICE_DECIMALS: u8 = 18;

pub fn price_scale() -> U256 {
    U256::exp10(PRICE_DECIMALS as usize)
}

/// `floor(a * b / denominator)` with a 512-bit intermediate.
/// Returns `None` on division by zero or if the result does not fit in 256 bits.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product = U512::from(a) * U512::from(b);
    U256::try_from(product / U512::from(denominator)).ok()
}

/// `ceil(a * b / denominator)` with a 512-bit intermediate.
pub fn mul_div_up(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product = U512::from(a) * U512::from(b);
    let d = U512::from(denominator);
    let mut q = product / d;
    if !(product % d).is_zero() {
        q += U512::one();
    }
    U256::try_from(q).ok()
}

/// Rescales a fixed-point value from `decimals` to 18 decimals.
pub fn normalize_to_18(value: U256, decimals: u8) -> Option<U256> {
    match decimals.cmp(&PRICE_DECIMALS) {
        std::cmp::Ordering::Equal => Some(value),
        std::cmp::Ordering::Less => {
            value.checked_mul(U256::exp10((PRICE_DECIMALS - decimals) as usize))
        }
        std::cmp::Ordering::Greater => {
            Some(value / U256::exp10((decimals - PRICE_DECIMALS) as usize))
        }
    }
}

/// `1e36 / price`: inverts an 18-decimal price. Zero stays zero.
pub fn invert_price(price: U256) -> U256 {
    if price.is_zero() {
        return U256::zero();
    }
    mul_div(price_scale(), price_scale(), price).unwrap_or_else(U256::max_value)
}

/// Absolute difference of `a` and `b` in basis points of the smaller one, saturating at `u32::MAX`.
pub fn deviation_bps(a: U256, b: U256) -> u32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if lo.is_zero() {
        return if hi.is_zero() { 0 } else { u32::MAX };
    }
    mul_div(hi - lo, U256::from(BPS), lo)
        .map(|d| if d > U256::from(u32::MAX) { u32::MAX } else { d.as_u32() })
        .unwrap_or(u32::MAX)
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_rounds_both_ways() {
        let a = U256::from(10);
        let b = U256::from(10);
        let d = U256::from(3);
        assert_eq!(mul_div(a, b, d), Some(U256::from(33)));
        assert_eq!(mul_div_up(a, b, d), Some(U256::from(34)));
        assert_eq!(mul_div_up(a, U256::from(3), d), Some(U256::from(10)));
        assert_eq!(mul_div(a, b, U256::zero()), None);
    }

    #[test]
    fn mul_div_survives_256_bit_products() {
        let big = U256::max_value() / 2;
        assert_eq!(mul_div(big, U256::from(4), U256::from(4)), Some(big));
        assert_eq!(mul_div(U256::max_value(), U256::from(2), U256::one()), None);
    }

    #[test]
    fn normalizes_feed_decimals() {
        let eight = U256::from(2_000u64) * U256::exp10(8);
        assert_eq!(normalize_to_18(eight, 8), Some(U256::from(2_000u64) * U256::exp10(18)));
        let twenty = U256::from(5u64) * U256::exp10(20);
        assert_eq!(normalize_to_18(twenty, 20), Some(U256::from(5u64) * U256::exp10(18)));
    }

    #[test]
    fn deviation_is_relative_to_smaller_price() {
        let t = U256::from(1000u64);
        let c = U256::from(1100u64);
        assert_eq!(deviation_bps(t, c), 1000);
        assert_eq!(deviation_bps(c, t), 1000);
        assert_eq!(deviation_bps(t, t), 0);
    }

    #[test]
    fn inverts_prices() {
        let two = U256::from(2u64) * price_scale();
        assert_eq!(invert_price(two), price_scale() / 2);
        assert_eq!(invert_price(U256::zero()), U256::zero());
    }

    #[test]
    fn parses_addresses() {
        let addr = string_to_address(" 0x0000000000000000000000000000000000000001 ").unwrap();
        assert_eq!(addr, Address::from_low_u64_be(1));
        assert!(string_to_address("nope").is_err());
    }
}
