//! Concentrated-liquidity pool snapshot.

use crate::errors::{QuoteError, QuoteResult};
use crate::v3_math;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Raw pool state as returned by a [`PoolStateReader`](crate::chain_reader::PoolStateReader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

/// Pool registered in the [`PoolGraph`](crate::pool_graph::PoolGraph).
///
/// `token_a` plays the role of token0: `sqrt_price_x96` is the square root of the price of
/// `token_a` denominated in `token_b`, in Q64.96. Fees are in pips (1e6 = 100%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: Address,
    pub token_a: Address,
    pub token_b: Address,
    pub fee: u32,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub last_update: u64,
}

impl Pool {
    pub fn from_state(id: Address, state: PoolState, now: u64) -> Self {
        Self {
            id,
            token_a: state.token0,
            token_b: state.token1,
            fee: state.fee,
            liquidity: state.liquidity,
            sqrt_price_x96: state.sqrt_price_x96,
            tick: state.tick,
            last_update: now,
        }
    }

    /// Checks structural invariants and that the fee is one of `fee_tiers`.
    pub fn validate(&self, fee_tiers: &[u32]) -> QuoteResult<()> {
        if self.id.is_zero() {
            return Err(QuoteError::InvalidPool("zero pool id".into()));
        }
        if self.token_a.is_zero() || self.token_b.is_zero() {
            return Err(QuoteError::InvalidPool(format!("pool {:?} has a zero token", self.id)));
        }
        if self.token_a == self.token_b {
            return Err(QuoteError::InvalidPool(format!(
                "pool {:?} pairs a token with itself",
                self.id
            )));
        }
        if !fee_tiers.contains(&self.fee) {
            return Err(QuoteError::InvalidPool(format!(
                "pool {:?} fee {} is not a supported tier",
                self.id, self.fee
            )));
        }
        Ok(())
    }

    pub fn contains(&self, token: Address) -> bool {
        self.token_a == token || self.token_b == token
    }

    /// The token on the other side of `token`, if `token` belongs to this pool.
    pub fn other(&self, token: Address) -> Option<Address> {
        if token == self.token_a {
            Some(self.token_b)
        } else if token == self.token_b {
            Some(self.token_a)
        } else {
            None
        }
    }

    /// Stored sqrt price, or the one implied by `tick` when the stored value is zero.
    pub fn effective_sqrt_price(&self) -> U256 {
        if !self.sqrt_price_x96.is_zero() {
            return self.sqrt_price_x96;
        }
        if self.liquidity == 0 {
            return U256::zero();
        }
        v3_math::get_sqrt_ratio_at_tick(self.tick).unwrap_or_default()
    }

    /// `(reserve_in, reserve_out)` of the active range when selling `token_in`.
    pub fn virtual_reserves(&self, token_in: Address) -> Option<(U256, U256)> {
        let (x, y) = v3_math::virtual_reserves(self.liquidity, self.effective_sqrt_price())?;
        if v3_math::is_zero_for_one(token_in, self.token_a) {
            Some((x, y))
        } else if token_in == self.token_b {
            Some((y, x))
        } else {
            None
        }
    }

    /// Spot price of `base` in units of the other token, 1e18 scale.
    pub fn spot_price(&self, base: Address) -> Option<U256> {
        let price = v3_math::sqrt_price_to_price(self.effective_sqrt_price());
        if price.is_zero() {
            return None;
        }
        if base == self.token_a {
            Some(price)
        } else if base == self.token_b {
            Some(crate::types::conversions::invert_price(price))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v3_math::Q96;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn pool() -> Pool {
        Pool {
            id: addr(100),
            token_a: addr(1),
            token_b: addr(2),
            fee: 3000,
            liquidity: 1_000_000,
            sqrt_price_x96: Q96 * 2,
            tick: 0,
            last_update: 0,
        }
    }

    #[test]
    fn rejects_self_pairs_and_unknown_tiers() {
        let tiers = [100, 500, 3000, 10000];
        assert!(pool().validate(&tiers).is_ok());

        let mut same = pool();
        same.token_b = same.token_a;
        assert!(matches!(same.validate(&tiers), Err(QuoteError::InvalidPool(_))));

        let mut odd_fee = pool();
        odd_fee.fee = 2500;
        assert!(matches!(odd_fee.validate(&tiers), Err(QuoteError::InvalidPool(_))));
    }

    #[test]
    fn reserves_follow_direction() {
        let p = pool();
        let (x, y) = p.virtual_reserves(addr(1)).unwrap();
        assert_eq!(x, U256::from(500_000u64));
        assert_eq!(y, U256::from(2_000_000u64));
        assert_eq!(p.virtual_reserves(addr(2)), Some((y, x)));
        assert_eq!(p.virtual_reserves(addr(3)), None);
    }

    #[test]
    fn falls_back_to_tick_price() {
        let mut p = pool();
        p.sqrt_price_x96 = U256::zero();
        p.tick = 0;
        assert_eq!(p.effective_sqrt_price(), Q96);
        p.liquidity = 0;
        assert!(p.effective_sqrt_price().is_zero());
    }

    #[test]
    fn spot_price_inverts_for_token_b() {
        let p = pool();
        let one = U256::exp10(18);
        assert_eq!(p.spot_price(addr(1)), Some(one * 4));
        assert_eq!(p.spot_price(addr(2)), Some(one / 4));
    }
}
