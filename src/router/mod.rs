//! # Router Module
//!
//! Routing primitives returned by the [`PathFinder`](crate::path_finder::PathFinder):
//! a [`Route`] is a sequence of pools through a token sequence, a [`Path`] is a route
//! together with the quote computed for one input amount.

use crate::pools::Pool;
use crate::quoter::PathQuote;
use ethers::prelude::Address;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Pool sequence through `tokens` (`tokens.len() == pools.len() + 1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub tokens: Vec<Address>,
    pub pools: Vec<Address>,
    pub fees: Vec<u32>,
}

impl Route {
    pub fn from_pools(tokens: Vec<Address>, pools: &[Pool]) -> Self {
        Self {
            tokens,
            pools: pools.iter().map(|p| p.id).collect(),
            fees: pools.iter().map(|p| p.fee).collect(),
        }
    }

    pub fn hops(&self) -> usize {
        self.pools.len()
    }
}

/// A quoted route.
///
/// A valid path keeps `tokens.len() == pools.len() + 1`. An invalid path
/// (`is_valid == false`) means "no route satisfies the constraints"; it carries the
/// query's amount and no tokens, pools or fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub tokens: Vec<Address>,
    pub fees: Vec<u32>,
    pub pools: Vec<Address>,
    pub amount_in: U256,
    pub expected_amount_out: U256,
    pub price_impact_bps: u32,
    pub gas_estimate: u64,
    pub is_valid: bool,
}

impl Path {
    pub fn from_quote(route: &Route, quote: &PathQuote) -> Self {
        Self {
            tokens: route.tokens.clone(),
            fees: route.fees.clone(),
            pools: route.pools.clone(),
            amount_in: quote.amount_in,
            expected_amount_out: quote.amount_out,
            price_impact_bps: quote.price_impact_bps,
            gas_estimate: quote.gas_estimate,
            is_valid: true,
        }
    }

    /// Zero-hop path for `token_in == token_out`.
    pub fn identity(token: Address, amount: U256) -> Self {
        Self {
            tokens: vec![token],
            fees: Vec::new(),
            pools: Vec::new(),
            amount_in: amount,
            expected_amount_out: amount,
            price_impact_bps: 0,
            gas_estimate: 0,
            is_valid: true,
        }
    }

    pub fn invalid(amount_in: U256) -> Self {
        Self {
            tokens: Vec::new(),
            fees: Vec::new(),
            pools: Vec::new(),
            amount_in,
            expected_amount_out: U256::zero(),
            price_impact_bps: 0,
            gas_estimate: 0,
            is_valid: false,
        }
    }

    pub fn hops(&self) -> usize {
        self.pools.len()
    }

    pub fn route(&self) -> Route {
        Route {
            tokens: self.tokens.clone(),
            pools: self.pools.clone(),
            fees: self.fees.clone(),
        }
    }

    /// Ranking order: more output, then fewer hops, then less gas.
    pub fn is_better_than(&self, other: &Path) -> bool {
        (self.expected_amount_out, std::cmp::Reverse(self.hops()), std::cmp::Reverse(self.gas_estimate))
            > (other.expected_amount_out, std::cmp::Reverse(other.hops()), std::cmp::Reverse(other.gas_estimate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(out: u64, hops: usize, gas: u64) -> Path {
        Path {
            tokens: vec![Address::zero(); hops + 1],
            fees: vec![3000; hops],
            pools: vec![Address::zero(); hops],
            amount_in: U256::from(1000u64),
            expected_amount_out: U256::from(out),
            price_impact_bps: 0,
            gas_estimate: gas,
            is_valid: true,
        }
    }

    #[test]
    fn ranking_prefers_output_then_hops_then_gas() {
        assert!(path(101, 3, 250_000).is_better_than(&path(100, 1, 80_000)));
        assert!(path(100, 1, 80_000).is_better_than(&path(100, 2, 80_000)));
        assert!(path(100, 2, 150_000).is_better_than(&path(100, 2, 200_000)));
        assert!(!path(100, 2, 200_000).is_better_than(&path(100, 2, 200_000)));
    }

    #[test]
    fn identity_path_is_valid_and_lossless() {
        let token = Address::from_low_u64_be(7);
        let p = Path::identity(token, U256::from(5u64));
        assert!(p.is_valid);
        assert_eq!(p.hops(), 0);
        assert_eq!(p.expected_amount_out, p.amount_in);
    }

    #[test]
    fn invalid_path_has_no_route() {
        let p = Path::invalid(U256::from(5u64));
        assert!(!p.is_valid);
        assert!(p.tokens.is_empty());
        assert_eq!(p.hops(), 0);
        assert_eq!(p.amount_in, U256::from(5u64));
        assert!(p.expected_amount_out.is_zero());
    }
}
