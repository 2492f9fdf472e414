//! # Quote Engine
//!
//! Exact-in and exact-out quotes for single pools and multi-hop paths.
//!
//! Each pool is treated as a constant-product curve over the virtual reserves of its
//! active range (`x = L * 2^96 / sqrtP`, `y = L * sqrtP / 2^96`). The fee (in pips) is
//! taken from the input before it reaches the curve. All products go through 512-bit
//! intermediates; outputs round down and inputs round up, so a quote never promises more
//! than the pool delivers.
//!
//! Exact-out quotes charge the largest input that still rounds to the requested output,
//! so quoting the output of an exact-in quote never asks for less than was put in.

use crate::errors::{QuoteError, QuoteResult};
use crate::pools::Pool;
use crate::settings::PathFinding;
use crate::types::conversions::{BPS, PIPS};
use ethers::types::{Address, U256, U512};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Longest path the engine will quote.
pub const MAX_QUOTE_HOPS: usize = 4;
/// Cap on the upward refinement of multi-hop exact-out solutions.
pub const MAX_INVERSE_ITERATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopQuote {
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
    pub price_impact_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathQuote {
    pub amount_in: U256,
    pub amount_out: U256,
    pub price_impact_bps: u32,
    pub gas_estimate: u64,
    pub hops: Vec<HopQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasModel {
    pub single_hop: u64,
    pub multi_hop_base: u64,
    pub per_hop: u64,
}

impl Default for GasModel {
    fn default() -> Self {
        Self {
            single_hop: 80_000,
            multi_hop_base: 100_000,
            per_hop: 50_000,
        }
    }
}

impl GasModel {
    pub fn from_settings(s: &PathFinding) -> Self {
        Self {
            single_hop: s.gas_single_hop,
            multi_hop_base: s.gas_multi_hop_base,
            per_hop: s.gas_per_hop,
        }
    }

    pub fn estimate(&self, hops: usize) -> u64 {
        match hops {
            0 => 0,
            1 => self.single_hop,
            n => self.multi_hop_base + self.per_hop * n as u64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuoteEngine {
    gas: GasModel,
}

fn to_u256(v: U512) -> Option<U256> {
    U256::try_from(v).ok()
}

/// Impact of adding `effective_in` (scaled by 1e6) to a reserve of `reserve_in`, in bps, rounded up.
fn hop_impact_bps(reserve_in: U256, effective_in: U512) -> u32 {
    let denom = U512::from(reserve_in) * U512::from(PIPS) + effective_in;
    if denom.is_zero() {
        return BPS;
    }
    let num = effective_in * U512::from(BPS);
    let mut q = num / denom;
    if !(num % denom).is_zero() {
        q += U512::one();
    }
    q.min(U512::from(BPS)).low_u32()
}

/// `10000 - prod(10000 - impact_i) / 10000^(n-1)`.
pub fn compound_impact_bps(impacts: &[u32]) -> u32 {
    if impacts.is_empty() {
        return 0;
    }
    let bps = BPS as u128;
    let mut remaining = bps;
    for impact in impacts {
        let keep = bps - (*impact).min(BPS) as u128;
        remaining = remaining * keep / bps;
    }
    (bps - remaining) as u32
}

impl QuoteEngine {
    pub fn new(gas: GasModel) -> Self {
        Self { gas }
    }

    pub fn gas_model(&self) -> GasModel {
        self.gas
    }

    pub fn quote_exact_in(&self, pool: &Pool, token_in: Address, amount_in: U256) -> QuoteResult<HopQuote> {
        if !pool.contains(token_in) {
            return Err(QuoteError::InvalidTokens(format!(
                "{:?} is not traded by pool {:?}",
                token_in, pool.id
            )));
        }
        let fee_keep = U512::from(PIPS - pool.fee.min(PIPS));
        let effective_in = U512::from(amount_in) * fee_keep;
        let net_in = to_u256(effective_in / U512::from(PIPS)).unwrap_or_default();
        let fee_amount = amount_in - net_in.min(amount_in);

        let (reserve_in, reserve_out) = match pool.virtual_reserves(token_in) {
            Some(r) => r,
            None => {
                return Ok(HopQuote {
                    amount_in,
                    amount_out: U256::zero(),
                    fee_amount,
                    price_impact_bps: BPS,
                })
            }
        };

        let numerator = effective_in * U512::from(reserve_out);
        let denominator = U512::from(reserve_in) * U512::from(PIPS) + effective_in;
        let amount_out = if denominator.is_zero() {
            U256::zero()
        } else {
            to_u256(numerator / denominator).unwrap_or_default()
        };

        Ok(HopQuote {
            amount_in,
            amount_out,
            fee_amount,
            price_impact_bps: hop_impact_bps(reserve_in, effective_in),
        })
    }

    /// Input that yields `amount_out` of `token_out`: the top of the range of inputs that
    /// round to `amount_out`, or the smallest input reaching it if no input rounds to it exactly.
    pub fn quote_exact_out(&self, pool: &Pool, token_out: Address, amount_out: U256) -> QuoteResult<HopQuote> {
        let token_in = pool.other(token_out).ok_or_else(|| {
            QuoteError::InvalidTokens(format!("{:?} is not traded by pool {:?}", token_out, pool.id))
        })?;
        let (reserve_in, reserve_out) = pool
            .virtual_reserves(token_in)
            .ok_or(QuoteError::InsufficientLiquidity(pool.id))?;
        if amount_out >= reserve_out || pool.fee >= PIPS {
            return Err(QuoteError::InsufficientLiquidity(pool.id));
        }
        if amount_out.is_zero() {
            return Ok(HopQuote {
                amount_in: U256::zero(),
                amount_out,
                fee_amount: U256::zero(),
                price_impact_bps: 0,
            });
        }

        // Smallest input whose output reaches `out`.
        let min_input = |out: U256| -> Option<U256> {
            if out >= reserve_out {
                return None;
            }
            let numerator = U512::from(reserve_in) * U512::from(out) * U512::from(PIPS);
            let denominator = U512::from(reserve_out - out) * U512::from(PIPS - pool.fee);
            to_u256((numerator + denominator - U512::one()) / denominator)
        };
        let reaching = min_input(amount_out).ok_or(QuoteError::InsufficientLiquidity(pool.id))?;
        let amount_in = match amount_out.checked_add(U256::one()).and_then(min_input) {
            Some(next) if next > reaching => next - 1,
            _ => reaching,
        };

        let forward = self.quote_exact_in(pool, token_in, amount_in)?;
        Ok(HopQuote {
            amount_in,
            amount_out: forward.amount_out,
            fee_amount: forward.fee_amount,
            price_impact_bps: forward.price_impact_bps,
        })
    }

    fn check_shape(pools: &[Pool], tokens: &[Address]) -> QuoteResult<()> {
        if pools.len() > MAX_QUOTE_HOPS {
            return Err(QuoteError::PathTooLong {
                hops: pools.len(),
                max: MAX_QUOTE_HOPS,
            });
        }
        if tokens.len() != pools.len() + 1 {
            return Err(QuoteError::InvalidPath(format!(
                "{} tokens for {} pools",
                tokens.len(),
                pools.len()
            )));
        }
        for (i, pool) in pools.iter().enumerate() {
            if pool.other(tokens[i]) != Some(tokens[i + 1]) {
                return Err(QuoteError::InvalidPath(format!(
                    "pool {:?} does not connect {:?} and {:?}",
                    pool.id,
                    tokens[i],
                    tokens[i + 1]
                )));
            }
        }
        Ok(())
    }

    pub fn quote_path_exact_in(&self, pools: &[Pool], tokens: &[Address], amount_in: U256) -> QuoteResult<PathQuote> {
        Self::check_shape(pools, tokens)?;
        let mut hops = Vec::with_capacity(pools.len());
        let mut running = amount_in;
        for (i, pool) in pools.iter().enumerate() {
            let hop = self.quote_exact_in(pool, tokens[i], running)?;
            running = hop.amount_out;
            hops.push(hop);
        }
        let impacts: Vec<u32> = hops.iter().map(|h| h.price_impact_bps).collect();
        Ok(PathQuote {
            amount_in,
            amount_out: running,
            price_impact_bps: compound_impact_bps(&impacts),
            gas_estimate: self.gas.estimate(pools.len()),
            hops,
        })
    }

    /// Solves the path backwards hop by hop, then verifies forward. Each hop's input reaches
    /// its target, so the forward check holds; the bisection only runs if it does not.
    pub fn quote_path_exact_out(&self, pools: &[Pool], tokens: &[Address], amount_out: U256) -> QuoteResult<PathQuote> {
        Self::check_shape(pools, tokens)?;
        let mut need = amount_out;
        for i in (0..pools.len()).rev() {
            need = self.quote_exact_out(&pools[i], tokens[i + 1], need)?.amount_in;
        }

        let forward = self.quote_path_exact_in(pools, tokens, need)?;
        if forward.amount_out >= amount_out {
            return Ok(forward);
        }

        tracing::debug!(?amount_out, ?need, "exact-out verification short, refining");
        let mut lo = need;
        let mut hi = need.saturating_mul(U256::from(2)).max(U256::one());
        let mut best: Option<PathQuote> = None;
        for _ in 0..MAX_INVERSE_ITERATIONS {
            let q = self.quote_path_exact_in(pools, tokens, hi)?;
            if q.amount_out >= amount_out {
                best = Some(q);
                break;
            }
            lo = hi;
            hi = hi.saturating_mul(U256::from(2));
        }
        let mut best = best.ok_or(QuoteError::InsufficientLiquidity(pools[0].id))?;
        for _ in 0..MAX_INVERSE_ITERATIONS {
            if best.amount_in <= lo + U256::one() {
                break;
            }
            let mid = lo + (best.amount_in - lo) / 2;
            let q = self.quote_path_exact_in(pools, tokens, mid)?;
            if q.amount_out >= amount_out {
                best = q;
            } else {
                lo = mid;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v3_math::Q96;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn pool(id: u64, a: u64, b: u64, liquidity: u128, fee: u32) -> Pool {
        Pool {
            id: addr(id),
            token_a: addr(a),
            token_b: addr(b),
            fee,
            liquidity,
            sqrt_price_x96: Q96,
            tick: 0,
            last_update: 0,
        }
    }

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn exact_in_deducts_fee_and_rounds_down() {
        let engine = QuoteEngine::default();
        let p = pool(10, 1, 2, 1_000_000_000_000_000_000_000_000, 3000);
        let q = engine.quote_exact_in(&p, addr(1), e18(100)).unwrap();
        assert!(q.amount_out < e18(100));
        assert_eq!(q.fee_amount, U256::from(3u64) * U256::exp10(17));
        assert_eq!(q.price_impact_bps, 1);
    }

    #[test]
    fn zero_liquidity_quotes_nothing() {
        let engine = QuoteEngine::default();
        let p = pool(10, 1, 2, 0, 3000);
        let q = engine.quote_exact_in(&p, addr(1), e18(1)).unwrap();
        assert!(q.amount_out.is_zero());
        assert_eq!(q.price_impact_bps, BPS);
        assert!(matches!(
            engine.quote_exact_out(&p, addr(2), e18(1)),
            Err(QuoteError::InsufficientLiquidity(_))
        ));
    }

    #[test]
    fn exact_out_round_trip_never_undercharges() {
        let engine = QuoteEngine::default();
        let p = pool(10, 1, 2, 1_000_000_000_000_000_000_000_000, 3000);
        for x in [e18(1), e18(100), U256::from(123_456_789u64), U256::from(1000u64), U256::from(1001u64)] {
            let out = engine.quote_exact_in(&p, addr(1), x).unwrap().amount_out;
            let back = engine.quote_exact_out(&p, addr(2), out).unwrap();
            assert!(back.amount_in >= x, "{} charged for {}", back.amount_in, x);
            assert!(back.amount_in - x <= U256::one(), "{} charged for {}", back.amount_in, x);
            assert_eq!(back.amount_out, out);
            let more = engine.quote_exact_in(&p, addr(1), back.amount_in + 1).unwrap();
            assert!(more.amount_out > out);
        }
    }

    #[test]
    fn exact_out_when_one_unit_buys_several() {
        let engine = QuoteEngine::default();
        // token 2 trades at roughly 4 per token 1
        let mut p = pool(10, 1, 2, 1_000_000_000_000_000_000_000_000, 3000);
        p.sqrt_price_x96 = Q96 * U256::from(2u64);
        let q = engine.quote_exact_out(&p, addr(2), U256::from(1001u64)).unwrap();
        assert!(q.amount_out >= U256::from(1001u64));
        let less = engine.quote_exact_in(&p, addr(1), q.amount_in - 1).unwrap();
        assert!(less.amount_out < U256::from(1001u64));
    }

    #[test]
    fn exact_out_beyond_reserves_fails() {
        let engine = QuoteEngine::default();
        let p = pool(10, 1, 2, 1_000_000, 3000);
        assert!(matches!(
            engine.quote_exact_out(&p, addr(2), U256::from(1_000_000u64)),
            Err(QuoteError::InsufficientLiquidity(_))
        ));
    }

    #[test]
    fn path_exact_out_delivers_requested_amount() {
        let engine = QuoteEngine::default();
        let pools = vec![
            pool(10, 1, 2, 1_000_000_000_000_000_000_000_000, 3000),
            pool(11, 2, 3, 500_000_000_000_000_000_000_000, 500),
        ];
        let tokens = vec![addr(1), addr(2), addr(3)];
        let want = e18(50);
        let q = engine.quote_path_exact_out(&pools, &tokens, want).unwrap();
        assert_eq!(q.amount_out, want);
        let more = engine
            .quote_path_exact_in(&pools, &tokens, q.amount_in + 1)
            .unwrap();
        assert!(more.amount_out > want);
        assert_eq!(q.gas_estimate, 200_000);
    }

    #[test]
    fn rejects_long_or_broken_paths() {
        let engine = QuoteEngine::default();
        let pools: Vec<Pool> = (0..5).map(|i| pool(10 + i, 1 + i, 2 + i, 1_000, 3000)).collect();
        let tokens: Vec<Address> = (1..=6).map(addr).collect();
        assert!(matches!(
            engine.quote_path_exact_in(&pools, &tokens, U256::one()),
            Err(QuoteError::PathTooLong { hops: 5, max: 4 })
        ));
        let broken = vec![pool(10, 1, 2, 1_000, 3000)];
        assert!(matches!(
            engine.quote_path_exact_in(&broken, &[addr(1), addr(3)], U256::one()),
            Err(QuoteError::InvalidPath(_))
        ));
    }

    #[test]
    fn impacts_compound() {
        assert_eq!(compound_impact_bps(&[]), 0);
        assert_eq!(compound_impact_bps(&[100]), 100);
        assert_eq!(compound_impact_bps(&[100, 100]), 199);
        assert_eq!(compound_impact_bps(&[10000, 1]), 10000);
        assert_eq!(GasModel::default().estimate(1), 80_000);
        assert_eq!(GasModel::default().estimate(3), 250_000);
    }
}
