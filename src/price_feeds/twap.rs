//! Time-weighted average prices from pool spot observations.
//!
//! Each tracked pool keeps a ring buffer of `(timestamp, spot, cumulative)` samples where
//! `cumulative` is the running integral of the spot price over time. The average over a
//! window is the difference of cumulatives divided by the elapsed time, measured from the
//! oldest sample that still falls inside the window.

use super::{pair_key, PriceQuote, PriceSource, SourceKind};
use crate::errors::{QuoteError, QuoteResult};
use crate::pool_graph::PoolGraph;
use crate::settings::{Oracle, Twap};
use crate::types::conversions::invert_price;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use log::{debug, info};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

pub const MIN_PERIOD: u64 = 60;
pub const MAX_PERIOD: u64 = 86_400;
pub const MIN_CARDINALITY: u32 = 2;
pub const MAX_CARDINALITY: u32 = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub timestamp: u64,
    pub spot_price: U256,
    pub price_cumulative: U256,
}

#[derive(Debug, Clone)]
struct TrackedPool {
    token_a: Address,
    token_b: Address,
    period: u64,
    cardinality: u32,
    observations: VecDeque<Observation>,
}

impl TrackedPool {
    fn last(&self) -> Option<&Observation> {
        self.observations.back()
    }

    fn twap(&self, now: u64) -> Option<U256> {
        let last = *self.last()?;
        let window_start = now.saturating_sub(self.period);
        let oldest = self
            .observations
            .iter()
            .find(|o| o.timestamp >= window_start)
            .copied()
            .unwrap_or(last);

        let elapsed_to_now = now.saturating_sub(last.timestamp);
        let cumulative_now = last
            .price_cumulative
            .saturating_add(last.spot_price.saturating_mul(U256::from(elapsed_to_now)));
        let span = now.saturating_sub(oldest.timestamp);
        if span == 0 {
            return Some(oldest.spot_price);
        }
        Some((cumulative_now - oldest.price_cumulative) / U256::from(span))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TwapPoolInfo {
    pub pool: Address,
    pub token_a: Address,
    pub token_b: Address,
    pub period: u64,
    pub cardinality: u32,
    pub observation_count: usize,
    pub last_update: u64,
}

pub struct TwapSource {
    name: String,
    graph: Arc<PoolGraph>,
    config: Twap,
    stale_threshold_secs: u64,
    pools: DashMap<Address, TrackedPool>,
    pair_index: DashMap<(Address, Address), Address>,
}

impl TwapSource {
    pub fn new(graph: Arc<PoolGraph>, oracle: &Oracle) -> Self {
        Self {
            name: "TWAP".to_string(),
            graph,
            config: oracle.twap.clone(),
            stale_threshold_secs: oracle.stale_price_threshold_secs,
            pools: DashMap::new(),
            pair_index: DashMap::new(),
        }
    }

    pub fn default_period(&self) -> u64 {
        self.config.default_period_secs
    }

    pub fn default_cardinality(&self) -> u32 {
        self.config.default_cardinality
    }

    /// Starts tracking a pool already present in the graph.
    pub fn add_pool(&self, pool_id: Address, period: u64, cardinality: u32) -> QuoteResult<()> {
        if pool_id.is_zero() {
            return Err(QuoteError::InvalidPool("zero pool address".into()));
        }
        if !(MIN_PERIOD..=MAX_PERIOD).contains(&period) {
            return Err(QuoteError::InvalidConfiguration(format!(
                "TWAP period {} outside [{}, {}]",
                period, MIN_PERIOD, MAX_PERIOD
            )));
        }
        if !(MIN_CARDINALITY..=MAX_CARDINALITY).contains(&cardinality) {
            return Err(QuoteError::InvalidConfiguration(format!(
                "TWAP cardinality {} outside [{}, {}]",
                cardinality, MIN_CARDINALITY, MAX_CARDINALITY
            )));
        }
        let pool = self.graph.get_pool(pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        let key = pair_key(pool.token_a, pool.token_b);
        if self.pools.contains_key(&pool_id) || self.pair_index.contains_key(&key) {
            return Err(QuoteError::AlreadySupported(pool.token_a, pool.token_b));
        }

        self.pools.insert(
            pool_id,
            TrackedPool {
                token_a: pool.token_a,
                token_b: pool.token_b,
                period,
                cardinality,
                observations: VecDeque::with_capacity(cardinality.min(1024) as usize),
            },
        );
        self.pair_index.insert(key, pool_id);
        info!("TWAP tracking pool {:?} (period {}s, cardinality {})", pool_id, period, cardinality);
        Ok(())
    }

    pub fn remove_pool(&self, pool_id: Address) -> QuoteResult<()> {
        let (_, tracked) = self.pools.remove(&pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        self.pair_index.remove(&pair_key(tracked.token_a, tracked.token_b));
        Ok(())
    }

    pub fn is_supported_pool(&self, pool_id: Address) -> bool {
        self.pools.contains_key(&pool_id)
    }

    pub fn supported_pools(&self) -> Vec<Address> {
        let mut ids: Vec<Address> = self.pools.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn pool_info(&self, pool_id: Address) -> QuoteResult<TwapPoolInfo> {
        let tracked = self.pools.get(&pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        Ok(TwapPoolInfo {
            pool: pool_id,
            token_a: tracked.token_a,
            token_b: tracked.token_b,
            period: tracked.period,
            cardinality: tracked.cardinality,
            observation_count: tracked.observations.len(),
            last_update: tracked.last().map(|o| o.timestamp).unwrap_or(0),
        })
    }

    /// Appends a spot sample (price of the pool's `token_a` in `token_b`).
    /// Samples closer than the update interval are rejected unless `force` is set.
    pub fn record_observation(
        &self,
        pool_id: Address,
        timestamp: u64,
        spot_price: U256,
        force: bool,
    ) -> QuoteResult<()> {
        let mut tracked = self.pools.get_mut(&pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        let cumulative = match tracked.last() {
            Some(last) => {
                if timestamp <= last.timestamp {
                    return Err(QuoteError::UpdateTooSoon {
                        remaining_secs: self.config.update_interval_secs,
                    });
                }
                let since = timestamp - last.timestamp;
                if !force && since < self.config.update_interval_secs {
                    return Err(QuoteError::UpdateTooSoon {
                        remaining_secs: self.config.update_interval_secs - since,
                    });
                }
                last.price_cumulative
                    .saturating_add(last.spot_price.saturating_mul(U256::from(since)))
            }
            None => U256::zero(),
        };

        if tracked.observations.len() >= tracked.cardinality as usize {
            tracked.observations.pop_front();
        }
        tracked.observations.push_back(Observation {
            timestamp,
            spot_price,
            price_cumulative: cumulative,
        });
        debug!("TWAP observation for {:?} at {}: {}", pool_id, timestamp, spot_price);
        Ok(())
    }

    /// Records the pool's current spot price from the graph.
    pub fn observe_pool(&self, pool_id: Address, now: u64, force: bool) -> QuoteResult<()> {
        let pool = self.graph.get_pool(pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        let spot = pool
            .spot_price(pool.token_a)
            .ok_or(QuoteError::InsufficientLiquidity(pool_id))?;
        self.record_observation(pool_id, now, spot, force)
    }

    /// Observes every tracked pool whose interval has elapsed. Returns how many were updated.
    pub fn update_from_graph(&self, now: u64) -> usize {
        self.supported_pools()
            .into_iter()
            .filter(|id| self.observe_pool(*id, now, false).is_ok())
            .count()
    }

    pub fn latest_observations(&self, pool_id: Address, n: usize) -> QuoteResult<Vec<Observation>> {
        let tracked = self.pools.get(&pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        let skip = tracked.observations.len().saturating_sub(n);
        Ok(tracked.observations.iter().skip(skip).copied().collect())
    }

    pub fn is_stale(&self, pool_id: Address, now: u64) -> bool {
        self.pools
            .get(&pool_id)
            .and_then(|t| t.last().map(|o| now.saturating_sub(o.timestamp) > self.stale_threshold_secs))
            .unwrap_or(true)
    }

    /// Current spot price of `token_a` in `token_b` from the graph, without averaging.
    pub fn get_spot_price(&self, token_a: Address, token_b: Address) -> QuoteResult<U256> {
        let pool_id = self.pool_for_pair(token_a, token_b)?;
        let pool = self.graph.get_pool(pool_id).ok_or(QuoteError::PoolNotFound(pool_id))?;
        pool.spot_price(token_a)
            .ok_or(QuoteError::InsufficientLiquidity(pool_id))
    }

    fn pool_for_pair(&self, token_a: Address, token_b: Address) -> QuoteResult<Address> {
        self.pair_index
            .get(&pair_key(token_a, token_b))
            .map(|id| *id)
            .ok_or(QuoteError::PairNotSupported(token_a, token_b))
    }
}

#[async_trait]
impl PriceSource for TwapSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Twap
    }

    async fn get_price(&self, token_a: Address, token_b: Address, now: u64) -> QuoteResult<PriceQuote> {
        let pool_id = self.pool_for_pair(token_a, token_b)?;
        let tracked = self
            .pools
            .get(&pool_id)
            .map(|t| t.clone())
            .ok_or(QuoteError::PairNotSupported(token_a, token_b))?;

        let last = match tracked.last() {
            Some(o) => *o,
            None => return Ok(PriceQuote::invalid(token_a, token_b, &self.name)),
        };
        let mut price = tracked.twap(now).unwrap_or_default();
        if token_a != tracked.token_a {
            price = invert_price(price);
        }
        let fresh = now.saturating_sub(last.timestamp) <= self.stale_threshold_secs;

        Ok(PriceQuote {
            token_a,
            token_b,
            price,
            timestamp: last.timestamp,
            source: self.name.clone(),
            round_id: tracked.observations.len() as u128,
            is_valid: fresh && !price.is_zero(),
        })
    }

    async fn is_healthy(&self, now: u64) -> bool {
        let ids = self.supported_pools();
        !ids.is_empty() && ids.iter().all(|id| !self.is_stale(*id, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::Pool;
    use crate::v3_math::Q96;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    fn source() -> TwapSource {
        let graph = Arc::new(PoolGraph::default());
        graph
            .upsert_pool(Pool {
                id: addr(100),
                token_a: addr(1),
                token_b: addr(2),
                fee: 3000,
                liquidity: 1_000_000,
                sqrt_price_x96: Q96,
                tick: 0,
                last_update: 0,
            })
            .unwrap();
        TwapSource::new(graph, &Oracle::default())
    }

    #[test]
    fn validates_registration() {
        let twap = source();
        assert!(matches!(twap.add_pool(addr(100), 30, 100), Err(QuoteError::InvalidConfiguration(_))));
        assert!(matches!(twap.add_pool(addr(100), 90_000, 100), Err(QuoteError::InvalidConfiguration(_))));
        assert!(matches!(twap.add_pool(addr(100), 3600, 1), Err(QuoteError::InvalidConfiguration(_))));
        assert!(matches!(twap.add_pool(addr(100), 3600, 70_000), Err(QuoteError::InvalidConfiguration(_))));
        assert!(matches!(twap.add_pool(Address::zero(), 3600, 100), Err(QuoteError::InvalidPool(_))));
        twap.add_pool(addr(100), 3600, 100).unwrap();
        assert!(matches!(twap.add_pool(addr(100), 3600, 100), Err(QuoteError::AlreadySupported(..))));
        twap.remove_pool(addr(100)).unwrap();
        assert!(!twap.is_supported_pool(addr(100)));
    }

    #[test]
    fn enforces_update_interval_unless_forced() {
        let twap = source();
        twap.add_pool(addr(100), 3600, 100).unwrap();
        twap.record_observation(addr(100), 1_000, e18(1), false).unwrap();
        assert_eq!(
            twap.record_observation(addr(100), 1_100, e18(1), false),
            Err(QuoteError::UpdateTooSoon { remaining_secs: 200 })
        );
        twap.record_observation(addr(100), 1_100, e18(1), true).unwrap();
    }

    #[tokio::test]
    async fn averages_over_window() {
        let twap = source();
        twap.add_pool(addr(100), 3600, 100).unwrap();
        // 1.0 for 1200s, then 2.0 for 1200s
        twap.record_observation(addr(100), 10_000, e18(1), false).unwrap();
        twap.record_observation(addr(100), 11_200, e18(2), false).unwrap();

        let quote = twap.get_price(addr(1), addr(2), 12_400).await.unwrap();
        assert!(quote.is_valid);
        assert_eq!(quote.price, U256::from(15u64) * U256::exp10(17));

        let reversed = twap.get_price(addr(2), addr(1), 12_400).await.unwrap();
        assert_eq!(reversed.price, invert_price(quote.price));
    }

    #[tokio::test]
    async fn ring_buffer_is_bounded_and_staleness_flagged() {
        let twap = source();
        twap.add_pool(addr(100), 3600, 2).unwrap();
        for i in 0..5u64 {
            twap.record_observation(addr(100), 1_000 + i * 300, e18(1), false).unwrap();
        }
        assert_eq!(twap.latest_observations(addr(100), 10).unwrap().len(), 2);

        let stale = twap.get_price(addr(1), addr(2), 1_000 + 1_200 + 3_601).await.unwrap();
        assert!(!stale.is_valid);
        assert!(!twap.is_healthy(1_000 + 1_200 + 3_601).await);
    }

    #[tokio::test]
    async fn observes_spot_from_graph() {
        let twap = source();
        twap.add_pool(addr(100), 3600, 10).unwrap();
        assert_eq!(twap.update_from_graph(5_000), 1);
        assert_eq!(twap.update_from_graph(5_010), 0);
        assert_eq!(twap.get_spot_price(addr(1), addr(2)).unwrap(), e18(1));
        let q = twap.get_price(addr(1), addr(2), 5_010).await.unwrap();
        assert_eq!(q.price, e18(1));
        assert!(matches!(
            twap.get_price(addr(1), addr(3), 5_010).await,
            Err(QuoteError::PairNotSupported(..))
        ));
    }
}
