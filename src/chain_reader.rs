//! # Chain Reader
//!
//! Read interface between the SDK and the chain. Pools and price feeds are read through
//! [`PoolStateReader`] and [`PriceFeedReader`]; nothing else in the crate talks to a
//! node directly.
//!
//! [`EthersChainReader`] implements both over any ethers `Middleware` with a per-call
//! timeout, exponential-backoff retries of transient failures and a shared governor rate
//! limit. [`StaticChainReader`] serves canned values for tests and offline use.

use crate::contracts::{AggregatorV3Interface, IUniswapV3Pool};
use crate::errors::{QuoteError, QuoteResult};
use crate::pools::PoolState;
use crate::settings::Rpc;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use ethers::prelude::{Address, Middleware};
use ethers::types::{I256, U256};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One round of an external price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundData {
    pub round_id: u128,
    pub answer: I256,
    pub updated_at: u64,
}

#[async_trait]
pub trait PoolStateReader: Send + Sync {
    async fn get_pool_state(&self, pool: Address) -> QuoteResult<PoolState>;
}

#[async_trait]
pub trait PriceFeedReader: Send + Sync {
    async fn latest_round(&self, feed: Address) -> QuoteResult<RoundData>;
    async fn decimals(&self, feed: Address) -> QuoteResult<u8>;
}

/// Timeout and retry parameters for external reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    pub timeout: Duration,
    pub max_attempts: usize,
    pub backoff_base: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::from_settings(&Rpc::default())
    }
}

impl ReadPolicy {
    pub fn from_settings(rpc: &Rpc) -> Self {
        Self {
            timeout: Duration::from_millis(rpc.timeout_ms),
            max_attempts: rpc.max_retries.max(1),
            backoff_base: Duration::from_millis(rpc.backoff_base_ms),
        }
    }

    /// Runs `op` under the timeout, retrying retryable failures with exponential backoff
    /// (`base`, `2 * base`, `4 * base`, ...). Exhausted retries surface as `Unavailable`.
    pub async fn run<T, F, Fut>(&self, call: &'static str, mut op: F) -> QuoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QuoteResult<T>>,
    {
        let half_base = (self.backoff_base.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(half_base)
            .take(self.max_attempts.saturating_sub(1));
        let timeout = self.timeout;

        let result = RetryIf::spawn(
            strategy,
            || {
                let fut = op();
                async move {
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(inner) => inner,
                        Err(_) => Err(QuoteError::Timeout(timeout.as_millis() as u64)),
                    }
                }
            },
            |e: &QuoteError| {
                if e.is_retryable() {
                    crate::metrics::increment_chain_read_retry(call);
                    warn!("{} failed, retrying: {}", call, e);
                    true
                } else {
                    false
                }
            },
        )
        .await;

        crate::metrics::record_chain_read(call, result.is_ok());
        result.map_err(|e| {
            if e.is_retryable() {
                QuoteError::Unavailable(format!(
                    "{} failed after {} attempts: {}",
                    call, self.max_attempts, e
                ))
            } else {
                e
            }
        })
    }
}

fn unavailable<E: std::fmt::Display>(e: E) -> QuoteError {
    QuoteError::Unavailable(e.to_string())
}

/// Chain reader backed by an ethers provider.
pub struct EthersChainReader<M: Middleware> {
    provider: Arc<M>,
    policy: ReadPolicy,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<M: Middleware + 'static> EthersChainReader<M> {
    pub fn new(provider: Arc<M>, rpc: &Rpc) -> QuoteResult<Self> {
        let qps = NonZeroU32::new(rpc.requests_per_second).ok_or_else(|| {
            QuoteError::InvalidConfiguration("rpc.requests_per_second must be non-zero".into())
        })?;
        Ok(Self {
            provider,
            policy: ReadPolicy::from_settings(rpc),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(qps))),
        })
    }

    async fn guarded<T, F, Fut>(&self, call: &'static str, op: F) -> QuoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QuoteResult<T>>,
    {
        self.limiter.until_ready().await;
        self.policy.run(call, op).await
    }
}

#[async_trait]
impl<M: Middleware + 'static> PoolStateReader for EthersChainReader<M> {
    async fn get_pool_state(&self, pool: Address) -> QuoteResult<PoolState> {
        if pool.is_zero() {
            return Err(QuoteError::InvalidPool("zero pool address".into()));
        }
        let contract = IUniswapV3Pool::new(pool, self.provider.clone());

        let slot0 = self.guarded("slot0", || {
            let c = contract.clone();
            async move { c.slot_0().call().await.map_err(unavailable) }
        });
        let liquidity = self.guarded("liquidity", || {
            let c = contract.clone();
            async move { c.liquidity().call().await.map_err(unavailable) }
        });
        let token0 = self.guarded("token0", || {
            let c = contract.clone();
            async move { c.token_0().call().await.map_err(unavailable) }
        });
        let token1 = self.guarded("token1", || {
            let c = contract.clone();
            async move { c.token_1().call().await.map_err(unavailable) }
        });
        let fee = self.guarded("fee", || {
            let c = contract.clone();
            async move { c.fee().call().await.map_err(unavailable) }
        });

        let (slot0, liquidity, token0, token1, fee) =
            futures::try_join!(slot0, liquidity, token0, token1, fee)?;
        let (sqrt_price_x96, tick, ..) = slot0;

        Ok(PoolState {
            token0,
            token1,
            fee,
            liquidity,
            sqrt_price_x96,
            tick,
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> PriceFeedReader for EthersChainReader<M> {
    async fn latest_round(&self, feed: Address) -> QuoteResult<RoundData> {
        let contract = AggregatorV3Interface::new(feed, self.provider.clone());
        let (round_id, answer, _started_at, updated_at, _answered_in_round) = self
            .guarded("latest_round", || {
                let c = contract.clone();
                async move { c.latest_round_data().call().await.map_err(unavailable) }
            })
            .await?;
        Ok(RoundData {
            round_id,
            answer,
            updated_at: if updated_at > U256::from(u64::MAX) {
                u64::MAX
            } else {
                updated_at.as_u64()
            },
        })
    }

    async fn decimals(&self, feed: Address) -> QuoteResult<u8> {
        let contract = AggregatorV3Interface::new(feed, self.provider.clone());
        self.guarded("decimals", || {
            let c = contract.clone();
            async move { c.decimals().call().await.map_err(unavailable) }
        })
        .await
    }
}

/// In-memory reader. Unknown addresses and addresses marked failing read as `Unavailable`.
#[derive(Default)]
pub struct StaticChainReader {
    pools: DashMap<Address, PoolState>,
    rounds: DashMap<Address, RoundData>,
    decimals: DashMap<Address, u8>,
    failing: DashSet<Address>,
    reads: AtomicU64,
}

impl StaticChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pool(&self, pool: Address, state: PoolState) {
        self.pools.insert(pool, state);
    }

    pub fn set_feed(&self, feed: Address, decimals: u8, round: RoundData) {
        self.decimals.insert(feed, decimals);
        self.rounds.insert(feed, round);
    }

    pub fn set_round(&self, feed: Address, round: RoundData) {
        self.rounds.insert(feed, round);
    }

    pub fn set_failing(&self, target: Address, failing: bool) {
        if failing {
            self.failing.insert(target);
        } else {
            self.failing.remove(&target);
        }
    }

    /// Total reads served or refused so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn check(&self, target: Address) -> QuoteResult<()> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(&target) {
            return Err(QuoteError::Unavailable(format!("{:?} unreachable", target)));
        }
        Ok(())
    }
}

#[async_trait]
impl PoolStateReader for StaticChainReader {
    async fn get_pool_state(&self, pool: Address) -> QuoteResult<PoolState> {
        self.check(pool)?;
        self.pools
            .get(&pool)
            .map(|s| s.clone())
            .ok_or(QuoteError::PoolNotFound(pool))
    }
}

#[async_trait]
impl PriceFeedReader for StaticChainReader {
    async fn latest_round(&self, feed: Address) -> QuoteResult<RoundData> {
        self.check(feed)?;
        self.rounds
            .get(&feed)
            .map(|r| *r)
            .ok_or_else(|| QuoteError::Unavailable(format!("no round for feed {:?}", feed)))
    }

    async fn decimals(&self, feed: Address) -> QuoteResult<u8> {
        self.check(feed)?;
        self.decimals
            .get(&feed)
            .map(|d| *d)
            .ok_or_else(|| QuoteError::Unavailable(format!("no decimals for feed {:?}", feed)))
    }
}
