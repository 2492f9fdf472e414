//! # Price Sources
//!
//! Adapters that produce [`PriceQuote`]s for token pairs. Every price is an 18-decimal
//! fixed-point amount of `token_b` per unit of `token_a`.
//!
//! - [`twap::TwapSource`]: time-weighted average of pool spot prices taken from the
//!   [`PoolGraph`](crate::pool_graph::PoolGraph).
//! - [`chainlink::ChainlinkSource`]: external aggregator feeds read through a
//!   [`PriceFeedReader`](crate::chain_reader::PriceFeedReader).
//!
//! Staleness is reported through `is_valid`, never as an error.

use crate::errors::QuoteResult;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

pub mod chainlink;
pub mod twap;

pub use chainlink::ChainlinkSource;
pub use twap::TwapSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Twap,
    Chainlink,
    Aggregated,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub token_a: Address,
    pub token_b: Address,
    pub price: U256,
    pub timestamp: u64,
    pub source: String,
    pub round_id: u128,
    pub is_valid: bool,
}

impl PriceQuote {
    pub fn invalid(token_a: Address, token_b: Address, source: &str) -> Self {
        Self {
            token_a,
            token_b,
            price: U256::zero(),
            timestamp: 0,
            source: source.to_string(),
            round_id: 0,
            is_valid: false,
        }
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Price of `token_a` in `token_b` as of `now`.
    async fn get_price(&self, token_a: Address, token_b: Address, now: u64) -> QuoteResult<PriceQuote>;

    /// Liveness probe used by the oracle manager's health checks.
    async fn is_healthy(&self, now: u64) -> bool;
}

/// Order-independent key for a token pair.
pub(crate) fn pair_key(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
