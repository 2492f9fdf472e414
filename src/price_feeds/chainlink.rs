//! External aggregator feeds (Chainlink `AggregatorV3Interface` shape).
//!
//! Answers are normalized to 18 decimals. A feed's decimals are read once and cached
//! until the feed is replaced.

use super::{pair_key, PriceQuote, PriceSource, SourceKind};
use crate::chain_reader::PriceFeedReader;
use crate::errors::{QuoteError, QuoteResult};
use crate::settings::Oracle;
use crate::types::conversions::{invert_price, normalize_to_18};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

pub const MIN_HEARTBEAT: u64 = 60;
pub const MAX_HEARTBEAT: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedConfig {
    pub token_a: Address,
    pub token_b: Address,
    pub feed: Address,
    pub heartbeat_secs: u64,
    pub description: String,
    pub is_active: bool,
}

pub struct ChainlinkSource {
    name: String,
    reader: Arc<dyn PriceFeedReader>,
    stale_threshold_secs: u64,
    history_len: usize,
    feeds: DashMap<(Address, Address), FeedConfig>,
    decimals: DashMap<Address, u8>,
    history: DashMap<(Address, Address), VecDeque<PriceQuote>>,
}

fn validate_heartbeat(heartbeat_secs: u64) -> QuoteResult<()> {
    if !(MIN_HEARTBEAT..=MAX_HEARTBEAT).contains(&heartbeat_secs) {
        return Err(QuoteError::InvalidConfiguration(format!(
            "heartbeat {} outside [{}, {}]",
            heartbeat_secs, MIN_HEARTBEAT, MAX_HEARTBEAT
        )));
    }
    Ok(())
}

impl ChainlinkSource {
    pub fn new(reader: Arc<dyn PriceFeedReader>, oracle: &Oracle) -> Self {
        Self {
            name: "Chainlink".to_string(),
            reader,
            stale_threshold_secs: oracle.stale_price_threshold_secs,
            history_len: oracle.history_len,
            feeds: DashMap::new(),
            decimals: DashMap::new(),
            history: DashMap::new(),
        }
    }

    pub fn add_feed(
        &self,
        token_a: Address,
        token_b: Address,
        feed: Address,
        heartbeat_secs: u64,
        description: &str,
    ) -> QuoteResult<()> {
        if token_a.is_zero() || token_b.is_zero() || token_a == token_b {
            return Err(QuoteError::InvalidTokens(format!("{:?}/{:?}", token_a, token_b)));
        }
        if feed.is_zero() {
            return Err(QuoteError::InvalidOracle(feed));
        }
        validate_heartbeat(heartbeat_secs)?;

        let key = pair_key(token_a, token_b);
        if self.feeds.contains_key(&key) {
            return Err(QuoteError::FeedAlreadyExists(token_a, token_b));
        }
        self.feeds.insert(
            key,
            FeedConfig {
                token_a,
                token_b,
                feed,
                heartbeat_secs,
                description: description.to_string(),
                is_active: true,
            },
        );
        info!("feed {:?} registered for {:?}/{:?}", feed, token_a, token_b);
        Ok(())
    }

    pub fn update_feed(
        &self,
        token_a: Address,
        token_b: Address,
        feed: Address,
        heartbeat_secs: u64,
    ) -> QuoteResult<()> {
        if feed.is_zero() {
            return Err(QuoteError::InvalidOracle(feed));
        }
        validate_heartbeat(heartbeat_secs)?;
        let mut config = self
            .feeds
            .get_mut(&pair_key(token_a, token_b))
            .ok_or(QuoteError::FeedNotFound(token_a, token_b))?;
        let old = config.feed;
        config.feed = feed;
        config.heartbeat_secs = heartbeat_secs;
        drop(config);
        self.decimals.remove(&old);
        Ok(())
    }

    pub fn remove_feed(&self, token_a: Address, token_b: Address) -> QuoteResult<FeedConfig> {
        let key = pair_key(token_a, token_b);
        let (_, config) = self
            .feeds
            .remove(&key)
            .ok_or(QuoteError::FeedNotFound(token_a, token_b))?;
        self.decimals.remove(&config.feed);
        self.history.remove(&key);
        Ok(config)
    }

    pub fn set_feed_active(&self, token_a: Address, token_b: Address, active: bool) -> QuoteResult<()> {
        let mut config = self
            .feeds
            .get_mut(&pair_key(token_a, token_b))
            .ok_or(QuoteError::FeedNotFound(token_a, token_b))?;
        config.is_active = active;
        Ok(())
    }

    pub fn feed_config(&self, token_a: Address, token_b: Address) -> QuoteResult<FeedConfig> {
        self.feeds
            .get(&pair_key(token_a, token_b))
            .map(|c| c.clone())
            .ok_or(QuoteError::FeedNotFound(token_a, token_b))
    }

    pub fn feed_keys(&self) -> Vec<(Address, Address)> {
        let mut keys: Vec<(Address, Address)> = self
            .feeds
            .iter()
            .map(|e| (e.value().token_a, e.value().token_b))
            .collect();
        keys.sort();
        keys
    }

    async fn feed_decimals(&self, feed: Address) -> QuoteResult<u8> {
        if let Some(d) = self.decimals.get(&feed) {
            return Ok(*d);
        }
        let d = self.reader.decimals(feed).await?;
        self.decimals.insert(feed, d);
        Ok(d)
    }

    /// Last `n` quotes served for the pair, oldest first.
    pub fn price_history(&self, token_a: Address, token_b: Address, n: usize) -> Vec<PriceQuote> {
        self.history
            .get(&pair_key(token_a, token_b))
            .map(|h| {
                let skip = h.len().saturating_sub(n);
                h.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    fn remember(&self, key: (Address, Address), quote: &PriceQuote) {
        let mut entries = self.history.entry(key).or_default();
        if entries.len() >= self.history_len.max(1) {
            entries.pop_front();
        }
        entries.push_back(quote.clone());
    }

    /// Latest prices for several pairs; unknown pairs yield invalid quotes.
    pub async fn get_latest_prices(&self, pairs: &[(Address, Address)], now: u64) -> Vec<PriceQuote> {
        let futures = pairs.iter().map(|(a, b)| async move {
            self.get_price(*a, *b, now)
                .await
                .unwrap_or_else(|_| PriceQuote::invalid(*a, *b, &self.name))
        });
        futures::future::join_all(futures).await
    }

    pub async fn check_feed_health(&self, token_a: Address, token_b: Address, now: u64) -> bool {
        matches!(self.get_price(token_a, token_b, now).await, Ok(q) if q.is_valid)
    }
}

#[async_trait]
impl PriceSource for ChainlinkSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Chainlink
    }

    async fn get_price(&self, token_a: Address, token_b: Address, now: u64) -> QuoteResult<PriceQuote> {
        let key = pair_key(token_a, token_b);
        let config = self
            .feeds
            .get(&key)
            .map(|c| c.clone())
            .ok_or(QuoteError::FeedNotFound(token_a, token_b))?;
        if !config.is_active {
            return Ok(PriceQuote::invalid(token_a, token_b, &self.name));
        }

        let decimals = self.feed_decimals(config.feed).await?;
        let round = self.reader.latest_round(config.feed).await?;

        let positive = round.answer > ethers::types::I256::zero();
        let mut price = if positive {
            normalize_to_18(round.answer.into_raw(), decimals).unwrap_or_default()
        } else {
            warn!("feed {:?} returned non-positive answer {}", config.feed, round.answer);
            U256::zero()
        };
        if token_a != config.token_a {
            price = invert_price(price);
        }

        let max_age = config.heartbeat_secs.min(self.stale_threshold_secs);
        let fresh = now.saturating_sub(round.updated_at) <= max_age;

        let quote = PriceQuote {
            token_a,
            token_b,
            price,
            timestamp: round.updated_at,
            source: self.name.clone(),
            round_id: round.round_id,
            is_valid: positive && fresh && !price.is_zero(),
        };
        self.remember(key, &quote);
        Ok(quote)
    }

    async fn is_healthy(&self, now: u64) -> bool {
        let active: Vec<(Address, Address)> = self
            .feeds
            .iter()
            .filter(|e| e.value().is_active)
            .map(|e| (e.value().token_a, e.value().token_b))
            .collect();
        for (a, b) in active {
            if self.check_feed_health(a, b, now).await {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_reader::{RoundData, StaticChainReader};
    use ethers::types::I256;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn setup() -> (Arc<StaticChainReader>, ChainlinkSource) {
        let reader = Arc::new(StaticChainReader::new());
        reader.set_feed(
            addr(50),
            8,
            RoundData {
                round_id: 7,
                answer: I256::from(200_000_000_000i64),
                updated_at: 10_000,
            },
        );
        let source = ChainlinkSource::new(reader.clone(), &Oracle::default());
        (reader, source)
    }

    #[test]
    fn validates_feed_registration() {
        let (_, source) = setup();
        assert!(matches!(
            source.add_feed(addr(1), addr(2), addr(50), 30, "ETH/USD"),
            Err(QuoteError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            source.add_feed(addr(1), addr(2), Address::zero(), 3600, "ETH/USD"),
            Err(QuoteError::InvalidOracle(_))
        ));
        source.add_feed(addr(1), addr(2), addr(50), 3600, "ETH/USD").unwrap();
        assert!(matches!(
            source.add_feed(addr(2), addr(1), addr(51), 3600, "USD/ETH"),
            Err(QuoteError::FeedAlreadyExists(..))
        ));
        assert_eq!(source.feed_keys(), vec![(addr(1), addr(2))]);
        source.remove_feed(addr(1), addr(2)).unwrap();
        assert!(source.feed_keys().is_empty());
    }

    #[tokio::test]
    async fn normalizes_to_18_decimals_and_caches_decimals() {
        let (reader, source) = setup();
        source.add_feed(addr(1), addr(2), addr(50), 3600, "ETH/USD").unwrap();

        let q = source.get_price(addr(1), addr(2), 10_100).await.unwrap();
        assert!(q.is_valid);
        assert_eq!(q.price, U256::from(2_000u64) * U256::exp10(18));
        assert_eq!(q.round_id, 7);
        assert_eq!(q.source, "Chainlink");

        let before = reader.read_count();
        source.get_price(addr(1), addr(2), 10_100).await.unwrap();
        // only latest_round, decimals come from the cache
        assert_eq!(reader.read_count(), before + 1);

        let inverted = source.get_price(addr(2), addr(1), 10_100).await.unwrap();
        assert_eq!(inverted.price, U256::exp10(18) / 2_000);
        assert_eq!(source.price_history(addr(1), addr(2), 10).len(), 3);
    }

    #[tokio::test]
    async fn stale_and_negative_answers_are_invalid() {
        let (reader, source) = setup();
        source.add_feed(addr(1), addr(2), addr(50), 600, "ETH/USD").unwrap();

        let stale = source.get_price(addr(1), addr(2), 10_601).await.unwrap();
        assert!(!stale.is_valid);

        reader.set_round(
            addr(50),
            RoundData {
                round_id: 8,
                answer: I256::from(-5i64),
                updated_at: 10_600,
            },
        );
        let negative = source.get_price(addr(1), addr(2), 10_600).await.unwrap();
        assert!(!negative.is_valid);
        assert!(negative.price.is_zero());
    }

    #[tokio::test]
    async fn inactive_feeds_and_health() {
        let (_, source) = setup();
        assert!(!source.is_healthy(10_000).await);
        source.add_feed(addr(1), addr(2), addr(50), 3600, "ETH/USD").unwrap();
        assert!(source.is_healthy(10_000).await);
        source.set_feed_active(addr(1), addr(2), false).unwrap();
        assert!(!source.get_price(addr(1), addr(2), 10_000).await.unwrap().is_valid);
        assert!(!source.is_healthy(10_000).await);
    }
}
