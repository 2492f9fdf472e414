//! # Price Aggregator
//!
//! Combines the TWAP and external-feed sources into one [`AggregatedPrice`] per pair.
//!
//! ## Aggregation
//!
//! - Two valid sources: weighted average by the pair's `twap_weight_bps` /
//!   `chainlink_weight_bps`. The deviation `|t - c| * 10000 / min(t, c)` must not exceed
//!   `max_deviation_bps`; confidence is `10000 - deviation`.
//! - One valid source: that source's price with a fixed confidence of 7000, unless the
//!   pair requires both sources.
//! - Nothing usable: the admin-set fallback price if there is one, otherwise an invalid
//!   result.
//!
//! A source quote older than the pair's `stale_price_threshold_secs` counts as missing.
//! Fallback mode short-circuits everything and serves fallback prices only.
//!
//! Last-known prices and history are kept per unordered pair; reads in the other
//! direction get the inverted prices.

use crate::clock::SharedClock;
use crate::errors::{QuoteError, QuoteResult};
use crate::price_feeds::{pair_key, PriceQuote, PriceSource};
use crate::types::conversions::{deviation_bps, invert_price, mul_div, BPS};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Confidence assigned when only one source contributes.
pub const SINGLE_SOURCE_CONFIDENCE_BPS: u32 = 7000;
pub const MAX_PAIR_DEVIATION_BPS: u32 = 5000;
pub const FALLBACK_SOURCE: &str = "Fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairConfig {
    pub use_twap: bool,
    pub use_chainlink: bool,
    pub require_both_sources: bool,
    pub max_deviation_bps: u32,
    pub twap_weight_bps: u32,
    pub chainlink_weight_bps: u32,
    pub confidence_threshold_bps: u32,
    pub stale_price_threshold_secs: u64,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            use_twap: true,
            use_chainlink: true,
            require_both_sources: false,
            max_deviation_bps: 1000,
            twap_weight_bps: 6000,
            chainlink_weight_bps: 4000,
            confidence_threshold_bps: 7000,
            stale_price_threshold_secs: 3600,
        }
    }
}

impl PairConfig {
    pub fn validate(&self) -> QuoteResult<()> {
        if !self.use_twap && !self.use_chainlink {
            return Err(QuoteError::InvalidConfiguration("no price source enabled".into()));
        }
        if self.twap_weight_bps + self.chainlink_weight_bps != BPS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "weights {} + {} must sum to {}",
                self.twap_weight_bps, self.chainlink_weight_bps, BPS
            )));
        }
        if self.max_deviation_bps > MAX_PAIR_DEVIATION_BPS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "max deviation {} exceeds {}",
                self.max_deviation_bps, MAX_PAIR_DEVIATION_BPS
            )));
        }
        if self.confidence_threshold_bps > BPS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "confidence threshold {} exceeds {}",
                self.confidence_threshold_bps, BPS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub token_a: Address,
    pub token_b: Address,
    pub price: U256,
    pub twap_price: U256,
    pub chainlink_price: U256,
    pub timestamp: u64,
    pub deviation_bps: u32,
    pub primary_source: String,
    pub confidence_bps: u32,
    pub is_valid: bool,
}

impl AggregatedPrice {
    /// The same price seen from `token_b` to `token_a`.
    pub fn inverted(&self) -> Self {
        Self {
            token_a: self.token_b,
            token_b: self.token_a,
            price: invert_price(self.price),
            twap_price: invert_price(self.twap_price),
            chainlink_price: invert_price(self.chainlink_price),
            timestamp: self.timestamp,
            deviation_bps: self.deviation_bps,
            primary_source: self.primary_source.clone(),
            confidence_bps: self.confidence_bps,
            is_valid: self.is_valid,
        }
    }

    fn oriented(&self, a: Address) -> Self {
        if self.token_a == a {
            self.clone()
        } else {
            self.inverted()
        }
    }

    pub fn invalid(token_a: Address, token_b: Address) -> Self {
        Self {
            token_a,
            token_b,
            price: U256::zero(),
            twap_price: U256::zero(),
            chainlink_price: U256::zero(),
            timestamp: 0,
            deviation_bps: 0,
            primary_source: String::new(),
            confidence_bps: 0,
            is_valid: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FallbackPrice {
    /// Price of the canonical key's first token in the second.
    price: U256,
    set_at: u64,
}

pub struct PriceAggregator {
    twap: Option<Arc<dyn PriceSource>>,
    chainlink: Option<Arc<dyn PriceSource>>,
    clock: SharedClock,
    pairs: DashMap<(Address, Address), PairConfig>,
    default_config: ArcSwap<PairConfig>,
    fallback_prices: DashMap<(Address, Address), FallbackPrice>,
    fallback_mode: AtomicBool,
    last_known: DashMap<(Address, Address), AggregatedPrice>,
    history: DashMap<(Address, Address), VecDeque<AggregatedPrice>>,
    history_len: usize,
}

fn validate_tokens(a: Address, b: Address) -> QuoteResult<()> {
    if a.is_zero() || b.is_zero() || a == b {
        return Err(QuoteError::InvalidTokens(format!("{:?}/{:?}", a, b)));
    }
    Ok(())
}

impl PriceAggregator {
    pub fn new(
        twap: Option<Arc<dyn PriceSource>>,
        chainlink: Option<Arc<dyn PriceSource>>,
        clock: SharedClock,
        history_len: usize,
    ) -> Self {
        Self {
            twap,
            chainlink,
            clock,
            pairs: DashMap::new(),
            default_config: ArcSwap::from_pointee(PairConfig::default()),
            fallback_prices: DashMap::new(),
            fallback_mode: AtomicBool::new(false),
            last_known: DashMap::new(),
            history: DashMap::new(),
            history_len: history_len.max(1),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Registers a pair. `None` uses the current default configuration.
    pub fn add_token_pair(&self, a: Address, b: Address, config: Option<PairConfig>) -> QuoteResult<()> {
        validate_tokens(a, b)?;
        let config = config.unwrap_or_else(|| **self.default_config.load());
        config.validate()?;
        let key = pair_key(a, b);
        if self.pairs.contains_key(&key) {
            return Err(QuoteError::PairAlreadyExists(a, b));
        }
        self.pairs.insert(key, config);
        info!("pair {:?}/{:?} added", a, b);
        Ok(())
    }

    pub fn update_pair_config(&self, a: Address, b: Address, config: PairConfig) -> QuoteResult<()> {
        config.validate()?;
        let mut entry = self
            .pairs
            .get_mut(&pair_key(a, b))
            .ok_or(QuoteError::PairNotSupported(a, b))?;
        *entry = config;
        Ok(())
    }

    pub fn set_default_config(&self, config: PairConfig) -> QuoteResult<()> {
        config.validate()?;
        self.default_config.store(Arc::new(config));
        Ok(())
    }

    pub fn default_config(&self) -> PairConfig {
        **self.default_config.load()
    }

    pub fn remove_token_pair(&self, a: Address, b: Address) -> QuoteResult<()> {
        let key = pair_key(a, b);
        self.pairs.remove(&key).ok_or(QuoteError::PairNotSupported(a, b))?;
        self.fallback_prices.remove(&key);
        Ok(())
    }

    pub fn pair_config(&self, a: Address, b: Address) -> QuoteResult<PairConfig> {
        self.pairs
            .get(&pair_key(a, b))
            .map(|c| *c)
            .ok_or(QuoteError::PairNotSupported(a, b))
    }

    pub fn is_supported(&self, a: Address, b: Address) -> bool {
        self.pairs.contains_key(&pair_key(a, b))
    }

    pub fn supported_pairs(&self) -> Vec<(Address, Address)> {
        let mut pairs: Vec<(Address, Address)> = self.pairs.iter().map(|e| *e.key()).collect();
        pairs.sort();
        pairs
    }

    pub fn set_fallback_price(&self, a: Address, b: Address, price: U256) -> QuoteResult<()> {
        if price.is_zero() {
            return Err(QuoteError::InvalidAmount("fallback price must be non-zero".into()));
        }
        let key = pair_key(a, b);
        if !self.pairs.contains_key(&key) {
            return Err(QuoteError::PairNotSupported(a, b));
        }
        let canonical = if key.0 == a { price } else { invert_price(price) };
        self.fallback_prices.insert(
            key,
            FallbackPrice {
                price: canonical,
                set_at: self.clock.now(),
            },
        );
        Ok(())
    }

    pub fn set_fallback_mode(&self, enabled: bool) {
        self.fallback_mode.store(enabled, Ordering::SeqCst);
        warn!("fallback mode {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn fallback_mode(&self) -> bool {
        self.fallback_mode.load(Ordering::SeqCst)
    }

    fn fallback(&self, a: Address, b: Address) -> Option<AggregatedPrice> {
        let key = pair_key(a, b);
        let stored = *self.fallback_prices.get(&key)?;
        let price = if key.0 == a { stored.price } else { invert_price(stored.price) };
        Some(AggregatedPrice {
            token_a: a,
            token_b: b,
            price,
            twap_price: U256::zero(),
            chainlink_price: U256::zero(),
            timestamp: stored.set_at,
            deviation_bps: 0,
            primary_source: FALLBACK_SOURCE.to_string(),
            confidence_bps: SINGLE_SOURCE_CONFIDENCE_BPS,
            is_valid: true,
        })
    }

    fn fallback_or_invalid(&self, a: Address, b: Address) -> AggregatedPrice {
        self.fallback(a, b).unwrap_or_else(|| {
            let mut invalid = AggregatedPrice::invalid(a, b);
            invalid.primary_source = FALLBACK_SOURCE.to_string();
            invalid
        })
    }

    async fn fetch(source: &Option<Arc<dyn PriceSource>>, enabled: bool, a: Address, b: Address, now: u64) -> Option<PriceQuote> {
        let source = source.as_ref().filter(|_| enabled)?;
        match source.get_price(a, b, now).await {
            Ok(q) => Some(q),
            Err(e) => {
                debug!("{} unavailable for {:?}/{:?}: {}", source.name(), a, b, e);
                None
            }
        }
    }

    /// Raw quotes from both sources (invalid placeholders where a source is missing or failed).
    pub async fn source_quotes(&self, a: Address, b: Address) -> QuoteResult<(PriceQuote, PriceQuote)> {
        let config = self.pair_config(a, b)?;
        let now = self.clock.now();
        let (t, c) = futures::join!(
            Self::fetch(&self.twap, config.use_twap, a, b, now),
            Self::fetch(&self.chainlink, config.use_chainlink, a, b, now)
        );
        Ok((
            t.unwrap_or_else(|| PriceQuote::invalid(a, b, "TWAP")),
            c.unwrap_or_else(|| PriceQuote::invalid(a, b, "Chainlink")),
        ))
    }

    pub async fn get_aggregated_price(&self, a: Address, b: Address) -> QuoteResult<AggregatedPrice> {
        let config = self.pair_config(a, b)?;
        if self.fallback_mode() {
            return Ok(self.fallback_or_invalid(a, b));
        }
        let (twap, chainlink) = self.source_quotes(a, b).await?;
        Ok(self.combine(a, b, &config, &twap, &chainlink))
    }

    fn combine(&self, a: Address, b: Address, config: &PairConfig, twap: &PriceQuote, chainlink: &PriceQuote) -> AggregatedPrice {
        let now = self.clock.now();
        let usable = |q: &PriceQuote| {
            let fresh = now.saturating_sub(q.timestamp) <= config.stale_price_threshold_secs;
            if q.is_valid && !fresh {
                debug!("{} quote for {:?}/{:?} is stale at {}", q.source, a, b, q.timestamp);
            }
            q.is_valid && fresh
        };
        let mut result = AggregatedPrice {
            twap_price: twap.price,
            chainlink_price: chainlink.price,
            ..AggregatedPrice::invalid(a, b)
        };

        match (usable(twap), usable(chainlink)) {
            (true, true) => {
                let deviation = deviation_bps(twap.price, chainlink.price);
                crate::metrics::record_price_deviation(deviation);
                result.deviation_bps = deviation;
                if deviation > config.max_deviation_bps {
                    warn!(
                        "price deviation {}bps for {:?}/{:?} exceeds {}bps",
                        deviation, a, b, config.max_deviation_bps
                    );
                    if let Some(mut fb) = self.fallback(a, b) {
                        fb.twap_price = twap.price;
                        fb.chainlink_price = chainlink.price;
                        fb.deviation_bps = deviation;
                        return fb;
                    }
                    result.primary_source = "Aggregated".to_string();
                    return result;
                }
                let weighted_t = mul_div(twap.price, U256::from(config.twap_weight_bps), U256::from(BPS));
                let weighted_c = mul_div(chainlink.price, U256::from(config.chainlink_weight_bps), U256::from(BPS));
                result.price = match (weighted_t, weighted_c) {
                    (Some(t), Some(c)) => t.saturating_add(c),
                    _ => U256::zero(),
                };
                result.timestamp = twap.timestamp.min(chainlink.timestamp);
                result.primary_source = if config.twap_weight_bps >= config.chainlink_weight_bps {
                    twap.source.clone()
                } else {
                    chainlink.source.clone()
                };
                result.confidence_bps = BPS.saturating_sub(deviation);
                result.is_valid = !result.price.is_zero()
                    && result.confidence_bps >= config.confidence_threshold_bps;
                result
            }
            (true, false) | (false, true) => {
                let only = if usable(twap) { twap } else { chainlink };
                result.price = only.price;
                result.timestamp = only.timestamp;
                result.primary_source = only.source.clone();
                result.confidence_bps = SINGLE_SOURCE_CONFIDENCE_BPS;
                result.is_valid = !config.require_both_sources
                    && SINGLE_SOURCE_CONFIDENCE_BPS >= config.confidence_threshold_bps;
                result
            }
            (false, false) => match self.fallback(a, b) {
                Some(mut fb) => {
                    fb.twap_price = twap.price;
                    fb.chainlink_price = chainlink.price;
                    fb
                }
                None => result,
            },
        }
    }

    /// `(twap, chainlink, aggregated)` for one pair.
    pub async fn get_all_prices(&self, a: Address, b: Address) -> QuoteResult<(PriceQuote, PriceQuote, AggregatedPrice)> {
        let config = self.pair_config(a, b)?;
        let (twap, chainlink) = self.source_quotes(a, b).await?;
        let aggregated = if self.fallback_mode() {
            self.fallback_or_invalid(a, b)
        } else {
            self.combine(a, b, &config, &twap, &chainlink)
        };
        Ok((twap, chainlink, aggregated))
    }

    /// Unsupported pairs come back as invalid entries, in input order.
    pub async fn get_batch_prices(&self, pairs: &[(Address, Address)]) -> Vec<AggregatedPrice> {
        let futures = pairs.iter().map(|(a, b)| async move {
            self.get_aggregated_price(*a, *b)
                .await
                .unwrap_or_else(|_| AggregatedPrice::invalid(*a, *b))
        });
        futures::future::join_all(futures).await
    }

    /// Computes the aggregated price and, if valid, stores it as last-known-good.
    pub async fn update_price(&self, a: Address, b: Address) -> QuoteResult<AggregatedPrice> {
        let price = self.get_aggregated_price(a, b).await?;
        if price.is_valid {
            let key = pair_key(a, b);
            self.last_known.insert(key, price.clone());
            let mut history = self.history.entry(key).or_default();
            if history.len() >= self.history_len {
                history.pop_front();
            }
            history.push_back(price.clone());
            crate::metrics::increment_price_update("updated");
        } else {
            crate::metrics::increment_price_update("invalid");
        }
        Ok(price)
    }

    pub fn last_known_price(&self, a: Address, b: Address) -> Option<AggregatedPrice> {
        self.last_known.get(&pair_key(a, b)).map(|p| p.oriented(a))
    }

    /// Last-known-good price, then fallback, then invalid.
    pub fn last_known_or_fallback(&self, a: Address, b: Address) -> AggregatedPrice {
        self.last_known_price(a, b)
            .unwrap_or_else(|| self.fallback_or_invalid(a, b))
    }

    pub fn is_price_fresh(&self, a: Address, b: Address) -> QuoteResult<bool> {
        let config = self.pair_config(a, b)?;
        let now = self.clock.now();
        Ok(self
            .last_known_price(a, b)
            .map(|p| now.saturating_sub(p.timestamp) <= config.stale_price_threshold_secs)
            .unwrap_or(false))
    }

    /// Last `n` stored prices, oldest first.
    pub fn price_history(&self, a: Address, b: Address, n: usize) -> Vec<AggregatedPrice> {
        self.history
            .get(&pair_key(a, b))
            .map(|h| {
                let skip = h.len().saturating_sub(n);
                h.iter().skip(skip).map(|p| p.oriented(a)).collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::price_feeds::SourceKind;
    use async_trait::async_trait;

    struct FixedSource {
        name: &'static str,
        price: U256,
        valid: bool,
        age: u64,
    }

    #[async_trait]
    impl PriceSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> SourceKind {
            SourceKind::External
        }
        async fn get_price(&self, a: Address, b: Address, now: u64) -> QuoteResult<PriceQuote> {
            Ok(PriceQuote {
                token_a: a,
                token_b: b,
                price: self.price,
                timestamp: now - self.age,
                source: self.name.to_string(),
                round_id: 1,
                is_valid: self.valid,
            })
        }
        async fn is_healthy(&self, _now: u64) -> bool {
            self.valid
        }
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn aggregator(t: Option<u64>, c: Option<u64>) -> PriceAggregator {
        let src = |name: &'static str, p: Option<u64>| -> Option<Arc<dyn PriceSource>> {
            Some(Arc::new(FixedSource {
                name,
                price: U256::from(p.unwrap_or(0)),
                valid: p.is_some(),
                age: 0,
            }))
        };
        let agg = PriceAggregator::new(
            src("TWAP", t),
            src("Chainlink", c),
            Arc::new(ManualClock::new(10_000)),
            100,
        );
        agg.add_token_pair(addr(1), addr(2), None).unwrap();
        agg
    }

    #[test]
    fn rejects_bad_configs_and_duplicates() {
        let agg = aggregator(Some(1000), Some(1000));
        let bad_weights = PairConfig {
            twap_weight_bps: 5000,
            ..PairConfig::default()
        };
        assert!(matches!(
            agg.add_token_pair(addr(3), addr(4), Some(bad_weights)),
            Err(QuoteError::InvalidConfiguration(_))
        ));
        let bad_deviation = PairConfig {
            max_deviation_bps: 6000,
            ..PairConfig::default()
        };
        assert!(bad_deviation.validate().is_err());
        assert!(matches!(
            agg.add_token_pair(addr(2), addr(1), None),
            Err(QuoteError::PairAlreadyExists(..))
        ));
    }

    #[tokio::test]
    async fn weighted_price_with_deviation_at_limit() {
        let agg = aggregator(Some(1000), Some(1100));
        let p = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(p.is_valid);
        assert_eq!(p.deviation_bps, 1000);
        assert_eq!(p.confidence_bps, 9000);
        // 1000 * 0.6 + 1100 * 0.4
        assert_eq!(p.price, U256::from(1040u64));
        assert_eq!(p.primary_source, "TWAP");
    }

    #[tokio::test]
    async fn excessive_deviation_invalidates_or_falls_back() {
        let agg = aggregator(Some(1000), Some(1200));
        let p = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(!p.is_valid);
        assert_eq!(p.deviation_bps, 2000);

        agg.set_fallback_price(addr(1), addr(2), U256::from(1050u64)).unwrap();
        let p = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(p.is_valid);
        assert_eq!(p.primary_source, FALLBACK_SOURCE);
        assert_eq!(p.price, U256::from(1050u64));
    }

    #[tokio::test]
    async fn single_source_confidence() {
        let agg = aggregator(None, Some(1100));
        let p = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(p.is_valid);
        assert_eq!(p.confidence_bps, SINGLE_SOURCE_CONFIDENCE_BPS);
        assert_eq!(p.primary_source, "Chainlink");

        let strict = PairConfig {
            require_both_sources: true,
            ..PairConfig::default()
        };
        agg.update_pair_config(addr(1), addr(2), strict).unwrap();
        assert!(!agg.get_aggregated_price(addr(1), addr(2)).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn fallback_mode_serves_fallback_only() {
        let agg = aggregator(Some(1000), Some(1000));
        agg.set_fallback_mode(true);
        let none = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(!none.is_valid);
        assert_eq!(none.primary_source, FALLBACK_SOURCE);

        let price = U256::from(2u64) * U256::exp10(18);
        agg.set_fallback_price(addr(1), addr(2), price).unwrap();
        let fb = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(fb.is_valid);
        assert_eq!(fb.confidence_bps, SINGLE_SOURCE_CONFIDENCE_BPS);
        let reversed = agg.get_aggregated_price(addr(2), addr(1)).await.unwrap();
        assert_eq!(reversed.price, U256::exp10(18) / 2);
    }

    #[tokio::test]
    async fn update_stores_last_known_and_history() {
        let agg = aggregator(Some(1000), Some(1000));
        assert!(!agg.is_price_fresh(addr(1), addr(2)).unwrap());
        agg.update_price(addr(1), addr(2)).await.unwrap();
        agg.update_price(addr(1), addr(2)).await.unwrap();
        assert!(agg.is_price_fresh(addr(1), addr(2)).unwrap());
        assert_eq!(agg.price_history(addr(1), addr(2), 10).len(), 2);
        assert_eq!(agg.last_known_price(addr(1), addr(2)).unwrap().price, U256::from(1000u64));

        let batch = agg.get_batch_prices(&[(addr(1), addr(2)), (addr(5), addr(6))]).await;
        assert!(batch[0].is_valid);
        assert!(!batch[1].is_valid);
        assert!(matches!(
            agg.get_aggregated_price(addr(5), addr(6)).await,
            Err(QuoteError::PairNotSupported(..))
        ));
    }

    #[tokio::test]
    async fn stale_quote_is_ignored_per_pair_threshold() {
        let twap: Arc<dyn PriceSource> = Arc::new(FixedSource {
            name: "TWAP",
            price: U256::from(1000u64),
            valid: true,
            age: 3000,
        });
        let chainlink: Arc<dyn PriceSource> = Arc::new(FixedSource {
            name: "Chainlink",
            price: U256::from(1100u64),
            valid: true,
            age: 0,
        });
        let agg = PriceAggregator::new(Some(twap), Some(chainlink), Arc::new(ManualClock::new(10_000)), 100);
        agg.add_token_pair(addr(1), addr(2), None).unwrap();
        let p = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert_eq!(p.confidence_bps, 9000);

        let tight = PairConfig {
            stale_price_threshold_secs: 600,
            ..PairConfig::default()
        };
        agg.update_pair_config(addr(1), addr(2), tight).unwrap();
        let p = agg.get_aggregated_price(addr(1), addr(2)).await.unwrap();
        assert!(p.is_valid);
        assert_eq!(p.price, U256::from(1100u64));
        assert_eq!(p.primary_source, "Chainlink");
        assert_eq!(p.confidence_bps, SINGLE_SOURCE_CONFIDENCE_BPS);
    }

    #[tokio::test]
    async fn reversed_reads_share_last_known_and_history() {
        let price = U256::from(2u64) * U256::exp10(18);
        let agg = aggregator(Some(price.as_u64()), Some(price.as_u64()));
        agg.update_price(addr(1), addr(2)).await.unwrap();
        let reversed = agg.last_known_price(addr(2), addr(1)).unwrap();
        assert_eq!(reversed.token_a, addr(2));
        assert_eq!(reversed.price, U256::exp10(18) / 2);
        assert!(agg.is_price_fresh(addr(2), addr(1)).unwrap());

        agg.update_price(addr(2), addr(1)).await.unwrap();
        let forward = agg.price_history(addr(1), addr(2), 10);
        assert_eq!(forward.len(), 2);
        assert!(forward.iter().all(|p| p.token_a == addr(1)));
        assert_eq!(forward[0].price, price);
        assert_eq!(forward[1].price, U256::exp10(18) / 2);
        assert_eq!(agg.price_history(addr(2), addr(1), 1)[0].price, price);
    }
}
