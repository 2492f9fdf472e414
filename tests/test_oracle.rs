//! Integration tests for oracle price aggregation
//!
//! Tests cover:
//! - TWAP + external feed weighting, deviation and confidence
//! - Fallback prices and fallback mode
//! - Batch limits and batch record retrieval
//! - Emergency mode cooldown
//! - Health-check deactivation
//! - Reversed token order sharing rate limits, last-known prices and history

use ethers::types::{Address, I256, U256};
use mig_quote_sdk::auth::AllowAll;
use mig_quote_sdk::chain_reader::{RoundData, StaticChainReader};
use mig_quote_sdk::clock::ManualClock;
use mig_quote_sdk::oracle_manager::ManagerStatus;
use mig_quote_sdk::pools::Pool;
use mig_quote_sdk::price_feeds::{PriceSource, SourceKind};
use mig_quote_sdk::service::QuoteService;
use mig_quote_sdk::settings::Settings;
use mig_quote_sdk::v3_math::Q96;
use mig_quote_sdk::QuoteError;
use std::sync::Arc;

const START: u64 = 10_000;

fn token(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

fn feed() -> Address {
    Address::from_low_u64_be(0xfeed)
}

fn pool_id() -> Address {
    Address::from_low_u64_be(0xab)
}

fn round(answer: i64, updated_at: u64) -> RoundData {
    RoundData {
        round_id: 1,
        answer: I256::from(answer),
        updated_at,
    }
}

/// A/B pool at price 1.0 tracked by the TWAP source, plus an 8-decimal feed.
fn setup(feed_answer: i64) -> (QuoteService, Arc<StaticChainReader>, ManualClock) {
    let reader = Arc::new(StaticChainReader::new());
    reader.set_feed(feed(), 8, round(feed_answer, START));
    let clock = ManualClock::new(START);
    let service = QuoteService::new(
        &Settings::default(),
        Some(reader.clone()),
        reader.clone(),
        Arc::new(AllowAll),
        Arc::new(clock.clone()),
    );

    service
        .graph()
        .upsert_pool(Pool {
            id: pool_id(),
            token_a: token(1),
            token_b: token(2),
            fee: 3000,
            liquidity: 1_000_000_000_000_000_000_000_000,
            sqrt_price_x96: Q96,
            tick: 0,
            last_update: START,
        })
        .unwrap();
    service.twap().add_pool(pool_id(), 3600, 100).unwrap();
    service.twap().observe_pool(pool_id(), START, true).unwrap();
    service
        .chainlink()
        .add_feed(token(1), token(2), feed(), 3600, "A / B")
        .unwrap();
    service.aggregator().add_token_pair(token(1), token(2), None).unwrap();
    (service, reader, clock)
}

/// 5% apart: weighted 60/40 and confidence 9500
#[tokio::test]
async fn test_weighted_aggregation() {
    let (service, _, _) = setup(105_000_000);
    let price = service
        .aggregator()
        .get_aggregated_price(token(1), token(2))
        .await
        .unwrap();
    assert!(price.is_valid);
    assert_eq!(price.twap_price, U256::exp10(18));
    assert_eq!(price.chainlink_price, U256::from(105u64) * U256::exp10(16));
    assert_eq!(price.price, U256::from(102u64) * U256::exp10(16));
    assert_eq!(price.deviation_bps, 500);
    assert_eq!(price.confidence_bps, 9500);
    assert_eq!(price.primary_source, "TWAP");

    let reversed = service
        .aggregator()
        .get_aggregated_price(token(2), token(1))
        .await
        .unwrap();
    assert!(reversed.is_valid);
    assert!(reversed.price < U256::exp10(18));
}

/// 20% apart: rejected unless a fallback price is set
#[tokio::test]
async fn test_deviation_rejection_and_fallback() {
    let (service, _, _) = setup(120_000_000);
    let agg = service.aggregator();
    let price = agg.get_aggregated_price(token(1), token(2)).await.unwrap();
    assert!(!price.is_valid);
    assert_eq!(price.deviation_bps, 2000);

    agg.set_fallback_price(token(1), token(2), U256::exp10(18)).unwrap();
    let price = agg.get_aggregated_price(token(1), token(2)).await.unwrap();
    assert!(price.is_valid);
    assert_eq!(price.primary_source, "Fallback");
    assert_eq!(price.price, U256::exp10(18));
}

/// A stale feed leaves the TWAP as the only source
#[tokio::test]
async fn test_stale_feed_degrades_to_single_source() {
    let (service, reader, clock) = setup(105_000_000);
    clock.advance(3601);
    service.twap().observe_pool(pool_id(), START + 3601, true).unwrap();
    reader.set_round(feed(), round(105_000_000, START));

    let (twap, chainlink, aggregated) = service
        .aggregator()
        .get_all_prices(token(1), token(2))
        .await
        .unwrap();
    assert!(twap.is_valid);
    assert!(!chainlink.is_valid);
    assert!(aggregated.is_valid);
    assert_eq!(aggregated.confidence_bps, 7000);
    assert_eq!(aggregated.primary_source, "TWAP");
}

/// 51 pairs are refused; 50 are accepted and recorded
#[tokio::test]
async fn test_batch_limits() {
    let (service, _, _) = setup(100_000_000);
    let oracle = service.oracle();
    let pairs: Vec<(Address, Address)> = (0..51).map(|i| (token(100 + i), token(200 + i))).collect();
    assert!(matches!(
        oracle.batch_update_prices(&pairs, false).await,
        Err(QuoteError::BatchSizeExceeded { size: 51, max: 50 })
    ));

    let mut fifty = pairs[..49].to_vec();
    fifty.push((token(1), token(2)));
    let id = oracle.batch_update_prices(&fifty, false).await.unwrap();
    assert_eq!(id, 1);
    let record = oracle.batch_request(id).unwrap();
    assert_eq!(record.pairs.len(), 50);
    assert_eq!(record.updated, vec![(token(1), token(2))]);
    assert_eq!(record.skipped.len(), 49);
    assert!(oracle.aggregator().last_known_price(token(1), token(2)).is_some());
}

/// Emergency mode blocks updates and cannot be lifted inside the cooldown
#[tokio::test]
async fn test_emergency_cooldown() {
    let (service, _, clock) = setup(100_000_000);
    let oracle = service.oracle();
    oracle.update_price(token(1), token(2)).await.unwrap();

    oracle.activate_emergency_mode("feed manipulation").unwrap();
    assert_eq!(oracle.status(), ManagerStatus::Emergency);
    assert!(matches!(
        oracle.batch_update_prices(&[(token(1), token(2))], true).await,
        Err(QuoteError::EmergencyModeActive)
    ));
    let served = oracle.get_price(token(1), token(2)).await.unwrap();
    assert!(served.is_valid);

    clock.advance(3599);
    assert!(matches!(
        oracle.deactivate_emergency_mode(),
        Err(QuoteError::EmergencyCooldown { remaining_secs: 1 })
    ));
    clock.advance(1);
    oracle.deactivate_emergency_mode().unwrap();
    assert!(!oracle.system_stats().emergency_mode);
}

/// Three failed health checks deactivate a source
#[tokio::test]
async fn test_health_check_deactivation() {
    let (service, reader, clock) = setup(100_000_000);
    let oracle = service.oracle();
    let source = Address::from_low_u64_be(0xc1);
    let checker: Arc<dyn PriceSource> = service.chainlink().clone();
    oracle
        .register_source(source, SourceKind::Chainlink, "Chainlink", 1, Some(checker))
        .unwrap();

    assert!(oracle.perform_health_check(source).await.unwrap());
    reader.set_failing(feed(), true);
    clock.advance(60);
    for _ in 0..3 {
        assert!(!oracle.perform_health_check(source).await.unwrap());
    }
    let info = oracle.source_info(source).unwrap();
    assert!(!info.is_active);
    assert_eq!(info.last_health_check, START + 60);

    let report = oracle.health_report();
    assert_eq!(report.total_sources, 1);
    assert_eq!(report.active_sources, 0);
}

/// Heartbeats outside one minute to one day are rejected
#[tokio::test]
async fn test_heartbeat_validation() {
    let (service, _, _) = setup(100_000_000);
    let feeds = service.chainlink();
    let other = Address::from_low_u64_be(0xfeee);
    assert!(matches!(
        feeds.add_feed(token(3), token(4), other, 59, "C / D"),
        Err(QuoteError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        feeds.add_feed(token(3), token(4), other, 86_401, "C / D"),
        Err(QuoteError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        feeds.add_feed(token(2), token(1), other, 3600, "B / A"),
        Err(QuoteError::FeedAlreadyExists(..))
    ));
    feeds.add_feed(token(3), token(4), other, 86_400, "C / D").unwrap();
}

/// Fallback mode serves the stored price and ignores live sources
#[tokio::test]
async fn test_fallback_mode() {
    let (service, _, _) = setup(100_000_000);
    let agg = service.aggregator();
    agg.set_fallback_mode(true);
    let without = agg.get_aggregated_price(token(1), token(2)).await.unwrap();
    assert!(!without.is_valid);

    let two = U256::from(2u64) * U256::exp10(18);
    agg.set_fallback_price(token(1), token(2), two).unwrap();
    let with = agg.get_aggregated_price(token(1), token(2)).await.unwrap();
    assert!(with.is_valid);
    assert_eq!(with.price, two);
    assert_eq!(with.primary_source, "Fallback");
    assert_eq!(with.confidence_bps, 7000);

    let reversed = agg.get_aggregated_price(token(2), token(1)).await.unwrap();
    assert_eq!(reversed.price, U256::from(5u64) * U256::exp10(17));

    agg.set_fallback_mode(false);
    let live = agg.get_aggregated_price(token(1), token(2)).await.unwrap();
    assert_eq!(live.primary_source, "TWAP");
    assert_eq!(live.price, U256::exp10(18));
}

/// The manager's validation policy can reject prices the aggregator accepts
#[tokio::test]
async fn test_validated_price_policy() {
    let (service, _, _) = setup(105_000_000);
    let oracle = service.oracle();
    assert!(oracle.get_validated_price(token(1), token(2)).await.unwrap().is_valid);

    let mut strict = oracle.validation_config();
    strict.min_confidence_bps = 9600;
    oracle.set_validation_config(strict).unwrap();
    let price = oracle.get_validated_price(token(1), token(2)).await.unwrap();
    assert!(!price.is_valid);
    assert_eq!(price.confidence_bps, 9500);
}

/// Updating B/A right after A/B is rate limited; reversed reads see the inverted price
#[tokio::test]
async fn test_reversed_pair_updates_and_reads() {
    let (service, reader, clock) = setup(105_000_000);
    let oracle = service.oracle();
    let forward = oracle.update_price(token(1), token(2)).await.unwrap();
    assert_eq!(forward.price, U256::from(102u64) * U256::exp10(16));

    assert!(matches!(
        oracle.update_price(token(2), token(1)).await,
        Err(QuoteError::UpdateTooSoon { remaining_secs: 60 })
    ));
    assert!(!oracle.needs_auto_update(token(2), token(1)));

    let history = oracle.aggregator().price_history(token(2), token(1), 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].token_a, token(2));
    assert_eq!(history[0].price, U256::from(980_392_156_862_745_098u64));

    oracle.activate_emergency_mode("feed manipulation").unwrap();
    let served = oracle.get_price(token(2), token(1)).await.unwrap();
    assert!(served.is_valid);
    assert_eq!(served.token_a, token(2));
    assert_eq!(served.price, U256::from(980_392_156_862_745_098u64));

    clock.advance(3600);
    oracle.deactivate_emergency_mode().unwrap();
    service.twap().observe_pool(pool_id(), START + 3600, true).unwrap();
    reader.set_round(feed(), round(105_000_000, START + 3600));
    oracle.update_price(token(2), token(1)).await.unwrap();
    assert_eq!(oracle.aggregator().price_history(token(1), token(2), 10).len(), 2);
}
