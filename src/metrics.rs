// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_gauge!("quote_service_up", "Service process liveness (1=up).");

    // Path finding
    describe_counter!(
        "path_searches_total",
        Unit::Count,
        "Total number of path searches, labeled by outcome (found, not_found, cancelled)."
    );
    describe_histogram!(
        "path_search_duration_ms",
        "Path search latency in milliseconds, including candidate quoting."
    );
    describe_histogram!(
        "path_search_candidates",
        "Number of candidate routes quoted per search."
    );
    describe_counter!(
        "route_cache_hits_total",
        Unit::Count,
        "Route cache hits, labeled by kind (exact, requote)."
    );
    describe_counter!(
        "route_cache_misses_total",
        Unit::Count,
        "Route cache misses."
    );
    describe_gauge!("route_cache_size", "Current number of cached routes.");
    describe_gauge!("pool_graph_pools", "Number of pools registered in the graph.");

    // External reads
    describe_counter!(
        "chain_reads_total",
        Unit::Count,
        "Chain reads, labeled by call (pool_state, latest_round, decimals) and result."
    );
    describe_counter!(
        "chain_read_retries_total",
        Unit::Count,
        "Chain read attempts that failed and were retried."
    );

    // Oracles
    describe_counter!(
        "oracle_price_updates_total",
        Unit::Count,
        "Aggregated price updates, labeled by result (updated, skipped, invalid)."
    );
    describe_histogram!(
        "oracle_price_deviation_bps",
        "Deviation between TWAP and external feed prices in basis points."
    );
    describe_counter!(
        "oracle_health_check_failures_total",
        Unit::Count,
        "Failed oracle health checks, labeled by source name."
    );
    describe_gauge!(
        "oracle_emergency_mode",
        "Emergency mode flag of the oracle manager (1=active)."
    );
}

// --- Helper functions to update metrics ---

pub fn record_path_search(outcome: &'static str, duration: std::time::Duration, candidates: usize) {
    counter!("path_searches_total", 1, "outcome" => outcome);
    histogram!("path_search_duration_ms", duration.as_secs_f64() * 1000.0);
    histogram!("path_search_candidates", candidates as f64);
}

pub fn increment_route_cache_hit(kind: &'static str) {
    counter!("route_cache_hits_total", 1, "kind" => kind);
}

pub fn increment_route_cache_miss() {
    increment_counter!("route_cache_misses_total");
}

pub fn set_route_cache_size(size: usize) {
    gauge!("route_cache_size", size as f64);
}

pub fn set_pool_count(count: usize) {
    gauge!("pool_graph_pools", count as f64);
}

pub fn record_chain_read(call: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("chain_reads_total", 1, "call" => call, "result" => result);
}

pub fn increment_chain_read_retry(call: &'static str) {
    counter!("chain_read_retries_total", 1, "call" => call);
}

pub fn increment_price_update(result: &'static str) {
    counter!("oracle_price_updates_total", 1, "result" => result);
}

pub fn record_price_deviation(deviation_bps: u32) {
    histogram!("oracle_price_deviation_bps", deviation_bps as f64);
}

pub fn increment_health_check_failure(source: &str) {
    counter!("oracle_health_check_failures_total", 1, "source" => source.to_string());
}

pub fn set_emergency_mode(active: bool) {
    gauge!("oracle_emergency_mode", if active { 1.0 } else { 0.0 });
}
