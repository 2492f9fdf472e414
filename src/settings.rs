use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default)]
    pub http_url: Option<String>,
    /// Per-call timeout for pool and feed reads.
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_rpc_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_rpc_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on outbound reads per second (governor quota).
    #[serde(default = "default_rpc_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_rpc_timeout_ms() -> u64 {
    15_000
}
fn default_rpc_max_retries() -> usize {
    3
}
fn default_rpc_backoff_base_ms() -> u64 {
    100
}
fn default_rpc_requests_per_second() -> u32 {
    50
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            http_url: None,
            timeout_ms: default_rpc_timeout_ms(),
            max_retries: default_rpc_max_retries(),
            backoff_base_ms: default_rpc_backoff_base_ms(),
            requests_per_second: default_rpc_requests_per_second(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathFinding {
    #[serde(default = "default_cache_timeout_secs")]
    pub cache_timeout_secs: u64,
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_default_bps: u32,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Hard cap on routes quoted per search.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_fee_tiers")]
    pub fee_tiers: Vec<u32>,
    #[serde(default = "default_gas_single_hop")]
    pub gas_single_hop: u64,
    #[serde(default = "default_gas_multi_hop_base")]
    pub gas_multi_hop_base: u64,
    #[serde(default = "default_gas_per_hop")]
    pub gas_per_hop: u64,
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_cache_timeout_secs() -> u64 {
    300
}
fn default_max_slippage_bps() -> u32 {
    50
}
fn default_max_hops() -> usize {
    3
}
fn default_max_candidates() -> usize {
    256
}
fn default_fee_tiers() -> Vec<u32> {
    vec![100, 500, 3000, 10000]
}
fn default_gas_single_hop() -> u64 {
    80_000
}
fn default_gas_multi_hop_base() -> u64 {
    100_000
}
fn default_gas_per_hop() -> u64 {
    50_000
}

impl Default for PathFinding {
    fn default() -> Self {
        Self {
            cache_timeout_secs: default_cache_timeout_secs(),
            max_slippage_default_bps: default_max_slippage_bps(),
            use_cache: default_true(),
            max_hops: default_max_hops(),
            max_candidates: default_max_candidates(),
            fee_tiers: default_fee_tiers(),
            gas_single_hop: default_gas_single_hop(),
            gas_multi_hop_base: default_gas_multi_hop_base(),
            gas_per_hop: default_gas_per_hop(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Twap {
    #[serde(default = "default_twap_period_secs")]
    pub default_period_secs: u64,
    #[serde(default = "default_twap_cardinality")]
    pub default_cardinality: u32,
    #[serde(default = "default_twap_update_interval_secs")]
    pub update_interval_secs: u64,
}

fn default_twap_period_secs() -> u64 {
    3600
}
fn default_twap_cardinality() -> u32 {
    100
}
fn default_twap_update_interval_secs() -> u64 {
    300
}

impl Default for Twap {
    fn default() -> Self {
        Self {
            default_period_secs: default_twap_period_secs(),
            default_cardinality: default_twap_cardinality(),
            update_interval_secs: default_twap_update_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Oracle {
    #[serde(default = "default_stale_price_threshold_secs")]
    pub stale_price_threshold_secs: u64,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_min_update_interval_secs")]
    pub min_update_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_update_enabled: bool,
    #[serde(default = "default_auto_update_interval_secs")]
    pub auto_update_interval_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,
    #[serde(default = "default_emergency_cooldown_secs")]
    pub emergency_cooldown_secs: u64,
    #[serde(default = "default_max_oracles")]
    pub max_oracles: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_false")]
    pub require_multiple_sources: bool,
    #[serde(default)]
    pub twap: Twap,
}

fn default_stale_price_threshold_secs() -> u64 {
    3600
}
fn default_history_len() -> usize {
    100
}
fn default_min_update_interval_secs() -> u64 {
    60
}
fn default_auto_update_interval_secs() -> u64 {
    300
}
fn default_health_check_interval_secs() -> u64 {
    300
}
fn default_health_failure_threshold() -> u32 {
    3
}
fn default_emergency_cooldown_secs() -> u64 {
    3600
}
fn default_max_oracles() -> usize {
    10
}
fn default_max_batch_size() -> usize {
    50
}

impl Default for Oracle {
    fn default() -> Self {
        Self {
            stale_price_threshold_secs: default_stale_price_threshold_secs(),
            history_len: default_history_len(),
            min_update_interval_secs: default_min_update_interval_secs(),
            auto_update_enabled: default_true(),
            auto_update_interval_secs: default_auto_update_interval_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_failure_threshold: default_health_failure_threshold(),
            emergency_cooldown_secs: default_emergency_cooldown_secs(),
            max_oracles: default_max_oracles(),
            max_batch_size: default_max_batch_size(),
            require_multiple_sources: default_false(),
            twap: Twap::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Roles {
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub emergency: Vec<String>,
    #[serde(default)]
    pub pausers: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Service {
    /// Pools synced from chain at startup and on every refresh tick.
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default = "default_pool_refresh_interval_secs")]
    pub pool_refresh_interval_secs: u64,
    #[serde(default)]
    pub roles: Roles,
}

fn default_pool_refresh_interval_secs() -> u64 {
    60
}

impl Default for Service {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            pool_refresh_interval_secs: default_pool_refresh_interval_secs(),
            roles: Roles::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub path_finding: PathFinding,
    #[serde(default)]
    pub oracle: Oracle,
    #[serde(default)]
    pub service: Service,
}

impl Settings {
    /// Loads `Config.toml` from the working directory (optional) plus `SDK_*` overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Config::builder().add_source(File::with_name("Config.toml").required(false)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(Config::builder().add_source(File::from(path.as_ref())))
    }

    fn load(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let s = builder.build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides for RPC configuration
        if let Ok(raw_http) = env::var("SDK_RPC_HTTP_URL") {
            let trimmed = raw_http.trim();
            if !trimmed.is_empty() {
                settings.rpc.http_url = Some(trimmed.to_string());
            }
        }
        if let Ok(raw) = env::var("SDK_PATH_FINDING_MAX_HOPS") {
            if let Ok(hops) = raw.trim().parse() {
                settings.path_finding.max_hops = hops;
            }
        }
        if let Ok(raw_pools) = env::var("SDK_SERVICE_POOLS") {
            if let Some(list) = parse_string_list(&raw_pools) {
                if !list.is_empty() {
                    settings.service.pools = list;
                }
            }
        }

        Ok(settings)
    }
}

fn parse_string_list(input: &str) -> Option<Vec<String>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(vec![]);
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed).ok();
    }

    Some(
        trimmed
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_and_json_lists() {
        assert_eq!(
            parse_string_list("0xa, 0xb").unwrap(),
            vec!["0xa".to_string(), "0xb".to_string()]
        );
        assert_eq!(
            parse_string_list(r#"["0xa","0xb"]"#).unwrap(),
            vec!["0xa".to_string(), "0xb".to_string()]
        );
        assert!(parse_string_list("  ").unwrap().is_empty());
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.path_finding.cache_timeout_secs, 300);
        assert_eq!(s.path_finding.max_slippage_default_bps, 50);
        assert_eq!(s.oracle.max_batch_size, 50);
        assert_eq!(s.oracle.twap.default_cardinality, 100);
        assert_eq!(s.rpc.timeout_ms, 15_000);
    }
}
