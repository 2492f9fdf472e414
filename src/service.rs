//! # Quote Service
//!
//! Request/response facade over the routing and oracle components.
//!
//! Requests are a serde-tagged enum (`{"method": "...", "params": {...}}`) and every
//! response is either `{"status": "ok", "result": ...}` or
//! `{"status": "error", "kind": ..., "message": ...}`. Queries are open to any caller;
//! every mutating request is checked against the [`Authorizer`](crate::auth::Authorizer)
//! before it reaches a component.
//!
//! Amounts and prices travel as `U256` hex strings (`"0x..."`).

use crate::auth::{Role, SharedAuthorizer};
use crate::chain_reader::{PoolStateReader, PriceFeedReader};
use crate::clock::SharedClock;
use crate::errors::{ErrorKind, QuoteError, QuoteResult};
use crate::oracle_manager::{ManagerStatus, OracleManager, ValidationConfig};
use crate::path_finder::PathFinder;
use crate::pool_graph::PoolGraph;
use crate::pools::Pool;
use crate::price_aggregator::{PairConfig, PriceAggregator};
use crate::price_feeds::{ChainlinkSource, PriceSource, SourceKind, TwapSource};
use crate::settings::Settings;
use ethers::types::{Address, U256};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ServiceRequest {
    // routing queries
    FindOptimalPath {
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        #[serde(default)]
        max_slippage_bps: Option<u32>,
    },
    FindMultiplePaths {
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        max_count: usize,
    },
    HasPath {
        token_a: Address,
        token_b: Address,
        max_hops: usize,
    },
    GetAmountOut {
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    },
    GetAmountIn {
        token_in: Address,
        token_out: Address,
        amount_out: U256,
    },
    GetPool {
        pool: Address,
    },
    GetPoolStats {
        pool: Address,
    },
    GetConnectedTokens {
        token: Address,
    },
    PathFinderConfig,
    CacheStats,

    // routing administration
    UpsertPool {
        pool: Pool,
    },
    RemovePool {
        pool: Address,
    },
    UpdatePoolInfo {
        pool: Address,
    },
    BatchUpdatePoolInfo {
        pools: Vec<Address>,
    },
    SetConfiguration {
        cache_timeout_secs: u64,
        max_slippage_default_bps: u32,
        use_cache: bool,
    },
    ClearCache,
    Pause,
    Unpause,

    // price sources
    AddTwapPool {
        pool: Address,
        #[serde(default)]
        period_secs: Option<u64>,
        #[serde(default)]
        cardinality: Option<u32>,
    },
    RemoveTwapPool {
        pool: Address,
    },
    RecordTwapObservations,
    TwapPoolInfo {
        pool: Address,
    },
    AddFeed {
        token_a: Address,
        token_b: Address,
        feed: Address,
        heartbeat_secs: u64,
        #[serde(default)]
        description: String,
    },
    UpdateFeed {
        token_a: Address,
        token_b: Address,
        feed: Address,
        heartbeat_secs: u64,
    },
    RemoveFeed {
        token_a: Address,
        token_b: Address,
    },
    SetFeedActive {
        token_a: Address,
        token_b: Address,
        active: bool,
    },

    // aggregation
    AddTokenPair {
        token_a: Address,
        token_b: Address,
        #[serde(default)]
        config: Option<PairConfig>,
    },
    UpdatePairConfig {
        token_a: Address,
        token_b: Address,
        config: PairConfig,
    },
    SetDefaultConfig {
        config: PairConfig,
    },
    RemoveTokenPair {
        token_a: Address,
        token_b: Address,
    },
    SupportedPairs,
    GetAggregatedPrice {
        token_a: Address,
        token_b: Address,
    },
    GetAllPrices {
        token_a: Address,
        token_b: Address,
    },
    GetBatchPrices {
        pairs: Vec<(Address, Address)>,
    },
    IsPriceFresh {
        token_a: Address,
        token_b: Address,
    },
    PriceHistory {
        token_a: Address,
        token_b: Address,
        count: usize,
    },
    SetFallbackPrice {
        token_a: Address,
        token_b: Address,
        price: U256,
    },
    SetFallbackMode {
        enabled: bool,
    },

    // oracle manager
    RegisterSource {
        source: Address,
        kind: SourceKind,
        name: String,
        priority: u32,
    },
    RemoveSource {
        source: Address,
    },
    SetSourceStatus {
        source: Address,
        active: bool,
    },
    RegisteredSources,
    SourceInfo {
        source: Address,
    },
    PerformHealthCheck {
        source: Address,
    },
    PerformGlobalHealthCheck,
    HealthReport,
    ActivateEmergencyMode {
        reason: String,
    },
    DeactivateEmergencyMode,
    UpdatePrice {
        token_a: Address,
        token_b: Address,
    },
    BatchUpdatePrices {
        pairs: Vec<(Address, Address)>,
        #[serde(default)]
        force: bool,
    },
    BatchRequest {
        batch_id: u64,
    },
    GetPrice {
        token_a: Address,
        token_b: Address,
    },
    GetValidatedPrice {
        token_a: Address,
        token_b: Address,
    },
    SetValidationConfig {
        config: ValidationConfig,
    },
    SetAutoUpdateConfig {
        enabled: bool,
        interval_secs: u64,
    },
    SetHealthCheckInterval {
        interval_secs: u64,
    },
    SetStatus {
        status: ManagerStatus,
    },
    NeedsAutoUpdate {
        token_a: Address,
        token_b: Address,
    },
    SystemStats,
    ManagerConfig,
}

impl ServiceRequest {
    /// Role needed to run the request; `None` for read-only queries.
    pub fn required_role(&self) -> Option<Role> {
        use ServiceRequest::*;
        match self {
            RemovePool { .. }
            | SetConfiguration { .. }
            | AddTwapPool { .. }
            | RemoveTwapPool { .. }
            | AddFeed { .. }
            | UpdateFeed { .. }
            | RemoveFeed { .. }
            | SetFeedActive { .. }
            | AddTokenPair { .. }
            | UpdatePairConfig { .. }
            | SetDefaultConfig { .. }
            | RemoveTokenPair { .. }
            | SetFallbackPrice { .. }
            | SetFallbackMode { .. }
            | RegisterSource { .. }
            | RemoveSource { .. }
            | SetSourceStatus { .. }
            | SetValidationConfig { .. }
            | SetAutoUpdateConfig { .. }
            | SetHealthCheckInterval { .. }
            | SetStatus { .. } => Some(Role::Admin),
            UpsertPool { .. }
            | UpdatePoolInfo { .. }
            | BatchUpdatePoolInfo { .. }
            | ClearCache
            | RecordTwapObservations
            | PerformHealthCheck { .. }
            | PerformGlobalHealthCheck
            | UpdatePrice { .. }
            | BatchUpdatePrices { .. } => Some(Role::Operator),
            ActivateEmergencyMode { .. } | DeactivateEmergencyMode => Some(Role::Emergency),
            Pause | Unpause => Some(Role::Pauser),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceResponse {
    Ok { result: Value },
    Error { kind: ErrorKind, message: String },
}

impl ServiceResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, ServiceResponse::Ok { .. })
    }
}

impl From<QuoteResult<Value>> for ServiceResponse {
    fn from(result: QuoteResult<Value>) -> Self {
        match result {
            Ok(result) => ServiceResponse::Ok { result },
            Err(e) => ServiceResponse::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

fn to_json<T: Serialize>(value: T) -> QuoteResult<Value> {
    serde_json::to_value(value).map_err(|e| QuoteError::Unavailable(format!("response encoding: {}", e)))
}

pub struct QuoteService {
    graph: Arc<PoolGraph>,
    path_finder: Arc<PathFinder>,
    twap: Arc<TwapSource>,
    chainlink: Arc<ChainlinkSource>,
    aggregator: Arc<PriceAggregator>,
    oracle: Arc<OracleManager>,
    authorizer: SharedAuthorizer,
    clock: SharedClock,
}

impl QuoteService {
    pub fn new(
        settings: &Settings,
        pool_reader: Option<Arc<dyn PoolStateReader>>,
        feed_reader: Arc<dyn PriceFeedReader>,
        authorizer: SharedAuthorizer,
        clock: SharedClock,
    ) -> Self {
        let graph = Arc::new(PoolGraph::new(settings.path_finding.fee_tiers.clone()));
        let path_finder = Arc::new(PathFinder::new(
            Arc::clone(&graph),
            pool_reader,
            Arc::clone(&clock),
            &settings.path_finding,
        ));
        let twap = Arc::new(TwapSource::new(Arc::clone(&graph), &settings.oracle));
        let chainlink = Arc::new(ChainlinkSource::new(feed_reader, &settings.oracle));
        let twap_source: Arc<dyn PriceSource> = twap.clone();
        let chainlink_source: Arc<dyn PriceSource> = chainlink.clone();
        let aggregator = Arc::new(PriceAggregator::new(
            Some(twap_source),
            Some(chainlink_source),
            Arc::clone(&clock),
            settings.oracle.history_len,
        ));
        let oracle = Arc::new(OracleManager::new(
            Arc::clone(&aggregator),
            Arc::clone(&clock),
            &settings.oracle,
        ));
        Self {
            graph,
            path_finder,
            twap,
            chainlink,
            aggregator,
            oracle,
            authorizer,
            clock,
        }
    }

    pub fn graph(&self) -> &Arc<PoolGraph> {
        &self.graph
    }

    pub fn path_finder(&self) -> &Arc<PathFinder> {
        &self.path_finder
    }

    pub fn twap(&self) -> &Arc<TwapSource> {
        &self.twap
    }

    pub fn chainlink(&self) -> &Arc<ChainlinkSource> {
        &self.chainlink
    }

    pub fn aggregator(&self) -> &Arc<PriceAggregator> {
        &self.aggregator
    }

    pub fn oracle(&self) -> &Arc<OracleManager> {
        &self.oracle
    }

    pub async fn handle(&self, caller: Address, request: ServiceRequest) -> ServiceResponse {
        if let Some(role) = request.required_role() {
            if let Err(e) = self.authorizer.require(caller, role) {
                return Err(e).into();
            }
        }
        self.dispatch(request).await.into()
    }

    /// Parses one JSON request and answers with one JSON response line.
    pub async fn handle_json(&self, caller: Address, line: &str) -> String {
        let response = match serde_json::from_str::<ServiceRequest>(line) {
            Ok(request) => self.handle(caller, request).await,
            Err(e) => ServiceResponse::Error {
                kind: ErrorKind::InvalidInput,
                message: format!("malformed request: {}", e),
            },
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","kind":"unavailable","message":"{}"}}"#, e)
        })
    }

    fn probe_for(&self, kind: SourceKind) -> Option<Arc<dyn PriceSource>> {
        match kind {
            SourceKind::Twap => Some(self.twap.clone() as Arc<dyn PriceSource>),
            SourceKind::Chainlink => Some(self.chainlink.clone() as Arc<dyn PriceSource>),
            SourceKind::Aggregated | SourceKind::External => None,
        }
    }

    async fn dispatch(&self, request: ServiceRequest) -> QuoteResult<Value> {
        use ServiceRequest::*;
        let now = self.clock.now();
        let pf = &self.path_finder;
        match request {
            FindOptimalPath {
                token_in,
                token_out,
                amount_in,
                max_slippage_bps,
            } => {
                let slippage = max_slippage_bps.unwrap_or_else(|| pf.config().max_slippage_default_bps);
                to_json(pf.find_optimal_path(token_in, token_out, amount_in, slippage, None)?)
            }
            FindMultiplePaths {
                token_in,
                token_out,
                amount_in,
                max_count,
            } => to_json(pf.find_multiple_paths(token_in, token_out, amount_in, max_count)?),
            HasPath {
                token_a,
                token_b,
                max_hops,
            } => to_json(pf.has_path(token_a, token_b, max_hops)?),
            GetAmountOut {
                token_in,
                token_out,
                amount_in,
            } => {
                let (amount_out, impact, path) = pf.get_amount_out(token_in, token_out, amount_in)?;
                Ok(json!({ "amount_out": amount_out, "price_impact_bps": impact, "path": path }))
            }
            GetAmountIn {
                token_in,
                token_out,
                amount_out,
            } => {
                let (amount_in, impact, path) = pf.get_amount_in(token_in, token_out, amount_out)?;
                Ok(json!({ "amount_in": amount_in, "price_impact_bps": impact, "path": path }))
            }
            GetPool { pool } => to_json(self.graph.get_pool(pool).ok_or(QuoteError::PoolNotFound(pool))?),
            GetPoolStats { pool } => to_json(self.graph.get_pool_stats(pool)?),
            GetConnectedTokens { token } => {
                let mut tokens: Vec<Address> = self.graph.get_connected_tokens(token).into_iter().collect();
                tokens.sort();
                to_json(tokens)
            }
            PathFinderConfig => to_json(pf.config()),
            CacheStats => to_json(pf.cache_stats()),

            UpsertPool { pool } => {
                let mut pool = pool;
                if pool.last_update == 0 {
                    pool.last_update = now;
                }
                self.graph.upsert_pool(pool)?;
                pf.clear_cache();
                Ok(Value::Null)
            }
            RemovePool { pool } => {
                let removed = self.graph.remove_pool(pool)?;
                pf.clear_cache();
                to_json(removed)
            }
            UpdatePoolInfo { pool } => to_json(pf.update_pool_info(pool).await?),
            BatchUpdatePoolInfo { pools } => to_json(pf.batch_update_pool_info(&pools).await?),
            SetConfiguration {
                cache_timeout_secs,
                max_slippage_default_bps,
                use_cache,
            } => {
                pf.set_configuration(cache_timeout_secs, max_slippage_default_bps, use_cache)?;
                to_json(pf.config())
            }
            ClearCache => to_json(pf.clear_cache()),
            Pause => {
                pf.pause();
                Ok(Value::Null)
            }
            Unpause => {
                pf.unpause();
                Ok(Value::Null)
            }

            AddTwapPool {
                pool,
                period_secs,
                cardinality,
            } => {
                self.twap.add_pool(
                    pool,
                    period_secs.unwrap_or_else(|| self.twap.default_period()),
                    cardinality.unwrap_or_else(|| self.twap.default_cardinality()),
                )?;
                to_json(self.twap.pool_info(pool)?)
            }
            RemoveTwapPool { pool } => {
                self.twap.remove_pool(pool)?;
                Ok(Value::Null)
            }
            RecordTwapObservations => to_json(self.twap.update_from_graph(now)),
            TwapPoolInfo { pool } => to_json(self.twap.pool_info(pool)?),
            AddFeed {
                token_a,
                token_b,
                feed,
                heartbeat_secs,
                description,
            } => {
                self.chainlink
                    .add_feed(token_a, token_b, feed, heartbeat_secs, &description)?;
                to_json(self.chainlink.feed_config(token_a, token_b)?)
            }
            UpdateFeed {
                token_a,
                token_b,
                feed,
                heartbeat_secs,
            } => {
                self.chainlink.update_feed(token_a, token_b, feed, heartbeat_secs)?;
                to_json(self.chainlink.feed_config(token_a, token_b)?)
            }
            RemoveFeed { token_a, token_b } => to_json(self.chainlink.remove_feed(token_a, token_b)?),
            SetFeedActive {
                token_a,
                token_b,
                active,
            } => {
                self.chainlink.set_feed_active(token_a, token_b, active)?;
                Ok(Value::Null)
            }

            AddTokenPair {
                token_a,
                token_b,
                config,
            } => {
                self.aggregator.add_token_pair(token_a, token_b, config)?;
                to_json(self.aggregator.pair_config(token_a, token_b)?)
            }
            UpdatePairConfig {
                token_a,
                token_b,
                config,
            } => {
                self.aggregator.update_pair_config(token_a, token_b, config)?;
                Ok(Value::Null)
            }
            SetDefaultConfig { config } => {
                self.aggregator.set_default_config(config)?;
                Ok(Value::Null)
            }
            RemoveTokenPair { token_a, token_b } => {
                self.aggregator.remove_token_pair(token_a, token_b)?;
                Ok(Value::Null)
            }
            SupportedPairs => to_json(self.aggregator.supported_pairs()),
            GetAggregatedPrice { token_a, token_b } => {
                to_json(self.aggregator.get_aggregated_price(token_a, token_b).await?)
            }
            GetAllPrices { token_a, token_b } => {
                let (twap, chainlink, aggregated) = self.aggregator.get_all_prices(token_a, token_b).await?;
                Ok(json!({ "twap": twap, "chainlink": chainlink, "aggregated": aggregated }))
            }
            GetBatchPrices { pairs } => to_json(self.aggregator.get_batch_prices(&pairs).await),
            IsPriceFresh { token_a, token_b } => to_json(self.aggregator.is_price_fresh(token_a, token_b)?),
            PriceHistory {
                token_a,
                token_b,
                count,
            } => to_json(self.aggregator.price_history(token_a, token_b, count)),
            SetFallbackPrice {
                token_a,
                token_b,
                price,
            } => {
                self.aggregator.set_fallback_price(token_a, token_b, price)?;
                Ok(Value::Null)
            }
            SetFallbackMode { enabled } => {
                self.aggregator.set_fallback_mode(enabled);
                Ok(Value::Null)
            }

            RegisterSource {
                source,
                kind,
                name,
                priority,
            } => {
                self.oracle
                    .register_source(source, kind, &name, priority, self.probe_for(kind))?;
                to_json(self.oracle.source_info(source)?)
            }
            RemoveSource { source } => to_json(self.oracle.remove_source(source)?),
            SetSourceStatus { source, active } => {
                self.oracle.set_source_status(source, active)?;
                Ok(Value::Null)
            }
            RegisteredSources => to_json(self.oracle.registered_sources()),
            SourceInfo { source } => to_json(self.oracle.source_info(source)?),
            PerformHealthCheck { source } => to_json(self.oracle.perform_health_check(source).await?),
            PerformGlobalHealthCheck => to_json(self.oracle.perform_global_health_check().await),
            HealthReport => to_json(self.oracle.health_report()),
            ActivateEmergencyMode { reason } => {
                self.oracle.activate_emergency_mode(&reason)?;
                Ok(Value::Null)
            }
            DeactivateEmergencyMode => {
                self.oracle.deactivate_emergency_mode()?;
                Ok(Value::Null)
            }
            UpdatePrice { token_a, token_b } => to_json(self.oracle.update_price(token_a, token_b).await?),
            BatchUpdatePrices { pairs, force } => {
                let batch_id = self.oracle.batch_update_prices(&pairs, force).await?;
                to_json(self.oracle.batch_request(batch_id)?)
            }
            BatchRequest { batch_id } => to_json(self.oracle.batch_request(batch_id)?),
            GetPrice { token_a, token_b } => to_json(self.oracle.get_price(token_a, token_b).await?),
            GetValidatedPrice { token_a, token_b } => {
                to_json(self.oracle.get_validated_price(token_a, token_b).await?)
            }
            SetValidationConfig { config } => {
                self.oracle.set_validation_config(config)?;
                Ok(Value::Null)
            }
            SetAutoUpdateConfig {
                enabled,
                interval_secs,
            } => {
                self.oracle.set_auto_update_config(enabled, interval_secs)?;
                Ok(Value::Null)
            }
            SetHealthCheckInterval { interval_secs } => {
                self.oracle.set_health_check_interval(interval_secs)?;
                Ok(Value::Null)
            }
            SetStatus { status } => {
                self.oracle.set_status(status)?;
                Ok(Value::Null)
            }
            NeedsAutoUpdate { token_a, token_b } => to_json(self.oracle.needs_auto_update(token_a, token_b)),
            SystemStats => to_json(self.oracle.system_stats()),
            ManagerConfig => to_json(self.oracle.manager_config()),
        }
    }

    /// Periodically re-reads `pools` from the chain and records TWAP observations until
    /// `cancel` fires.
    pub fn spawn_pool_refresh(
        self: Arc<Self>,
        pools: Vec<Address>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("pool refresh started for {} pools every {:?}", pools.len(), interval);
            loop {
                if !pools.is_empty() {
                    match self.path_finder.batch_update_pool_info(&pools).await {
                        Ok(outcomes) => {
                            let failed = outcomes.iter().filter(|o| !o.updated).count();
                            if failed > 0 {
                                warn!("pool refresh: {} of {} pools failed", failed, outcomes.len());
                            }
                        }
                        Err(e) => warn!("pool refresh skipped: {}", e),
                    }
                }
                let observed = self.twap.update_from_graph(self.clock.now());
                log::debug!("pool refresh recorded {} TWAP observations", observed);

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("pool refresh stopped");
        })
    }
}
