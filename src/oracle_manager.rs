//! # Oracle Manager
//!
//! Coordinates the price sources behind a [`PriceAggregator`]: keeps the source
//! registry, runs health checks, schedules automatic updates, applies the manager-level
//! validation policy and owns the emergency switch.
//!
//! ## Update rules
//!
//! - Updates are refused while emergency mode is on ([`QuoteError::EmergencyModeActive`])
//!   or the manager is not [`ManagerStatus::Active`] ([`QuoteError::Inactive`]).
//! - A pair may be updated at most once per `min_update_interval_secs` unless forced.
//!   `(a, b)` and `(b, a)` share one interval and one lock.
//! - Batches run distinct pairs concurrently; a per-pair async mutex serialises updates
//!   of the same pair so interval checks observe each other.
//!
//! While emergency mode is on, reads are served from the last known good price and then
//! from the admin fallback price.

use crate::clock::SharedClock;
use crate::errors::{QuoteError, QuoteResult};
use crate::price_aggregator::{AggregatedPrice, PriceAggregator, FALLBACK_SOURCE};
use crate::price_feeds::{pair_key, PriceSource, SourceKind};
use crate::settings::Oracle;
use crate::types::conversions::BPS;
use crate::utils::format_timestamp;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use ethers::types::Address;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MIN_STALE_THRESHOLD_SECS: u64 = 60;
pub const MAX_STALE_THRESHOLD_SECS: u64 = 86_400;
pub const MAX_VALIDATION_DEVIATION_BPS: u32 = 5000;
pub const MIN_AUTO_UPDATE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    Active,
    Inactive,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRegistration {
    pub source: Address,
    pub kind: SourceKind,
    pub name: String,
    pub priority: u32,
    pub is_active: bool,
    pub last_health_check: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_deviation_bps: u32,
    pub min_confidence_bps: u32,
    pub require_multiple_sources: bool,
    pub stale_price_threshold_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_deviation_bps: 1000,
            min_confidence_bps: 7000,
            require_multiple_sources: false,
            stale_price_threshold_secs: 3600,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> QuoteResult<()> {
        if self.max_deviation_bps > MAX_VALIDATION_DEVIATION_BPS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "max deviation {} exceeds {}",
                self.max_deviation_bps, MAX_VALIDATION_DEVIATION_BPS
            )));
        }
        if self.min_confidence_bps > BPS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "min confidence {} exceeds {}",
                self.min_confidence_bps, BPS
            )));
        }
        if !(MIN_STALE_THRESHOLD_SECS..=MAX_STALE_THRESHOLD_SECS).contains(&self.stale_price_threshold_secs) {
            return Err(QuoteError::InvalidConfiguration(format!(
                "stale threshold {}s outside [{}, {}]",
                self.stale_price_threshold_secs, MIN_STALE_THRESHOLD_SECS, MAX_STALE_THRESHOLD_SECS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoUpdateConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub batch_id: u64,
    pub pairs: Vec<(Address, Address)>,
    pub force_update: bool,
    pub executed_at: u64,
    pub updated: Vec<(Address, Address)>,
    pub skipped: Vec<(Address, Address)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: Address,
    pub name: String,
    pub is_active: bool,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_health_check: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: u64,
    pub generated_at_rfc3339: String,
    pub status: ManagerStatus,
    pub emergency_mode: bool,
    pub sources: Vec<SourceHealth>,
    pub active_sources: usize,
    pub total_sources: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub status: ManagerStatus,
    pub emergency_mode: bool,
    pub emergency_reason: Option<String>,
    pub registered_sources: usize,
    pub active_sources: usize,
    pub supported_pairs: usize,
    pub total_batches: u64,
    pub last_global_health_check: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub validation: ValidationConfig,
    pub auto_update: AutoUpdateConfig,
    pub health_check_interval_secs: u64,
    pub min_update_interval_secs: u64,
    pub health_failure_threshold: u32,
    pub emergency_cooldown_secs: u64,
    pub max_oracles: usize,
    pub max_batch_size: usize,
}

/// Outcome of one pass of the auto-update loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoUpdateSummary {
    pub updated: usize,
    pub failed: usize,
    pub health_checked: bool,
}

#[derive(Debug, Default)]
struct EmergencyState {
    active: bool,
    reason: Option<String>,
    activated_at: u64,
}

pub struct OracleManager {
    aggregator: Arc<PriceAggregator>,
    clock: SharedClock,
    sources: RwLock<IndexMap<Address, OracleRegistration>>,
    probes: DashMap<Address, Arc<dyn PriceSource>>,
    validation: ArcSwap<ValidationConfig>,
    auto_update: ArcSwap<AutoUpdateConfig>,
    health_check_interval_secs: AtomicU64,
    status: ArcSwap<ManagerStatus>,
    emergency: Mutex<EmergencyState>,
    last_updates: DashMap<(Address, Address), u64>,
    pair_locks: DashMap<(Address, Address), Arc<tokio::sync::Mutex<()>>>,
    batches: DashMap<u64, BatchUpdate>,
    next_batch_id: AtomicU64,
    last_global_health_check: AtomicU64,
    min_update_interval_secs: u64,
    health_failure_threshold: u32,
    emergency_cooldown_secs: u64,
    max_oracles: usize,
    max_batch_size: usize,
}

impl OracleManager {
    pub fn new(aggregator: Arc<PriceAggregator>, clock: SharedClock, settings: &Oracle) -> Self {
        let validation = ValidationConfig {
            require_multiple_sources: settings.require_multiple_sources,
            stale_price_threshold_secs: settings.stale_price_threshold_secs,
            ..ValidationConfig::default()
        };
        Self {
            aggregator,
            clock,
            sources: RwLock::new(IndexMap::new()),
            probes: DashMap::new(),
            validation: ArcSwap::from_pointee(validation),
            auto_update: ArcSwap::from_pointee(AutoUpdateConfig {
                enabled: settings.auto_update_enabled,
                interval_secs: settings.auto_update_interval_secs,
            }),
            health_check_interval_secs: AtomicU64::new(settings.health_check_interval_secs),
            status: ArcSwap::from_pointee(ManagerStatus::Active),
            emergency: Mutex::new(EmergencyState::default()),
            last_updates: DashMap::new(),
            pair_locks: DashMap::new(),
            batches: DashMap::new(),
            next_batch_id: AtomicU64::new(1),
            last_global_health_check: AtomicU64::new(0),
            min_update_interval_secs: settings.min_update_interval_secs,
            health_failure_threshold: settings.health_failure_threshold.max(1),
            emergency_cooldown_secs: settings.emergency_cooldown_secs,
            max_oracles: settings.max_oracles,
            max_batch_size: settings.max_batch_size,
        }
    }

    pub fn aggregator(&self) -> &Arc<PriceAggregator> {
        &self.aggregator
    }

    fn read_sources(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<Address, OracleRegistration>> {
        self.sources.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_sources(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<Address, OracleRegistration>> {
        self.sources.write().unwrap_or_else(|e| e.into_inner())
    }

    fn emergency_state(&self) -> std::sync::MutexGuard<'_, EmergencyState> {
        self.emergency.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- registry ----

    /// Registers a source. `probe` is what health checks ask for liveness; a source
    /// registered without one fails every health check.
    pub fn register_source(
        &self,
        source: Address,
        kind: SourceKind,
        name: &str,
        priority: u32,
        probe: Option<Arc<dyn PriceSource>>,
    ) -> QuoteResult<()> {
        if source.is_zero() {
            return Err(QuoteError::InvalidOracle(source));
        }
        let mut sources = self.write_sources();
        if sources.contains_key(&source) {
            return Err(QuoteError::SourceAlreadyRegistered(source));
        }
        if sources.len() >= self.max_oracles {
            return Err(QuoteError::LimitExceeded(format!(
                "at most {} oracle sources",
                self.max_oracles
            )));
        }
        sources.insert(
            source,
            OracleRegistration {
                source,
                kind,
                name: name.to_string(),
                priority,
                is_active: true,
                last_health_check: 0,
                consecutive_failures: 0,
            },
        );
        if let Some(probe) = probe {
            self.probes.insert(source, probe);
        }
        info!("oracle source {} ({:?}) registered at {:?}", name, kind, source);
        Ok(())
    }

    pub fn remove_source(&self, source: Address) -> QuoteResult<OracleRegistration> {
        let removed = self
            .write_sources()
            .shift_remove(&source)
            .ok_or(QuoteError::SourceNotRegistered(source))?;
        self.probes.remove(&source);
        info!("oracle source {:?} removed", source);
        Ok(removed)
    }

    /// Reactivating a source also clears its failure streak.
    pub fn set_source_status(&self, source: Address, active: bool) -> QuoteResult<()> {
        let mut sources = self.write_sources();
        let reg = sources
            .get_mut(&source)
            .ok_or(QuoteError::SourceNotRegistered(source))?;
        reg.is_active = active;
        if active {
            reg.consecutive_failures = 0;
        }
        Ok(())
    }

    /// Registrations in registration order.
    pub fn registered_sources(&self) -> Vec<OracleRegistration> {
        self.read_sources().values().cloned().collect()
    }

    pub fn source_info(&self, source: Address) -> QuoteResult<OracleRegistration> {
        self.read_sources()
            .get(&source)
            .cloned()
            .ok_or(QuoteError::SourceNotRegistered(source))
    }

    // ---- health ----

    /// Probes one source and returns whether it answered healthy.
    pub async fn perform_health_check(&self, source: Address) -> QuoteResult<bool> {
        let registered = self.read_sources().contains_key(&source);
        if !registered {
            return Err(QuoteError::SourceNotRegistered(source));
        }
        let now = self.clock.now();
        let probe = self.probes.get(&source).map(|p| Arc::clone(p.value()));
        let healthy = match probe {
            Some(p) => p.is_healthy(now).await,
            None => false,
        };

        let mut sources = self.write_sources();
        let reg = sources
            .get_mut(&source)
            .ok_or(QuoteError::SourceNotRegistered(source))?;
        reg.last_health_check = now;
        if healthy {
            reg.consecutive_failures = 0;
        } else {
            reg.consecutive_failures += 1;
            crate::metrics::increment_health_check_failure(&reg.name);
            warn!(
                "health check failed for {} ({} consecutive)",
                reg.name, reg.consecutive_failures
            );
            if reg.is_active && reg.consecutive_failures >= self.health_failure_threshold {
                reg.is_active = false;
                error!("oracle source {} deactivated after repeated health failures", reg.name);
            }
        }
        Ok(healthy)
    }

    /// Checks every registered source; returns how many answered healthy.
    pub async fn perform_global_health_check(&self) -> usize {
        let ids: Vec<Address> = self.read_sources().keys().copied().collect();
        let mut healthy = 0;
        for id in ids {
            if let Ok(true) = self.perform_health_check(id).await {
                healthy += 1;
            }
        }
        self.last_global_health_check
            .store(self.clock.now(), Ordering::SeqCst);
        debug!("global health check: {} healthy sources", healthy);
        healthy
    }

    pub fn health_report(&self) -> HealthReport {
        let now = self.clock.now();
        let sources: Vec<SourceHealth> = self
            .read_sources()
            .values()
            .map(|r| SourceHealth {
                source: r.source,
                name: r.name.clone(),
                is_active: r.is_active,
                healthy: r.is_active && r.consecutive_failures == 0,
                consecutive_failures: r.consecutive_failures,
                last_health_check: r.last_health_check,
            })
            .collect();
        let active = sources.iter().filter(|s| s.is_active).count();
        HealthReport {
            generated_at: now,
            generated_at_rfc3339: format_timestamp(now),
            status: self.status(),
            emergency_mode: self.is_emergency_mode(),
            total_sources: sources.len(),
            active_sources: active,
            sources,
        }
    }

    // ---- emergency ----

    pub fn activate_emergency_mode(&self, reason: &str) -> QuoteResult<()> {
        let mut state = self.emergency_state();
        if state.active {
            return Err(QuoteError::EmergencyModeActive);
        }
        state.active = true;
        state.reason = Some(reason.to_string());
        state.activated_at = self.clock.now();
        self.status.store(Arc::new(ManagerStatus::Emergency));
        crate::metrics::set_emergency_mode(true);
        error!("emergency mode activated: {}", reason);
        Ok(())
    }

    /// No-op when emergency mode is already off.
    pub fn deactivate_emergency_mode(&self) -> QuoteResult<()> {
        let mut state = self.emergency_state();
        if !state.active {
            debug!("deactivate_emergency_mode: not active");
            return Ok(());
        }
        let elapsed = self.clock.now().saturating_sub(state.activated_at);
        if elapsed < self.emergency_cooldown_secs {
            return Err(QuoteError::EmergencyCooldown {
                remaining_secs: self.emergency_cooldown_secs - elapsed,
            });
        }
        *state = EmergencyState::default();
        self.status.store(Arc::new(ManagerStatus::Active));
        crate::metrics::set_emergency_mode(false);
        info!("emergency mode deactivated after {}s", elapsed);
        Ok(())
    }

    pub fn is_emergency_mode(&self) -> bool {
        self.emergency_state().active
    }

    // ---- updates ----

    fn ensure_updatable(&self) -> QuoteResult<()> {
        if self.is_emergency_mode() {
            return Err(QuoteError::EmergencyModeActive);
        }
        match self.status() {
            ManagerStatus::Active => Ok(()),
            ManagerStatus::Emergency => Err(QuoteError::EmergencyModeActive),
            ManagerStatus::Inactive => Err(QuoteError::Inactive),
        }
    }

    fn pair_lock(&self, a: Address, b: Address) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.pair_locks
                .entry(pair_key(a, b))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        )
    }

    async fn update_pair(&self, a: Address, b: Address, force: bool) -> QuoteResult<AggregatedPrice> {
        let key = pair_key(a, b);
        let lock = self.pair_lock(a, b);
        let _guard = lock.lock().await;
        let now = self.clock.now();
        if !force {
            if let Some(last) = self.last_updates.get(&key).map(|t| *t) {
                let elapsed = now.saturating_sub(last);
                if elapsed < self.min_update_interval_secs {
                    return Err(QuoteError::UpdateTooSoon {
                        remaining_secs: self.min_update_interval_secs - elapsed,
                    });
                }
            }
        }
        let price = self.aggregator.update_price(a, b).await?;
        self.last_updates.insert(key, now);
        Ok(price)
    }

    pub async fn update_price(&self, a: Address, b: Address) -> QuoteResult<AggregatedPrice> {
        self.ensure_updatable()?;
        self.update_pair(a, b, false).await
    }

    /// Updates up to `max_batch_size` pairs and returns the batch id. Pairs that fail
    /// (too soon, unsupported, invalid price) are recorded as skipped.
    pub async fn batch_update_prices(&self, pairs: &[(Address, Address)], force: bool) -> QuoteResult<u64> {
        self.ensure_updatable()?;
        if pairs.is_empty() {
            return Err(QuoteError::InvalidAmount("empty batch".into()));
        }
        if pairs.len() > self.max_batch_size {
            return Err(QuoteError::BatchSizeExceeded {
                size: pairs.len(),
                max: self.max_batch_size,
            });
        }

        let results = futures::future::join_all(
            pairs
                .iter()
                .map(|(a, b)| async move { ((*a, *b), self.update_pair(*a, *b, force).await) }),
        )
        .await;

        let mut updated = Vec::new();
        let mut skipped = Vec::new();
        for (pair, result) in results {
            match result {
                Ok(price) if price.is_valid => updated.push(pair),
                Ok(_) => skipped.push(pair),
                Err(e) => {
                    debug!("batch skipped {:?}/{:?}: {}", pair.0, pair.1, e);
                    skipped.push(pair);
                }
            }
        }

        let batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        info!(
            "batch {}: {} updated, {} skipped",
            batch_id,
            updated.len(),
            skipped.len()
        );
        self.batches.insert(
            batch_id,
            BatchUpdate {
                batch_id,
                pairs: pairs.to_vec(),
                force_update: force,
                executed_at: self.clock.now(),
                updated,
                skipped,
            },
        );
        Ok(batch_id)
    }

    pub fn batch_request(&self, batch_id: u64) -> QuoteResult<BatchUpdate> {
        self.batches
            .get(&batch_id)
            .map(|b| b.clone())
            .ok_or(QuoteError::BatchNotFound(batch_id))
    }

    // ---- reads ----

    pub async fn get_price(&self, a: Address, b: Address) -> QuoteResult<AggregatedPrice> {
        if self.is_emergency_mode() {
            self.aggregator.pair_config(a, b)?;
            return Ok(self.aggregator.last_known_or_fallback(a, b));
        }
        self.aggregator.get_aggregated_price(a, b).await
    }

    /// Aggregated price with the manager's validation policy applied on top; a price
    /// that fails any check comes back with `is_valid = false`.
    pub async fn get_validated_price(&self, a: Address, b: Address) -> QuoteResult<AggregatedPrice> {
        let mut price = self.get_price(a, b).await?;
        if !price.is_valid {
            return Ok(price);
        }
        let config = self.validation_config();
        let age = self.clock.now().saturating_sub(price.timestamp);
        let multiple = !price.twap_price.is_zero()
            && !price.chainlink_price.is_zero()
            && price.primary_source != FALLBACK_SOURCE;
        let failure = if age > config.stale_price_threshold_secs {
            Some("stale")
        } else if price.confidence_bps < config.min_confidence_bps {
            Some("low confidence")
        } else if price.deviation_bps > config.max_deviation_bps {
            Some("deviation")
        } else if config.require_multiple_sources && !multiple {
            Some("single source")
        } else {
            None
        };
        if let Some(reason) = failure {
            debug!("validated price {:?}/{:?} rejected: {}", a, b, reason);
            price.is_valid = false;
        }
        Ok(price)
    }

    // ---- configuration ----

    pub fn set_validation_config(&self, config: ValidationConfig) -> QuoteResult<()> {
        config.validate()?;
        self.validation.store(Arc::new(config));
        Ok(())
    }

    pub fn validation_config(&self) -> ValidationConfig {
        **self.validation.load()
    }

    pub fn set_auto_update_config(&self, enabled: bool, interval_secs: u64) -> QuoteResult<()> {
        if interval_secs < MIN_AUTO_UPDATE_INTERVAL_SECS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "auto-update interval must be at least {}s",
                MIN_AUTO_UPDATE_INTERVAL_SECS
            )));
        }
        self.auto_update.store(Arc::new(AutoUpdateConfig {
            enabled,
            interval_secs,
        }));
        Ok(())
    }

    pub fn set_health_check_interval(&self, interval_secs: u64) -> QuoteResult<()> {
        if interval_secs < MIN_AUTO_UPDATE_INTERVAL_SECS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "health check interval must be at least {}s",
                MIN_AUTO_UPDATE_INTERVAL_SECS
            )));
        }
        self.health_check_interval_secs
            .store(interval_secs, Ordering::SeqCst);
        Ok(())
    }

    /// Emergency status can only be entered through [`activate_emergency_mode`](Self::activate_emergency_mode).
    pub fn set_status(&self, status: ManagerStatus) -> QuoteResult<()> {
        if status == ManagerStatus::Emergency {
            return Err(QuoteError::InvalidConfiguration(
                "use activate_emergency_mode to enter emergency status".into(),
            ));
        }
        if self.is_emergency_mode() {
            return Err(QuoteError::EmergencyModeActive);
        }
        self.status.store(Arc::new(status));
        info!("oracle manager status set to {:?}", status);
        Ok(())
    }

    pub fn status(&self) -> ManagerStatus {
        **self.status.load()
    }

    pub fn needs_auto_update(&self, a: Address, b: Address) -> bool {
        let config = **self.auto_update.load();
        if !config.enabled || !self.aggregator.is_supported(a, b) {
            return false;
        }
        match self.last_updates.get(&pair_key(a, b)).map(|t| *t) {
            Some(last) => self.clock.now().saturating_sub(last) >= config.interval_secs,
            None => true,
        }
    }

    pub fn system_stats(&self) -> SystemStats {
        let (registered, active) = {
            let sources = self.read_sources();
            (sources.len(), sources.values().filter(|r| r.is_active).count())
        };
        SystemStats {
            status: self.status(),
            emergency_mode: self.is_emergency_mode(),
            emergency_reason: self.emergency_state().reason.clone(),
            registered_sources: registered,
            active_sources: active,
            supported_pairs: self.aggregator.supported_pairs().len(),
            total_batches: self.next_batch_id.load(Ordering::SeqCst) - 1,
            last_global_health_check: self.last_global_health_check.load(Ordering::SeqCst),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            validation: self.validation_config(),
            auto_update: **self.auto_update.load(),
            health_check_interval_secs: self.health_check_interval_secs.load(Ordering::SeqCst),
            min_update_interval_secs: self.min_update_interval_secs,
            health_failure_threshold: self.health_failure_threshold,
            emergency_cooldown_secs: self.emergency_cooldown_secs,
            max_oracles: self.max_oracles,
            max_batch_size: self.max_batch_size,
        }
    }

    // ---- background ----

    /// One pass of the auto-update loop: refresh pairs that are due, then run the global
    /// health check if its interval elapsed.
    pub async fn run_auto_update_cycle(&self) -> AutoUpdateSummary {
        let mut summary = AutoUpdateSummary::default();
        if self.ensure_updatable().is_err() {
            return summary;
        }

        let due: Vec<(Address, Address)> = self
            .aggregator
            .supported_pairs()
            .into_iter()
            .filter(|(a, b)| self.needs_auto_update(*a, *b))
            .collect();
        for chunk in due.chunks(self.max_batch_size.max(1)) {
            match self.batch_update_prices(chunk, false).await {
                Ok(id) => {
                    if let Ok(batch) = self.batch_request(id) {
                        summary.updated += batch.updated.len();
                        summary.failed += batch.skipped.len();
                    }
                }
                Err(e) => {
                    warn!("auto-update batch failed: {}", e);
                    summary.failed += chunk.len();
                }
            }
        }

        let now = self.clock.now();
        let last = self.last_global_health_check.load(Ordering::SeqCst);
        if now.saturating_sub(last) >= self.health_check_interval_secs.load(Ordering::SeqCst) {
            self.perform_global_health_check().await;
            summary.health_checked = true;
        }
        summary
    }

    /// Runs [`run_auto_update_cycle`](Self::run_auto_update_cycle) every auto-update
    /// interval until `cancel` fires. Interval changes apply from the next cycle.
    pub fn spawn_auto_update(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("oracle auto-update loop started");
            let mut iteration = 0u64;
            loop {
                let interval = self.auto_update.load().interval_secs.max(1);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                }
                iteration += 1;
                let summary = self.run_auto_update_cycle().await;
                debug!(
                    "[auto-update #{}] updated={} failed={} health_checked={}",
                    iteration, summary.updated, summary.failed, summary.health_checked
                );
            }
            info!("oracle auto-update loop stopped");
        })
    }
}
