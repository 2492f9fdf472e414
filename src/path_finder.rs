//! # Path Finder
//!
//! Route search over the [`PoolGraph`] with quoting by the [`QuoteEngine`].
//!
//! ## Search
//!
//! 1. Same token in and out: zero-hop identity path.
//! 2. Route cache (keyed by token pair and amount bucket) when enabled and unexpired.
//!    The key ignores the slippage bound: a hit for the exact cached amount is served to
//!    any query whose bound the cached path's impact satisfies, whatever bound it was
//!    found under. Other amounts in the bucket are requoted on the cached route.
//! 3. Direct pools between the two tokens.
//! 4. If no direct pool satisfies the slippage bound: bounded BFS over simple token
//!    paths (no revisits, at most `max_hops` hops), every pool combination quoted in
//!    parallel with rayon.
//!
//! The best candidate has the highest output among those whose price impact is within
//! the bound; ties go to fewer hops, then lower gas. Finding nothing is not an error:
//! the returned [`Path`] has `is_valid == false`.
//!
//! ## Cancellation
//!
//! Searches accept an optional [`CancellationToken`]. It is polled between BFS
//! expansions and before the cache write; a cancelled search returns
//! [`QuoteError::Cancelled`] and leaves the cache untouched.

use crate::chain_reader::PoolStateReader;
use crate::clock::SharedClock;
use crate::errors::{QuoteError, QuoteResult};
use crate::pool_graph::{GraphSnapshot, PoolGraph};
use crate::pools::Pool;
use crate::quoter::{GasModel, PathQuote, QuoteEngine, MAX_QUOTE_HOPS};
use crate::route_cache::{CacheStats, RouteCache, RouteKey};
use crate::router::{Path, Route};
use crate::settings::PathFinding;
use crate::types::conversions::BPS;
use arc_swap::ArcSwap;
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub const MAX_CACHE_TIMEOUT_SECS: u64 = 3600;
pub const MAX_SLIPPAGE_BPS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFinderConfig {
    pub cache_timeout_secs: u64,
    pub max_slippage_default_bps: u32,
    pub use_cache: bool,
    pub max_hops: usize,
    pub max_candidates: usize,
}

impl PathFinderConfig {
    pub fn from_settings(s: &PathFinding) -> Self {
        Self {
            cache_timeout_secs: s.cache_timeout_secs,
            max_slippage_default_bps: s.max_slippage_default_bps,
            use_cache: s.use_cache,
            max_hops: s.max_hops.clamp(1, MAX_QUOTE_HOPS),
            max_candidates: s.max_candidates.max(1),
        }
    }
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        Self::from_settings(&PathFinding::default())
    }
}

/// Result of refreshing one pool from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUpdateOutcome {
    pub pool: Address,
    pub updated: bool,
    pub error: Option<String>,
}

/// A fully resolved candidate: token sequence plus the pools walked.
struct Candidate {
    tokens: Vec<Address>,
    pools: Vec<Pool>,
}

pub struct PathFinder {
    graph: Arc<PoolGraph>,
    engine: QuoteEngine,
    cache: RouteCache,
    config: ArcSwap<PathFinderConfig>,
    paused: AtomicBool,
    reader: Option<Arc<dyn PoolStateReader>>,
    clock: SharedClock,
}

fn validate_query(token_in: Address, token_out: Address, amount: U256) -> QuoteResult<()> {
    if token_in.is_zero() || token_out.is_zero() {
        return Err(QuoteError::InvalidTokens("zero token address".into()));
    }
    if amount.is_zero() {
        return Err(QuoteError::InvalidAmount("amount must be non-zero".into()));
    }
    Ok(())
}

fn check_cancel(cancel: Option<&CancellationToken>) -> QuoteResult<()> {
    match cancel {
        Some(c) if c.is_cancelled() => Err(QuoteError::Cancelled),
        _ => Ok(()),
    }
}

impl PathFinder {
    pub fn new(
        graph: Arc<PoolGraph>,
        reader: Option<Arc<dyn PoolStateReader>>,
        clock: SharedClock,
        settings: &PathFinding,
    ) -> Self {
        Self {
            graph,
            engine: QuoteEngine::new(GasModel::from_settings(settings)),
            cache: RouteCache::new(),
            config: ArcSwap::from_pointee(PathFinderConfig::from_settings(settings)),
            paused: AtomicBool::new(false),
            reader,
            clock,
        }
    }

    pub fn graph(&self) -> &Arc<PoolGraph> {
        &self.graph
    }

    pub fn engine(&self) -> &QuoteEngine {
        &self.engine
    }

    pub fn config(&self) -> PathFinderConfig {
        **self.config.load()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn ensure_running(&self) -> QuoteResult<()> {
        if self.paused.load(Ordering::SeqCst) {
            return Err(QuoteError::Paused);
        }
        Ok(())
    }

    // ---- administration ----

    pub fn set_configuration(&self, cache_timeout_secs: u64, max_slippage_default_bps: u32, use_cache: bool) -> QuoteResult<()> {
        if cache_timeout_secs > MAX_CACHE_TIMEOUT_SECS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "cache timeout {}s exceeds {}s",
                cache_timeout_secs, MAX_CACHE_TIMEOUT_SECS
            )));
        }
        if max_slippage_default_bps > MAX_SLIPPAGE_BPS {
            return Err(QuoteError::InvalidConfiguration(format!(
                "default slippage {}bps exceeds {}bps",
                max_slippage_default_bps, MAX_SLIPPAGE_BPS
            )));
        }
        let current = self.config();
        self.config.store(Arc::new(PathFinderConfig {
            cache_timeout_secs,
            max_slippage_default_bps,
            use_cache,
            ..current
        }));
        if !use_cache {
            self.cache.clear();
        }
        info!(
            "path finder configured: cache_timeout={}s slippage={}bps use_cache={}",
            cache_timeout_secs, max_slippage_default_bps, use_cache
        );
        Ok(())
    }

    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        debug!("route cache cleared ({} entries)", removed);
        removed
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        warn!("path finder paused");
    }

    pub fn unpause(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("path finder unpaused");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    // ---- pool refresh ----

    fn reader(&self) -> QuoteResult<&Arc<dyn PoolStateReader>> {
        self.reader
            .as_ref()
            .ok_or_else(|| QuoteError::Unavailable("no pool state reader configured".into()))
    }

    /// Reads one pool from the chain, upserts it and clears the route cache.
    pub async fn update_pool_info(&self, pool_ref: Address) -> QuoteResult<Pool> {
        let state = self.reader()?.get_pool_state(pool_ref).await?;
        let pool = Pool::from_state(pool_ref, state, self.clock.now());
        self.graph.upsert_pool(pool.clone())?;
        self.cache.clear();
        Ok(pool)
    }

    /// Refreshes every pool concurrently. A failing pool is reported and skipped; the
    /// cache is cleared once if anything changed.
    pub async fn batch_update_pool_info(&self, pool_refs: &[Address]) -> QuoteResult<Vec<PoolUpdateOutcome>> {
        let reader = self.reader()?;
        let reads = futures::future::join_all(
            pool_refs
                .iter()
                .map(|id| async move { (*id, reader.get_pool_state(*id).await) }),
        )
        .await;

        let now = self.clock.now();
        let mut outcomes = Vec::with_capacity(reads.len());
        for (id, read) in reads {
            let result = read.and_then(|state| self.graph.upsert_pool(Pool::from_state(id, state, now)));
            match result {
                Ok(()) => outcomes.push(PoolUpdateOutcome {
                    pool: id,
                    updated: true,
                    error: None,
                }),
                Err(e) => {
                    warn!("pool {:?} refresh failed: {}", id, e);
                    outcomes.push(PoolUpdateOutcome {
                        pool: id,
                        updated: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        if outcomes.iter().any(|o| o.updated) {
            self.cache.clear();
        }
        Ok(outcomes)
    }

    // ---- queries ----

    pub fn find_optimal_path(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        max_slippage_bps: u32,
        cancel: Option<&CancellationToken>,
    ) -> QuoteResult<Path> {
        self.ensure_running()?;
        validate_query(token_in, token_out, amount_in)?;
        if token_in == token_out {
            return Ok(Path::identity(token_in, amount_in));
        }
        check_cancel(cancel)?;

        let started = Instant::now();
        let config = self.config();
        let now = self.clock.now();
        let key = RouteKey::new(token_in, token_out, amount_in);

        if config.use_cache {
            if let Some(path) = self.cached_path(&key, amount_in, max_slippage_bps, now, config.cache_timeout_secs) {
                crate::metrics::record_path_search("cache", started.elapsed(), 0);
                return Ok(path);
            }
        }

        let snapshot = self.graph.snapshot();
        let direct = Self::direct_candidates(&snapshot, token_in, token_out);
        let mut evaluated = direct.len();
        let mut best = self.best_of(&direct, amount_in, max_slippage_bps);

        if best.is_none() {
            let candidates = Self::multi_hop_candidates(&snapshot, token_in, token_out, &config, cancel)?;
            evaluated += candidates.len();
            best = self.best_of(&candidates, amount_in, max_slippage_bps);
        }
        check_cancel(cancel)?;

        let path = match best {
            Some(path) => {
                tracing::debug!(hops = path.hops(), out = ?path.expected_amount_out, "route found");
                if config.use_cache {
                    self.cache.insert(key, path.clone(), now);
                }
                crate::metrics::record_path_search("found", started.elapsed(), evaluated);
                path
            }
            None => {
                crate::metrics::record_path_search("none", started.elapsed(), evaluated);
                Path::invalid(amount_in)
            }
        };
        Ok(path)
    }

    fn cached_path(&self, key: &RouteKey, amount_in: U256, max_slippage_bps: u32, now: u64, ttl: u64) -> Option<Path> {
        let cached = self.cache.get(key, now, ttl)?;
        if cached.path.amount_in == amount_in {
            if cached.path.price_impact_bps <= max_slippage_bps {
                crate::metrics::increment_route_cache_hit("exact");
                return Some(cached.path);
            }
            return None;
        }
        // Same bucket, different amount: reuse the route, refresh the numbers.
        let route = cached.path.route();
        let pools: Option<Vec<Pool>> = route.pools.iter().map(|id| self.graph.get_pool(*id)).collect();
        let quote = self
            .engine
            .quote_path_exact_in(&pools?, &route.tokens, amount_in)
            .ok()?;
        if quote.amount_out.is_zero() || quote.price_impact_bps > max_slippage_bps {
            return None;
        }
        crate::metrics::increment_route_cache_hit("requoted");
        Some(Path::from_quote(&route, &quote))
    }

    fn direct_candidates(snapshot: &GraphSnapshot, token_in: Address, token_out: Address) -> Vec<Candidate> {
        snapshot
            .pools_between(token_in, token_out)
            .into_iter()
            .map(|p| Candidate {
                tokens: vec![token_in, token_out],
                pools: vec![p.clone()],
            })
            .collect()
    }

    /// Simple token paths of 2..=max_hops hops, expanded into every pool combination,
    /// capped at `max_candidates`.
    fn multi_hop_candidates(
        snapshot: &GraphSnapshot,
        token_in: Address,
        token_out: Address,
        config: &PathFinderConfig,
        cancel: Option<&CancellationToken>,
    ) -> QuoteResult<Vec<Candidate>> {
        let max_hops = config.max_hops.min(MAX_QUOTE_HOPS);
        let mut token_paths: Vec<Vec<Address>> = Vec::new();
        let mut queue: VecDeque<Vec<Address>> = VecDeque::new();
        queue.push_back(vec![token_in]);

        'bfs: while let Some(tokens) = queue.pop_front() {
            check_cancel(cancel)?;
            let hops = tokens.len() - 1;
            let last = tokens[tokens.len() - 1];
            let mut seen = HashSet::new();
            for (next, _) in snapshot.neighbors(last) {
                if !seen.insert(*next) || tokens.contains(next) {
                    continue;
                }
                if *next == token_out {
                    if hops >= 1 {
                        let mut found = tokens.clone();
                        found.push(*next);
                        token_paths.push(found);
                        if token_paths.len() >= config.max_candidates {
                            break 'bfs;
                        }
                    }
                } else if hops + 1 < max_hops {
                    let mut extended = tokens.clone();
                    extended.push(*next);
                    queue.push_back(extended);
                }
            }
        }

        let mut candidates = Vec::new();
        for tokens in token_paths {
            let per_hop: Vec<Vec<&Pool>> = tokens
                .windows(2)
                .map(|w| snapshot.pools_between(w[0], w[1]))
                .collect();
            let mut partial: Vec<Vec<Pool>> = vec![Vec::new()];
            for options in per_hop {
                partial = partial
                    .into_iter()
                    .flat_map(|prefix| {
                        options.iter().map(move |p| {
                            let mut next = prefix.clone();
                            next.push((*p).clone());
                            next
                        })
                    })
                    .collect();
            }
            for pools in partial {
                candidates.push(Candidate {
                    tokens: tokens.clone(),
                    pools,
                });
                if candidates.len() >= config.max_candidates {
                    return Ok(candidates);
                }
            }
        }
        Ok(candidates)
    }

    fn quote_all(&self, candidates: &[Candidate], amount_in: U256) -> Vec<Path> {
        candidates
            .par_iter()
            .filter_map(|c| {
                let quote: PathQuote = self.engine.quote_path_exact_in(&c.pools, &c.tokens, amount_in).ok()?;
                if quote.amount_out.is_zero() {
                    return None;
                }
                Some(Path::from_quote(&Route::from_pools(c.tokens.clone(), &c.pools), &quote))
            })
            .collect()
    }

    fn best_of(&self, candidates: &[Candidate], amount_in: U256, max_slippage_bps: u32) -> Option<Path> {
        self.quote_all(candidates, amount_in)
            .into_iter()
            .filter(|p| p.price_impact_bps <= max_slippage_bps)
            .fold(None, |best: Option<Path>, p| match best {
                Some(b) if !p.is_better_than(&b) => Some(b),
                _ => Some(p),
            })
    }

    /// Up to `max_count` distinct routes, best first, within the default slippage bound.
    pub fn find_multiple_paths(&self, token_in: Address, token_out: Address, amount_in: U256, max_count: usize) -> QuoteResult<Vec<Path>> {
        self.ensure_running()?;
        validate_query(token_in, token_out, amount_in)?;
        if token_in == token_out {
            return Ok(vec![Path::identity(token_in, amount_in)]);
        }
        let config = self.config();
        let snapshot = self.graph.snapshot();
        let mut candidates = Self::direct_candidates(&snapshot, token_in, token_out);
        candidates.extend(Self::multi_hop_candidates(&snapshot, token_in, token_out, &config, None)?);

        let mut paths: Vec<Path> = self
            .quote_all(&candidates, amount_in)
            .into_iter()
            .filter(|p| p.price_impact_bps <= config.max_slippage_default_bps)
            .collect();
        paths.sort_by(|a, b| {
            if a.is_better_than(b) {
                std::cmp::Ordering::Less
            } else if b.is_better_than(a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        let mut seen = HashSet::new();
        paths.retain(|p| seen.insert(p.pools.clone()));
        paths.truncate(max_count);
        Ok(paths)
    }

    /// Connectivity within `max_hops`, without quoting.
    pub fn has_path(&self, token_a: Address, token_b: Address, max_hops: usize) -> QuoteResult<bool> {
        self.ensure_running()?;
        if token_a.is_zero() || token_b.is_zero() {
            return Err(QuoteError::InvalidTokens("zero token address".into()));
        }
        if token_a == token_b {
            return Ok(true);
        }
        let mut visited = HashSet::from([token_a]);
        let mut frontier = vec![token_a];
        for _ in 0..max_hops {
            let mut next = Vec::new();
            for token in frontier {
                for neighbor in self.graph.get_connected_tokens(token) {
                    if neighbor == token_b {
                        return Ok(true);
                    }
                    if visited.insert(neighbor) {
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(false)
    }

    /// `(amount_out, price_impact_bps, path)` with the default slippage bound.
    pub fn get_amount_out(&self, token_in: Address, token_out: Address, amount_in: U256) -> QuoteResult<(U256, u32, Path)> {
        let slippage = self.config().max_slippage_default_bps;
        let path = self.find_optimal_path(token_in, token_out, amount_in, slippage, None)?;
        Ok((path.expected_amount_out, path.price_impact_bps, path))
    }

    /// `(amount_in, price_impact_bps, path)`: the input the quote engine charges for
    /// `amount_out` (see [`QuoteEngine::quote_exact_out`]). The route is discovered with `amount_out` as the trial amount and no
    /// slippage bound, then solved in reverse.
    pub fn get_amount_in(&self, token_in: Address, token_out: Address, amount_out: U256) -> QuoteResult<(U256, u32, Path)> {
        self.ensure_running()?;
        validate_query(token_in, token_out, amount_out)?;
        if token_in == token_out {
            return Ok((amount_out, 0, Path::identity(token_in, amount_out)));
        }

        let trial = self.find_optimal_path(token_in, token_out, amount_out, BPS, None)?;
        if !trial.is_valid {
            return Ok((U256::zero(), 0, Path::invalid(U256::zero())));
        }
        let mut best = self.solve_exact_out(&trial.route(), amount_out)?;

        // The trial used output units as input; re-check the route at the solved size.
        if let Some(ref solved) = best {
            let refined = self.find_optimal_path(token_in, token_out, solved.amount_in, BPS, None)?;
            if refined.is_valid && refined.pools != solved.pools {
                if let Some(alt) = self.solve_exact_out(&refined.route(), amount_out)? {
                    if alt.amount_in < solved.amount_in {
                        best = Some(alt);
                    }
                }
            }
        }

        match best {
            Some(path) => Ok((path.amount_in, path.price_impact_bps, path)),
            None => Ok((U256::zero(), 0, Path::invalid(U256::zero()))),
        }
    }

    /// `None` when the route cannot deliver `amount_out`.
    fn solve_exact_out(&self, route: &Route, amount_out: U256) -> QuoteResult<Option<Path>> {
        let pools: Vec<Pool> = route
            .pools
            .iter()
            .map(|id| self.graph.get_pool(*id).ok_or(QuoteError::PoolNotFound(*id)))
            .collect::<QuoteResult<_>>()?;
        match self.engine.quote_path_exact_out(&pools, &route.tokens, amount_out) {
            Ok(quote) => Ok(Some(Path::from_quote(route, &quote))),
            Err(QuoteError::InsufficientLiquidity(pool)) => {
                debug!("route through {:?} cannot deliver {}", pool, amount_out);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
