//! # Pool Graph
//!
//! Token adjacency graph derived from registered pools. Every pool is an undirected edge
//! between its two tokens; several pools (fee tiers) may connect the same pair.
//!
//! ## Thread Safety
//!
//! Pools and adjacency live in `DashMap`s, so lookups for one token never wait on writers
//! touching unrelated tokens. Searches take a [`GraphSnapshot`] and run without holding
//! any map guard.

use crate::errors::{QuoteError, QuoteResult};
use crate::pools::Pool;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use log::debug;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub last_update: u64,
}

/// Point-in-time copy of the graph used by path searches.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    /// token -> sorted `(neighbor, pool id)` edges
    pub adjacency: HashMap<Address, Vec<(Address, Address)>>,
    pub pools: HashMap<Address, Pool>,
}

impl GraphSnapshot {
    pub fn neighbors(&self, token: Address) -> &[(Address, Address)] {
        self.adjacency.get(&token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pools connecting `a` and `b`, ordered by fee then id.
    pub fn pools_between(&self, a: Address, b: Address) -> Vec<&Pool> {
        let mut out: Vec<&Pool> = self
            .neighbors(a)
            .iter()
            .filter(|(other, _)| *other == b)
            .filter_map(|(_, id)| self.pools.get(id))
            .collect();
        out.sort_by_key(|p| (p.fee, p.id));
        out
    }
}

pub struct PoolGraph {
    pools: DashMap<Address, Pool>,
    adjacency: DashMap<Address, HashSet<(Address, Address)>>,
    fee_tiers: Vec<u32>,
}

impl PoolGraph {
    pub fn new(fee_tiers: Vec<u32>) -> Self {
        Self {
            pools: DashMap::new(),
            adjacency: DashMap::new(),
            fee_tiers,
        }
    }

    pub fn fee_tiers(&self) -> &[u32] {
        &self.fee_tiers
    }

    /// Inserts or replaces a pool. If the id was registered with other tokens, the stale
    /// edges are dropped first.
    pub fn upsert_pool(&self, pool: Pool) -> QuoteResult<()> {
        pool.validate(&self.fee_tiers)?;

        let previous = self.pools.insert(pool.id, pool.clone());
        if let Some(old) = previous {
            if (old.token_a, old.token_b) != (pool.token_a, pool.token_b) {
                self.unlink(&old);
            }
        }
        self.adjacency
            .entry(pool.token_a)
            .or_default()
            .insert((pool.token_b, pool.id));
        self.adjacency
            .entry(pool.token_b)
            .or_default()
            .insert((pool.token_a, pool.id));

        debug!("pool {:?} upserted ({} pools)", pool.id, self.pools.len());
        crate::metrics::set_pool_count(self.pools.len());
        Ok(())
    }

    fn unlink(&self, pool: &Pool) {
        for (from, to) in [(pool.token_a, pool.token_b), (pool.token_b, pool.token_a)] {
            let now_empty = match self.adjacency.get_mut(&from) {
                Some(mut edges) => {
                    edges.remove(&(to, pool.id));
                    edges.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.adjacency.remove_if(&from, |_, edges| edges.is_empty());
            }
        }
    }

    pub fn remove_pool(&self, id: Address) -> QuoteResult<Pool> {
        let (_, pool) = self.pools.remove(&id).ok_or(QuoteError::PoolNotFound(id))?;
        self.unlink(&pool);
        crate::metrics::set_pool_count(self.pools.len());
        Ok(pool)
    }

    pub fn get_pool(&self, id: Address) -> Option<Pool> {
        self.pools.get(&id).map(|p| p.clone())
    }

    pub fn get_pool_stats(&self, id: Address) -> QuoteResult<PoolStats> {
        let pool = self.pools.get(&id).ok_or(QuoteError::PoolNotFound(id))?;
        Ok(PoolStats {
            liquidity: pool.liquidity,
            sqrt_price_x96: pool.sqrt_price_x96,
            tick: pool.tick,
            last_update: pool.last_update,
        })
    }

    /// All pools trading `a` against `b`, in either orientation.
    pub fn get_pools_for_pair(&self, a: Address, b: Address) -> Vec<Pool> {
        let ids: Vec<Address> = match self.adjacency.get(&a) {
            Some(edges) => edges
                .iter()
                .filter(|(other, _)| *other == b)
                .map(|(_, id)| *id)
                .collect(),
            None => return Vec::new(),
        };
        let mut pools: Vec<Pool> = ids.into_iter().filter_map(|id| self.get_pool(id)).collect();
        pools.sort_by_key(|p| (p.fee, p.id));
        pools
    }

    pub fn get_connected_tokens(&self, token: Address) -> HashSet<Address> {
        self.adjacency
            .get(&token)
            .map(|edges| edges.iter().map(|(other, _)| *other).collect())
            .unwrap_or_default()
    }

    pub fn contains_token(&self, token: Address) -> bool {
        self.adjacency.contains_key(&token)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn token_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn pool_ids(&self) -> Vec<Address> {
        let mut ids: Vec<Address> = self.pools.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let adjacency = self
            .adjacency
            .iter()
            .map(|entry| {
                let mut edges: Vec<(Address, Address)> = entry.value().iter().copied().collect();
                edges.sort();
                (*entry.key(), edges)
            })
            .collect();
        let pools = self
            .pools
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        GraphSnapshot { adjacency, pools }
    }
}

impl Default for PoolGraph {
    fn default() -> Self {
        Self::new(crate::settings::PathFinding::default().fee_tiers)
    }
}
