//! # MIG Quote SDK
//!
//! Off-chain multi-hop swap routing, exact-in/exact-out quoting and oracle price
//! aggregation over EVM concentrated-liquidity pools.
//!
//! ## Overview
//!
//! The SDK keeps a token graph of known pools, searches and ranks routes through it,
//! quotes them with 512-bit intermediate arithmetic, and combines TWAP and external feed
//! prices into confidence-scored aggregated prices. The chain is only ever read, through
//! the traits in [`chain_reader`].
//!
//! ## Architecture
//!
//! ### Routing Layer
//! [`pool_graph::PoolGraph`] holds pools and adjacency; [`path_finder::PathFinder`] runs
//! the direct-then-BFS search with a TTL route cache; [`quoter::QuoteEngine`] does the
//! per-hop and per-path math.
//!
//! ### Price Layer
//! [`price_feeds`] adapts TWAP observations and external aggregator feeds to one
//! [`price_feeds::PriceSource`] trait; [`price_aggregator::PriceAggregator`] weighs them
//! per pair and [`oracle_manager::OracleManager`] schedules updates, checks source health
//! and owns emergency mode.
//!
//! ### Service Layer
//! [`service::QuoteService`] exposes everything as JSON requests with role checks in
//! front of every mutation.

// Core Types
/// Pool snapshot and raw on-chain state
pub mod pools;
/// Fixed-point helpers and unit conversions
pub mod types;
/// Error taxonomy
pub mod errors;

// Routing
/// Token adjacency graph
pub mod pool_graph;
/// Route search and ranking
pub mod path_finder;
/// Exact-in / exact-out quoting
pub mod quoter;
/// Routing primitives (Route, Path)
pub mod router;
/// TTL route cache
pub mod route_cache;
/// Uniswap V3 math utilities
pub mod v3_math;

// Prices
/// TWAP and external feed price sources
pub mod price_feeds;
/// Weighted multi-source price aggregation
pub mod price_aggregator;
/// Source registry, health checks, scheduling and emergency mode
pub mod oracle_manager;

// Infrastructure
/// Chain read interfaces and implementations
pub mod chain_reader;
/// Smart contract ABIs (read-only)
pub mod contracts;
/// Role-based authorization
pub mod auth;
/// Time source
pub mod clock;
/// Metrics and observability
pub mod metrics;
/// General utilities
pub mod utils;

// Service
/// Request/response facade
pub mod service;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use errors::{ErrorKind, QuoteError, QuoteResult};
pub use oracle_manager::OracleManager;
pub use path_finder::PathFinder;
pub use pool_graph::PoolGraph;
pub use pools::Pool;
pub use price_aggregator::PriceAggregator;
pub use quoter::QuoteEngine;
pub use router::Path;
pub use service::QuoteService;
pub use settings::Settings;
