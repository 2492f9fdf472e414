//! # Errors
//!
//! Error taxonomy shared by routing, quoting and oracle components.
//!
//! Every failure surfaced by the SDK is a [`QuoteError`]. Variants are grouped into
//! coarse [`ErrorKind`]s so callers can decide handling without matching on every
//! variant. Only [`ErrorKind::Unavailable`] is worth retrying; configuration and
//! registration errors are caller mistakes.
//!
//! "Nothing found" is never an error: path and price queries return results whose
//! `is_valid` flag is `false`, and stale data is flagged rather than thrown.

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Coarse classification of a [`QuoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    LimitExceeded,
    Unavailable,
    EmergencyModeActive,
    InvalidState,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    #[error("Invalid pool: {0}")]
    InvalidPool(String),
    #[error("Invalid tokens: {0}")]
    InvalidTokens(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid oracle source {0:?}")]
    InvalidOracle(Address),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Path has {hops} hops, maximum is {max}")]
    PathTooLong { hops: usize, max: usize },

    #[error("Pool {0:?} not found")]
    PoolNotFound(Address),
    #[error("Pair {0:?}/{1:?} not supported")]
    PairNotSupported(Address, Address),
    #[error("No feed registered for pair {0:?}/{1:?}")]
    FeedNotFound(Address, Address),
    #[error("Oracle source {0:?} not registered")]
    SourceNotRegistered(Address),
    #[error("Batch {0} not found")]
    BatchNotFound(u64),

    #[error("Pair {0:?}/{1:?} already exists")]
    PairAlreadyExists(Address, Address),
    #[error("Feed for pair {0:?}/{1:?} already exists")]
    FeedAlreadyExists(Address, Address),
    #[error("Oracle source {0:?} already registered")]
    SourceAlreadyRegistered(Address),
    #[error("Pair {0:?}/{1:?} already supported")]
    AlreadySupported(Address, Address),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Batch of {size} pairs exceeds maximum of {max}")]
    BatchSizeExceeded { size: usize, max: usize },
    #[error("Update too soon: next update allowed in {remaining_secs}s")]
    UpdateTooSoon { remaining_secs: u64 },
    #[error("Insufficient liquidity in pool {0:?}")]
    InsufficientLiquidity(Address),

    #[error("External source unavailable: {0}")]
    Unavailable(String),
    #[error("External read timed out after {0}ms")]
    Timeout(u64),

    #[error("Emergency mode active")]
    EmergencyModeActive,
    #[error("Emergency cooldown not met: {remaining_secs}s remaining")]
    EmergencyCooldown { remaining_secs: u64 },
    #[error("Paused")]
    Paused,
    #[error("Manager not active")]
    Inactive,
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Caller {caller} lacks role {role}")]
    Unauthorized { caller: String, role: String },
}

impl QuoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuoteError::InvalidPool(_)
            | QuoteError::InvalidTokens(_)
            | QuoteError::InvalidAmount(_)
            | QuoteError::InvalidConfiguration(_)
            | QuoteError::InvalidOracle(_)
            | QuoteError::InvalidPath(_)
            | QuoteError::PathTooLong { .. } => ErrorKind::InvalidInput,
            QuoteError::PoolNotFound(_)
            | QuoteError::PairNotSupported(..)
            | QuoteError::FeedNotFound(..)
            | QuoteError::SourceNotRegistered(_)
            | QuoteError::BatchNotFound(_) => ErrorKind::NotFound,
            QuoteError::PairAlreadyExists(..)
            | QuoteError::FeedAlreadyExists(..)
            | QuoteError::SourceAlreadyRegistered(_)
            | QuoteError::AlreadySupported(..) => ErrorKind::Conflict,
            QuoteError::LimitExceeded(_)
            | QuoteError::BatchSizeExceeded { .. }
            | QuoteError::UpdateTooSoon { .. }
            | QuoteError::InsufficientLiquidity(_) => ErrorKind::LimitExceeded,
            QuoteError::Unavailable(_) | QuoteError::Timeout(_) => ErrorKind::Unavailable,
            QuoteError::EmergencyModeActive => ErrorKind::EmergencyModeActive,
            QuoteError::EmergencyCooldown { .. }
            | QuoteError::Paused
            | QuoteError::Inactive
            | QuoteError::Cancelled => ErrorKind::InvalidState,
            QuoteError::Unauthorized { .. } => ErrorKind::Unauthorized,
        }
    }

    /// Only transient collaborator failures are retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

pub type QuoteResult<T> = Result<T, QuoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_errors_share_kind() {
        let batch = QuoteError::BatchSizeExceeded { size: 51, max: 50 };
        assert_eq!(batch.kind(), ErrorKind::LimitExceeded);
        assert_eq!(QuoteError::UpdateTooSoon { remaining_secs: 3 }.kind(), ErrorKind::LimitExceeded);
        assert!(!batch.is_retryable());
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(QuoteError::Timeout(15_000).is_retryable());
        assert!(QuoteError::Unavailable("rpc down".into()).is_retryable());
        assert!(!QuoteError::InvalidConfiguration("x".into()).is_retryable());
        assert!(!QuoteError::EmergencyModeActive.is_retryable());
    }
}
