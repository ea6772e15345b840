//! Marketplace error model.
//!
//! One closed enum for every failure the engine can surface, so call sites
//! match on kinds instead of re-parsing strings. Keep this focused on
//! deterministic, business/domain failures plus the two infrastructure kinds
//! (`StaleVersion`, `Storage`) callers need to distinguish for retries.

use thiserror::Error;

/// Result type used across the marketplace engine.
pub type MarketResult<T> = Result<T, MarketError>;

/// Marketplace error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketError {
    /// Attempted status edge is not in the title state graph.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// Optimistic concurrency conflict. Retryable with fresh state.
    #[error("stale version: {0}")]
    StaleVersion(String),

    /// A concurrent acceptance already put the title into negotiation.
    #[error("title already has an accepted bid")]
    AlreadyNegotiating,

    /// The title is not in a listed state that accepts bids.
    #[error("title is not listed")]
    TitleNotListed,

    /// The title owner attempted to bid on their own title.
    #[error("owner cannot bid on own title")]
    SelfBid,

    /// Auction bid does not beat the current price.
    #[error("bid price too low: {0}")]
    PriceTooLow(String),

    /// Wallet cannot cover the requested amount.
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: u64, required: u64 },

    /// No open reservation exists for the supplied idempotency key.
    #[error("no matching reservation for key '{0}'")]
    NoMatchingReservation(String),

    /// Settlement execution failed; all entities left in a prior valid state.
    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    /// Caller is not the title owner / bid owner.
    #[error("unauthorized")]
    Unauthorized,

    /// A value failed validation (e.g. zero price, malformed id).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested entity does not exist.
    #[error("not found")]
    NotFound,

    /// Internal invariant violated. A bug, never a user-facing condition.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// The backing store failed outside of a concurrency conflict.
    #[error("storage error: {0}")]
    Storage(String),
}

impl MarketError {
    pub fn illegal_transition(msg: impl Into<String>) -> Self {
        Self::IllegalTransition(msg.into())
    }

    pub fn stale_version(msg: impl Into<String>) -> Self {
        Self::StaleVersion(msg.into())
    }

    pub fn price_too_low(msg: impl Into<String>) -> Self {
        Self::PriceTooLow(msg.into())
    }

    pub fn settlement_failed(msg: impl Into<String>) -> Self {
        Self::SettlementFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the caller should retry with freshly loaded state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleVersion(_))
    }
}
