//! Application error types for calendar-sync
//!
//! This module defines the error taxonomy used by the sync engine.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Scraping errors raised by platform adapters and the page fetcher
///
/// The variants fall in two classes: transient failures that the retry
/// executor absorbs, and critical failures (`Structural`, `ListingUnavailable`)
/// that mean the adapter or the property URL needs a human.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScrapeError {
    /// Attempt did not settle before the per-attempt timeout
    #[error("Attempt timed out")]
    Timeout,

    /// Connection could not be established (proxy or target)
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Upstream answered 429 without a challenge page
    #[error("Rate limited by upstream")]
    RateLimited,

    /// Upstream answered with a server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Any other network failure
    #[error("Network error: {0}")]
    Network(String),

    /// Page layout no longer matches the adapter's expected schema
    #[error("Unexpected page structure: {0}")]
    Structural(String),

    /// Listing page is gone (HTTP 404/410)
    #[error("Listing unavailable: {0}")]
    ListingUnavailable(String),
}

impl ScrapeError {
    /// Whether this error should end the attempt as `CRITICAL_ERROR`
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ScrapeError::Structural(_) | ScrapeError::ListingUnavailable(_)
        )
    }
}

impl From<tokio::time::error::Elapsed> for ScrapeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ScrapeError::Timeout
    }
}

/// Session pool errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    /// No healthy idle identity is available
    #[error("Session pool exhausted")]
    Exhausted,

    /// Lease does not belong to this pool or was already released
    #[error("Unknown lease for identity {0}")]
    UnknownLease(String),

    /// Timed out while waiting for an identity
    #[error("Timed out waiting for a session")]
    Timeout,
}

impl From<tokio::time::error::Elapsed> for PoolError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PoolError::Timeout
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Async connection error
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Sync log state machine errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncStateError {
    /// Transition not allowed by the lifecycle
    #[error("Invalid sync log transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },
}

/// Orchestrator errors surfaced to callers of the run-now entry points
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Property does not exist
    #[error("Property not found: {0}")]
    PropertyNotFound(i64),

    /// Property already has an attempt in flight
    #[error("Property {0} already has a sync in progress")]
    AlreadyRunning(i64),

    /// Engine is shutting down and no longer admits jobs
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Sync loop is not running (handle-based triggers)
    #[error("Sync loop not running")]
    NotRunning,

    /// Storage failure
    #[error("Storage error: {0}")]
    Database(#[from] DbError),

    /// State machine misuse
    #[error("State error: {0}")]
    State(#[from] SyncStateError),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ScrapeError {
    fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Timeout => true,
            ScrapeError::Connection(_) => true,
            ScrapeError::RateLimited => true,
            ScrapeError::ServerError(_) => true,
            ScrapeError::Network(_) => true,

            ScrapeError::Structural(_) => false,
            ScrapeError::ListingUnavailable(_) => false,
        }
    }
}

impl RetryableError for PoolError {
    fn is_retryable(&self) -> bool {
        match self {
            PoolError::Exhausted => true,
            PoolError::Timeout => true,
            PoolError::UnknownLease(_) => false,
        }
    }
}
