//! Storage contract for calendar-sync
//!
//! The engine reads properties and writes availability, sync logs and flags
//! through the [`Database`] trait. [`SqliteDatabase`] is the bundled
//! implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{Availability, AvailabilityRow, Platform, Property, SyncFlag, SyncLog};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the engine.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Property operations
    // =========================================================================

    /// Insert or replace a property
    async fn upsert_property(&self, property: &Property) -> Result<(), DbError>;

    /// Get a property by ID
    async fn get_property(&self, id: i64) -> Result<Option<Property>, DbError>;

    /// List all properties
    async fn list_properties(&self) -> Result<Vec<Property>, DbError>;

    /// Active properties without an open sync flag
    ///
    /// Frequency filtering is left to the caller, which owns the clock.
    async fn get_schedulable_properties(&self) -> Result<Vec<Property>, DbError>;

    /// Advance a property's last successful sync time
    async fn update_last_synced(&self, id: i64, at: DateTime<Utc>) -> Result<(), DbError>;

    // =========================================================================
    // Availability operations
    // =========================================================================

    /// Upsert rows for a property in one transaction
    ///
    /// Returns the number of rows written. Rows for dates not in `rows` are
    /// left untouched.
    async fn upsert_availability(
        &self,
        property_id: i64,
        source: Platform,
        rows: &[AvailabilityRow],
        now: DateTime<Utc>,
    ) -> Result<u64, DbError>;

    /// All stored rows for a property, ordered by date
    async fn get_availability(&self, property_id: i64) -> Result<Vec<Availability>, DbError>;

    /// Number of stored rows for a property
    async fn count_availability(&self, property_id: i64) -> Result<u64, DbError>;

    // =========================================================================
    // Sync log operations
    // =========================================================================

    /// Insert a sync log, returning its ID
    async fn insert_sync_log(&self, log: &SyncLog) -> Result<i64, DbError>;

    /// Persist a status transition
    ///
    /// Fails with `ConstraintViolation` when the stored row is terminal or the
    /// transition is not allowed by the lifecycle.
    async fn update_sync_log(&self, log: &SyncLog) -> Result<(), DbError>;

    /// Get a sync log by ID
    async fn get_sync_log(&self, id: i64) -> Result<Option<SyncLog>, DbError>;

    /// Newest-first sync logs, optionally for one property
    async fn list_sync_logs(
        &self,
        property_id: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SyncLog>, DbError>;

    /// Total count of sync logs, optionally for one property
    async fn count_sync_logs(&self, property_id: Option<i64>) -> Result<u64, DbError>;

    /// Close every `pending` or `started` log as `cancelled`
    ///
    /// Used at startup for attempts a previous process never finished.
    /// Returns the number of rows closed.
    async fn cancel_unfinished_sync_logs(
        &self,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, DbError>;

    // =========================================================================
    // Sync flag operations
    // =========================================================================

    /// Raise (or replace) the flag for a property
    async fn set_flag(&self, flag: &SyncFlag) -> Result<(), DbError>;

    /// Get the flag for a property
    async fn get_flag(&self, property_id: i64) -> Result<Option<SyncFlag>, DbError>;

    /// List all open flags
    async fn list_flags(&self) -> Result<Vec<SyncFlag>, DbError>;

    /// Clear a property's flag, returning whether one existed
    async fn clear_flag(&self, property_id: i64) -> Result<bool, DbError>;
}
