//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::{CREATE_SCHEMA, SCHEMA_VERSION};
use super::Database;
use crate::error::DbError;
use crate::models::{
    Availability, AvailabilityRow, Platform, Property, SyncFlag, SyncLog, SyncStatus,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SYNC_LOG_COLUMNS: &str = "id, property_id, platform, status, message, availabilities_updated, \
     captcha_encountered, execution_time_ms, created_at, completed_at";

const PROPERTY_COLUMNS: &str =
    "id, site_id, platform, external_url, active, last_synced, sync_frequency_mins";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

/// Result of a guarded sync log update, resolved outside the connection thread
enum LogUpdate {
    Applied,
    Missing,
    Rejected(SyncStatus),
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations unless the file was written by a newer schema
        let found = conn
            .call(|conn| {
                let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
                if version <= SCHEMA_VERSION {
                    conn.execute_batch(CREATE_SCHEMA)?;
                    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
                }
                Ok(version)
            })
            .await?;

        if found > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema version {} is newer than supported version {}",
                found, SCHEMA_VERSION
            )));
        }

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Property operations
    // =========================================================================

    async fn upsert_property(&self, property: &Property) -> Result<(), DbError> {
        let id = property.id;
        let site_id = property.site_id.clone();
        let platform = property.platform.as_str();
        let external_url = property.external_url.clone();
        let active = property.active;
        let last_synced = property.last_synced.map(|dt| dt.to_rfc3339());
        let frequency = property.sync_frequency_mins;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO properties
                    (id, site_id, platform, external_url, active, last_synced, sync_frequency_mins)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        id,
                        site_id,
                        platform,
                        external_url,
                        active,
                        last_synced,
                        frequency
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_property(&self, id: i64) -> Result<Option<Property>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM properties WHERE id = ?1", PROPERTY_COLUMNS);
                let result = conn
                    .query_row(&sql, [id], row_to_property)
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_properties(&self) -> Result<Vec<Property>, DbError> {
        self.conn
            .call(|conn| {
                let sql = format!("SELECT {} FROM properties ORDER BY id", PROPERTY_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let properties = stmt
                    .query_map([], row_to_property)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(properties)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_schedulable_properties(&self) -> Result<Vec<Property>, DbError> {
        self.conn
            .call(|conn| {
                let sql = format!(
                    r#"
                    SELECT {} FROM properties p
                    WHERE p.active = 1
                      AND NOT EXISTS (SELECT 1 FROM sync_flags f WHERE f.property_id = p.id)
                    ORDER BY p.id
                    "#,
                    PROPERTY_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let properties = stmt
                    .query_map([], row_to_property)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(properties)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_last_synced(&self, id: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        let at = at.to_rfc3339();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE properties SET last_synced = ?2 WHERE id = ?1",
                    rusqlite::params![id, at],
                )?;
                Ok(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // Availability operations
    // =========================================================================

    async fn upsert_availability(
        &self,
        property_id: i64,
        source: Platform,
        rows: &[AvailabilityRow],
        now: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let rows = rows.to_vec();
        let source = source.as_str();
        let now_us = now.timestamp_micros();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0u64;
                {
                    // last_updated_us is bumped past the stored value when the clock stalls
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO availability
                        (property_id, date, is_available, source, price, currency, minimum_stay, last_updated_us)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                        ON CONFLICT(property_id, date) DO UPDATE SET
                            is_available = excluded.is_available,
                            source = excluded.source,
                            price = excluded.price,
                            currency = excluded.currency,
                            minimum_stay = excluded.minimum_stay,
                            last_updated_us = MAX(excluded.last_updated_us, availability.last_updated_us + 1)
                        "#,
                    )?;
                    for row in &rows {
                        written += stmt.execute(rusqlite::params![
                            property_id,
                            row.date.format(DATE_FORMAT).to_string(),
                            row.is_available,
                            source,
                            row.price,
                            row.currency,
                            row.minimum_stay,
                            now_us
                        ])? as u64;
                    }
                }
                tx.commit()?;
                Ok(written)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_availability(&self, property_id: i64) -> Result<Vec<Availability>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT property_id, date, is_available, source, price, currency, minimum_stay, last_updated_us
                    FROM availability
                    WHERE property_id = ?1
                    ORDER BY date
                    "#,
                )?;

                let rows = stmt
                    .query_map([property_id], |row| {
                        Ok(Availability {
                            property_id: row.get(0)?,
                            date: parse_date(1, row.get(1)?)?,
                            is_available: row.get(2)?,
                            source: parse_column(3, row.get(3)?)?,
                            price: row.get(4)?,
                            currency: row.get(5)?,
                            minimum_stay: row.get(6)?,
                            last_updated: DateTime::from_timestamp_micros(row.get(7)?)
                                .unwrap_or_default(),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows)
            })
            .await
            .map_err(Into::into)
    }

    async fn count_availability(&self, property_id: i64) -> Result<u64, DbError> {
        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM availability WHERE property_id = ?1",
                    [property_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Sync log operations
    // =========================================================================

    async fn insert_sync_log(&self, log: &SyncLog) -> Result<i64, DbError> {
        let property_id = log.property_id;
        let platform = log.platform.as_str();
        let status = log.status.as_str();
        let message = log.message.clone();
        let updated = log.availabilities_updated as i64;
        let captcha = log.captcha_encountered;
        let execution_ms = log.execution_time_ms as i64;
        let created_at = log.created_at.to_rfc3339();
        let completed_at = log.completed_at.map(|dt| dt.to_rfc3339());

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_logs
                    (property_id, platform, status, message, availabilities_updated,
                     captcha_encountered, execution_time_ms, created_at, completed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    rusqlite::params![
                        property_id,
                        platform,
                        status,
                        message,
                        updated,
                        captcha,
                        execution_ms,
                        created_at,
                        completed_at
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn update_sync_log(&self, log: &SyncLog) -> Result<(), DbError> {
        let id = log.id;
        let next = log.status;
        let message = log.message.clone();
        let updated = log.availabilities_updated as i64;
        let captcha = log.captcha_encountered;
        let execution_ms = log.execution_time_ms as i64;
        let completed_at = log.completed_at.map(|dt| dt.to_rfc3339());

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current: Option<String> = tx
                    .query_row("SELECT status FROM sync_logs WHERE id = ?1", [id], |row| {
                        row.get(0)
                    })
                    .optional()?;

                let current = match current {
                    None => return Ok(LogUpdate::Missing),
                    Some(raw) => parse_column::<SyncStatus>(0, raw)?,
                };
                if !current.can_transition_to(next) {
                    return Ok(LogUpdate::Rejected(current));
                }

                tx.execute(
                    r#"
                    UPDATE sync_logs
                    SET status = ?2, message = ?3, availabilities_updated = ?4,
                        captcha_encountered = ?5, execution_time_ms = ?6, completed_at = ?7
                    WHERE id = ?1
                    "#,
                    rusqlite::params![
                        id,
                        next.as_str(),
                        message,
                        updated,
                        captcha,
                        execution_ms,
                        completed_at
                    ],
                )?;
                tx.commit()?;
                Ok(LogUpdate::Applied)
            })
            .await?;

        match outcome {
            LogUpdate::Applied => Ok(()),
            LogUpdate::Missing => Err(DbError::NotFound),
            LogUpdate::Rejected(current) => Err(DbError::ConstraintViolation(format!(
                "sync log {} cannot move from {} to {}",
                id, current, next
            ))),
        }
    }

    async fn cancel_unfinished_sync_logs(
        &self,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let message = message.to_string();
        let completed_at = at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let closed = conn.execute(
                    r#"
                    UPDATE sync_logs
                    SET status = 'cancelled', message = ?1, completed_at = ?2
                    WHERE status IN ('pending', 'started')
                    "#,
                    rusqlite::params![message, completed_at],
                )?;
                Ok(closed as u64)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_sync_log(&self, id: i64) -> Result<Option<SyncLog>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM sync_logs WHERE id = ?1", SYNC_LOG_COLUMNS);
                let result = conn.query_row(&sql, [id], row_to_sync_log).optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_sync_logs(
        &self,
        property_id: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SyncLog>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    r#"
                    SELECT {} FROM sync_logs
                    WHERE (?1 IS NULL OR property_id = ?1)
                    ORDER BY id DESC
                    LIMIT ?2 OFFSET ?3
                    "#,
                    SYNC_LOG_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let logs = stmt
                    .query_map(rusqlite::params![property_id, limit, offset], row_to_sync_log)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(logs)
            })
            .await
            .map_err(Into::into)
    }

    async fn count_sync_logs(&self, property_id: Option<i64>) -> Result<u64, DbError> {
        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sync_logs WHERE (?1 IS NULL OR property_id = ?1)",
                    [property_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Sync flag operations
    // =========================================================================

    async fn set_flag(&self, flag: &SyncFlag) -> Result<(), DbError> {
        let property_id = flag.property_id;
        let reason = flag.reason.clone();
        let sync_log_id = flag.sync_log_id;
        let flagged_at = flag.flagged_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO sync_flags (property_id, reason, sync_log_id, flagged_at)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    rusqlite::params![property_id, reason, sync_log_id, flagged_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_flag(&self, property_id: i64) -> Result<Option<SyncFlag>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        "SELECT property_id, reason, sync_log_id, flagged_at FROM sync_flags WHERE property_id = ?1",
                        [property_id],
                        row_to_flag,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_flags(&self) -> Result<Vec<SyncFlag>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT property_id, reason, sync_log_id, flagged_at FROM sync_flags ORDER BY property_id",
                )?;
                let flags = stmt
                    .query_map([], row_to_flag)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(flags)
            })
            .await
            .map_err(Into::into)
    }

    async fn clear_flag(&self, property_id: i64) -> Result<bool, DbError> {
        self.conn
            .call(move |conn| {
                let count =
                    conn.execute("DELETE FROM sync_flags WHERE property_id = ?1", [property_id])?;
                Ok(count > 0)
            })
            .await
            .map_err(Into::into)
    }
}

fn row_to_property(row: &rusqlite::Row<'_>) -> rusqlite::Result<Property> {
    Ok(Property {
        id: row.get(0)?,
        site_id: row.get(1)?,
        platform: parse_column(2, row.get(2)?)?,
        external_url: row.get(3)?,
        active: row.get(4)?,
        last_synced: parse_datetime(row.get::<_, Option<String>>(5)?),
        sync_frequency_mins: row.get(6)?,
    })
}

fn row_to_sync_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncLog> {
    Ok(SyncLog {
        id: row.get(0)?,
        property_id: row.get(1)?,
        platform: parse_column(2, row.get(2)?)?,
        status: parse_column(3, row.get(3)?)?,
        message: row.get(4)?,
        availabilities_updated: row.get::<_, i64>(5)? as u64,
        captcha_encountered: row.get(6)?,
        execution_time_ms: row.get::<_, i64>(7)? as u64,
        created_at: parse_datetime(row.get::<_, Option<String>>(8)?).unwrap_or_default(),
        completed_at: parse_datetime(row.get::<_, Option<String>>(9)?),
    })
}

fn row_to_flag(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncFlag> {
    Ok(SyncFlag {
        property_id: row.get(0)?,
        reason: row.get(1)?,
        sync_log_id: row.get(2)?,
        flagged_at: parse_datetime(row.get::<_, Option<String>>(3)?).unwrap_or_default(),
    })
}

/// Parse a text column through `FromStr`
fn parse_column<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Parse a `YYYY-MM-DD` column
fn parse_date(idx: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
