//! Database migrations for calendar-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Properties (written by the host application, read by the engine)
CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY,
    site_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    external_url TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    last_synced DATETIME,
    sync_frequency_mins INTEGER NOT NULL DEFAULT 60
);

CREATE INDEX IF NOT EXISTS idx_properties_active ON properties(active);

-- Availability, one row per property and date
CREATE TABLE IF NOT EXISTS availability (
    property_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    is_available INTEGER NOT NULL,
    source TEXT NOT NULL,
    price REAL,
    currency TEXT,
    minimum_stay INTEGER,
    last_updated_us INTEGER NOT NULL,
    PRIMARY KEY (property_id, date)
);

-- Sync attempts
CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id INTEGER NOT NULL,
    platform TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    message TEXT,
    availabilities_updated INTEGER NOT NULL DEFAULT 0,
    captcha_encountered INTEGER NOT NULL DEFAULT 0,
    execution_time_ms INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME NOT NULL,
    completed_at DATETIME
);

CREATE INDEX IF NOT EXISTS idx_sync_logs_property ON sync_logs(property_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON sync_logs(status);

-- Critical-failure flags, at most one per property
CREATE TABLE IF NOT EXISTS sync_flags (
    property_id INTEGER PRIMARY KEY,
    reason TEXT NOT NULL,
    sync_log_id INTEGER NOT NULL,
    flagged_at DATETIME NOT NULL
);
"#;

/// Schema version recorded in `PRAGMA user_version`
pub const SCHEMA_VERSION: i32 = 1;
