//! Sync attempt records
//!
//! A `SyncLog` row tracks one attempt through
//! `pending -> started -> {success | error | critical_error | cancelled}`.
//! `pending -> cancelled` covers jobs dropped during shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Platform;

/// Lifecycle status of a sync attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Enqueued, not yet picked up
    #[default]
    Pending,
    /// A worker is running the attempt
    Started,
    /// Calendar fetched and written
    Success,
    /// Transient failure or anti-bot challenge
    Error,
    /// Adapter or listing needs an operator
    CriticalError,
    /// Never ran to completion (no session, shutdown)
    Cancelled,
}

impl SyncStatus {
    /// Terminal states are final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Success
                | SyncStatus::Error
                | SyncStatus::CriticalError
                | SyncStatus::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        match (self, next) {
            (SyncStatus::Pending, SyncStatus::Started) => true,
            (SyncStatus::Pending, SyncStatus::Cancelled) => true,
            (SyncStatus::Started, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Stable tag used in storage and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Started => "started",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::CriticalError => "critical_error",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "started" => Ok(SyncStatus::Started),
            "success" => Ok(SyncStatus::Success),
            "error" => Ok(SyncStatus::Error),
            "critical_error" => Ok(SyncStatus::CriticalError),
            "cancelled" => Ok(SyncStatus::Cancelled),
            _ => Err(format!("Invalid sync status: {}", s)),
        }
    }
}

/// One sync attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLog {
    /// Row ID (0 until inserted)
    pub id: i64,

    /// Property being synced
    pub property_id: i64,

    /// Platform of the property
    pub platform: Platform,

    /// Current status
    pub status: SyncStatus,

    /// Outcome detail
    pub message: Option<String>,

    /// Rows written on success
    pub availabilities_updated: u64,

    /// Whether an anti-bot challenge was hit
    pub captcha_encountered: bool,

    /// Wall time from start to terminal state
    pub execution_time_ms: u64,

    /// Enqueue time
    pub created_at: DateTime<Utc>,

    /// Set only on the terminal transition
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncLog {
    /// Create a pending log for a property
    pub fn pending(property_id: i64, platform: Platform, created_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            property_id,
            platform,
            status: SyncStatus::Pending,
            message: None,
            availabilities_updated: 0,
            captcha_encountered: false,
            execution_time_ms: 0,
            created_at,
            completed_at: None,
        }
    }
}

/// Operator-visible marker that suppresses automatic scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFlag {
    /// Flagged property
    pub property_id: i64,

    /// Failure message of the critical attempt
    pub reason: String,

    /// The attempt that raised the flag
    pub sync_log_id: i64,

    /// When the flag was raised
    pub flagged_at: DateTime<Utc>,
}
