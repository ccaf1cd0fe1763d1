//! Property and platform models
//!
//! Properties are owned by the host-management side; the engine only reads
//! them and advances `last_synced`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported booking marketplaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// airbnb.com
    Airbnb,
    /// vrbo.com
    Vrbo,
    /// booking.com
    Booking,
}

impl Platform {
    /// All supported platforms
    pub const ALL: [Platform; 3] = [Platform::Airbnb, Platform::Vrbo, Platform::Booking];

    /// Stable tag used in storage and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Airbnb => "airbnb",
            Platform::Vrbo => "vrbo",
            Platform::Booking => "booking",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "airbnb" => Ok(Platform::Airbnb),
            "vrbo" => Ok(Platform::Vrbo),
            "booking" | "booking.com" | "booking_com" => Ok(Platform::Booking),
            _ => Err(format!("Invalid platform: {}", s)),
        }
    }
}

/// A rental listed on one external marketplace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property ID
    pub id: i64,

    /// Identifier of the host's own site
    pub site_id: String,

    /// Marketplace the calendar lives on
    pub platform: Platform,

    /// Listing URL on the marketplace
    pub external_url: String,

    /// Only active properties are scheduled
    pub active: bool,

    /// Last successful sync (None = never synced)
    pub last_synced: Option<DateTime<Utc>>,

    /// Minimum minutes between automatic syncs
    pub sync_frequency_mins: u32,
}

impl Property {
    /// Create an active, never-synced property
    pub fn new(
        id: i64,
        site_id: impl Into<String>,
        platform: Platform,
        external_url: impl Into<String>,
        sync_frequency_mins: u32,
    ) -> Self {
        Self {
            id,
            site_id: site_id.into(),
            platform,
            external_url: external_url.into(),
            active: true,
            last_synced: None,
            sync_frequency_mins,
        }
    }

    /// Set the last sync time
    pub fn with_last_synced(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced = Some(at);
        self
    }

    /// Set the active flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether the property is eligible for an automatic sync at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.last_synced {
            None => true,
            Some(last) => {
                now - last >= chrono::Duration::minutes(self.sync_frequency_mins as i64)
            }
        }
    }
}
