//! Availability models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Platform;

/// One calendar day as extracted by a platform adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRow {
    /// Calendar date
    pub date: NaiveDate,

    /// Whether the night is bookable
    pub is_available: bool,

    /// Nightly price
    pub price: Option<f64>,

    /// ISO 4217 currency code
    pub currency: Option<String>,

    /// Minimum stay in nights
    pub minimum_stay: Option<u32>,
}

impl AvailabilityRow {
    /// Create a row with only the availability bit set
    pub fn new(date: NaiveDate, is_available: bool) -> Self {
        Self {
            date,
            is_available,
            price: None,
            currency: None,
            minimum_stay: None,
        }
    }

    /// Set price and currency
    pub fn with_price(mut self, price: f64, currency: impl Into<String>) -> Self {
        self.price = Some(price);
        self.currency = Some(currency.into());
        self
    }

    /// Set minimum stay
    pub fn with_minimum_stay(mut self, nights: u32) -> Self {
        self.minimum_stay = Some(nights);
        self
    }
}

/// Stored availability, keyed by `(property_id, date)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    /// Property ID
    pub property_id: i64,

    /// Calendar date
    pub date: NaiveDate,

    /// Whether the night is bookable
    pub is_available: bool,

    /// Platform that produced the latest write
    pub source: Platform,

    /// Nightly price
    pub price: Option<f64>,

    /// ISO 4217 currency code
    pub currency: Option<String>,

    /// Minimum stay in nights
    pub minimum_stay: Option<u32>,

    /// Time of the latest write; strictly increasing per row
    pub last_updated: DateTime<Utc>,
}

impl Availability {
    /// Same calendar facts, ignoring `last_updated`
    pub fn same_content(&self, other: &Availability) -> bool {
        self.property_id == other.property_id
            && self.date == other.date
            && self.is_available == other.is_available
            && self.source == other.source
            && self.price == other.price
            && self.currency == other.currency
            && self.minimum_stay == other.minimum_stay
    }
}

/// Collapse duplicate dates, keeping the last occurrence, and sort by date
pub fn dedup_rows(rows: Vec<AvailabilityRow>) -> Vec<AvailabilityRow> {
    let mut by_date = std::collections::BTreeMap::new();
    for row in rows {
        by_date.insert(row.date, row);
    }
    by_date.into_values().collect()
}
