//! Airbnb adapter
//!
//! Loads the listing page first (so the session looks like a visitor), then
//! asks the calendar endpoint for `months` months starting at the current one.

use async_trait::async_trait;
use chrono::Datelike;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::ScrapeError;
use crate::models::{dedup_rows, AvailabilityRow, Platform};
use crate::session::SessionLease;

use super::challenge::{screen, Screened};
use super::fetcher::{ContentKind, PageFetcher};
use super::pacer::RequestPacer;
use super::traits::{FetchOutcome, PlatformScraper};
use super::{json_at, json_nights, json_number, parse_calendar_date};

const CALENDAR_PATH: &[&str] = &["data", "merlin", "pdpAvailabilityCalendar", "calendarMonths"];

/// Airbnb calendar scraper
pub struct AirbnbScraper {
    fetcher: Arc<dyn PageFetcher>,
    pacer: Arc<RequestPacer>,
    clock: Arc<dyn Clock>,
    months: u32,
}

impl AirbnbScraper {
    /// Create an adapter requesting `months` calendar months per sync
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        pacer: Arc<RequestPacer>,
        clock: Arc<dyn Clock>,
        months: u32,
    ) -> Self {
        Self {
            fetcher,
            pacer,
            clock,
            months: months.max(1),
        }
    }

    fn calendar_url(&self, property_url: &str) -> Result<String, ScrapeError> {
        let id = listing_id(property_url)?;
        let url = reqwest::Url::parse(property_url)
            .map_err(|e| ScrapeError::Structural(format!("invalid listing URL: {}", e)))?;
        let now = self.clock.now();
        Ok(format!(
            "{}/api/v3/PdpAvailabilityCalendar?listingId={}&month={}&year={}&count={}",
            url.origin().ascii_serialization(),
            id,
            now.month(),
            now.year(),
            self.months
        ))
    }
}

#[async_trait]
impl PlatformScraper for AirbnbScraper {
    fn platform(&self) -> Platform {
        Platform::Airbnb
    }

    async fn fetch_availability(
        &self,
        lease: &SessionLease,
        property_url: &str,
    ) -> Result<FetchOutcome, ScrapeError> {
        let calendar_url = self.calendar_url(property_url)?;

        self.pacer.pause().await;
        let listing = self
            .fetcher
            .fetch(lease, property_url, ContentKind::Html)
            .await?;
        if let Screened::Challenge(marker) = screen(listing)? {
            warn!(url = property_url, marker = marker, "Challenge on Airbnb listing page");
            return Ok(FetchOutcome::challenged());
        }

        self.pacer.pause().await;
        let calendar = self
            .fetcher
            .fetch(lease, &calendar_url, ContentKind::Json)
            .await?;
        let calendar = match screen(calendar)? {
            Screened::Page(page) => page,
            Screened::Challenge(marker) => {
                warn!(url = %calendar_url, marker = marker, "Challenge on Airbnb calendar endpoint");
                return Ok(FetchOutcome::challenged());
            }
        };

        let rows = parse_calendar(&calendar.body)?;
        debug!(url = property_url, rows = rows.len(), "Parsed Airbnb calendar");
        Ok(FetchOutcome::rows(rows))
    }
}

/// Extract the numeric listing ID from a `/rooms/{id}` URL
pub fn listing_id(property_url: &str) -> Result<String, ScrapeError> {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"/rooms/(?:plus/)?(\d+)")
            .expect("Invalid regex pattern for Airbnb listing IDs")
    });

    re.captures(property_url)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            ScrapeError::Structural(format!("no Airbnb listing ID in {}", property_url))
        })
}

/// Parse the calendar endpoint's JSON body
pub fn parse_calendar(body: &str) -> Result<Vec<AvailabilityRow>, ScrapeError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| ScrapeError::Structural(format!("calendar is not JSON: {}", e)))?;

    let months = json_at(&json, CALENDAR_PATH)
        .and_then(Value::as_array)
        .ok_or_else(|| ScrapeError::Structural(format!("missing {}", CALENDAR_PATH.join("."))))?;

    let mut rows = Vec::new();
    for month in months {
        let days = month
            .get("days")
            .and_then(Value::as_array)
            .ok_or_else(|| ScrapeError::Structural("calendar month without days".to_string()))?;

        for day in days {
            let date = day
                .get("calendarDate")
                .and_then(Value::as_str)
                .ok_or_else(|| ScrapeError::Structural("day without calendarDate".to_string()))?;
            let available = day
                .get("available")
                .and_then(Value::as_bool)
                .ok_or_else(|| ScrapeError::Structural(format!("day {} without available", date)))?;

            let price = day.get("price");
            rows.push(AvailabilityRow {
                date: parse_calendar_date(date)?,
                is_available: available,
                price: json_number(price.and_then(|p| p.get("amount"))),
                currency: price
                    .and_then(|p| p.get("currency"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                minimum_stay: json_nights(day.get("minNights")),
            });
        }
    }

    if rows.is_empty() {
        return Err(ScrapeError::Structural(
            "calendar contains no days".to_string(),
        ));
    }

    Ok(dedup_rows(rows))
}
