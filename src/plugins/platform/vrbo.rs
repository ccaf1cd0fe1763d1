//! Vrbo adapter
//!
//! Vrbo renders its calendar server-side; the day list ships inside the
//! `__NEXT_DATA__` hydration script of the listing page.

use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ScrapeError;
use crate::models::{dedup_rows, AvailabilityRow, Platform};
use crate::session::SessionLease;

use super::challenge::{screen, Screened};
use super::fetcher::{ContentKind, PageFetcher};
use super::pacer::RequestPacer;
use super::traits::{FetchOutcome, PlatformScraper};
use super::{json_at, json_nights, json_number, parse_calendar_date, selector};

const DAYS_PATH: &[&str] = &["props", "pageProps", "availability", "days"];

/// Vrbo calendar scraper
pub struct VrboScraper {
    fetcher: Arc<dyn PageFetcher>,
    pacer: Arc<RequestPacer>,
}

impl VrboScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>, pacer: Arc<RequestPacer>) -> Self {
        Self { fetcher, pacer }
    }
}

#[async_trait]
impl PlatformScraper for VrboScraper {
    fn platform(&self) -> Platform {
        Platform::Vrbo
    }

    async fn fetch_availability(
        &self,
        lease: &SessionLease,
        property_url: &str,
    ) -> Result<FetchOutcome, ScrapeError> {
        self.pacer.pause().await;
        let page = self
            .fetcher
            .fetch(lease, property_url, ContentKind::Html)
            .await?;

        let page = match screen(page)? {
            Screened::Page(page) => page,
            Screened::Challenge(marker) => {
                warn!(url = property_url, marker = marker, "Challenge on Vrbo listing page");
                return Ok(FetchOutcome::challenged());
            }
        };

        let rows = parse_calendar(&page.body)?;
        debug!(url = property_url, rows = rows.len(), "Parsed Vrbo calendar");
        Ok(FetchOutcome::rows(rows))
    }
}

/// Parse the listing page's embedded calendar
pub fn parse_calendar(html: &str) -> Result<Vec<AvailabilityRow>, ScrapeError> {
    let raw = {
        let document = Html::parse_document(html);
        let script = selector("script#__NEXT_DATA__")?;
        let element = document.select(&script).next().ok_or_else(|| {
            ScrapeError::Structural("missing __NEXT_DATA__ script".to_string())
        })?;
        element.text().collect::<String>()
    };

    let json: Value = serde_json::from_str(&raw)
        .map_err(|e| ScrapeError::Structural(format!("__NEXT_DATA__ is not JSON: {}", e)))?;

    let days = json_at(&json, DAYS_PATH)
        .and_then(Value::as_array)
        .ok_or_else(|| ScrapeError::Structural(format!("missing {}", DAYS_PATH.join("."))))?;

    let mut rows = Vec::with_capacity(days.len());
    for day in days {
        let date = day
            .get("date")
            .and_then(Value::as_str)
            .ok_or_else(|| ScrapeError::Structural("day without date".to_string()))?;

        let is_available = match day.get("status").and_then(Value::as_str) {
            Some("AVAILABLE") => true,
            Some("UNAVAILABLE") => false,
            other => {
                return Err(ScrapeError::Structural(format!(
                    "unknown status {:?} for {}",
                    other, date
                )))
            }
        };

        rows.push(AvailabilityRow {
            date: parse_calendar_date(date)?,
            is_available,
            price: json_number(day.get("nightlyRate")),
            currency: day
                .get("currency")
                .and_then(Value::as_str)
                .map(str::to_string),
            minimum_stay: json_nights(day.get("minStay")),
        });
    }

    if rows.is_empty() {
        return Err(ScrapeError::Structural(
            "calendar contains no days".to_string(),
        ));
    }

    Ok(dedup_rows(rows))
}
