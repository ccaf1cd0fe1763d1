//! Booking.com adapter
//!
//! Visits the property page, then its calendar view, and reads the day cells
//! of the rendered calendar table.

use async_trait::async_trait;
use scraper::Html;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ScrapeError;
use crate::models::{dedup_rows, AvailabilityRow, Platform};
use crate::session::SessionLease;

use super::challenge::{screen, Screened};
use super::fetcher::{ContentKind, PageFetcher};
use super::pacer::RequestPacer;
use super::traits::{FetchOutcome, PlatformScraper};
use super::{parse_calendar_date, selector};

const DISABLED_CLASS: &str = "bui-calendar__date--disabled";

/// Booking.com calendar scraper
pub struct BookingScraper {
    fetcher: Arc<dyn PageFetcher>,
    pacer: Arc<RequestPacer>,
}

impl BookingScraper {
    pub fn new(fetcher: Arc<dyn PageFetcher>, pacer: Arc<RequestPacer>) -> Self {
        Self { fetcher, pacer }
    }

    async fn visit(
        &self,
        lease: &SessionLease,
        url: &str,
    ) -> Result<Option<String>, ScrapeError> {
        self.pacer.pause().await;
        let page = self.fetcher.fetch(lease, url, ContentKind::Html).await?;
        match screen(page)? {
            Screened::Page(page) => Ok(Some(page.body)),
            Screened::Challenge(marker) => {
                warn!(url = url, marker = marker, "Challenge on Booking.com page");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl PlatformScraper for BookingScraper {
    fn platform(&self) -> Platform {
        Platform::Booking
    }

    async fn fetch_availability(
        &self,
        lease: &SessionLease,
        property_url: &str,
    ) -> Result<FetchOutcome, ScrapeError> {
        let calendar_url = calendar_url(property_url)?;

        if self.visit(lease, property_url).await?.is_none() {
            return Ok(FetchOutcome::challenged());
        }
        let Some(body) = self.visit(lease, &calendar_url).await? else {
            return Ok(FetchOutcome::challenged());
        };

        let rows = parse_calendar(&body)?;
        debug!(url = property_url, rows = rows.len(), "Parsed Booking.com calendar");
        Ok(FetchOutcome::rows(rows))
    }
}

/// Calendar view URL of a property page
pub fn calendar_url(property_url: &str) -> Result<String, ScrapeError> {
    let mut url = reqwest::Url::parse(property_url)
        .map_err(|e| ScrapeError::Structural(format!("invalid property URL: {}", e)))?;
    url.query_pairs_mut().append_pair("view", "calendar");
    Ok(url.to_string())
}

/// Parse the calendar table
pub fn parse_calendar(html: &str) -> Result<Vec<AvailabilityRow>, ScrapeError> {
    let document = Html::parse_document(html);
    let table_selector = selector("table.bui-calendar__dates")?;
    let cell_selector = selector("td[data-date]")?;

    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| ScrapeError::Structural("missing calendar table".to_string()))?;
    let currency = table.value().attr("data-currency").map(str::to_string);

    let mut rows = Vec::new();
    for cell in table.select(&cell_selector) {
        let element = cell.value();
        let date = parse_calendar_date(element.attr("data-date").unwrap_or_default())?;
        let disabled = element.classes().any(|class| class == DISABLED_CLASS);

        rows.push(AvailabilityRow {
            date,
            is_available: !disabled,
            price: element
                .attr("data-price")
                .and_then(|raw| raw.trim().parse().ok()),
            currency: currency.clone(),
            minimum_stay: element
                .attr("data-min-stay")
                .and_then(|raw| raw.trim().parse().ok()),
        });
    }

    if rows.is_empty() {
        return Err(ScrapeError::Structural(
            "calendar table has no dated cells".to_string(),
        ));
    }

    Ok(dedup_rows(rows))
}
