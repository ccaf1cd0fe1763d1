//! Booking-platform scraper adapters
//!
//! One adapter per marketplace, dispatched through [`ScraperRegistry`]:
//!
//! - [`airbnb`]: listing page, then the calendar JSON endpoint
//! - [`vrbo`]: calendar embedded in the listing's `__NEXT_DATA__`
//! - [`booking`]: property page, then the HTML calendar view
//!
//! Shared plumbing lives in [`fetcher`] (proxied, disguised HTTP),
//! [`pacer`] (randomized delays) and [`challenge`] (anti-bot detection).

pub mod airbnb;
pub mod booking;
pub mod challenge;
pub mod fetcher;
pub mod pacer;
pub mod traits;
pub mod vrbo;

pub use airbnb::AirbnbScraper;
pub use booking::BookingScraper;
pub use challenge::{screen, Screened};
pub use fetcher::{ContentKind, HttpPageFetcher, Page, PageFetcher};
pub use pacer::RequestPacer;
pub use traits::{FetchOutcome, PlatformScraper, ScraperRegistry};
pub use vrbo::VrboScraper;

use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::PlatformsConfig;
use crate::error::ScrapeError;

impl ScraperRegistry {
    /// Registry with every built-in adapter sharing one fetcher and pacer
    pub fn standard(
        fetcher: Arc<dyn PageFetcher>,
        pacer: Arc<RequestPacer>,
        clock: Arc<dyn Clock>,
        config: &PlatformsConfig,
    ) -> Self {
        ScraperRegistry::new()
            .with(Arc::new(AirbnbScraper::new(
                fetcher.clone(),
                pacer.clone(),
                clock,
                config.airbnb.months,
            )))
            .with(Arc::new(VrboScraper::new(fetcher.clone(), pacer.clone())))
            .with(Arc::new(BookingScraper::new(fetcher, pacer)))
    }
}

/// Walk a JSON object path
pub(crate) fn json_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Parse an ISO calendar date, treating failure as a layout change
pub(crate) fn parse_calendar_date(raw: &str) -> Result<NaiveDate, ScrapeError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ScrapeError::Structural(format!("unparseable calendar date: {:?}", raw)))
}

/// Compile a CSS selector
pub(crate) fn selector(css: &str) -> Result<scraper::Selector, ScrapeError> {
    scraper::Selector::parse(css)
        .map_err(|e| ScrapeError::Structural(format!("invalid selector {}: {:?}", css, e)))
}

/// Read a number that may be encoded as a JSON number or string
pub(crate) fn json_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a night count; values that do not fit a `u32` are dropped
pub(crate) fn json_nights(value: Option<&Value>) -> Option<u32> {
    value?.as_u64().and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned fetcher for adapter tests

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ProxyConfig, RequestDelayConfig, StealthConfig};
    use crate::session::{SessionLease, SessionPool};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Serves the first route whose pattern is contained in the URL
    #[derive(Default)]
    pub struct StubFetcher {
        routes: Vec<(String, Result<Page, ScrapeError>)>,
        pub requests: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        pub fn route(mut self, pattern: &str, status: u16, body: &str) -> Self {
            self.routes.push((
                pattern.to_string(),
                Ok(Page::new(format!("https://stub{}", pattern), status, body)),
            ));
            self
        }

        pub fn fail(mut self, pattern: &str, err: ScrapeError) -> Self {
            self.routes.push((pattern.to_string(), Err(err)));
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(
            &self,
            _lease: &SessionLease,
            url: &str,
            _kind: ContentKind,
        ) -> Result<Page, ScrapeError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.routes
                .iter()
                .find(|(pattern, _)| url.contains(pattern.as_str()))
                .map(|(_, result)| result.clone())
                .unwrap_or_else(|| Err(ScrapeError::ListingUnavailable(url.to_string())))
        }
    }

    pub fn lease() -> SessionLease {
        let pool = SessionPool::new(
            ProxyConfig {
                residential_only: false,
                ..ProxyConfig::default()
            },
            &StealthConfig::default(),
            1,
            Arc::new(ManualClock::new(Utc::now())),
        );
        pool.acquire().unwrap()
    }

    pub fn pacer(clock: Arc<ManualClock>) -> Arc<RequestPacer> {
        Arc::new(RequestPacer::with_seed(
            &RequestDelayConfig {
                min_ms: 1000,
                max_ms: 5000,
            },
            clock,
            7,
        ))
    }
}
