//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use calendar_sync::clock::{Clock, ManualClock};
use calendar_sync::config::{Config, ProxyConfig, RetryConfig, StealthConfig};
use calendar_sync::database::{Database, SqliteDatabase};
use calendar_sync::error::ScrapeError;
use calendar_sync::models::{AvailabilityRow, Platform, Property};
use calendar_sync::plugins::platform::{FetchOutcome, PlatformScraper, ScraperRegistry};
use calendar_sync::session::{SessionLease, SessionPool};
use calendar_sync::sync::SyncOrchestrator;

/// Fixed start time for every test clock
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// `n` consecutive available nights starting 2024-07-01
pub fn nights(n: u32) -> Vec<AvailabilityRow> {
    let start = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    (0..n)
        .map(|i| {
            AvailabilityRow::new(start + chrono::Duration::days(i as i64), true)
                .with_price(150.0, "USD")
        })
        .collect()
}

/// Scraper that replays scripted results
///
/// Queued results are served first; afterwards `fallback` repeats. With a
/// gate installed, each call signals `entered` and then waits for a permit.
pub struct ScriptedScraper {
    platform: Platform,
    queue: Mutex<VecDeque<Result<FetchOutcome, ScrapeError>>>,
    fallback: Result<FetchOutcome, ScrapeError>,
    calls: AtomicU32,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
}

impl ScriptedScraper {
    pub fn new(platform: Platform, fallback: Result<FetchOutcome, ScrapeError>) -> Self {
        Self {
            platform,
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU32::new(0),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn rows(platform: Platform, n: u32) -> Self {
        Self::new(platform, Ok(FetchOutcome::rows(nights(n))))
    }

    pub fn then(self, result: Result<FetchOutcome, ScrapeError>) -> Self {
        self.queue.lock().unwrap().push_back(result);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformScraper for ScriptedScraper {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_availability(
        &self,
        _lease: &SessionLease,
        _property_url: &str,
    ) -> Result<FetchOutcome, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.acquire().await.unwrap().forget();
        }
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Config tuned for tests: direct identities, short backoff
pub fn test_config(max_concurrency: usize) -> Config {
    let mut config = Config::default();
    config.proxy = ProxyConfig {
        residential_only: false,
        ..ProxyConfig::default()
    };
    config.scraping.max_concurrency = max_concurrency;
    config.scraping.retry = RetryConfig {
        max_retries: 3,
        attempt_timeout_ms: 5_000,
        initial_backoff_ms: 2_000,
        max_backoff_ms: 30_000,
    };
    config
}

/// Everything an orchestrator test needs
pub struct Harness {
    pub db: Arc<SqliteDatabase>,
    pub clock: Arc<ManualClock>,
    pub pool: Arc<SessionPool>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    /// Build an orchestrator with a single adapter registered
    pub async fn new(config: Config, scraper: Arc<dyn PlatformScraper>) -> Self {
        let db = create_test_database().await;
        let clock = Arc::new(ManualClock::new(epoch()));
        let pool = Arc::new(SessionPool::new(
            config.proxy.clone(),
            &StealthConfig::default(),
            config.scraping.max_concurrency,
            clock.clone(),
        ));

        let registry = ScraperRegistry::new().with(scraper);

        let orchestrator = SyncOrchestrator::new(
            db.clone(),
            pool.clone(),
            registry,
            clock.clone(),
            &config,
            None,
        );

        Self {
            db,
            clock,
            pool,
            orchestrator,
        }
    }

    /// Store a property last synced `minutes_ago` minutes before now
    pub async fn property(
        &self,
        id: i64,
        platform: Platform,
        frequency_mins: u32,
        minutes_ago: Option<i64>,
    ) -> Property {
        let mut property = Property::new(
            id,
            format!("site-{}", id),
            platform,
            format!("https://listing.test/rooms/{}", id),
            frequency_mins,
        );
        if let Some(minutes) = minutes_ago {
            property = property
                .with_last_synced(self.clock.now() - chrono::Duration::minutes(minutes));
        }
        self.db.upsert_property(&property).await.unwrap();
        property
    }
}
