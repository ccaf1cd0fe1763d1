//! Platform scraper trait definition
//!
//! This module defines the `PlatformScraper` trait that every marketplace
//! adapter implements, and the registry that dispatches on [`Platform`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ScrapeError;
use crate::models::{AvailabilityRow, Platform};
use crate::session::SessionLease;

/// Result of one calendar fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    /// Extracted days, one per date
    pub rows: Vec<AvailabilityRow>,

    /// Whether an anti-bot challenge cut the fetch short
    pub captcha_encountered: bool,
}

impl FetchOutcome {
    /// Successful extraction
    pub fn rows(rows: Vec<AvailabilityRow>) -> Self {
        Self {
            rows,
            captcha_encountered: false,
        }
    }

    /// Challenge page hit; no rows
    pub fn challenged() -> Self {
        Self {
            rows: Vec::new(),
            captcha_encountered: true,
        }
    }
}

/// Marketplace adapter
///
/// Implementations classify their own failures: `Structural` when the page
/// no longer matches the expected layout, transient variants otherwise.
#[async_trait]
pub trait PlatformScraper: Send + Sync {
    /// Marketplace handled by this adapter
    fn platform(&self) -> Platform;

    /// Fetch and parse the availability calendar of one listing
    async fn fetch_availability(
        &self,
        lease: &SessionLease,
        property_url: &str,
    ) -> Result<FetchOutcome, ScrapeError>;
}

/// Adapters keyed by platform
#[derive(Clone, Default)]
pub struct ScraperRegistry {
    scrapers: HashMap<Platform, Arc<dyn PlatformScraper>>,
}

impl ScraperRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own platform, replacing any previous one
    pub fn register(&mut self, scraper: Arc<dyn PlatformScraper>) {
        self.scrapers.insert(scraper.platform(), scraper);
    }

    /// Builder-style register
    pub fn with(mut self, scraper: Arc<dyn PlatformScraper>) -> Self {
        self.register(scraper);
        self
    }

    /// Adapter for a platform
    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformScraper>> {
        self.scrapers.get(&platform).cloned()
    }

    /// Registered platforms, sorted
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.scrapers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullScraper(Platform);

    #[async_trait]
    impl PlatformScraper for NullScraper {
        fn platform(&self) -> Platform {
            self.0
        }

        async fn fetch_availability(
            &self,
            _lease: &SessionLease,
            _property_url: &str,
        ) -> Result<FetchOutcome, ScrapeError> {
            Ok(FetchOutcome::default())
        }
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = ScraperRegistry::new()
            .with(Arc::new(NullScraper(Platform::Vrbo)))
            .with(Arc::new(NullScraper(Platform::Airbnb)));

        assert_eq!(registry.platforms(), vec![Platform::Airbnb, Platform::Vrbo]);
        assert_eq!(
            registry.get(Platform::Vrbo).unwrap().platform(),
            Platform::Vrbo
        );
        assert!(registry.get(Platform::Booking).is_none());
    }

    #[test]
    fn test_fetch_outcome_constructors() {
        let challenged = FetchOutcome::challenged();
        assert!(challenged.captcha_encountered);
        assert!(challenged.rows.is_empty());

        let ok = FetchOutcome::rows(vec![]);
        assert!(!ok.captcha_encountered);
    }
}
