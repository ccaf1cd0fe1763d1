//! Platform adapter integration tests
//!
//! Runs the real adapters over HTTP against wiremock fixtures:
//! - Calendar extraction per platform
//! - Stealth headers on the wire
//! - Status code classification

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use wiremock::matchers::{header_exists, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calendar_sync::clock::ManualClock;
use calendar_sync::config::{ProxyConfig, RequestDelayConfig, StealthConfig};
use calendar_sync::error::ScrapeError;
use calendar_sync::plugins::platform::{
    AirbnbScraper, BookingScraper, HttpPageFetcher, PlatformScraper, RequestPacer, VrboScraper,
};
use calendar_sync::session::{SessionLease, SessionPool};

struct Fixture {
    clock: Arc<ManualClock>,
    fetcher: Arc<HttpPageFetcher>,
    pacer: Arc<RequestPacer>,
    pool: SessionPool,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap(),
        ));
        let pool = SessionPool::new(
            ProxyConfig {
                residential_only: false,
                ..ProxyConfig::default()
            },
            &StealthConfig { enabled: true },
            1,
            clock.clone(),
        );
        Self {
            fetcher: Arc::new(HttpPageFetcher::default()),
            pacer: Arc::new(RequestPacer::with_seed(
                &RequestDelayConfig {
                    min_ms: 1000,
                    max_ms: 5000,
                },
                clock.clone(),
                11,
            )),
            clock,
            pool,
        }
    }

    fn lease(&self) -> SessionLease {
        self.pool.acquire().expect("direct identity available")
    }
}

/// Test 1: Airbnb listing page then calendar JSON
#[tokio::test]
async fn test_airbnb_calendar_over_http() {
    let server = MockServer::start().await;
    let fx = Fixture::new();

    Mock::given(method("GET"))
        .and(path("/rooms/998877"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>listing</html>"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/PdpAvailabilityCalendar"))
        .and(query_param("listingId", "998877"))
        .and(query_param("month", "3"))
        .and(query_param("year", "2024"))
        .and(query_param("count", "12"))
        .and(header_exists("sec-ch-ua-mobile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"merlin": {"pdpAvailabilityCalendar": {"calendarMonths": [
                {"days": [
                    {"calendarDate": "2024-03-15", "available": false, "minNights": 2},
                    {"calendarDate": "2024-03-16", "available": true, "minNights": 2,
                     "price": {"amount": 140, "currency": "USD"}}
                ]}
            ]}}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let scraper = AirbnbScraper::new(fx.fetcher.clone(), fx.pacer.clone(), fx.clock.clone(), 12);
    let outcome = scraper
        .fetch_availability(&fx.lease(), &format!("{}/rooms/998877", server.uri()))
        .await
        .unwrap();

    assert!(!outcome.captcha_encountered);
    assert_eq!(outcome.rows.len(), 2);
    assert!(!outcome.rows[0].is_available);
    assert_eq!(outcome.rows[1].price, Some(140.0));
    assert_eq!(fx.clock.sleeps().len(), 2);
}

/// Test 2: Vrbo hydration data
#[tokio::test]
async fn test_vrbo_calendar_over_http() {
    let server = MockServer::start().await;
    let fx = Fixture::new();

    let data = serde_json::json!({
        "props": {"pageProps": {"availability": {"days": [
            {"date": "2024-04-01", "status": "AVAILABLE", "nightlyRate": "199.00",
             "currency": "USD", "minStay": 4},
            {"date": "2024-04-02", "status": "UNAVAILABLE"}
        ]}}}
    });
    Mock::given(method("GET"))
        .and(path("/3344556ha"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
            data
        )))
        .mount(&server)
        .await;

    let scraper = VrboScraper::new(fx.fetcher.clone(), fx.pacer.clone());
    let outcome = scraper
        .fetch_availability(&fx.lease(), &format!("{}/3344556ha", server.uri()))
        .await
        .unwrap();

    assert_eq!(outcome.rows.len(), 2);
    assert_eq!(outcome.rows[0].price, Some(199.0));
    assert_eq!(outcome.rows[0].minimum_stay, Some(4));
    assert!(!outcome.rows[1].is_available);
}

/// Test 3: Booking.com property page then calendar view
#[tokio::test]
async fn test_booking_calendar_over_http() {
    let server = MockServer::start().await;
    let fx = Fixture::new();

    Mock::given(method("GET"))
        .and(path("/hotel/pt/casa.html"))
        .and(query_param_is_missing("view"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>property</html>"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/hotel/pt/casa.html"))
        .and(query_param("view", "calendar"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table class="bui-calendar__dates" data-currency="EUR"><tbody><tr>
                 <td class="bui-calendar__date" data-date="2024-05-10" data-price="88.5">10</td>
                 <td class="bui-calendar__date bui-calendar__date--disabled" data-date="2024-05-11">11</td>
               </tr></tbody></table>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let scraper = BookingScraper::new(fx.fetcher.clone(), fx.pacer.clone());
    let outcome = scraper
        .fetch_availability(&fx.lease(), &format!("{}/hotel/pt/casa.html", server.uri()))
        .await
        .unwrap();

    assert_eq!(outcome.rows.len(), 2);
    assert_eq!(outcome.rows[0].price, Some(88.5));
    assert_eq!(outcome.rows[0].currency.as_deref(), Some("EUR"));
    assert!(!outcome.rows[1].is_available);
}

/// Test 4: Challenge page behind a 403
#[tokio::test]
async fn test_challenge_over_http() {
    let server = MockServer::start().await;
    let fx = Fixture::new();

    Mock::given(method("GET"))
        .and(path("/5566ha"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            r#"<html><body><div id="px-captcha"></div>Press &amp; Hold to confirm you are a human</body></html>"#,
        ))
        .mount(&server)
        .await;

    let scraper = VrboScraper::new(fx.fetcher.clone(), fx.pacer.clone());
    let outcome = scraper
        .fetch_availability(&fx.lease(), &format!("{}/5566ha", server.uri()))
        .await
        .unwrap();

    assert!(outcome.captcha_encountered);
    assert!(outcome.rows.is_empty());
}

/// Test 5: Status codes map to the error taxonomy
#[tokio::test]
async fn test_status_classification() {
    let server = MockServer::start().await;
    let fx = Fixture::new();

    for (route, status) in [("/gone", 404), ("/removed", 410), ("/down", 503), ("/slow", 429)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
    }

    let scraper = VrboScraper::new(fx.fetcher.clone(), fx.pacer.clone());
    let lease = fx.lease();
    let fetch = |route: &'static str| {
        let url = format!("{}{}", server.uri(), route);
        let scraper = &scraper;
        let lease = &lease;
        async move { scraper.fetch_availability(lease, &url).await.unwrap_err() }
    };

    assert!(matches!(fetch("/gone").await, ScrapeError::ListingUnavailable(_)));
    assert!(matches!(fetch("/removed").await, ScrapeError::ListingUnavailable(_)));
    assert_eq!(fetch("/down").await, ScrapeError::ServerError(503));
    assert_eq!(fetch("/slow").await, ScrapeError::RateLimited);
}

/// Test 6: Connection failures are transient
#[tokio::test]
async fn test_connection_refused_is_transient() {
    let fx = Fixture::new();
    let scraper = VrboScraper::new(fx.fetcher.clone(), fx.pacer.clone());

    let err = scraper
        .fetch_availability(&fx.lease(), "http://127.0.0.1:9/listing")
        .await
        .unwrap_err();
    assert!(!err.is_critical());
}
