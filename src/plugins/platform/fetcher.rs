//! Page fetching through a leased identity
//!
//! [`HttpPageFetcher`] routes every request through the lease's egress proxy
//! and presents the lease's stealth profile as request headers. Clients are
//! cached per session ID so connection reuse never crosses identities.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::error::ScrapeError;
use crate::session::SessionLease;

const MAX_CACHED_CLIENTS: usize = 64;

/// What the caller expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// An HTML document
    Html,
    /// A JSON API response
    Json,
}

impl ContentKind {
    fn accept(&self) -> &'static str {
        match self {
            ContentKind::Html => {
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
            }
            ContentKind::Json => "application/json, text/plain, */*",
        }
    }
}

/// A fetched page
///
/// Only 2xx, 403 and 429 responses reach the caller as a `Page`; other
/// statuses are mapped to [`ScrapeError`] by the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Final URL
    pub url: String,
    /// HTTP status
    pub status: u16,
    /// Decoded body
    pub body: String,
}

impl Page {
    /// Create a page
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }
}

/// Fetches pages on behalf of a lease
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET `url` through the lease's identity
    async fn fetch(
        &self,
        lease: &SessionLease,
        url: &str,
        kind: ContentKind,
    ) -> Result<Page, ScrapeError>;
}

/// reqwest-backed fetcher
#[derive(Debug)]
pub struct HttpPageFetcher {
    request_timeout: Duration,
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpPageFetcher {
    /// Create a fetcher; `request_timeout` bounds a single HTTP exchange
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, lease: &SessionLease) -> Result<Client, ScrapeError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(lease.session_id()) {
            return Ok(client.clone());
        }

        let mut headers = HeaderMap::new();
        if let Some(stealth) = lease.stealth() {
            for (name, value) in stealth.headers() {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }

        let mut builder = Client::builder()
            .timeout(self.request_timeout)
            .default_headers(headers);
        if let Some(proxy_url) = lease.proxy_url() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ScrapeError::Connection(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| ScrapeError::Network(format!("failed to build client: {}", e)))?;

        if clients.len() >= MAX_CACHED_CLIENTS {
            clients.clear();
        }
        clients.insert(lease.session_id().to_string(), client.clone());
        Ok(client)
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        lease: &SessionLease,
        url: &str,
        kind: ContentKind,
    ) -> Result<Page, ScrapeError> {
        let client = self.client_for(lease)?;

        debug!(url = url, session_id = lease.session_id(), "Fetching page");

        let response = client
            .get(url)
            .header(ACCEPT, kind.accept())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let final_url = response.url().to_string();

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                debug!(url = url, status = status.as_u16(), "Listing unavailable");
                Err(ScrapeError::ListingUnavailable(format!(
                    "HTTP {} for {}",
                    status.as_u16(),
                    url
                )))
            }
            status if status.is_server_error() => Err(ScrapeError::ServerError(status.as_u16())),
            status
                if status.is_success()
                    || status == StatusCode::FORBIDDEN
                    || status == StatusCode::TOO_MANY_REQUESTS =>
            {
                let body = response.text().await.map_err(map_reqwest_error)?;
                debug!(url = url, status = status.as_u16(), body_size = body.len(), "Received page");
                Ok(Page::new(final_url, status.as_u16(), body))
            }
            status => Err(ScrapeError::Network(format!(
                "unexpected HTTP {} for {}",
                status.as_u16(),
                url
            ))),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ScrapeError {
    if e.is_timeout() {
        ScrapeError::Timeout
    } else if e.is_connect() {
        ScrapeError::Connection(e.to_string())
    } else {
        ScrapeError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_accept() {
        assert!(ContentKind::Html.accept().starts_with("text/html"));
        assert!(ContentKind::Json.accept().starts_with("application/json"));
    }

    #[test]
    fn test_page_new() {
        let page = Page::new("https://x.test/", 200, "<html></html>");
        assert_eq!(page.status, 200);
        assert_eq!(page.url, "https://x.test/");
    }
}
