//! Anti-bot challenge detection
//!
//! Every fetched page passes through [`screen`] before an adapter parses it.

use super::fetcher::Page;
use crate::error::ScrapeError;

/// Body markers of known challenge pages (matched case-insensitively)
pub const CHALLENGE_MARKERS: &[&str] = &[
    "/cdn-cgi/challenge-platform/",
    "cf-chl-",
    "cf-browser-verification",
    "challenge-form",
    "g-recaptcha",
    "h-captcha",
    "px-captcha",
    "_incapsula_resource",
    "captcha-delivery.com",
    "geo.captcha-delivery",
    "please verify you are a human",
    "press & hold to confirm you are",
    "access to this page has been denied",
    "are you a robot",
];

/// Page after challenge screening
#[derive(Debug, Clone, PartialEq)]
pub enum Screened {
    /// Usable page
    Page(Page),
    /// Challenge detected; carries the marker that matched
    Challenge(&'static str),
}

/// Find the first challenge marker in a body
pub fn find_marker(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    CHALLENGE_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}

/// Classify a fetched page
///
/// Challenge markers win over the status code. Without markers, 429 is a
/// transient rate limit and 403 a transient block.
pub fn screen(page: Page) -> Result<Screened, ScrapeError> {
    if let Some(marker) = find_marker(&page.body) {
        return Ok(Screened::Challenge(marker));
    }
    match page.status {
        200..=299 => Ok(Screened::Page(page)),
        429 => Err(ScrapeError::RateLimited),
        403 => Err(ScrapeError::Network(format!("HTTP 403 for {}", page.url))),
        status => Err(ScrapeError::Network(format!(
            "unexpected HTTP {} for {}",
            status, page.url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_page_passes() {
        let page = Page::new("https://x.test", 200, "<html><body>calendar</body></html>");
        assert_eq!(screen(page.clone()).unwrap(), Screened::Page(page));
    }

    #[test]
    fn test_marker_on_200_is_challenge() {
        let page = Page::new(
            "https://x.test",
            200,
            r#"<div class="g-recaptcha" data-sitekey="x"></div>"#,
        );
        assert_eq!(screen(page).unwrap(), Screened::Challenge("g-recaptcha"));
    }

    #[test]
    fn test_marker_on_403_is_challenge() {
        let page = Page::new(
            "https://x.test",
            403,
            r#"<script src="/cdn-cgi/challenge-platform/h/b/orchestrate/jsch/v1"></script>"#,
        );
        assert!(matches!(screen(page).unwrap(), Screened::Challenge(_)));
    }

    #[test]
    fn test_markers_are_case_insensitive() {
        assert_eq!(
            find_marker("<h1>Please Verify You Are A Human</h1>"),
            Some("please verify you are a human")
        );
    }

    #[test]
    fn test_429_without_marker_is_rate_limit() {
        let page = Page::new("https://x.test", 429, "slow down");
        assert_eq!(screen(page).unwrap_err(), ScrapeError::RateLimited);
    }

    #[test]
    fn test_403_without_marker_is_transient() {
        let page = Page::new("https://x.test", 403, "forbidden");
        let err = screen(page).unwrap_err();
        assert!(matches!(err, ScrapeError::Network(_)));
    }
}
