//! Test utilities: mock fetcher and fixture builders.
//!
//! Handwritten mocks for dependency injection in unit tests. The fetcher
//! routes by exact URL so crawl scenarios can stage different pages,
//! records every request for assertions, and uses `Arc<Mutex<_>>` for
//! interior mutability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::CrawlError;
use crate::profile::{SiteKind, SiteProfile};
use crate::traits::{FetchedPage, Fetcher, RequestHeaders};

/// Mock fetcher with per-URL routing.
///
/// Unrouted URLs get the default response (an empty 200 page unless
/// overridden), so workers naturally stop on "layout exhausted".
#[derive(Clone)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<String, Result<FetchedPage, CrawlError>>>>,
    default: Arc<Mutex<Result<FetchedPage, CrawlError>>>,
    /// Every request made: (url, headers).
    pub requests: Arc<Mutex<Vec<(String, RequestHeaders)>>>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn page(body: &str) -> FetchedPage {
    FetchedPage {
        body: body.to_string(),
        status: 200,
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            default: Arc::new(Mutex::new(Ok(page("<html><body></body></html>")))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Change the response for unrouted URLs.
    pub fn with_default_body(self, body: &str) -> Self {
        *self.default.lock().unwrap() = Ok(page(body));
        self
    }

    /// Serve `body` with status 200 for an exact URL.
    pub fn route(self, url: &str, body: &str) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(page(body)));
        self
    }

    /// Fail an exact URL with the given error.
    pub fn route_error(self, url: &str, error: CrawlError) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), Err(error));
        self
    }

    /// Number of requests made so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, headers: &RequestHeaders) -> Result<FetchedPage, CrawlError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.clone()));
        let routes = self.routes.lock().unwrap();
        match routes.get(url) {
            Some(result) => result.clone(),
            None => self.default.lock().unwrap().clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

/// A profile with no pacing at all, for tests that must not sleep.
pub fn instant_profile() -> SiteProfile {
    SiteProfile {
        domain_pattern: "test".to_string(),
        kind: SiteKind::Public,
        request_delay_ms: (0, 0),
        max_requests_before_pause: 0,
        pause_ms: (0, 0),
        selectors: crate::profile::SelectorSet::universal(),
        requires_auth: false,
        needs_js: false,
        max_parallel: 1,
    }
}

/// Render a minimal listing page with one card per (name, price) pair.
/// The markup matches the universal selector fallbacks.
pub fn product_grid(items: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body>");
    for (name, price) in items {
        html.push_str(&format!(
            "<div class=\"product-card\"><h3>{name}</h3><span class=\"price\">{price}</span></div>"
        ));
    }
    html.push_str("</body></html>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_and_falls_back() {
        let fetcher = MockFetcher::new()
            .with_default_body("default")
            .route("https://a.example/x", "routed");

        let routed = fetcher
            .fetch("https://a.example/x", &RequestHeaders::default())
            .await
            .unwrap();
        assert_eq!(routed.body, "routed");

        let fallback = fetcher
            .fetch("https://a.example/y", &RequestHeaders::default())
            .await
            .unwrap();
        assert_eq!(fallback.body, "default");
        assert_eq!(fetcher.request_count(), 2);
    }

    #[test]
    fn product_grid_matches_universal_selectors() {
        let html = product_grid(&[("Leather Tote", "€120"), ("Silk Scarf", "€80")]);
        let records =
            crate::extract::extract_records(&html, &crate::profile::SelectorSet::universal());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Leather Tote");
        assert_eq!(records[1].price, Some(80.0));
    }
}
