//! Identity-paced page fetching with anti-bot block detection.
//!
//! A [`PacedFetcher`] is owned by one worker for one fetch chain: it sends
//! the identity's headers, sleeps a randomized delay before every request,
//! takes a longer randomized pause every N requests, and scans response
//! bodies for block indicators. Sleeps race the crawl's cancellation token,
//! which is the only scheduled yield point besides the request itself.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CrawlError;
use crate::identity::Identity;
use crate::profile::SiteProfile;
use crate::traits::{Fetcher, RequestHeaders};
use crate::util::{head_bytes, rand_range};

/// How much of the response head is scanned for block indicators.
pub const BLOCK_SCAN_BYTES: usize = 5_000;

const BLOCK_INDICATORS: &[&str] = &[
    "access denied",
    "blocked",
    "captcha",
    "recaptcha",
    "cloudflare",
    "rate limit",
    "429",
    "forbidden",
    "suspicious activity",
    "please verify",
];

/// Scan the head of a response body, case-insensitively, for anti-bot
/// block indicators. Returns the first indicator found.
pub fn find_block_indicator(body: &str) -> Option<&'static str> {
    let head = head_bytes(body, BLOCK_SCAN_BYTES).to_lowercase();
    BLOCK_INDICATORS
        .iter()
        .find(|indicator| head.contains(**indicator))
        .copied()
}

/// A single worker's rate-limited view of a [`Fetcher`].
pub struct PacedFetcher<F> {
    inner: F,
    headers: RequestHeaders,
    domain: String,
    request_delay_ms: (u64, u64),
    pause_every: u32,
    pause_ms: (u64, u64),
    requests: u32,
    cancel: CancellationToken,
}

impl<F: Fetcher> PacedFetcher<F> {
    pub fn new(
        inner: F,
        identity: &Identity,
        profile: &SiteProfile,
        domain: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            headers: RequestHeaders::from_identity(identity),
            domain: domain.into(),
            request_delay_ms: profile.request_delay_ms,
            pause_every: profile.max_requests_before_pause,
            pause_ms: profile.pause_ms,
            requests: 0,
            cancel,
        }
    }

    /// Fetch one page body under the profile's pacing rules.
    ///
    /// Returns [`CrawlError::Blocked`] when the body carries block
    /// indicators (the caller must rotate the identity and abort this
    /// chain) and [`CrawlError::Cancelled`] when the crawl budget fires
    /// mid-sleep.
    pub async fn fetch_page(&mut self, url: &str) -> Result<String, CrawlError> {
        let (lo, hi) = self.request_delay_ms;
        self.sleep(rand_range(lo, hi)).await?;

        let page = self.inner.fetch(url, &self.headers).await?;
        self.requests += 1;

        if !(200..300).contains(&page.status) {
            return Err(CrawlError::Http {
                url: url.to_string(),
                status: page.status,
            });
        }

        if let Some(indicator) = find_block_indicator(&page.body) {
            return Err(CrawlError::Blocked {
                domain: self.domain.clone(),
                indicator: indicator.to_string(),
            });
        }

        if self.pause_every > 0 && self.requests % self.pause_every == 0 {
            let (lo, hi) = self.pause_ms;
            let pause = rand_range(lo, hi);
            tracing::debug!(domain = %self.domain, pause_ms = pause, "pausing fetch chain");
            self.sleep(pause).await?;
        }

        Ok(page.body)
    }

    async fn sleep(&self, ms: u64) -> Result<(), CrawlError> {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
            () = self.cancel.cancelled() => Err(CrawlError::Cancelled),
        }
    }
}
