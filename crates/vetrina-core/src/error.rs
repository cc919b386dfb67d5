use thiserror::Error;

/// Error taxonomy for the extraction pipeline.
///
/// Element-level parse failures never appear here: the extractor treats an
/// element without a usable name as "skip" and returns `None` instead.
#[derive(Error, Debug, Clone)]
pub enum CrawlError {
    /// Malformed URL or unsupported scheme. Rejected before any network access.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Non-success HTTP status. Retryable with a different identity.
    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    /// Network/connection error.
    #[error("network error: {0}")]
    Network(String),

    /// A single request timed out.
    #[error("request timed out after {0} seconds")]
    RequestTimeout(u64),

    /// Anti-bot block indicators detected in the response body.
    /// The identity that hit this must be rotated out, not retried.
    #[error("blocked on {domain} (matched \"{indicator}\")")]
    Blocked { domain: String, indicator: String },

    /// The crawl's cancellation token fired mid-operation.
    #[error("crawl cancelled")]
    Cancelled,

    /// Zero records after every phase. Terminal.
    #[error("no products found")]
    NoProductsFound,

    /// Wall-clock budget exhausted with nothing to show. Terminal.
    #[error("crawl exceeded wall-clock budget of {budget_secs} seconds")]
    Timeout { budget_secs: u64 },
}

impl CrawlError {
    /// True if retrying with a fresh identity may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CrawlError::Http { .. } | CrawlError::Network(_) | CrawlError::RequestTimeout(_)
        )
    }

    /// True if the current identity was detected and must be rotated.
    pub fn is_block(&self) -> bool {
        matches!(self, CrawlError::Blocked { .. })
    }

    /// True if no recovery strategy applies and the caller must be told.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlError::InvalidUrl { .. }
                | CrawlError::NoProductsFound
                | CrawlError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(
            CrawlError::Http {
                url: "https://example.com".into(),
                status: 503,
            }
            .is_transient()
        );
        assert!(CrawlError::Network("reset".into()).is_transient());
        assert!(CrawlError::RequestTimeout(30).is_transient());
        assert!(
            !CrawlError::Blocked {
                domain: "example.com".into(),
                indicator: "captcha".into(),
            }
            .is_transient()
        );
        assert!(!CrawlError::NoProductsFound.is_transient());
    }

    #[test]
    fn test_block_is_not_retryable_in_place() {
        let err = CrawlError::Blocked {
            domain: "example.com".into(),
            indicator: "access denied".into(),
        };
        assert!(err.is_block());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(CrawlError::NoProductsFound.is_terminal());
        assert!(CrawlError::Timeout { budget_secs: 600 }.is_terminal());
        assert!(
            CrawlError::InvalidUrl {
                url: "ftp://x".into(),
                reason: "unsupported scheme".into(),
            }
            .is_terminal()
        );
        assert!(!CrawlError::Network("reset".into()).is_terminal());
        assert!(!CrawlError::Cancelled.is_terminal());
    }
}
