use std::future::Future;

use crate::error::CrawlError;
use crate::identity::Identity;

/// Outgoing request headers, usually derived from a crawl identity.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    /// Ask for an AJAX-flavored JSON response (hidden-API probing).
    pub ajax: bool,
}

impl RequestHeaders {
    /// Headers carrying an identity's user-agent and locale.
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            user_agent: Some(identity.user_agent.clone()),
            accept_language: Some(identity.accept_language.clone()),
            ajax: false,
        }
    }

    /// Anonymous JSON probe (`X-Requested-With` + `Accept: application/json`).
    pub fn ajax_probe() -> Self {
        Self {
            ajax: true,
            ..Self::default()
        }
    }
}

/// A fetched response body plus the HTTP status it arrived with.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub status: u16,
}

/// Fetches raw content from a URL.
///
/// Implementations return `CrawlError::Http` for non-success statuses so
/// callers can distinguish transient failures from block detection, which
/// happens above this seam.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        headers: &RequestHeaders,
    ) -> impl Future<Output = Result<FetchedPage, CrawlError>> + Send;
}
