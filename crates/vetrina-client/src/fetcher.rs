use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header;
use url::Url;
use vetrina_core::error::CrawlError;
use vetrina_core::traits::{FetchedPage, Fetcher, RequestHeaders};

/// HTTP fetcher using reqwest.
///
/// Identity attributes (user-agent, locale) are applied per request, so one
/// client instance serves every identity in the pool. SSRF protection is
/// **enabled** by default: requests resolving to private/reserved IP ranges
/// are rejected, since crawl targets are user-supplied. Use
/// [`allow_private_urls`](Self::allow_private_urls) for local testing.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, CrawlError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent("Vetrina/0.2 (catalog extractor)")
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, headers: &RequestHeaders) -> Result<FetchedPage, CrawlError> {
        if self.ssrf_protection {
            reject_private_targets(url).await?;
        }

        let mut request = self.client.get(url);
        if let Some(user_agent) = &headers.user_agent {
            request = request.header(header::USER_AGENT, user_agent);
        }
        if let Some(accept_language) = &headers.accept_language {
            request = request.header(header::ACCEPT_LANGUAGE, accept_language);
        }
        if headers.ajax {
            request = request
                .header("X-Requested-With", "XMLHttpRequest")
                .header(header::ACCEPT, "application/json");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::RequestTimeout(self.timeout_secs)
            } else {
                CrawlError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Network(format!("failed to read response body: {e}")))?;

        Ok(FetchedPage {
            body,
            status: status.as_u16(),
        })
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Reject URLs whose scheme is not http(s) or whose host resolves to a
/// private/reserved address.
async fn reject_private_targets(url: &str) -> Result<(), CrawlError> {
    let parsed = Url::parse(url).map_err(|e| CrawlError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(CrawlError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{scheme}'"),
            });
        }
    }

    let host = parsed.host_str().ok_or_else(|| CrawlError::InvalidUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;

    // IP literal: check directly without DNS.
    if let Ok(ip) = host.parse::<IpAddr>() {
        return if is_private_ip(ip) {
            Err(ssrf_blocked(host, ip))
        } else {
            Ok(())
        };
    }

    let port = parsed
        .port_or_known_default()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    let addrs: Vec<_> = tokio::net::lookup_host(format!("{host}:{port}"))
        .await
        .map_err(|e| CrawlError::Network(format!("DNS resolution failed for {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(CrawlError::Network(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for addr in &addrs {
        if is_private_ip(addr.ip()) {
            return Err(ssrf_blocked(host, addr.ip()));
        }
    }
    Ok(())
}

fn ssrf_blocked(host: &str, ip: IpAddr) -> CrawlError {
    CrawlError::Network(format!("SSRF blocked: {host} resolves to private/reserved IP {ip}"))
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // includes cloud metadata 169.254.169.254
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // CGN
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // link-local
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // unique local
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_flagged() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["::1", "::", "fe80::1", "fc00::1", "::ffff:127.0.0.1"] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn public_addresses_pass() {
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("1.1.1.1".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn rejects_private_ip_literals() {
        let err = reject_private_targets("http://127.0.0.1/admin").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));

        let err = reject_private_targets("http://169.254.169.254/latest/meta-data/")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let err = reject_private_targets("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, CrawlError::InvalidUrl { .. }));
    }
}
