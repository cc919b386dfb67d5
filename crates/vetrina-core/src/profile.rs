//! Per-domain crawl profiles: selectors plus pacing.
//!
//! Resolution order: B2B portal patterns, then known public sites, then
//! partial site-type matches, then a synthesized adaptive profile. Adaptive
//! profiles are cached per domain for the life of the resolver.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::error::CrawlError;

/// Workers a single crawl may run against one domain unless the profile
/// says otherwise.
pub const DEFAULT_MAX_PARALLEL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    Public,
    Marketplace,
    B2bPortal,
    Furniture,
    Adaptive,
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SiteKind::Public => "public",
            SiteKind::Marketplace => "marketplace",
            SiteKind::B2bPortal => "b2b_portal",
            SiteKind::Furniture => "furniture",
            SiteKind::Adaptive => "adaptive",
        };
        write!(f, "{s}")
    }
}

/// Ordered CSS-selector cascades for locating records and their fields.
/// Each list is tried in priority order; first hit wins.
#[derive(Debug, Clone, Serialize)]
pub struct SelectorSet {
    /// Candidate product-container selectors.
    pub containers: Vec<String>,
    pub name: Vec<String>,
    pub price: Vec<String>,
    pub brand: Vec<String>,
    /// Product-page link candidates (href is taken).
    pub link: Vec<String>,
    pub sku: Vec<String>,
    pub sizes: Vec<String>,
    pub quantity: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl SelectorSet {
    /// Field cascades that work across most storefront layouts; container
    /// list left empty for callers that supply their own.
    fn base() -> Self {
        Self {
            containers: Vec::new(),
            name: strings(&[
                "[itemprop=\"name\"]",
                "h1",
                "h2",
                "h3",
                "h4",
                ".product-name",
                ".title",
                "a[href*=\"/product\"]",
                ".pip-header-section__title",
            ]),
            price: strings(&[
                "[itemprop=\"price\"]",
                ".price",
                "[data-price]",
                "span[class*=\"price\"]",
                ".cost",
                ".pip-price__integer",
            ]),
            brand: strings(&["[itemprop=\"brand\"]", ".brand", ".designer", "[data-brand]"]),
            link: strings(&["a[href*=\"/product\"], a[href*=\"/item\"]"]),
            sku: strings(&["[data-sku]", ".product-code", ".sku-code"]),
            sizes: Vec::new(),
            quantity: Vec::new(),
        }
    }

    /// Universal fallback: schema.org markup, common data-attributes and
    /// class-name substrings, grid/table layouts, link-path patterns.
    pub fn universal() -> Self {
        Self {
            containers: strings(&[
                "[itemtype*=\"schema.org/Product\"]",
                "[data-testid*=\"product\"]",
                "[data-test*=\"product\"]",
                "[data-product-id]",
                "[data-item-id]",
                "div[class*=\"product\"]",
                "article[class*=\"product\"]",
                "li[class*=\"product\"]",
                "div[class*=\"item\"]",
                "article[class*=\"item\"]",
                ".product-card",
                ".product-item",
                ".product-tile",
                ".catalog-item",
                "div[class*=\"grid\"] > div[class*=\"col\"]",
                "div[class*=\"grid\"] > article",
                "ul[class*=\"products\"] > li",
                "table.products tbody tr",
                "table#catalog tbody tr",
                "a[href*=\"/product/\"]",
                "a[href*=\"/item/\"]",
                "a[href*=\"/p/\"]",
                "div[class*=\"pip-product\"]",
                "article[class*=\"productCard\"]",
            ]),
            ..Self::base()
        }
    }

    fn with_containers(containers: &[&str]) -> Self {
        Self {
            containers: strings(containers),
            ..Self::base()
        }
    }
}

/// Resolved crawl configuration for one domain. Immutable once resolved.
#[derive(Debug, Clone, Serialize)]
pub struct SiteProfile {
    pub domain_pattern: String,
    pub kind: SiteKind,
    /// Randomized inter-request delay range, milliseconds.
    pub request_delay_ms: (u64, u64),
    /// Requests between long pauses.
    pub max_requests_before_pause: u32,
    /// Randomized pause range, milliseconds.
    pub pause_ms: (u64, u64),
    pub selectors: SelectorSet,
    pub requires_auth: bool,
    /// Whether the site is known to render listings client-side. Recorded
    /// for callers that can route such domains to a rendering fetcher.
    pub needs_js: bool,
    pub max_parallel: usize,
}

// ---------------------------------------------------------------------------
// Static tables
// ---------------------------------------------------------------------------

/// Authenticated wholesale portals, matched by substring against the host.
const B2B_PORTALS: &[(&str, &str)] = &[
    ("valentino", "myv-experience.valentino.com"),
    ("gucci", "b2b.gucci.com"),
    ("prada", "b2b.prada.com"),
];

fn b2b_selectors(portal: &str) -> SelectorSet {
    let (containers, sku, name, price, sizes, quantity): (
        &[&str],
        &[&str],
        &[&str],
        &[&str],
        &[&str],
        &[&str],
    ) = match portal {
        "valentino" => (
            &["div[class*=\"product\"], tr[class*=\"item\"]"],
            &["[data-sku]", ".product-code", "td:first-child"],
            &[".product-name", ".description", "td:nth-child(2)"],
            &[".wholesale-price", ".b2b-price", "td.price"],
            &[".sizes", "[data-sizes]", "td.sizes"],
            &[".stock", ".quantity", "td.qty"],
        ),
        "gucci" => (
            &["article[class*=\"product-card\"]"],
            &[".sku-code"],
            &[".product-title"],
            &[".trade-price"],
            &[".size-grid"],
            &[".availability"],
        ),
        _ => (
            &[".b2b-product-row"],
            &[".item-code"],
            &[".item-description"],
            &[".wholesale-price"],
            &[".size-availability"],
            &[".stock-level"],
        ),
    };
    SelectorSet {
        containers: strings(containers),
        sku: strings(sku),
        name: strings(name),
        price: strings(price),
        sizes: strings(sizes),
        quantity: strings(quantity),
        ..SelectorSet::base()
    }
}

fn b2b_profile(portal: &str, pattern: &str) -> SiteProfile {
    SiteProfile {
        domain_pattern: pattern.to_string(),
        kind: SiteKind::B2bPortal,
        request_delay_ms: (500, 1500),
        max_requests_before_pause: 50,
        pause_ms: (5_000, 10_000),
        selectors: b2b_selectors(portal),
        requires_auth: true,
        needs_js: false,
        max_parallel: DEFAULT_MAX_PARALLEL,
    }
}

/// Curated profiles for known public sites, matched on the exact host
/// (with any `www.` prefix stripped).
fn known_site(domain: &str) -> Option<SiteProfile> {
    let profile = match domain {
        "valentino.com" => SiteProfile {
            domain_pattern: domain.to_string(),
            kind: SiteKind::Public,
            request_delay_ms: (2_000, 4_000),
            max_requests_before_pause: 15,
            pause_ms: (20_000, 30_000),
            selectors: SelectorSet::with_containers(&[
                "div[data-testid*=\"product\"]",
                ".product-grid-item",
                "article[class*=\"ProductCard\"]",
            ]),
            requires_auth: false,
            needs_js: true,
            max_parallel: DEFAULT_MAX_PARALLEL,
        },
        "farfetch.com" => SiteProfile {
            domain_pattern: domain.to_string(),
            kind: SiteKind::Marketplace,
            request_delay_ms: (1_500, 3_000),
            max_requests_before_pause: 20,
            pause_ms: (15_000, 25_000),
            selectors: SelectorSet::with_containers(&[
                "div[data-test*=\"productCard\"]",
                "li[data-test=\"productCard\"]",
            ]),
            requires_auth: false,
            needs_js: false,
            max_parallel: DEFAULT_MAX_PARALLEL,
        },
        "ikea.com" => {
            let mut selectors = SelectorSet::with_containers(&[
                "div[data-testid=\"plp-product-card\"]",
                "article.pip-product-compact",
                "div.range-revamp-product-compact",
                "div.product-fragment",
            ]);
            selectors.name.insert(0, ".pip-header-section__title".into());
            selectors.price.insert(0, ".pip-price__integer".into());
            SiteProfile {
                domain_pattern: domain.to_string(),
                kind: SiteKind::Furniture,
                request_delay_ms: (1_500, 3_000),
                max_requests_before_pause: 18,
                pause_ms: (12_000, 22_000),
                selectors,
                requires_auth: false,
                needs_js: true,
                max_parallel: DEFAULT_MAX_PARALLEL,
            }
        }
        "zara.com" => SiteProfile {
            domain_pattern: domain.to_string(),
            kind: SiteKind::Public,
            request_delay_ms: (2_000, 3_500),
            max_requests_before_pause: 15,
            pause_ms: (15_000, 25_000),
            selectors: SelectorSet::with_containers(&[
                "li.product-grid-product",
                "article.product-link",
                "div.product-info",
            ]),
            requires_auth: false,
            needs_js: true,
            max_parallel: DEFAULT_MAX_PARALLEL,
        },
        _ => return None,
    };
    Some(profile)
}

/// Site-type configs matched by substring anywhere in the host.
fn partial_site(domain: &str) -> Option<SiteProfile> {
    if domain.contains("amazon") {
        return Some(SiteProfile {
            domain_pattern: "amazon".to_string(),
            kind: SiteKind::Marketplace,
            request_delay_ms: (1_000, 2_500),
            max_requests_before_pause: 25,
            pause_ms: (10_000, 20_000),
            selectors: SelectorSet::with_containers(&[
                "div[data-component-type=\"s-search-result\"]",
                "div.s-result-item",
                "div.sg-col-inner",
            ]),
            requires_auth: false,
            needs_js: false,
            max_parallel: DEFAULT_MAX_PARALLEL,
        });
    }
    None
}

/// Keyword classes used when synthesizing an adaptive profile.
fn adaptive_profile(domain: &str) -> SiteProfile {
    let contains_any = |keys: &[&str]| keys.iter().any(|k| domain.contains(k));

    // (delay, requests-before-pause, pause, needs_js)
    let (request_delay_ms, max_requests_before_pause, pause_ms, needs_js) =
        if contains_any(&["luxury", "fashion", "mode"]) {
            ((2_500, 4_500), 12, (20_000, 35_000), true)
        } else if contains_any(&["shop", "store", "market"]) {
            ((1_000, 2_500), 25, (10_000, 20_000), false)
        } else if contains_any(&["ikea", "maison", "west", "wayfair"]) {
            ((1_500, 3_000), 18, (12_000, 22_000), true)
        } else {
            ((2_000, 3_500), 15, (15_000, 25_000), true)
        };

    SiteProfile {
        domain_pattern: domain.to_string(),
        kind: SiteKind::Adaptive,
        request_delay_ms,
        max_requests_before_pause,
        pause_ms,
        selectors: SelectorSet::universal(),
        requires_auth: false,
        needs_js,
        max_parallel: DEFAULT_MAX_PARALLEL,
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Maps target URLs to crawl profiles. Cheap to share behind an `Arc`.
pub struct ProfileResolver {
    /// Operator-registered overrides, matched by host substring before any
    /// built-in table.
    overrides: std::sync::Mutex<Vec<(String, Arc<SiteProfile>)>>,
    adaptive_cache: moka::sync::Cache<String, Arc<SiteProfile>>,
}

impl Default for ProfileResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileResolver {
    pub fn new() -> Self {
        Self {
            overrides: std::sync::Mutex::new(Vec::new()),
            adaptive_cache: moka::sync::Cache::new(1024),
        }
    }

    /// Register a custom profile for hosts containing `pattern`. Checked
    /// before the built-in tables, so operators can correct a bad match.
    pub fn register(&self, pattern: impl Into<String>, profile: SiteProfile) {
        let mut overrides = self.overrides.lock().expect("override table lock");
        overrides.push((pattern.into(), Arc::new(profile)));
    }

    /// Resolve the profile for a target URL.
    ///
    /// Rejects malformed URLs and non-http(s) schemes before any network
    /// access.
    pub fn resolve(&self, url: &str) -> Result<Arc<SiteProfile>, CrawlError> {
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

        {
            let overrides = self.overrides.lock().expect("override table lock");
            if let Some((_, profile)) = overrides.iter().find(|(p, _)| host.contains(p.as_str())) {
                return Ok(Arc::clone(profile));
            }
        }

        for (portal, pattern) in B2B_PORTALS {
            if host.contains(pattern) {
                tracing::debug!(%host, portal, "resolved B2B portal profile");
                return Ok(Arc::new(b2b_profile(portal, pattern)));
            }
        }

        let bare = host.strip_prefix("www.").unwrap_or(host);
        if let Some(profile) = known_site(bare) {
            tracing::debug!(%host, kind = %profile.kind, "resolved known site profile");
            return Ok(Arc::new(profile));
        }

        if let Some(profile) = partial_site(host) {
            tracing::debug!(%host, kind = %profile.kind, "resolved partial site profile");
            return Ok(Arc::new(profile));
        }

        let profile = self
            .adaptive_cache
            .get_with(host.to_string(), || Arc::new(adaptive_profile(host)));
        tracing::debug!(%host, "resolved adaptive profile");
        Ok(profile)
    }
}
