//! Bulk discovery: sitemap and hidden-API extraction paths that bypass
//! per-page HTML parsing. A fast sequential pre-pass: each source runs
//! with its own short request timeout and caps its own yield to bound
//! memory.

use std::time::Duration;

use url::Url;

use crate::product::{ProductRecord, bounded_price, parse_price, synthetic_sku};
use crate::traits::{FetchedPage, Fetcher, RequestHeaders};

/// Per-source cap on discovered records.
pub const BULK_SOURCE_CAP: usize = 5_000;

const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_products.xml",
    "/product-sitemap.xml",
    "/sitemap/products.xml",
];

const PRODUCT_PATH_MARKERS: &[&str] = &["/product", "/item", "/p/"];

const API_PATHS: &[&str] = &[
    "/api/products",
    "/api/v1/catalog",
    "/api/v2/products",
    "/products.json",
    "/api/search?limit=10000",
    "/_next/data/products.json",
    "/graphql",
];

/// Keys under which APIs wrap their record arrays.
const WRAPPER_KEYS: &[&str] = &["products", "items", "data", "results"];

/// Sequential sitemap + hidden-API discovery against one origin.
pub struct BulkDiscovery<F> {
    fetcher: F,
    request_timeout: Duration,
}

impl<F: Fetcher> BulkDiscovery<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Try every bulk source against `origin` (scheme://host). Sources are
    /// independent: a sitemap hit does not stop the API probe.
    pub async fn discover(&self, origin: &str) -> Vec<ProductRecord> {
        let origin = origin.trim_end_matches('/');
        let mut records = self.from_sitemaps(origin).await;
        records.truncate(BULK_SOURCE_CAP);

        let mut api_records = self.from_hidden_apis(origin).await;
        api_records.truncate(BULK_SOURCE_CAP);
        records.extend(api_records);
        records
    }

    async fn from_sitemaps(&self, origin: &str) -> Vec<ProductRecord> {
        for path in SITEMAP_PATHS {
            let url = format!("{origin}{path}");
            let Some(page) = self.try_fetch(&url, &RequestHeaders::default()).await else {
                continue;
            };
            let records: Vec<ProductRecord> = sitemap_locations(&page.body)
                .into_iter()
                .filter(|loc| PRODUCT_PATH_MARKERS.iter().any(|m| loc.contains(m)))
                .take(BULK_SOURCE_CAP)
                .filter_map(|loc| record_from_product_url(&loc))
                .collect();
            if !records.is_empty() {
                tracing::info!(sitemap = %url, found = records.len(), "sitemap discovery hit");
                return records;
            }
        }
        Vec::new()
    }

    async fn from_hidden_apis(&self, origin: &str) -> Vec<ProductRecord> {
        for path in API_PATHS {
            let url = format!("{origin}{path}");
            let Some(page) = self.try_fetch(&url, &RequestHeaders::ajax_probe()).await else {
                continue;
            };
            let Ok(payload) = serde_json::from_str::<serde_json::Value>(&page.body) else {
                continue;
            };
            let Some(items) = record_array(&payload) else {
                continue;
            };
            let records: Vec<ProductRecord> = items
                .iter()
                .take(BULK_SOURCE_CAP)
                .filter_map(normalize_api_item)
                .collect();
            if !records.is_empty() {
                tracing::info!(api = %url, found = records.len(), "hidden API discovery hit");
                return records;
            }
        }
        Vec::new()
    }

    async fn try_fetch(&self, url: &str, headers: &RequestHeaders) -> Option<FetchedPage> {
        match tokio::time::timeout(self.request_timeout, self.fetcher.fetch(url, headers)).await {
            Ok(Ok(page)) if (200..300).contains(&page.status) => Some(page),
            Ok(Ok(_)) | Ok(Err(_)) => None,
            Err(_) => {
                tracing::debug!(%url, "bulk request timed out");
                None
            }
        }
    }
}

/// Pull every `<loc>` value out of a sitemap document.
fn sitemap_locations(xml: &str) -> Vec<String> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locations = Vec::new();
    let mut in_loc = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"loc" => in_loc = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    locations.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "sitemap parse stopped early");
                break;
            }
            _ => {}
        }
    }
    locations
}

/// Turn a product URL into a minimal record, deriving the name from the
/// last path segment so the record carries a usable dedup key.
fn record_from_product_url(url: &str) -> Option<ProductRecord> {
    let name = name_from_slug(url)?;
    let mut record = ProductRecord::new(name);
    record.sku = Some(synthetic_sku(&record.name));
    record.source_url = Some(url.to_string());
    Some(record)
}

fn name_from_slug(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let stem = segment.split('.').next().unwrap_or(segment);
    let words: Vec<String> = stem
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect();
    if words.is_empty() {
        return None;
    }
    let name = words.join(" ");
    (name.chars().count() >= 3 && name.chars().any(|c| c.is_alphabetic())).then_some(name)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Accept a bare JSON array or the usual wrapped-object shapes.
fn record_array(payload: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    if let Some(list) = payload.as_array() {
        return Some(list);
    }
    WRAPPER_KEYS
        .iter()
        .find_map(|key| payload.get(key).and_then(|v| v.as_array()))
}

/// Normalize one heterogeneous API item into a record. Items without a
/// usable name are dropped.
fn normalize_api_item(item: &serde_json::Value) -> Option<ProductRecord> {
    let name = string_field(item, &["name", "title"])?;
    let mut record = ProductRecord::new(name);
    record.price = price_field(item, &["price", "cost"]);
    record.brand = string_field(item, &["brand", "manufacturer"]);
    record.sku = scalar_field(item, &["sku", "id"]).or_else(|| Some(synthetic_sku(&record.name)));
    record.image_url = string_field(item, &["image", "image_url"]);
    record.source_url = string_field(item, &["url", "link"]);
    Some(record)
}

fn string_field(item: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        item.get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Like [`string_field`] but also accepts numeric ids.
fn scalar_field(item: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match item.get(key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Price as a number or display string, bounded the same way the HTML
/// extractor bounds it.
fn price_field(item: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match item.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_f64().and_then(bounded_price),
        Some(serde_json::Value::String(s)) => parse_price(s),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;

    const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
          <url><loc>https://shop.example.com/product/leather-tote-bag</loc></url>
          <url><loc>https://shop.example.com/about-us</loc></url>
          <url><loc>https://shop.example.com/p/velvet-sofa.html</loc></url>
        </urlset>"#;

    #[test]
    fn sitemap_locations_are_parsed() {
        let locs = sitemap_locations(SITEMAP);
        assert_eq!(locs.len(), 3);
        assert_eq!(locs[0], "https://shop.example.com/product/leather-tote-bag");
    }

    #[test]
    fn slug_names_are_readable() {
        assert_eq!(
            name_from_slug("https://x.example/product/leather-tote-bag"),
            Some("Leather Tote Bag".to_string())
        );
        assert_eq!(
            name_from_slug("https://x.example/p/velvet-sofa.html"),
            Some("Velvet Sofa".to_string())
        );
        assert_eq!(name_from_slug("https://x.example/p/1"), None);
        assert_eq!(name_from_slug("not a url"), None);
    }

    #[tokio::test]
    async fn sitemap_discovery_filters_product_paths() {
        let fetcher = MockFetcher::new()
            .route_error(
                "https://shop.example.com/sitemap.xml",
                crate::error::CrawlError::Http {
                    url: "https://shop.example.com/sitemap.xml".into(),
                    status: 404,
                },
            )
            .route("https://shop.example.com/sitemap_products.xml", SITEMAP);
        let bulk = BulkDiscovery::new(fetcher);

        let records = bulk.discover("https://shop.example.com/").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Leather Tote Bag");
        assert_eq!(
            records[0].source_url.as_deref(),
            Some("https://shop.example.com/product/leather-tote-bag")
        );
        assert_eq!(records[1].name, "Velvet Sofa");
    }

    #[tokio::test]
    async fn hidden_api_accepts_bare_lists() {
        let fetcher = MockFetcher::new().route(
            "https://shop.example.com/api/products",
            r#"[{"name": "Silk Scarf", "price": 120.0, "brand": "Hermes", "id": 42}]"#,
        );
        let bulk = BulkDiscovery::new(fetcher);

        let records = bulk.discover("https://shop.example.com").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Silk Scarf");
        assert_eq!(records[0].price, Some(120.0));
        assert_eq!(records[0].sku.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn hidden_api_unwraps_object_shapes() {
        let body = r#"{"total": 2, "items": [
            {"title": "Wool Coat", "cost": "€ 890,00", "manufacturer": "Prada"},
            {"title": "Broken entry"},
            {"price": 50}
        ]}"#;
        let fetcher = MockFetcher::new().route("https://shop.example.com/products.json", body);
        let bulk = BulkDiscovery::new(fetcher);

        let records = bulk.discover("https://shop.example.com").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Wool Coat");
        assert_eq!(records[0].price, Some(890.0));
        assert_eq!(records[0].brand.as_deref(), Some("Prada"));
        // The nameless third entry is dropped, not an error.
        assert_eq!(records[1].name, "Broken entry");
        assert_eq!(records[1].price, None);
    }

    #[tokio::test]
    async fn api_prices_share_the_sanity_bounds() {
        let body = r#"[{"name": "Glitch", "price": 99999999}]"#;
        let fetcher = MockFetcher::new().route("https://shop.example.com/api/products", body);
        let bulk = BulkDiscovery::new(fetcher);

        let records = bulk.discover("https://shop.example.com").await;
        assert_eq!(records[0].price, None);
    }

    #[tokio::test]
    async fn sources_are_independent() {
        let fetcher = MockFetcher::new()
            .route("https://shop.example.com/sitemap.xml", SITEMAP)
            .route(
                "https://shop.example.com/api/products",
                r#"[{"name": "Silk Scarf"}]"#,
            );
        let bulk = BulkDiscovery::new(fetcher);

        let records = bulk.discover("https://shop.example.com").await;
        // Sitemap hits plus API hits, both present.
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn nothing_found_is_an_empty_list() {
        let bulk = BulkDiscovery::new(MockFetcher::new());
        assert!(bulk.discover("https://shop.example.com").await.is_empty());
    }
}
