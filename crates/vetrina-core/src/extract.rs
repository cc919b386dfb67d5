//! Layout-tolerant product extraction from fetched HTML.
//!
//! Selector cascades are ordered lists of pure matchers over the parsed
//! document; each is tried in priority order and the first usable hit
//! wins. An element without a parsable name is skipped, never an error.

use scraper::{ElementRef, Html, Selector};

use crate::product::{ProductRecord, parse_price, synthetic_sku};
use crate::profile::SelectorSet;

/// Per-selector cap on scanned container elements, to bound work on
/// pathological pages.
pub const MAX_ELEMENTS_PER_SELECTOR: usize = 100;

/// Names shorter than this are noise (icons, arrows, counters).
const MIN_NAME_CHARS: usize = 3;

/// A [`SelectorSet`] with every valid selector compiled once per page.
/// Invalid selector strings are dropped with a debug log.
struct CompiledSet {
    containers: Vec<Selector>,
    name: Vec<Selector>,
    price: Vec<Selector>,
    brand: Vec<Selector>,
    link: Vec<Selector>,
    sku: Vec<Selector>,
    sizes: Vec<Selector>,
    quantity: Vec<Selector>,
    img: Vec<Selector>,
}

fn compile(candidates: &[String]) -> Vec<Selector> {
    candidates
        .iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(_) => {
                tracing::debug!(selector = %s, "skipping unparsable selector");
                None
            }
        })
        .collect()
}

impl CompiledSet {
    fn new(set: &SelectorSet) -> Self {
        Self {
            containers: compile(&set.containers),
            name: compile(&set.name),
            price: compile(&set.price),
            brand: compile(&set.brand),
            link: compile(&set.link),
            sku: compile(&set.sku),
            sizes: compile(&set.sizes),
            quantity: compile(&set.quantity),
            img: compile(&["img".to_string()]),
        }
    }
}

/// Extract every product record from a listing page.
///
/// Container selectors are tried in order; the first one that yields at
/// least one record wins and the rest are skipped.
pub fn extract_records(html: &str, selectors: &SelectorSet) -> Vec<ProductRecord> {
    let compiled = CompiledSet::new(selectors);
    let doc = Html::parse_document(html);

    for container in &compiled.containers {
        let records: Vec<ProductRecord> = doc
            .select(container)
            .take(MAX_ELEMENTS_PER_SELECTOR)
            .filter_map(|el| record_from_element(el, &compiled))
            .collect();
        if !records.is_empty() {
            return records;
        }
    }
    Vec::new()
}

fn record_from_element(el: ElementRef<'_>, set: &CompiledSet) -> Option<ProductRecord> {
    let name = first_text(el, &set.name, MIN_NAME_CHARS)?;
    let mut record = ProductRecord::new(name);

    record.price = first_price(el, &set.price);
    record.brand = first_text(el, &set.brand, 1).map(|b| b.to_uppercase());
    record.image_url = image_url(el, set);
    record.source_url = first_attr(el, &set.link, "href");
    record.sizes = first_text(el, &set.sizes, 1);
    record.quantity = first_text(el, &set.quantity, 1);
    record.sku = first_text(el, &set.sku, 1)
        .or_else(|| first_attr(el, &set.sku, "data-sku"))
        .or_else(|| Some(synthetic_sku(&record.name)));

    Some(record)
}

/// First candidate whose matched element carries text of at least
/// `min_chars` characters after whitespace collapsing.
fn first_text(el: ElementRef<'_>, candidates: &[Selector], min_chars: usize) -> Option<String> {
    for sel in candidates {
        if let Some(hit) = el.select(sel).next() {
            let text = collapse_text(hit);
            if text.chars().count() >= min_chars {
                return Some(text);
            }
        }
    }
    None
}

/// First candidate whose text parses to an in-band price.
fn first_price(el: ElementRef<'_>, candidates: &[Selector]) -> Option<f64> {
    for sel in candidates {
        if let Some(hit) = el.select(sel).next()
            && let Some(price) = parse_price(&collapse_text(hit))
        {
            return Some(price);
        }
    }
    None
}

fn first_attr(el: ElementRef<'_>, candidates: &[Selector], attr: &str) -> Option<String> {
    for sel in candidates {
        if let Some(hit) = el.select(sel).next()
            && let Some(value) = hit.value().attr(attr)
        {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn image_url(el: ElementRef<'_>, set: &CompiledSet) -> Option<String> {
    let img = set.img.iter().find_map(|sel| el.select(sel).next())?;
    let src = img
        .value()
        .attr("src")
        .or_else(|| img.value().attr("data-src"))
        .or_else(|| img.value().attr("data-lazy"))?;
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    Some(complete_scheme(src))
}

/// Protocol-relative URLs get an explicit scheme; everything else is kept
/// as-is for the caller to resolve.
pub(crate) fn complete_scheme(src: &str) -> String {
    if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src.to_string()
    }
}

fn collapse_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Category;

    fn universal() -> SelectorSet {
        SelectorSet::universal()
    }

    #[test]
    fn extracts_a_full_record_from_a_card() {
        let html = r#"
            <div class="product-card">
              <h3>Leather Tote Bag</h3>
              <span class="brand">Gucci</span>
              <span class="price">€1,234.50</span>
              <img src="//cdn.example.com/tote.jpg">
              <a href="/product/leather-tote-bag">view</a>
            </div>"#;
        let records = extract_records(html, &universal());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.name, "Leather Tote Bag");
        assert_eq!(r.brand.as_deref(), Some("GUCCI"));
        assert_eq!(r.price, Some(1234.50));
        assert_eq!(r.category, Category::Bags);
        assert_eq!(r.image_url.as_deref(), Some("https://cdn.example.com/tote.jpg"));
        assert_eq!(r.source_url.as_deref(), Some("/product/leather-tote-bag"));
        assert_eq!(r.sku.as_deref(), Some(synthetic_sku("Leather Tote Bag").as_str()));
    }

    #[test]
    fn element_without_name_is_skipped_not_an_error() {
        let html = r#"<div class="product-card"><span class="price">€99</span></div>"#;
        assert!(extract_records(html, &universal()).is_empty());

        // Name too short counts as missing.
        let html = r#"<div class="product-card"><h3>ab</h3></div>"#;
        assert!(extract_records(html, &universal()).is_empty());
    }

    #[test]
    fn out_of_band_price_is_absent_not_an_error() {
        let html = r#"
            <div class="product-card">
              <h3>Golden Throne</h3>
              <span class="price">99999999</span>
            </div>"#;
        let records = extract_records(html, &universal());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, None);
    }

    #[test]
    fn price_cascade_skips_unparsable_candidates() {
        // `.price` holds junk; the later span[class*="price"] has the value.
        let html = r#"
            <div class="product-card">
              <h3>Wool Coat</h3>
              <div class="price">sold by partner</div>
              <span class="sale-price">€ 450,00</span>
            </div>"#;
        let records = extract_records(html, &universal());
        assert_eq!(records[0].price, Some(450.0));
    }

    #[test]
    fn first_container_selector_with_hits_wins() {
        // schema.org containers take priority over generic class matches.
        let html = r#"
            <div itemtype="https://schema.org/Product"><h3>Marked Up Lamp</h3></div>
            <div class="product-card"><h3>Plain Card Lamp</h3></div>"#;
        let records = extract_records(html, &universal());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Marked Up Lamp");
    }

    #[test]
    fn lazy_loaded_images_are_picked_up() {
        let html = r#"
            <div class="product-card">
              <h3>Velvet Sofa</h3>
              <img data-src="https://cdn.example.com/sofa.jpg">
            </div>"#;
        let records = extract_records(html, &universal());
        assert_eq!(
            records[0].image_url.as_deref(),
            Some("https://cdn.example.com/sofa.jpg")
        );
    }

    #[test]
    fn b2b_table_rows_extract_sku_sizes_and_quantity() {
        let selectors = SelectorSet {
            containers: vec!["table.products tbody tr".into()],
            name: vec!["td.desc".into()],
            price: vec!["td.price".into()],
            sku: vec!["td.code".into()],
            sizes: vec!["td.sizes".into()],
            quantity: vec!["td.qty".into()],
            ..SelectorSet::universal()
        };
        let html = r#"
            <table class="products"><tbody>
              <tr>
                <td class="code">VLT-001</td>
                <td class="desc">Rockstud Pump</td>
                <td class="price">420.00</td>
                <td class="sizes">36-41</td>
                <td class="qty">12</td>
              </tr>
            </tbody></table>"#;
        let records = extract_records(html, &selectors);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.sku.as_deref(), Some("VLT-001"));
        assert_eq!(r.price, Some(420.0));
        assert_eq!(r.sizes.as_deref(), Some("36-41"));
        assert_eq!(r.quantity.as_deref(), Some("12"));
    }

    #[test]
    fn container_scan_is_bounded() {
        let mut html = String::new();
        for i in 0..500 {
            html.push_str(&format!(
                "<div class=\"product-card\"><h3>Item number {i}</h3></div>"
            ));
        }
        let records = extract_records(&html, &universal());
        assert_eq!(records.len(), MAX_ELEMENTS_PER_SELECTOR);
    }

    #[test]
    fn repeated_extraction_is_idempotent_at_key_level() {
        let html = r#"<div class="product-card"><h3>Silk Scarf</h3></div>"#;
        let a = extract_records(html, &universal());
        let b = extract_records(html, &universal());
        assert_eq!(a[0].sku, b[0].sku);
    }
}
