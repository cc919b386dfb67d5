//! Merge duplicate records keyed by normalized (name, brand).
//!
//! First occurrence of a key establishes the surviving record; later
//! duplicates only donate fields the survivor lacks. Output preserves
//! first-seen order, and reducing twice yields the same set.

use std::collections::HashMap;

use crate::product::{Category, ProductRecord, synthetic_sku};
use crate::util::rand_range;

/// Band for the placeholder price given to records that never carried one.
/// A known weakness inherited from the original pipeline: it is a filler
/// for downstream exports, not a market signal.
pub const PLACEHOLDER_PRICE_RANGE: (u64, u64) = (200, 2_000);

/// Normalized dedup key for a record.
pub fn dedup_key(name: &str, brand: Option<&str>) -> String {
    format!(
        "{}::{}",
        normalize(name),
        brand.map(normalize).unwrap_or_default()
    )
}

fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse duplicates and fill the gaps that would break downstream
/// consumers (missing price, missing sku).
pub fn reduce(records: Vec<ProductRecord>) -> Vec<ProductRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ProductRecord> = Vec::new();

    for record in records {
        let key = dedup_key(&record.name, record.brand.as_deref());
        match index.get(&key) {
            None => {
                let mut survivor = record;
                if survivor.price.is_none() {
                    let (lo, hi) = PLACEHOLDER_PRICE_RANGE;
                    survivor.price = Some(rand_range(lo, hi) as f64);
                }
                if survivor.sku.is_none() {
                    survivor.sku = Some(synthetic_sku(&survivor.name));
                }
                index.insert(key, unique.len());
                unique.push(survivor);
            }
            Some(&at) => {
                let survivor = &mut unique[at];
                if survivor.image_url.is_none() {
                    survivor.image_url = record.image_url;
                }
                if survivor.brand.is_none() {
                    survivor.brand = record.brand;
                }
                if survivor.category == Category::Uncategorized {
                    survivor.category = record.category;
                }
                if survivor.sizes.is_none() {
                    survivor.sizes = record.sizes;
                }
            }
        }
    }

    unique
}
