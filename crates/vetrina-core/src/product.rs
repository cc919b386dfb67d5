use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::truncate_chars;

/// Lower bound for an accepted price. Anything below is treated as absent.
pub const MIN_PRICE: f64 = 10.0;
/// Upper bound for an accepted price. Anything above is treated as absent.
pub const MAX_PRICE: f64 = 50_000.0;

/// Maximum stored name length, in characters.
pub const MAX_NAME_CHARS: usize = 200;

/// Product taxonomy inferred from record names by keyword match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bags,
    Shoes,
    Clothing,
    Accessories,
    Jewelry,
    Furniture,
    Lighting,
    #[default]
    Uncategorized,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bags => "bags",
            Category::Shoes => "shoes",
            Category::Clothing => "clothing",
            Category::Accessories => "accessories",
            Category::Jewelry => "jewelry",
            Category::Furniture => "furniture",
            Category::Lighting => "lighting",
            Category::Uncategorized => "uncategorized",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Keyword lists carried over from the catalog domains this pipeline was
// built against; intentionally multilingual.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Bags, &["bag", "borsa", "clutch", "tote", "backpack"]),
    (
        Category::Shoes,
        &["shoe", "sneaker", "boot", "sandal", "pump", "loafer"],
    ),
    (
        Category::Clothing,
        &["dress", "shirt", "jacket", "coat", "pants", "skirt"],
    ),
    (
        Category::Accessories,
        &["belt", "wallet", "scarf", "hat", "sunglasses"],
    ),
    (
        Category::Jewelry,
        &["ring", "necklace", "bracelet", "earring", "watch"],
    ),
    (
        Category::Furniture,
        &["chair", "table", "sofa", "desk", "bed", "wardrobe", "divano", "tavolo", "sedia"],
    ),
    (
        Category::Lighting,
        &["lamp", "light", "chandelier", "lampada"],
    ),
];

/// Infer a category from a product name. Falls back to
/// [`Category::Uncategorized`] when no keyword matches.
pub fn detect_category(name: &str) -> Category {
    let lower = name.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *category;
        }
    }
    Category::Uncategorized
}

/// One extracted product. Created from a single page element or bulk entry;
/// every field except `name` may be absent at creation. The deduplicator
/// fills the remaining gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub sku: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    /// Currency-agnostic, always within [`MIN_PRICE`]..=[`MAX_PRICE`].
    pub price: Option<f64>,
    #[serde(default)]
    pub category: Category,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub sizes: Option<String>,
    pub quantity: Option<String>,
}

impl ProductRecord {
    /// New record with the category inferred from the name; all other
    /// fields start absent.
    pub fn new(name: impl Into<String>) -> Self {
        let name = truncate_chars(&name.into(), MAX_NAME_CHARS);
        let category = detect_category(&name);
        Self {
            sku: None,
            name,
            brand: None,
            price: None,
            category,
            image_url: None,
            source_url: None,
            sizes: None,
            quantity: None,
        }
    }
}

/// Parse a price out of arbitrary display text.
///
/// Strips everything but digits and separators, then normalizes thousands
/// and decimal separators ("€1.234,50" and "€1,234.50" both parse to
/// 1234.50). Out-of-bound or unparsable values are absent, not an error.
pub fn parse_price(text: &str) -> Option<f64> {
    let filtered: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if filtered.is_empty() {
        return None;
    }
    let normalized = normalize_separators(&filtered);
    let value: f64 = normalized.parse().ok()?;
    bounded_price(value)
}

/// Bound-check a numeric price the same way [`parse_price`] does.
pub fn bounded_price(value: f64) -> Option<f64> {
    (MIN_PRICE..=MAX_PRICE).contains(&value).then_some(value)
}

/// Reduce a digits-and-separators string to plain `1234.56` form.
///
/// When both separators appear, the one occurring last is the decimal
/// point. A lone separator is decimal only when at most two digits follow
/// it, otherwise it marks thousands.
fn normalize_separators(s: &str) -> String {
    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');
    match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            let decimal_at = d.max(c);
            s.char_indices()
                .filter_map(|(i, ch)| {
                    if ch.is_ascii_digit() {
                        Some(ch)
                    } else if i == decimal_at {
                        Some('.')
                    } else {
                        None
                    }
                })
                .collect()
        }
        (Some(at), None) => single_separator(s, '.', at),
        (None, Some(at)) => single_separator(s, ',', at),
        (None, None) => s.to_string(),
    }
}

fn single_separator(s: &str, sep: char, last_at: usize) -> String {
    let occurrences = s.matches(sep).count();
    let digits_after = s.len() - last_at - 1;
    if occurrences == 1 && digits_after <= 2 {
        s.replace(sep, ".")
    } else {
        s.chars().filter(char::is_ascii_digit).collect()
    }
}

/// Deterministic synthetic SKU for records that carry none: same name,
/// same SKU, so repeated extraction of an item is idempotent at key level.
pub fn synthetic_sku(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02X}")).collect();
    format!("PRD{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_plain() {
        assert_eq!(parse_price("1234"), Some(1234.0));
        assert_eq!(parse_price("€ 49.90"), Some(49.90));
    }

    #[test]
    fn test_parse_price_thousands_and_decimal() {
        assert_eq!(parse_price("€1,234.50"), Some(1234.50));
        assert_eq!(parse_price("€1.234,50"), Some(1234.50));
        assert_eq!(parse_price("$12,345"), Some(12345.0));
        assert_eq!(parse_price("1.234"), Some(1234.0));
        assert_eq!(parse_price("12.34"), Some(12.34));
    }

    #[test]
    fn test_parse_price_rejects_garbage_and_bounds() {
        assert_eq!(parse_price("ABC"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("99999999"), None);
        assert_eq!(parse_price("9.99"), None); // below minimum
        assert_eq!(parse_price("50001"), None);
        assert_eq!(parse_price("50000"), Some(50_000.0));
    }

    #[test]
    fn test_parse_price_always_in_band() {
        for text in ["€1,234.50", "7", "15", "1.234.567", "0,99", "449,00 kr"] {
            if let Some(p) = parse_price(text) {
                assert!((MIN_PRICE..=MAX_PRICE).contains(&p), "{text} -> {p}");
            }
        }
    }

    #[test]
    fn test_detect_category() {
        assert_eq!(detect_category("Leather Tote Bag"), Category::Bags);
        assert_eq!(detect_category("Runner sneaker white"), Category::Shoes);
        assert_eq!(detect_category("Silk dress"), Category::Clothing);
        assert_eq!(detect_category("Gold necklace"), Category::Jewelry);
        assert_eq!(detect_category("MALM bed frame"), Category::Furniture);
        assert_eq!(detect_category("Arco floor lamp"), Category::Lighting);
        assert_eq!(detect_category("Mystery thing"), Category::Uncategorized);
    }

    #[test]
    fn test_synthetic_sku_is_deterministic() {
        let a = synthetic_sku("Leather Tote Bag");
        let b = synthetic_sku("Leather Tote Bag");
        assert_eq!(a, b);
        assert!(a.starts_with("PRD"));
        assert_eq!(a.len(), 11);
        assert_ne!(a, synthetic_sku("Another Bag"));
    }

    #[test]
    fn test_new_record_infers_category_and_truncates() {
        let record = ProductRecord::new("x".repeat(500));
        assert_eq!(record.name.chars().count(), MAX_NAME_CHARS);

        let record = ProductRecord::new("Velvet sofa");
        assert_eq!(record.category, Category::Furniture);
        assert!(record.price.is_none());
        assert!(record.sku.is_none());
    }
}
