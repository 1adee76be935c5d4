//! Data carried between extraction, persistence and resolution.
//!
//! Persistence works on raw rows keyed by natural uniqueness
//! constraints; these types are the seams between layers: what an
//! adapter extracts, the image rows the worker writes, and what the
//! resolver returns.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImage {
    pub variant_id: i64,
    pub style_id: i64,
    pub original_url: String,
    pub position: i64,
    pub storage_path: String,
    pub is_primary: bool,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Output of a site adapter's PDP extraction, before persistence.
///
/// `images` is an ordered, de-duplicated set; the first entry becomes the
/// primary image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedProduct {
    pub brand: String,
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub color: Option<String>,
    pub images: Vec<String>,
}

/// One resolver hit for a raw product URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMatch {
    pub variant_id: i64,
    pub style_id: i64,
    pub style_name: String,
    pub brand_name: String,
    pub url: String,
    pub list_price: Option<f64>,
    pub currency: Option<String>,
    pub image_path: Option<String>,
}
