//! Shared extraction machinery used by the per-brand adapters.
//!
//! Structured data (embedded JSON-LD product schema) is authoritative;
//! CSS selector candidates are the fallback for name and price. Image
//! collection merges every discoverable source into a single ordered,
//! de-duplicated set whose first entry becomes the primary image.
//!
//! All HTML parsing happens in synchronous helpers so no `Html` value is
//! ever held across an await point.

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::infrastructure::config::FetcherConfig;
use crate::infrastructure::page_fetcher::PageContext;

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)").unwrap());

static BACKGROUND_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"background-image\s*:\s*url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).unwrap());

static JSON_LD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Bounded-wait knobs for category crawling, derived from the fetcher
/// configuration.
#[derive(Debug, Clone)]
pub struct CrawlLimits {
    pub antibot_wait: Duration,
    pub max_antibot_checks: u32,
    pub max_scroll_rounds: u32,
    pub stale_scroll_rounds: u32,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self::from(&FetcherConfig::default())
    }
}

impl From<&FetcherConfig> for CrawlLimits {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            antibot_wait: Duration::from_millis(config.antibot_wait_ms),
            max_antibot_checks: config.max_antibot_checks,
            max_scroll_rounds: config.max_scroll_rounds,
            stale_scroll_rounds: config.stale_scroll_rounds,
        }
    }
}

/// Per-brand selector candidates for PDP extraction, tried in order.
#[derive(Debug, Clone, Copy)]
pub struct PdpSelectors {
    pub name: &'static [&'static str],
    pub price: &'static [&'static str],
    pub description: &'static [&'static str],
    pub color: &'static [&'static str],
}

/// Product parsed out of embedded JSON-LD.
#[derive(Debug, Clone, Default)]
pub struct StructuredProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub color: Option<String>,
    pub category: Option<String>,
    pub images: Vec<String>,
}

/// Wait out anti-bot interstitials with a bounded recheck loop: the page
/// is re-navigated after each wait, and the crawl fails once the budget
/// is spent.
pub async fn settle_page(
    page: &mut dyn PageContext,
    url: &str,
    antibot_markers: &[&str],
    limits: &CrawlLimits,
) -> Result<()> {
    page.navigate(url).await?;
    for check in 0..limits.max_antibot_checks {
        let body = page.content().await?;
        if !looks_blocked(&body, antibot_markers) {
            return Ok(());
        }
        debug!("anti-bot interstitial on {url}, recheck {check}");
        tokio::time::sleep(limits.antibot_wait).await;
        page.navigate(url).await?;
    }
    let body = page.content().await?;
    if looks_blocked(&body, antibot_markers) {
        page.capture_failure("antibot-blocked").await.ok();
        return Err(anyhow!("anti-bot block not resolved within wait budget: {url}"));
    }
    Ok(())
}

/// Opportunistically dismiss cookie/consent overlays; failures are logged
/// and ignored.
pub async fn dismiss_overlays(page: &mut dyn PageContext, selectors: &[&str]) {
    for selector in selectors {
        match page.dismiss(selector).await {
            Ok(true) => debug!("dismissed overlay {selector}"),
            Ok(false) => {}
            Err(e) => warn!("overlay dismissal failed for {selector}: {e}"),
        }
    }
}

/// Incremental scroll-and-recount: scroll, recount discovered product
/// links, and stop once the count has not grown for a bounded number of
/// rounds. Prevents an infinite loop on sites with no pagination signal.
pub async fn scroll_and_collect_links(
    page: &mut dyn PageContext,
    category_url: &str,
    path_marker: &str,
    limits: &CrawlLimits,
) -> Result<Vec<String>> {
    let mut links: Vec<String> = Vec::new();
    let mut stale_rounds = 0u32;

    for _ in 0..limits.max_scroll_rounds {
        let body = page.content().await?;
        let found = collect_product_links(&body, category_url, path_marker);
        if found.len() > links.len() {
            stale_rounds = 0;
        } else {
            stale_rounds += 1;
        }
        links = found;
        if stale_rounds >= limits.stale_scroll_rounds {
            break;
        }
        page.scroll_to_bottom().await?;
    }

    Ok(links)
}

/// Same-origin, product-path links on the page, resolved absolute and
/// de-duplicated in first-seen order.
pub fn collect_product_links(body: &str, base_url: &str, path_marker: &str) -> Vec<String> {
    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(body);
    let anchor = Selector::parse("a[href]").unwrap();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        if resolved.host_str() != base.host_str() {
            continue;
        }
        if !resolved.path().contains(path_marker) {
            continue;
        }
        let absolute = resolved.to_string();
        if seen.insert(absolute.clone()) {
            links.push(absolute);
        }
    }
    links
}

/// Whether the body looks like an anti-bot interstitial rather than real
/// content.
pub fn looks_blocked(body: &str, markers: &[&str]) -> bool {
    let lowered = body.to_ascii_lowercase();
    markers.iter().any(|marker| lowered.contains(marker))
}

/// First JSON-LD product node found in the document, if any.
pub fn structured_product(document: &Html) -> Option<StructuredProduct> {
    for script in document.select(&JSON_LD_SELECTOR) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if let Some(node) = find_product_node(&value) {
            return Some(parse_product_node(node));
        }
    }
    None
}

fn find_product_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => {
            if is_product_type(map.get("@type")) {
                return Some(value);
            }
            map.get("@graph").and_then(find_product_node)
        }
        Value::Array(items) => items.iter().find_map(find_product_node),
        _ => None,
    }
}

fn is_product_type(type_field: Option<&Value>) -> bool {
    match type_field {
        Some(Value::String(s)) => s == "Product",
        Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some("Product")),
        _ => false,
    }
}

fn parse_product_node(node: &Value) -> StructuredProduct {
    // Offers may be a single object or an array; the first entry wins.
    let offer = match node.get("offers") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    let price = offer
        .and_then(|o| o.get("price"))
        .and_then(value_as_price)
        .or_else(|| offer.and_then(|o| o.get("lowPrice")).and_then(value_as_price));
    let currency = offer
        .and_then(|o| o.get("priceCurrency"))
        .and_then(Value::as_str)
        .map(str::to_string);

    StructuredProduct {
        name: node.get("name").and_then(Value::as_str).map(str::to_string),
        description: node
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        price,
        currency,
        color: node.get("color").and_then(Value::as_str).map(str::to_string),
        category: node
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_string),
        images: image_urls_of(node.get("image")),
    }
}

fn image_urls_of(value: Option<&Value>) -> Vec<String> {
    let mut urls = Vec::new();
    match value {
        Some(Value::String(s)) => urls.push(s.clone()),
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => urls.push(s.clone()),
                    Value::Object(map) => {
                        if let Some(url) = map.get("url").and_then(Value::as_str) {
                            urls.push(url.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(Value::Object(map)) => {
            if let Some(url) = map.get("url").and_then(Value::as_str) {
                urls.push(url.to_string());
            }
        }
        _ => {}
    }
    urls
}

fn value_as_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|p| *p > 0.0),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

/// Text of the first candidate selector that matches a non-empty element.
pub fn select_first_text(document: &Html, candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        let Ok(selector) = Selector::parse(candidate) else {
            warn!("invalid selector candidate '{candidate}'");
            continue;
        };
        for element in document.select(&selector) {
            // Meta tags carry their value in the content attribute.
            let text = if element.value().name() == "meta" {
                element.value().attr("content").unwrap_or_default().to_string()
            } else {
                element.text().collect::<String>()
            };
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First candidate whose text parses as a plausible price.
pub fn select_price(document: &Html, candidates: &[&str]) -> Option<f64> {
    for candidate in candidates {
        let Ok(selector) = Selector::parse(candidate) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = if element.value().name() == "meta" {
                element.value().attr("content").unwrap_or_default().to_string()
            } else {
                element.text().collect::<String>()
            };
            if let Some(price) = parse_price(&text) {
                return Some(price);
            }
        }
    }
    None
}

/// Extract a plausible numeric price from free-form text ("$1,280.00",
/// "128.00 USD"). Returns None for zero or non-numeric content.
pub fn parse_price(text: &str) -> Option<f64> {
    let captures = PRICE_RE.captures(text)?;
    let normalized = captures[1].replace(',', "");
    normalized.parse::<f64>().ok().filter(|p| *p > 0.0)
}

/// Highest-resolution srcset entry by width descriptor; entries without a
/// width descriptor rank lowest.
pub fn best_srcset_entry(srcset: &str) -> Option<String> {
    let mut best: Option<(u32, &str)> = None;
    for entry in srcset.split(',') {
        let mut parts = entry.split_whitespace();
        let Some(url) = parts.next() else {
            continue;
        };
        let width = parts
            .next()
            .and_then(|d| d.strip_suffix('w'))
            .and_then(|w| w.parse::<u32>().ok())
            .unwrap_or(0);
        if best.map_or(true, |(w, _)| width > w) {
            best = Some((width, url));
        }
    }
    best.map(|(_, url)| url.to_string())
}

/// Merge every image source on a PDP into one ordered de-duplicated set:
/// structured-data images, `<img>` src/srcset, `<picture><source>`
/// entries, and CSS background-image URLs. First-seen order is preserved
/// and determines the primary image.
pub fn collect_images(
    document: &Html,
    body: &str,
    base_url: &str,
    structured: Option<&StructuredProduct>,
) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    let push = |raw: &str, seen: &mut HashSet<String>, images: &mut Vec<String>| {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with("data:") {
            return;
        }
        let absolute = match &base {
            Some(base) => match base.join(trimmed) {
                Ok(resolved) => resolved.to_string(),
                Err(_) => return,
            },
            None => trimmed.to_string(),
        };
        if seen.insert(absolute.clone()) {
            images.push(absolute);
        }
    };

    if let Some(structured) = structured {
        for url in &structured.images {
            push(url, &mut seen, &mut images);
        }
    }

    let img = Selector::parse("img").unwrap();
    for element in document.select(&img) {
        if let Some(srcset) = element.value().attr("srcset") {
            if let Some(best) = best_srcset_entry(srcset) {
                push(&best, &mut seen, &mut images);
                continue;
            }
        }
        if let Some(src) = element.value().attr("src") {
            push(src, &mut seen, &mut images);
        }
    }

    let picture_source = Selector::parse("picture source[srcset]").unwrap();
    for element in document.select(&picture_source) {
        if let Some(srcset) = element.value().attr("srcset") {
            if let Some(best) = best_srcset_entry(srcset) {
                push(&best, &mut seen, &mut images);
            }
        }
    }

    for captures in BACKGROUND_IMAGE_RE.captures_iter(body) {
        push(&captures[1], &mut seen, &mut images);
    }

    images
}

/// Parse a PDP document into a `ParsedProduct`.
///
/// Structured data wins wherever present; selector candidates fill the
/// gaps. An unnamed product is never persisted, so a missing name is a
/// hard error.
pub fn parse_pdp_document(
    body: &str,
    pdp_url: &str,
    brand: &str,
    selectors: &PdpSelectors,
    default_category: &str,
    default_currency: &str,
) -> Result<crate::domain::ParsedProduct> {
    let document = Html::parse_document(body);
    let structured = structured_product(&document);

    let name = structured
        .as_ref()
        .and_then(|s| s.name.clone())
        .or_else(|| select_first_text(&document, selectors.name))
        .ok_or_else(|| anyhow!("no product name extractable from {pdp_url}"))?;

    let price = structured
        .as_ref()
        .and_then(|s| s.price)
        .or_else(|| select_price(&document, selectors.price));
    let currency = structured
        .as_ref()
        .and_then(|s| s.currency.clone())
        .unwrap_or_else(|| default_currency.to_string());
    let description = structured
        .as_ref()
        .and_then(|s| s.description.clone())
        .or_else(|| select_first_text(&document, selectors.description));
    let color = structured
        .as_ref()
        .and_then(|s| s.color.clone())
        .or_else(|| select_first_text(&document, selectors.color));
    let category = structured
        .as_ref()
        .and_then(|s| s.category.clone())
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or_else(|| category_from_path(pdp_url, default_category));

    let images = collect_images(&document, body, pdp_url, structured.as_ref());

    Ok(crate::domain::ParsedProduct {
        brand: brand.to_string(),
        category,
        name,
        description,
        price,
        currency,
        color,
        images,
    })
}

/// Category inferred from the URL path: the segment preceding the product
/// path marker (e.g. `/collections/dresses/products/x` -> "dresses").
pub fn category_from_path(pdp_url: &str, fallback: &str) -> String {
    let Ok(parsed) = url::Url::parse(pdp_url) else {
        return fallback.to_string();
    };
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    for window in segments.windows(2) {
        if window[1] == "products" || window[1] == "p" {
            return window[0].to_string();
        }
    }
    fallback.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_parsing_is_plausibility_checked() {
        assert_eq!(parse_price("$128.00"), Some(128.0));
        assert_eq!(parse_price("1,280.50 USD"), Some(1280.5));
        assert_eq!(parse_price("Sold out"), None);
        assert_eq!(parse_price("0.00"), None);
    }

    #[test]
    fn srcset_picks_highest_width_descriptor() {
        let srcset = "a.jpg 320w, b.jpg 1280w, c.jpg 640w";
        assert_eq!(best_srcset_entry(srcset), Some("b.jpg".to_string()));
        // No descriptors: first entry wins.
        assert_eq!(best_srcset_entry("x.jpg, y.jpg"), Some("x.jpg".to_string()));
    }

    #[test]
    fn structured_data_example_from_offers_object() {
        let body = r#"<html><head><script type="application/ld+json">
            {"@type":"Product","name":"Tempest Dress","offers":{"price":"128.00"}}
        </script></head><body></body></html>"#;
        let document = Html::parse_document(body);
        let product = structured_product(&document).expect("product node");
        assert_eq!(product.name.as_deref(), Some("Tempest Dress"));
        assert_eq!(product.price, Some(128.0));
        assert_eq!(product.currency, None);
    }

    #[test]
    fn structured_data_found_inside_graph() {
        let body = r#"<html><head><script type="application/ld+json">
            {"@graph":[{"@type":"WebSite"},{"@type":["Thing","Product"],
             "name":"Squall Coat",
             "offers":[{"price":240,"priceCurrency":"EUR"}],
             "image":["https://cdn.x.com/1.jpg",{"url":"https://cdn.x.com/2.jpg"}]}]}
        </script></head><body></body></html>"#;
        let document = Html::parse_document(body);
        let product = structured_product(&document).expect("product node");
        assert_eq!(product.name.as_deref(), Some("Squall Coat"));
        assert_eq!(product.price, Some(240.0));
        assert_eq!(product.currency.as_deref(), Some("EUR"));
        assert_eq!(product.images.len(), 2);
    }

    #[test]
    fn product_links_are_same_origin_and_deduplicated() {
        let body = r#"<html><body>
            <a href="/products/a">A</a>
            <a href="https://shop.example.com/products/a#reviews">A again</a>
            <a href="/products/b">B</a>
            <a href="https://elsewhere.com/products/c">offsite</a>
            <a href="/about">not a product</a>
        </body></html>"#;
        let links = collect_product_links(body, "https://shop.example.com/dresses", "/products/");
        assert_eq!(
            links,
            vec![
                "https://shop.example.com/products/a",
                "https://shop.example.com/products/b",
            ]
        );
    }

    #[test]
    fn image_merge_preserves_first_seen_order() {
        let body = r#"<html><body>
            <img srcset="small.jpg 320w, large.jpg 1280w">
            <img src="plain.jpg">
            <img src="plain.jpg">
            <picture><source srcset="hero.jpg 2000w"><img src="hero-fallback.jpg"></picture>
            <div style="background-image: url('bg.jpg')"></div>
        </body></html>"#;
        let document = Html::parse_document(body);
        let images = collect_images(&document, body, "https://shop.example.com/products/a", None);
        assert_eq!(
            images,
            vec![
                "https://shop.example.com/large.jpg",
                "https://shop.example.com/plain.jpg",
                "https://shop.example.com/hero-fallback.jpg",
                "https://shop.example.com/hero.jpg",
                "https://shop.example.com/bg.jpg",
            ]
        );
    }

    #[test]
    fn category_comes_from_path_segment_before_marker() {
        assert_eq!(
            category_from_path("https://x.com/collections/dresses/products/tempest", "other"),
            "dresses"
        );
        assert_eq!(category_from_path("https://x.com/products/tempest", "other"), "other");
    }
}
