//! URL-to-product resolver.
//!
//! Tiered lookup: exact match on the normalized URL, then a fuzzy
//! trailing-path match, then a cached product-code lookup. An empty
//! result means "not found"; errors are reserved for genuine lookup
//! failure. The rich (image-bearing) view is preferred, with a columnar
//! view without images as fallback when it cannot be served.

use anyhow::Result;
use tracing::{debug, warn};
use url::Url;

use crate::domain::ProductMatch;
use crate::infrastructure::catalog_repository::{CatalogRepository, product_code_of};

/// Query keys stripped during normalization, alongside any key prefixed
/// `utm`.
const REMOVABLE_QUERY_KEYS: &[&str] = &[
    "fbclid", "gclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src", "cmp",
];

pub struct ProductResolver {
    catalog: CatalogRepository,
}

impl ProductResolver {
    pub fn new(catalog: CatalogRepository) -> Self {
        Self { catalog }
    }

    /// Resolve an arbitrary product URL to zero or more catalog matches.
    pub async fn resolve(&self, raw_url: &str) -> Result<Vec<ProductMatch>> {
        let normalized = normalize_url(raw_url);
        debug!("resolving {raw_url} (normalized {normalized})");

        // Tier 1: exact match on current URLs.
        match self.catalog.find_exact_with_images(&normalized).await {
            Ok(matches) if !matches.is_empty() => return Ok(matches),
            Ok(_) => {}
            Err(e) => {
                warn!("rich exact lookup failed, trying columnar view: {e:#}");
                let matches = self.catalog.find_exact_basic(&normalized).await?;
                if !matches.is_empty() {
                    return Ok(matches);
                }
            }
        }

        // Tier 2: fuzzy match on the trailing path+query fragment.
        if let Some(suffix) = trailing_fragment(&normalized) {
            match self.catalog.find_fuzzy_with_images(&suffix).await {
                Ok(matches) if !matches.is_empty() => return Ok(matches),
                Ok(_) => {}
                Err(e) => {
                    warn!("rich fuzzy lookup failed, trying columnar view: {e:#}");
                    let matches = self.catalog.find_fuzzy_basic(&suffix).await?;
                    if !matches.is_empty() {
                        return Ok(matches);
                    }
                }
            }
        }

        // Tier 3: cached product-code lookup, enriched with brand/style
        // names.
        if let Some(code) = product_code_of(&normalized) {
            let matches = self.catalog.find_by_product_code(&code).await?;
            if !matches.is_empty() {
                return Ok(matches);
            }
        }

        Ok(Vec::new())
    }
}

/// Normalize a product URL: lowercase host, drop tracking query keys,
/// collapse duplicate path slashes, strip trailing slash and fragment.
///
/// Idempotent, and never fails: malformed input falls back to the trimmed
/// raw string.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return trimmed.to_string();
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    let port = match parsed.port() {
        Some(port) => format!(":{port}"),
        None => String::new(),
    };

    // Collapsing duplicate slashes and stripping the trailing one in a
    // single pass over the segments.
    let collapsed: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let path = if collapsed.is_empty() {
        String::new()
    } else {
        format!("/{}", collapsed.join("/"))
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut kept_any = false;
    for (key, value) in parsed.query_pairs() {
        let lowered = key.to_ascii_lowercase();
        if lowered.starts_with("utm") || REMOVABLE_QUERY_KEYS.contains(&lowered.as_str()) {
            continue;
        }
        serializer.append_pair(&key, &value);
        kept_any = true;
    }
    let query = if kept_any {
        format!("?{}", serializer.finish())
    } else {
        String::new()
    };

    // Fragment is dropped by omission.
    format!("{scheme}://{host}{port}{path}{query}")
}

/// The post-host trailing fragment (path plus query) used by the fuzzy
/// tier.
pub fn trailing_fragment(normalized: &str) -> Option<String> {
    let parsed = Url::parse(normalized).ok()?;
    let path = parsed.path();
    if path.is_empty() || path == "/" {
        return None;
    }
    match parsed.query() {
        Some(query) => Some(format!("{path}?{query}")),
        None => Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalization_strips_tracking_and_fragment() {
        let raw = "HTTPS://Shop.Example.COM//collections//dresses/products/tempest-dress/?utm_source=ig&utm_campaign=x&fbclid=abc&size=m#details";
        assert_eq!(
            normalize_url(raw),
            "https://shop.example.com/collections/dresses/products/tempest-dress?size=m"
        );
    }

    #[test]
    fn normalization_is_idempotent_on_examples() {
        let cases = [
            "https://shop.example.com/products/a?utm_source=x",
            "https://shop.example.com//a//b/",
            "https://shop.example.com",
            "not a url at all",
            "   padded.example.com/x  ",
        ];
        for raw in cases {
            let once = normalize_url(raw);
            assert_eq!(normalize_url(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn malformed_input_falls_back_to_trimmed_raw() {
        assert_eq!(normalize_url("  ::::  "), "::::");
        assert_eq!(normalize_url("example.com/no-scheme"), "example.com/no-scheme");
    }

    #[test]
    fn trailing_fragment_includes_query() {
        assert_eq!(
            trailing_fragment("https://shop.example.com/products/a?size=m"),
            Some("/products/a?size=m".to_string())
        );
        assert_eq!(trailing_fragment("https://shop.example.com"), None);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(raw in "\\PC{0,80}") {
            let once = normalize_url(&raw);
            prop_assert_eq!(normalize_url(&once), once.clone());
        }

        #[test]
        fn normalize_never_panics_on_urlish_input(
            host in "[a-z]{1,10}\\.[a-z]{2,3}",
            path in "(/[a-zA-Z0-9_-]{0,12}){0,4}/?",
            query in "([a-z]{1,8}=[a-zA-Z0-9]{0,8}(&[a-z]{1,8}=[a-zA-Z0-9]{0,8}){0,3})?",
        ) {
            let raw = if query.is_empty() {
                format!("https://{host}{path}")
            } else {
                format!("https://{host}{path}?{query}")
            };
            let once = normalize_url(&raw);
            prop_assert_eq!(normalize_url(&once), once.clone());
        }
    }
}
