//! Per-site adapters.
//!
//! Each supported brand implements the `SiteAdapter` capability pair:
//! `crawl_category` enumerates PDP URLs and `extract_pdp` turns one PDP
//! into a `ParsedProduct`. Adapters are selected by a registry keyed on
//! brand name.

pub mod aurelle;
pub mod extract;
pub mod novamode;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::ParsedProduct;
use crate::infrastructure::page_fetcher::PageContext;

pub use extract::CrawlLimits;

/// Site-specific crawling and extraction, polymorphic over brand.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Canonical brand name this adapter serves.
    fn brand(&self) -> &str;

    /// Enumerate PDP URLs from a category page: same-origin product-path
    /// links, de-duplicated, in first-seen order.
    async fn crawl_category(
        &self,
        page: &mut dyn PageContext,
        category_url: &str,
    ) -> Result<Vec<String>>;

    /// Extract one product from its detail page. Fails when no name can
    /// be extracted.
    async fn extract_pdp(
        &self,
        page: &mut dyn PageContext,
        pdp_url: &str,
    ) -> Result<ParsedProduct>;
}

/// Look up the adapter for a brand name, case-insensitively.
pub fn adapter_for_brand(name: &str, limits: CrawlLimits) -> Option<Arc<dyn SiteAdapter>> {
    match name.to_ascii_lowercase().as_str() {
        "aurelle" => Some(Arc::new(aurelle::AurelleAdapter::new(limits))),
        "novamode" => Some(Arc::new(novamode::NovamodeAdapter::new(limits))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_case_insensitive() {
        assert!(adapter_for_brand("Aurelle", CrawlLimits::default()).is_some());
        assert!(adapter_for_brand("NOVAMODE", CrawlLimits::default()).is_some());
        assert!(adapter_for_brand("unknown-brand", CrawlLimits::default()).is_none());
    }
}
