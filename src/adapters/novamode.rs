//! Adapter for novamode.com.
//!
//! Novamode paginates server-side and rarely ships structured data, so
//! the selector fallbacks do most of the work. Product paths use the
//! short `/p/` prefix.

use anyhow::Result;
use async_trait::async_trait;

use super::SiteAdapter;
use super::extract::{
    self, CrawlLimits, PdpSelectors, dismiss_overlays, scroll_and_collect_links, settle_page,
};
use crate::domain::ParsedProduct;
use crate::infrastructure::page_fetcher::PageContext;

const BRAND: &str = "Novamode";
const PRODUCT_PATH: &str = "/p/";
const DEFAULT_CATEGORY: &str = "apparel";
const DEFAULT_CURRENCY: &str = "USD";

const ANTIBOT_MARKERS: &[&str] = &["just a moment", "px-captcha", "access denied"];

const CONSENT_SELECTORS: &[&str] = &[
    "#consent-banner .agree",
    "button.cookie-accept",
];

const SELECTORS: PdpSelectors = PdpSelectors {
    name: &[
        "h1.pdp-name",
        ".product-detail h1",
        "h1[data-test='product-title']",
    ],
    price: &[
        ".pdp-price .value",
        ".price-sales",
        "span[data-test='product-price']",
        "meta[itemprop='price']",
    ],
    description: &[
        ".pdp-description",
        "#product-details .copy",
    ],
    color: &[
        ".pdp-color-name",
        ".color-selector .is-selected",
    ],
};

pub struct NovamodeAdapter {
    limits: CrawlLimits,
}

impl NovamodeAdapter {
    pub fn new(limits: CrawlLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl SiteAdapter for NovamodeAdapter {
    fn brand(&self) -> &str {
        BRAND
    }

    async fn crawl_category(
        &self,
        page: &mut dyn PageContext,
        category_url: &str,
    ) -> Result<Vec<String>> {
        settle_page(page, category_url, ANTIBOT_MARKERS, &self.limits).await?;
        dismiss_overlays(page, CONSENT_SELECTORS).await;
        scroll_and_collect_links(page, category_url, PRODUCT_PATH, &self.limits).await
    }

    async fn extract_pdp(
        &self,
        page: &mut dyn PageContext,
        pdp_url: &str,
    ) -> Result<ParsedProduct> {
        settle_page(page, pdp_url, ANTIBOT_MARKERS, &self.limits).await?;
        let body = page.content().await?;
        let parsed = extract::parse_pdp_document(
            &body,
            pdp_url,
            BRAND,
            &SELECTORS,
            DEFAULT_CATEGORY,
            DEFAULT_CURRENCY,
        );
        if parsed.is_err() {
            page.capture_failure("novamode-extract").await.ok();
        }
        parsed
    }
}
