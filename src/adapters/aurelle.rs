//! Adapter for aurelle.com (Shopify-style storefront).
//!
//! Category pages lazy-load product cards, so the crawl relies on the
//! scroll-and-recount loop. PDPs carry a JSON-LD product node; the
//! selector candidates below cover themes where it is absent or
//! incomplete.

use anyhow::Result;
use async_trait::async_trait;

use super::SiteAdapter;
use super::extract::{
    self, CrawlLimits, PdpSelectors, dismiss_overlays, scroll_and_collect_links, settle_page,
};
use crate::domain::ParsedProduct;
use crate::infrastructure::page_fetcher::PageContext;

const BRAND: &str = "Aurelle";
const PRODUCT_PATH: &str = "/products/";
const DEFAULT_CATEGORY: &str = "uncategorized";
const DEFAULT_CURRENCY: &str = "USD";

const ANTIBOT_MARKERS: &[&str] = &["just a moment", "cf-chl", "challenge-platform"];

const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    ".cookie-banner button.accept",
    "button[data-consent-accept]",
];

const SELECTORS: PdpSelectors = PdpSelectors {
    name: &[
        "h1.product__title",
        "h1.product-single__title",
        ".product-meta h1",
        "h1",
    ],
    price: &[
        ".price-item--regular",
        ".product__price .money",
        "span.price",
        "meta[property='og:price:amount']",
    ],
    description: &[
        ".product__description",
        ".product-single__description",
        "div[itemprop='description']",
    ],
    color: &[
        ".product__color .selected-value",
        ".swatch input:checked + label",
    ],
};

pub struct AurelleAdapter {
    limits: CrawlLimits,
}

impl AurelleAdapter {
    pub fn new(limits: CrawlLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl SiteAdapter for AurelleAdapter {
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
            page.capture_failure("aurelle-extract").await.ok();
        }
        parsed
    }
}
