//! Page fetching capability.
//!
//! The orchestration core only sees the narrow `PageFetcher`/`PageContext`
//! interface (open page, navigate, read content, query, scroll, failure
//! capture), so it is testable against a fake without a real browser.
//! The shipped implementation drives plain HTTP with rate limiting.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use scraper::{Html, Selector};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::config::FetcherConfig;

/// Opens isolated page contexts. Each concurrent worker task holds one.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn PageContext>>;
}

/// One browsing context. Navigation, anti-bot waits and scrolling are the
/// only suspending operations; everything between them is synchronous.
#[async_trait]
pub trait PageContext: Send {
    /// Navigate to a URL and wait for content, bounded by the fetcher's
    /// per-navigation timeout.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Full document markup of the current page.
    async fn content(&mut self) -> Result<String>;

    /// Text of the first element matching a CSS selector, if any.
    async fn query_text(&mut self, selector: &str) -> Result<Option<String>>;

    /// Scroll toward the end of the page to trigger lazy-loaded content.
    async fn scroll_to_bottom(&mut self) -> Result<()>;

    /// Dismiss an overlay matching the selector, if present. Returns
    /// whether anything was dismissed.
    async fn dismiss(&mut self, selector: &str) -> Result<bool>;

    /// Capture the current page state for post-mortem inspection.
    async fn capture_failure(&mut self, label: &str) -> Result<()>;
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// HTTP-backed fetcher shared by all page contexts; the rate limiter is
/// global so concurrent contexts respect the same per-site budget.
pub struct HttpPageFetcher {
    client: Client,
    rate_limiter: Arc<DirectRateLimiter>,
    config: FetcherConfig,
}

impl HttpPageFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.navigation_timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            config,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn open_page(&self) -> Result<Box<dyn PageContext>> {
        Ok(Box::new(HttpPageContext {
            client: self.client.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            dump_dir: if self.config.failure_dump_dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(&self.config.failure_dump_dir))
            },
            url: None,
            body: String::new(),
        }))
    }
}

struct HttpPageContext {
    client: Client,
    rate_limiter: Arc<DirectRateLimiter>,
    dump_dir: Option<PathBuf>,
    url: Option<String>,
    body: String,
}

#[async_trait]
impl PageContext for HttpPageContext {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.rate_limiter.until_ready().await;
        debug!("fetching {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?;

        if !response.status().is_success() {
            bail!("HTTP {} for {url}", response.status());
        }

        self.body = response
            .text()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        if self.url.is_none() {
            bail!("no page loaded");
        }
        Ok(self.body.clone())
    }

    async fn query_text(&mut self, selector: &str) -> Result<Option<String>> {
        let compiled = Selector::parse(selector)
            .map_err(|e| anyhow!("invalid selector '{selector}': {e}"))?;
        let document = Html::parse_document(&self.body);
        let text = document.select(&compiled).next().map(|element| {
            element.text().collect::<String>().trim().to_string()
        });
        Ok(text)
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        // Plain HTTP has no viewport; the full document is already loaded,
        // so the adapter's recount loop converges on the first stale round.
        Ok(())
    }

    async fn dismiss(&mut self, selector: &str) -> Result<bool> {
        // Static markup has nothing to click; report whether the overlay
        // exists so callers can log it.
        Ok(self.query_text(selector).await?.is_some())
    }

    async fn capture_failure(&mut self, label: &str) -> Result<()> {
        let Some(dir) = &self.dump_dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        let file = dir.join(format!("{label}.html"));
        if let Err(e) = tokio::fs::write(&file, &self.body).await {
            warn!("failed to write failure dump {}: {e}", file.display());
        }
        Ok(())
    }
}
