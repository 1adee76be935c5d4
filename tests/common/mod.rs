//! Shared test doubles: a canned-page fetcher and a recording image
//! archive, so the pipeline runs without a browser or network.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use catalog_ingest::infrastructure::image_archive::ImageArchive;
use catalog_ingest::infrastructure::page_fetcher::{PageContext, PageFetcher};

/// Serves canned HTML bodies keyed by URL and records the peak number of
/// concurrent navigations.
pub struct FakePageFetcher {
    pages: Arc<HashMap<String, String>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    navigation_delay: Duration,
}

impl FakePageFetcher {
    pub fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages: Arc::new(pages),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            navigation_delay: Duration::from_millis(0),
        }
    }

    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn peak_concurrent_navigations(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for FakePageFetcher {
    async fn open_page(&self) -> Result<Box<dyn PageContext>> {
        Ok(Box::new(FakePage {
            pages: Arc::clone(&self.pages),
            in_flight: Arc::clone(&self.in_flight),
            peak_in_flight: Arc::clone(&self.peak_in_flight),
            navigation_delay: self.navigation_delay,
            body: String::new(),
        }))
    }
}

struct FakePage {
    pages: Arc<HashMap<String, String>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    navigation_delay: Duration,
    body: String,
}

#[async_trait]
impl PageContext for FakePage {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.navigation_delay).await;
        let result = match self.pages.get(url) {
            Some(body) => {
                self.body = body.clone();
                Ok(())
            }
            None => Err(anyhow!("navigation timeout for {url}")),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.body.clone())
    }

    async fn query_text(&mut self, selector: &str) -> Result<Option<String>> {
        let compiled =
            Selector::parse(selector).map_err(|e| anyhow!("invalid selector: {e}"))?;
        let document = Html::parse_document(&self.body);
        Ok(document
            .select(&compiled)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string()))
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        Ok(())
    }

    async fn dismiss(&mut self, _selector: &str) -> Result<bool> {
        Ok(false)
    }

    async fn capture_failure(&mut self, _label: &str) -> Result<()> {
        Ok(())
    }
}

/// Records archive calls instead of downloading; returns deterministic
/// storage paths.
#[derive(Default)]
pub struct RecordingArchive {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageArchive for RecordingArchive {
    async fn archive_image(
        &self,
        style_id: i64,
        variant_id: i64,
        source_url: &str,
        position: usize,
    ) -> Result<String> {
        self.calls.lock().await.push(source_url.to_string());
        Ok(format!(
            "styles/{style_id}/variants/{variant_id}/{position}-testhash.jpg"
        ))
    }
}
