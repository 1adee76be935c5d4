//! Job creation and task seeding.

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::info;

use crate::adapters::SiteAdapter;
use crate::domain::IngestionJob;
use crate::infrastructure::page_fetcher::PageFetcher;
use crate::infrastructure::queue_repository::QueueRepository;

pub struct IngestionService {
    queue: QueueRepository,
    fetcher: Arc<dyn PageFetcher>,
}

impl IngestionService {
    pub fn new(queue: QueueRepository, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { queue, fetcher }
    }

    /// Create an ingestion job for a (brand, category URL) pair.
    pub async fn create_job(&self, brand: &str, category_url: &str) -> Result<i64> {
        self.queue.create_job(brand, category_url).await
    }

    pub async fn require_job(&self, job_id: i64) -> Result<IngestionJob> {
        match self.queue.get_job(job_id).await? {
            Some(job) => Ok(job),
            None => bail!("unknown job {job_id}"),
        }
    }

    /// Crawl the job's category once and insert one task per discovered
    /// PDP URL. URLs already queued for this job are ignored.
    pub async fn seed_tasks(&self, job_id: i64, adapter: Arc<dyn SiteAdapter>) -> Result<usize> {
        let job = self.require_job(job_id).await?;

        let mut page = self
            .fetcher
            .open_page()
            .await
            .context("failed to open page for category crawl")?;
        let pdp_urls = adapter
            .crawl_category(&mut *page, &job.category_url)
            .await
            .with_context(|| format!("category crawl failed for {}", job.category_url))?;

        info!(
            "category {} yielded {} PDP URLs",
            job.category_url,
            pdp_urls.len()
        );
        self.queue.seed_tasks(job_id, &pdp_urls).await
    }
}
