//! Bounded worker pool draining a job's task queue.
//!
//! Pull-based: the pool re-claims a fresh wave from the database after
//! each one drains, so tasks seeded by a concurrent process are picked up
//! and memory stays bounded regardless of catalog size. Concurrency is
//! capped by a semaphore, and claim waves are no larger than the cap, so
//! the queue's running status tracks actual in-flight work.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::adapters::SiteAdapter;
use crate::domain::{IngestError, IngestionTask, ProductImage};
use crate::infrastructure::config::WorkerConfig;
use crate::infrastructure::catalog_repository::CatalogRepository;
use crate::infrastructure::image_archive::ImageArchive;
use crate::infrastructure::page_fetcher::PageFetcher;
use crate::infrastructure::queue_repository::{QueueRepository, TaskStatusCounts};

/// A job is declared done once this many consecutive claims come back
/// empty.
const EMPTY_POLLS_BEFORE_DONE: u32 = 2;

#[derive(Clone)]
pub struct WorkerPool {
    queue: QueueRepository,
    catalog: CatalogRepository,
    archiver: Arc<dyn ImageArchive>,
    fetcher: Arc<dyn PageFetcher>,
    adapter: Arc<dyn SiteAdapter>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: QueueRepository,
        catalog: CatalogRepository,
        archiver: Arc<dyn ImageArchive>,
        fetcher: Arc<dyn PageFetcher>,
        adapter: Arc<dyn SiteAdapter>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            catalog,
            archiver,
            fetcher,
            adapter,
            config,
        }
    }

    /// Drain the job's runnable tasks until none remain, then mark the
    /// job done. Task-level failures never abort the loop; the returned
    /// status distribution is the caller's health signal.
    pub async fn run(&self, job_id: i64) -> Result<TaskStatusCounts> {
        // Fatal setup error: an unknown job aborts the invocation.
        self.queue
            .get_job(job_id)
            .await?
            .with_context(|| format!("unknown job {job_id}"))?;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut empty_polls = 0u32;

        // Claim waves no larger than the concurrency cap, so the number
        // of tasks in running status never exceeds the number actually
        // in flight.
        let claim_limit = self.config.batch_size.min(self.config.concurrency as i64);

        loop {
            let batch = self
                .queue
                .claim_runnable_tasks(job_id, claim_limit)
                .await?;

            if batch.is_empty() {
                empty_polls += 1;
                if empty_polls >= EMPTY_POLLS_BEFORE_DONE {
                    break;
                }
                continue;
            }
            empty_polls = 0;

            let mut handles = Vec::with_capacity(batch.len());
            for task in batch {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .context("worker semaphore closed")?;
                let pool = self.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    pool.process_task(&task).await;
                }));
            }
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    error!("worker task panicked: {e}");
                }
            }
        }

        self.queue.finish_job(job_id).await?;
        let counts = self.queue.task_status_counts(job_id).await?;
        info!(
            "job {job_id} drained: {} done, {} errored",
            counts.done, counts.error
        );
        Ok(counts)
    }

    /// Run one task and record its outcome. The status write is the only
    /// side channel; a task is never partially marked done.
    async fn process_task(&self, task: &IngestionTask) {
        match self.extract_and_persist(task).await {
            Ok(()) => {
                if let Err(e) = self.queue.mark_done(task.id).await {
                    error!("failed to mark task {} done: {e:#}", task.id);
                }
            }
            Err(e) => {
                warn!("task {} ({}) failed: {e:#}", task.id, task.pdp_url);
                if let Err(mark_err) = self.queue.mark_error(task.id, &format!("{e:#}")).await {
                    error!("failed to record error for task {}: {mark_err:#}", task.id);
                }
            }
        }
    }

    async fn extract_and_persist(&self, task: &IngestionTask) -> Result<(), IngestError> {
        // Isolated browsing context per task.
        let mut page = self
            .fetcher
            .open_page()
            .await
            .map_err(|e| IngestError::Navigation(format!("{e:#}")))?;
        let parsed = self
            .adapter
            .extract_pdp(&mut *page, &task.pdp_url)
            .await
            .map_err(|e| IngestError::Extraction(format!("{e:#}")))?;

        let (style_id, variant_id) = self
            .catalog
            .upsert_parsed_product(&parsed, &task.pdp_url)
            .await
            .map_err(|e| IngestError::Persistence(format!("{e:#}")))?;

        for (position, image_url) in parsed
            .images
            .iter()
            .take(self.config.max_images_per_product)
            .enumerate()
        {
            let storage_path = self
                .archiver
                .archive_image(style_id, variant_id, image_url, position)
                .await
                .map_err(|e| {
                    IngestError::Persistence(format!("image archival failed for {image_url}: {e:#}"))
                })?;
            self.catalog
                .upsert_image(&ProductImage {
                    variant_id,
                    style_id,
                    original_url: image_url.clone(),
                    position: position as i64,
                    storage_path,
                    is_primary: position == 0,
                    width: None,
                    height: None,
                })
                .await
                .map_err(|e| IngestError::Persistence(format!("{e:#}")))?;
        }

        Ok(())
    }
}
