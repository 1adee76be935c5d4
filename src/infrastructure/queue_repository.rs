//! Job registry and durable task queue.
//!
//! The queue is the ingestion_task table, not an in-memory structure, so
//! a crashed worker loses nothing: status writes are the single source of
//! truth for progress. Claiming is a single conditional
//! `UPDATE .. RETURNING` that flips rows to running atomically, so two
//! workers can never dispatch the same task.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{IngestionJob, IngestionTask, JobStatus, MAX_TASK_RETRIES, TaskStatus};

/// Recorded task errors are truncated to this many characters.
const MAX_ERROR_LEN: usize = 1000;

#[derive(Clone)]
pub struct QueueRepository {
    pool: Arc<SqlitePool>,
}

/// Task status distribution for a job; the only health signal the
/// pipeline exposes.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TaskStatusCounts {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub error: i64,
}

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create a job for a (brand, category URL) pair. Jobs are never
    /// deleted.
    pub async fn create_job(&self, brand: &str, category_url: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO ingestion_job (brand, category_url, status)
            VALUES (?, ?, 'queued')
            RETURNING id
            "#,
        )
        .bind(brand)
        .bind(category_url)
        .fetch_one(&*self.pool)
        .await
        .context("failed to create ingestion job")?;

        let job_id: i64 = row.get("id");
        info!("created job {job_id} for brand '{brand}'");
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: i64) -> Result<Option<IngestionJob>> {
        let row = sqlx::query(
            r#"
            SELECT id, brand, category_url, status, total_tasks, started_at, finished_at
            FROM ingestion_job WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|row| job_from_row(&row)).transpose()
    }

    /// Insert one task per discovered PDP URL. Duplicates within the
    /// batch or against previously seeded tasks are ignored, so
    /// re-seeding a job is a no-op for URLs already queued. Returns the
    /// number of newly inserted tasks.
    pub async fn seed_tasks(&self, job_id: i64, pdp_urls: &[String]) -> Result<usize> {
        let mut inserted = 0usize;
        for url in pdp_urls {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO ingestion_task (job_id, pdp_url, status)
                VALUES (?, ?, 'queued')
                "#,
            )
            .bind(job_id)
            .bind(url)
            .execute(&*self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        // The job is implicitly running once tasks exist.
        sqlx::query(
            r#"
            UPDATE ingestion_job
            SET status = 'running',
                total_tasks = (SELECT COUNT(*) FROM ingestion_task WHERE job_id = ?1),
                started_at = COALESCE(started_at, ?2)
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;

        info!("seeded {inserted} new tasks for job {job_id}");
        Ok(inserted)
    }

    /// Atomically claim up to `limit` runnable tasks in FIFO (id
    /// ascending) order, flipping them to running in the same statement.
    ///
    /// Runnable means queued, or errored with retry budget left. A task
    /// at the retry cap stays terminal and is never returned again.
    pub async fn claim_runnable_tasks(&self, job_id: i64, limit: i64) -> Result<Vec<IngestionTask>> {
        let rows = sqlx::query(
            r#"
            UPDATE ingestion_task
            SET status = 'running', started_at = ?1
            WHERE id IN (
                SELECT id FROM ingestion_task
                WHERE job_id = ?2
                  AND (status = 'queued' OR (status = 'error' AND retries < ?3))
                ORDER BY id ASC
                LIMIT ?4
            )
            RETURNING id, job_id, pdp_url, status, retries, last_error, started_at, finished_at
            "#,
        )
        .bind(Utc::now())
        .bind(job_id)
        .bind(MAX_TASK_RETRIES)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .context("failed to claim runnable tasks")?;

        let mut tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not guarantee row order; restore FIFO here.
        tasks.sort_by_key(|t| t.id);

        debug!("claimed {} tasks for job {job_id}", tasks.len());
        Ok(tasks)
    }

    pub async fn mark_done(&self, task_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_task
            SET status = 'done', finished_at = ?, last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(task_id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Record a failure and consume one retry. The task becomes runnable
    /// again on the next claim until the retry cap is reached.
    pub async fn mark_error(&self, task_id: i64, message: &str) -> Result<()> {
        let truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
        sqlx::query(
            r#"
            UPDATE ingestion_task
            SET status = 'error', retries = retries + 1, last_error = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(truncated)
        .bind(Utc::now())
        .bind(task_id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Declare the job done. Completion is independent of how many tasks
    /// are permanently errored; callers query `task_status_counts` to
    /// assess job health.
    pub async fn finish_job(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_job SET status = 'done', finished_at = ? WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("unknown job {job_id}");
        }
        info!("job {job_id} done");
        Ok(())
    }

    pub async fn task_status_counts(&self, job_id: i64) -> Result<TaskStatusCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n FROM ingestion_task
            WHERE job_id = ? GROUP BY status
            "#,
        )
        .bind(job_id)
        .fetch_all(&*self.pool)
        .await?;

        let mut counts = TaskStatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match status.as_str() {
                "queued" => counts.queued = n,
                "running" => counts.running = n,
                "done" => counts.done = n,
                "error" => counts.error = n,
                _ => {}
            }
        }
        Ok(counts)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<IngestionJob> {
    let status: String = row.get("status");
    Ok(IngestionJob {
        id: row.get("id"),
        brand: row.get("brand"),
        category_url: row.get("category_url"),
        status: JobStatus::parse(&status)
            .with_context(|| format!("unknown job status '{status}'"))?,
        total_tasks: row.get("total_tasks"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}

fn task_from_row(row: &SqliteRow) -> Result<IngestionTask> {
    let status: String = row.get("status");
    Ok(IngestionTask {
        id: row.get("id"),
        job_id: row.get("job_id"),
        pdp_url: row.get("pdp_url"),
        status: TaskStatus::parse(&status)
            .with_context(|| format!("unknown task status '{status}'"))?,
        retries: row.get("retries"),
        last_error: row.get("last_error"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}
