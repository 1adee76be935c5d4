//! Database connection and pool management.
//!
//! SQLite via sqlx. The schema is created with idempotent
//! `CREATE TABLE IF NOT EXISTS` statements on startup; the ingestion_task
//! table doubles as the durable work queue.

use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create the database file and its directory if missing
        let db_path = if database_url.starts_with("sqlite://") {
            database_url.trim_start_matches("sqlite://")
        } else if database_url.starts_with("sqlite:") {
            database_url.trim_start_matches("sqlite:")
        } else {
            database_url
        };

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS brand (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS style (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                brand_id INTEGER NOT NULL REFERENCES brand (id),
                category_id INTEGER NOT NULL REFERENCES category (id),
                name TEXT NOT NULL,
                gender TEXT,
                description TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                UNIQUE (brand_id, category_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS variant (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                style_id INTEGER NOT NULL UNIQUE REFERENCES style (id),
                color TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS product_url (
                variant_id INTEGER NOT NULL REFERENCES variant (id),
                url TEXT NOT NULL UNIQUE,
                is_current BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                variant_id INTEGER NOT NULL REFERENCES variant (id),
                list_price REAL NOT NULL,
                currency TEXT NOT NULL,
                captured_at DATETIME NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS product_images (
                variant_id INTEGER NOT NULL REFERENCES variant (id),
                style_id INTEGER NOT NULL REFERENCES style (id),
                original_url TEXT NOT NULL,
                position INTEGER NOT NULL,
                storage_path TEXT NOT NULL,
                is_primary BOOLEAN NOT NULL DEFAULT 0,
                width INTEGER,
                height INTEGER,
                UNIQUE (variant_id, original_url)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_job (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                brand TEXT NOT NULL,
                category_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                total_tasks INTEGER NOT NULL DEFAULT 0,
                started_at DATETIME,
                finished_at DATETIME
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ingestion_task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES ingestion_job (id),
                pdp_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                retries INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                started_at DATETIME,
                finished_at DATETIME,
                UNIQUE (job_id, pdp_url)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS resolver_cache (
                product_code TEXT NOT NULL UNIQUE,
                brand_id INTEGER NOT NULL REFERENCES brand (id),
                style_id INTEGER NOT NULL REFERENCES style (id)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_task_job_status
                ON ingestion_task (job_id, status)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_price_history_variant
                ON price_history (variant_id, captured_at)
            "#,
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}
