//! CLI entry point.
//!
//! Exit code 0 on normal completion; setup errors (missing or unknown
//! job, unknown brand) abort with a non-zero exit rather than degrading
//! silently.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use catalog_ingest::adapters::{self, CrawlLimits};
use catalog_ingest::application::{IngestionService, ProductResolver, WorkerPool};
use catalog_ingest::infrastructure::{
    AppConfig, CatalogRepository, DatabaseConnection, FsObjectStore, HttpPageFetcher,
    ImageArchiver, QueueRepository, logging,
};

#[derive(Parser, Debug)]
#[command(name = "catalog-ingest")]
#[command(about = "Catalog ingestion pipeline and product URL resolver")]
#[command(version)]
struct Cli {
    /// SQLite database URL.
    #[arg(long, global = true, default_value = "sqlite:data/catalog.db")]
    database: String,

    /// Optional TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an ingestion job for a brand and category URL.
    InitJob {
        #[arg(long)]
        brand: String,
        #[arg(long)]
        category: String,
    },
    /// Crawl the job's category once and insert one task per PDP URL.
    SeedTasks {
        #[arg(long)]
        job: i64,
    },
    /// Drain the job's tasks until none are runnable.
    RunWorker {
        #[arg(long)]
        job: i64,
        /// Override the configured concurrency cap.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Resolve a raw product URL against the catalog.
    Resolve {
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let db = DatabaseConnection::new(&cli.database).await?;
    db.migrate().await?;
    let queue = QueueRepository::new(db.pool().clone());
    let catalog = CatalogRepository::new(db.pool().clone());

    match cli.command {
        Commands::InitJob { brand, category } => {
            let limits = CrawlLimits::from(&config.fetcher);
            if adapters::adapter_for_brand(&brand, limits).is_none() {
                bail!("no adapter registered for brand '{brand}'");
            }
            let fetcher = Arc::new(HttpPageFetcher::new(config.fetcher.clone())?);
            let service = IngestionService::new(queue, fetcher);
            let job_id = service.create_job(&brand, &category).await?;
            println!("{job_id}");
        }
        Commands::SeedTasks { job } => {
            let fetcher = Arc::new(HttpPageFetcher::new(config.fetcher.clone())?);
            let service = IngestionService::new(queue, fetcher);
            let record = service.require_job(job).await?;
            let limits = CrawlLimits::from(&config.fetcher);
            let adapter = adapters::adapter_for_brand(&record.brand, limits)
                .with_context(|| format!("no adapter registered for brand '{}'", record.brand))?;
            let inserted = service.seed_tasks(job, adapter).await?;
            println!("{inserted}");
        }
        Commands::RunWorker { job, concurrency } => {
            let mut worker_config = config.worker.clone();
            if let Some(concurrency) = concurrency {
                worker_config.concurrency = concurrency;
            }
            let record = queue
                .get_job(job)
                .await?
                .with_context(|| format!("unknown job {job}"))?;
            let limits = CrawlLimits::from(&config.fetcher);
            let adapter = adapters::adapter_for_brand(&record.brand, limits)
                .with_context(|| format!("no adapter registered for brand '{}'", record.brand))?;

            let fetcher = Arc::new(HttpPageFetcher::new(config.fetcher.clone())?);
            let store = Arc::new(FsObjectStore::new(&config.archive.root_dir));
            let archiver = Arc::new(ImageArchiver::new(store, &config.archive)?);

            let pool = WorkerPool::new(queue, catalog, archiver, fetcher, adapter, worker_config);
            let counts = pool.run(job).await?;
            println!(
                "done={} error={} queued={} running={}",
                counts.done, counts.error, counts.queued, counts.running
            );
        }
        Commands::Resolve { url } => {
            let resolver = ProductResolver::new(catalog);
            let matches = resolver.resolve(&url).await?;
            for product_match in &matches {
                println!("{}", serde_json::to_string(product_match)?);
            }
        }
    }

    Ok(())
}
