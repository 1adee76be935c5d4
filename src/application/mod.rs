//! Application layer
//!
//! Orchestration services wiring the queue, adapters, persistence and
//! archival together: job creation/seeding, the bounded worker pool, and
//! the URL-to-product resolver.

pub mod ingestion;
pub mod resolver;
pub mod worker_pool;

pub use ingestion::IngestionService;
pub use resolver::{ProductResolver, normalize_url};
pub use worker_pool::WorkerPool;
