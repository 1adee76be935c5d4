//! Domain layer
//!
//! Core catalog entities, the ingestion job/task model and the error
//! taxonomy shared across the pipeline.

pub mod catalog;
pub mod error;
pub mod ingestion;

pub use catalog::{ParsedProduct, ProductImage, ProductMatch};
pub use error::IngestError;
pub use ingestion::{IngestionJob, IngestionTask, JobStatus, TaskStatus, MAX_TASK_RETRIES};
