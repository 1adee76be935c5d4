//! Infrastructure layer
//!
//! Database access, page fetching, image archival, configuration and
//! logging. Everything here speaks `anyhow::Result` and is wired into
//! the application layer through constructor injection.

pub mod catalog_repository;
pub mod config;
pub mod database_connection;
pub mod image_archive;
pub mod logging;
pub mod page_fetcher;
pub mod queue_repository;

pub use catalog_repository::CatalogRepository;
pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use image_archive::{FsObjectStore, ImageArchive, ImageArchiver, ObjectStore};
pub use page_fetcher::{HttpPageFetcher, PageContext, PageFetcher};
pub use queue_repository::QueueRepository;
