//! Catalog ingestion pipeline.
//!
//! Crawls e-commerce category pages into per-URL extraction tasks,
//! drains them through a bounded worker pool into a normalized catalog
//! store with content-addressed image archival, and resolves arbitrary
//! product URLs back to catalog entries.

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
