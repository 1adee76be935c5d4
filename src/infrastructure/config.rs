//! Application configuration.
//!
//! Loaded from an optional TOML file with environment variable overrides
//! (prefix `CATALOG`, `__` as section separator, e.g.
//! `CATALOG__WORKER__CONCURRENCY=5`). Every field has a default so the
//! CLI runs with no config file at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Upper bound on tasks claimed per poll of the queue; effective
    /// claims are further capped by `concurrency`.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: i64,
    /// Max concurrent in-flight extractions; each holds one page context.
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
    /// Max images archived per product.
    #[serde(default = "defaults::max_images_per_product")]
    pub max_images_per_product: usize,
}

/// Page fetcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
    /// Per-navigation timeout in seconds.
    #[serde(default = "defaults::navigation_timeout_seconds")]
    pub navigation_timeout_seconds: u64,
    #[serde(default = "defaults::max_requests_per_second")]
    pub max_requests_per_second: u32,
    /// Wait between anti-bot interstitial rechecks, in milliseconds.
    #[serde(default = "defaults::antibot_wait_ms")]
    pub antibot_wait_ms: u64,
    /// Bounded number of interstitial rechecks before giving up.
    #[serde(default = "defaults::max_antibot_checks")]
    pub max_antibot_checks: u32,
    /// Hard cap on scroll-and-recount rounds during category crawl.
    #[serde(default = "defaults::max_scroll_rounds")]
    pub max_scroll_rounds: u32,
    /// Stop scrolling after this many rounds without new links.
    #[serde(default = "defaults::stale_scroll_rounds")]
    pub stale_scroll_rounds: u32,
    /// Directory for failure page dumps; empty disables dumps.
    #[serde(default)]
    pub failure_dump_dir: String,
}

/// Image archival tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Local object store root (bucket root).
    #[serde(default = "defaults::archive_root")]
    pub root_dir: String,
    /// Per-image download timeout in seconds.
    #[serde(default = "defaults::download_timeout_seconds")]
    pub download_timeout_seconds: u64,
}

mod defaults {
    pub fn batch_size() -> i64 {
        50
    }
    pub fn concurrency() -> usize {
        3
    }
    pub fn max_images_per_product() -> usize {
        12
    }
    pub fn user_agent() -> String {
        "catalog-ingest/0.2".to_string()
    }
    pub fn navigation_timeout_seconds() -> u64 {
        30
    }
    pub fn max_requests_per_second() -> u32 {
        4
    }
    pub fn antibot_wait_ms() -> u64 {
        2_000
    }
    pub fn max_antibot_checks() -> u32 {
        5
    }
    pub fn max_scroll_rounds() -> u32 {
        30
    }
    pub fn stale_scroll_rounds() -> u32 {
        3
    }
    pub fn archive_root() -> String {
        "data/archive".to_string()
    }
    pub fn download_timeout_seconds() -> u64 {
        20
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            concurrency: defaults::concurrency(),
            max_images_per_product: defaults::max_images_per_product(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            navigation_timeout_seconds: defaults::navigation_timeout_seconds(),
            max_requests_per_second: defaults::max_requests_per_second(),
            antibot_wait_ms: defaults::antibot_wait_ms(),
            max_antibot_checks: defaults::max_antibot_checks(),
            max_scroll_rounds: defaults::max_scroll_rounds(),
            stale_scroll_rounds: defaults::stale_scroll_rounds(),
            failure_dump_dir: String::new(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::archive_root(),
            download_timeout_seconds: defaults::download_timeout_seconds(),
        }
    }
}

impl AppConfig {
    /// Load configuration, layering an optional TOML file under
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path.to_path_buf()).required(true),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("CATALOG").separator("__"),
            )
            .build()
            .context("failed to build configuration")?;

        settings
            .try_deserialize()
            .context("failed to deserialize configuration")
    }
}
