//! Content-addressed image archival.
//!
//! Each discovered image is downloaded, hashed and stored under a
//! deterministic object path, so re-running a task re-derives the same
//! path and the store's skip-on-duplicate put makes the whole step
//! idempotent under retries.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::config::ArchiveConfig;

/// Object storage seam. `put` treats "object already exists" as success.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local-directory bucket.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.root.join(path);
        if tokio::fs::try_exists(&target).await? {
            debug!("object {path} already archived, skipping");
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write object {path}"))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.root.join(path)).await?)
    }
}

/// Archival capability consumed by the worker pool.
#[async_trait]
pub trait ImageArchive: Send + Sync {
    /// Archive one image and return its storage path.
    async fn archive_image(
        &self,
        style_id: i64,
        variant_id: i64,
        source_url: &str,
        position: usize,
    ) -> Result<String>;
}

pub struct ImageArchiver {
    store: Arc<dyn ObjectStore>,
    client: Client,
}

impl ImageArchiver {
    pub fn new(store: Arc<dyn ObjectStore>, config: &ArchiveConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_seconds))
            .build()
            .context("failed to create image download client")?;
        Ok(Self { store, client })
    }

    /// Store already-downloaded bytes under the deterministic path.
    pub async fn archive_bytes(
        &self,
        style_id: i64,
        variant_id: i64,
        source_url: &str,
        position: usize,
        bytes: &[u8],
    ) -> Result<String> {
        let digest = content_hash(bytes);
        let ext = extension_of(source_url);
        let path = storage_path(style_id, variant_id, position, &digest, ext);
        self.store.put(&path, bytes).await?;
        Ok(path)
    }
}

#[async_trait]
impl ImageArchive for ImageArchiver {
    /// Download, hash and store one image; returns the storage path.
    async fn archive_image(
        &self,
        style_id: i64,
        variant_id: i64,
        source_url: &str,
        position: usize,
    ) -> Result<String> {
        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .with_context(|| format!("failed to download image {source_url}"))?;
        if !response.status().is_success() {
            bail!("HTTP {} downloading image {source_url}", response.status());
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read image body {source_url}"))?;

        self.archive_bytes(style_id, variant_id, source_url, position, &bytes)
            .await
    }
}

/// First 16 hex chars of the content digest.
pub(crate) fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().as_str()[..16].to_string()
}

/// Deterministic object path under the bucket root.
pub(crate) fn storage_path(
    style_id: i64,
    variant_id: i64,
    position: usize,
    hash: &str,
    ext: &str,
) -> String {
    format!("styles/{style_id}/variants/{variant_id}/{position}-{hash}.{ext}")
}

/// Extension inferred from the URL suffix; jpeg when unrecognized.
pub(crate) fn extension_of(source_url: &str) -> &'static str {
    let path = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url);
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") => "jpg",
        Some("jpeg") => "jpeg",
        Some("png") => "png",
        Some("webp") => "webp",
        Some("gif") => "gif",
        Some("avif") => "avif",
        _ => "jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extension_inference_defaults_to_jpeg() {
        assert_eq!(extension_of("https://cdn.x.com/a/img1.jpg?w=1200"), "jpg");
        assert_eq!(extension_of("https://cdn.x.com/a/img1.WEBP"), "webp");
        assert_eq!(extension_of("https://cdn.x.com/a/img1"), "jpeg");
        assert_eq!(extension_of("https://cdn.x.com/render?id=42"), "jpeg");
    }

    #[test]
    fn storage_path_is_deterministic() {
        let hash = content_hash(b"pixels");
        assert_eq!(hash.len(), 16);
        assert_eq!(
            storage_path(7, 9, 0, &hash, "jpg"),
            format!("styles/7/variants/9/0-{hash}.jpg")
        );
    }

    #[tokio::test]
    async fn put_skips_existing_objects() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FsObjectStore::new(dir.path());

        store.put("styles/1/variants/1/0-aa.jpg", b"first").await?;
        // Second put with different bytes is treated as success and the
        // original object is left untouched.
        store.put("styles/1/variants/1/0-aa.jpg", b"second").await?;

        let stored = tokio::fs::read(dir.path().join("styles/1/variants/1/0-aa.jpg")).await?;
        assert_eq!(stored, b"first");
        assert!(store.exists("styles/1/variants/1/0-aa.jpg").await?);
        Ok(())
    }

    #[tokio::test]
    async fn archive_bytes_round_trip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let archiver = ImageArchiver::new(store.clone(), &ArchiveConfig::default())?;

        let path_a = archiver
            .archive_bytes(3, 4, "https://cdn.x.com/img1.jpg", 0, b"pixels")
            .await?;
        let path_b = archiver
            .archive_bytes(3, 4, "https://cdn.x.com/img1.jpg", 0, b"pixels")
            .await?;
        assert_eq!(path_a, path_b);
        assert!(store.exists(&path_a).await?);
        Ok(())
    }
}
