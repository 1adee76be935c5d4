//! Failure classes the worker distinguishes when recording task errors.

use thiserror::Error;

/// Task-level failure taxonomy.
///
/// Navigation and extraction failures consume the same retry budget; a
/// later attempt may succeed if the page was transiently broken.
/// Persistence failures on the style/variant upsert are fatal to the
/// task, while best-effort denormalizations are swallowed upstream.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}
