//! Logging initialization.
//!
//! `RUST_LOG` overrides the default filter. Initialization is idempotent
//! so tests and the CLI can both call it.

use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_DIRECTIVES: &str = "catalog_ingest=info,sqlx=warn,warn";

/// Install the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
