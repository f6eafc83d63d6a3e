//! Tracing subscriber setup for the ingest server.
//!
//! Session crates log with structured fields (`node`, `height`, `voter`,
//! `kind`); `json` output keeps them as separate keys for log pipelines.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize tracing with the given level and output format.
///
/// `RUST_LOG` overrides `level` when set, e.g. `tally_node=debug` to trace
/// one crate. `format` is `"json"` (one object per line) or `"text"`;
/// unrecognised values fall back to text.
pub fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
