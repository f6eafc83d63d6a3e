//! Command line and server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tally_node::SessionConfig;

/// Tally telemetry ingest server.
#[derive(Parser, Debug)]
#[command(name = "tally-server", version, about = "Blockchain node telemetry ingest server")]
pub struct Args {
    /// Address to accept node connections on
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Geolocation endpoint; `{ip}` is replaced with the node address.
    /// Lookups are disabled when unset.
    #[arg(long)]
    geo_url: Option<String>,

    /// Block heights of consensus data kept per node
    #[arg(long, default_value_t = tally_core::constants::MAX_CACHE_HEIGHTS)]
    cache_heights: usize,

    /// Seconds of silence before a node is disconnected
    #[arg(long, default_value_t = tally_core::constants::SESSION_TIMEOUT_MS / 1_000)]
    idle_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub log_level: String,
    pub log_format: String,
    pub geo_url: Option<String>,
    pub session: SessionConfig,
}

impl Args {
    /// Convert CLI args into a [`ServerConfig`].
    pub fn into_config(self) -> Result<ServerConfig> {
        if self.cache_heights == 0 {
            bail!("--cache-heights must be at least 1");
        }
        if self.idle_timeout_secs == 0 {
            bail!("--idle-timeout-secs must be at least 1");
        }

        let defaults = SessionConfig::default();
        // At least two ticks per idle window.
        let tick_interval = defaults
            .tick_interval
            .min(Duration::from_secs(self.idle_timeout_secs) / 2);

        Ok(ServerConfig {
            bind: self.bind,
            log_level: self.log_level,
            log_format: self.log_format,
            geo_url: self.geo_url,
            session: SessionConfig {
                cache_heights: self.cache_heights,
                idle_timeout_ms: self.idle_timeout_secs * 1_000,
                tick_interval,
                ..defaults
            },
        })
    }
}
