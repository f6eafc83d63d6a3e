//! Session configuration.
//!
//! Provides [`SessionConfig`] with defaults taken from
//! [`tally_core::constants`]. The server overrides individual fields from its
//! command line.

use std::time::Duration;

use tally_core::constants::{
    BLOCK_COALESCE_WINDOW_MS, BLOCK_TIME_HISTORY, HANDSHAKE_BUFFER_DEPTH, HANDSHAKE_TIMEOUT,
    HARDWARE_HISTORY, MAX_CACHE_HEIGHTS, SESSION_TIMEOUT_MS, SIGNIFICANT_BLOCK_TIME_MS,
    TIMEOUT_TICK,
};

/// Tunables shared by every node session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for `system.connected`.
    pub handshake_timeout: Duration,
    /// Messages buffered while the handshake is pending.
    pub handshake_buffer: usize,
    /// Silence after which a session is disconnected, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Interval of the timeout/ping tick.
    pub tick_interval: Duration,
    /// Block-time samples in the rolling average.
    pub block_time_history: usize,
    /// Samples kept per hardware series.
    pub hardware_history: usize,
    /// Distinct heights kept in the consensus view.
    pub cache_heights: usize,
    /// Coalescing window for sub-threshold block events, in milliseconds.
    pub block_coalesce_ms: u64,
    /// Block times above this are reported immediately, in milliseconds.
    pub significant_block_time_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            handshake_buffer: HANDSHAKE_BUFFER_DEPTH,
            idle_timeout_ms: SESSION_TIMEOUT_MS,
            tick_interval: TIMEOUT_TICK,
            block_time_history: BLOCK_TIME_HISTORY,
            hardware_history: HARDWARE_HISTORY,
            cache_heights: MAX_CACHE_HEIGHTS,
            block_coalesce_ms: BLOCK_COALESCE_WINDOW_MS,
            significant_block_time_ms: SIGNIFICANT_BLOCK_TIME_MS,
        }
    }
}
