//! Protocol and session constants. Durations are milliseconds unless the
//! type says otherwise.

use std::time::Duration;

/// How long an accepted connection may take to send `system.connected`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Non-identity messages retained while the handshake is pending.
pub const HANDSHAKE_BUFFER_DEPTH: usize = 10;

/// A session with no inbound message for this long is disconnected.
pub const SESSION_TIMEOUT_MS: u64 = 60_000;

/// Interval of the external tick driving timeout checks and pings.
pub const TIMEOUT_TICK: Duration = Duration::from_secs(30);

/// Block-time samples averaged per node.
pub const BLOCK_TIME_HISTORY: usize = 10;

/// Hardware and bandwidth samples retained per series.
pub const HARDWARE_HISTORY: usize = 20;

/// Distinct block heights kept in each node's consensus view.
///
/// Shared with the registry's chain display window.
pub const MAX_CACHE_HEIGHTS: usize = 50;

/// Window in which sub-threshold block updates are coalesced into one event.
pub const BLOCK_COALESCE_WINDOW_MS: u64 = 1_000;

/// Block times above this are reported immediately.
pub const SIGNIFICANT_BLOCK_TIME_MS: u64 = 100;
