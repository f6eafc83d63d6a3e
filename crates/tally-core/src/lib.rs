//! # tally-core
//! Foundation types, decoded telemetry messages and bounded statistic
//! trackers shared by the Tally crates.

pub mod constants;
pub mod error;
pub mod message;
pub mod stats;
pub mod traits;
pub mod types;
