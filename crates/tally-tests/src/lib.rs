//! Integration tests for Tally.
//!
//! Exercises node sessions end to end: handshake, message handling, the
//! consensus view and the async driver.

pub mod helpers;
