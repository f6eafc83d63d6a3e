//! # tally-node
//!
//! One telemetry session per connected node.
//!
//! - [`handshake`]: wait for `system.connected`, buffering earlier frames
//! - [`session`]: the per-node state machine
//! - [`driver`]: async loop feeding a session from its transport
//! - [`event`]: notifications published to the aggregator

pub mod config;
pub mod driver;
pub mod event;
pub mod handshake;
pub mod id;
pub mod session;

pub use config::SessionConfig;
pub use driver::{Inbound, run_session, start_session};
pub use event::{EventSink, HardwareSnapshot, NodeEvent, SessionEvent};
pub use handshake::{Accepted, HandshakeBuffer, await_handshake};
pub use id::IdGenerator;
pub use session::{NodeSession, SessionState};
