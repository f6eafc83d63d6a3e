//! Async driver for one node session.
//!
//! [`run_session`] owns the session for its whole life and multiplexes:
//!
//! - the periodic timeout/ping tick
//! - the coalesced `block` deadline exposed by the session
//! - inbound frames and pongs, handled strictly in arrival order
//! - a one-shot geolocation lookup, applied whenever it completes
//!
//! Due timers are served before further inbound frames.
//!
//! The loop ends once the session is disconnected; pending deadlines and the
//! lookup are dropped with it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tally_core::message::Message;
use tally_core::traits::{Connection, Locator};
use tally_core::types::{Timestamp, now_ms};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::event::EventSink;
use crate::handshake::Accepted;
use crate::session::NodeSession;

/// One item read from a node's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded telemetry message.
    Message(Message),
    /// Reply to a transport ping.
    Pong,
    /// Peer closed the connection.
    Closed,
    /// Transport fault.
    Error(String),
}

/// Millisecond clock anchored to wall time that advances with tokio's clock,
/// so paused-time tests see consistent timestamps.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: Instant,
    origin_ms: Timestamp,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: now_ms(),
        }
    }

    fn now(&self) -> Timestamp {
        self.origin_ms + self.origin.elapsed().as_millis() as Timestamp
    }

    fn until(&self, at: Timestamp) -> Duration {
        Duration::from_millis(at.saturating_sub(self.now()))
    }
}

/// Create the session for an accepted node and replay its handshake backlog.
pub fn start_session(
    accepted: Accepted,
    connection: Box<dyn Connection>,
    events: EventSink,
    config: &SessionConfig,
) -> NodeSession {
    let now = now_ms();
    let mut session = NodeSession::new(accepted.identity, connection, events, config, now);
    session.replay(accepted.backlog, now);
    session
}

/// Drive `session` until it disconnects.
pub async fn run_session<S>(
    mut session: NodeSession,
    mut inbound: S,
    locator: Arc<dyn Locator>,
    tick: Duration,
) where
    S: Stream<Item = Inbound> + Unpin,
{
    let clock = Clock::start();
    let node = session.id();

    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let ip = session.identity().ip.clone();
    let lookup = async move {
        match ip {
            Some(ip) => locator.locate(&ip).await,
            None => None,
        }
    };
    tokio::pin!(lookup);
    let mut located = false;

    while !session.is_disconnected() {
        // Flush a due block before reading more input.
        if session.next_deadline().is_some_and(|at| clock.now() >= at) {
            session.flush_deferred(clock.now());
        }
        let flush_in = session.next_deadline().map(|at| clock.until(at));

        tokio::select! {
            biased;

            _ = ticker.tick() => {
                session.check_timeout(clock.now());
            }
            _ = tokio::time::sleep(flush_in.unwrap_or_default()), if flush_in.is_some() => {
                session.flush_deferred(clock.now());
            }
            item = inbound.next() => match item {
                Some(Inbound::Message(message)) => {
                    if let Err(e) = session.handle_at(&message, clock.now()) {
                        warn!(node = %node, kind = message.kind(), error = %e, "dropping message");
                    }
                }
                Some(Inbound::Pong) => session.on_pong(clock.now()),
                Some(Inbound::Error(e)) => {
                    warn!(node = %node, error = %e, "transport error");
                    session.disconnect();
                }
                Some(Inbound::Closed) | None => {
                    debug!(node = %node, "connection closed by peer");
                    session.disconnect();
                }
            },
            location = &mut lookup, if !located => {
                located = true;
                match location {
                    Some(location) => session.set_location(location),
                    None => debug!(node = %node, "location unresolved"),
                }
            }
        }
    }
}
