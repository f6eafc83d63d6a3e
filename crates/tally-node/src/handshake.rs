//! Connection handshake.
//!
//! A freshly accepted connection must send `system.connected` within
//! [`SessionConfig::handshake_timeout`]. Anything it sends before that is kept
//! in a [`HandshakeBuffer`] (most recent messages only) and replayed into the
//! session once it exists, so no early block or vote report is lost.

use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use tally_core::error::NodeError;
use tally_core::message::{Message, Payload, SystemConnected};
use tally_core::types::{Address, NodeIdentity};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::driver::Inbound;

/// Bounded buffer of pre-handshake messages.
#[derive(Debug)]
pub struct HandshakeBuffer {
    pending: VecDeque<Message>,
    depth: usize,
}

impl HandshakeBuffer {
    pub fn new(depth: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Offer a message. Returns the identity payload if this is the
    /// handshake; otherwise buffers it, evicting the oldest when full.
    pub fn push(&mut self, message: Message) -> Option<SystemConnected> {
        if let Payload::SystemConnected(connected) = message.payload {
            return Some(connected);
        }
        if self.depth == 0 {
            return None;
        }
        if self.pending.len() == self.depth {
            self.pending.pop_front();
        }
        self.pending.push_back(message);
        None
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffered messages, oldest first.
    pub fn into_messages(self) -> Vec<Message> {
        self.pending.into()
    }
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct Accepted {
    pub identity: NodeIdentity,
    /// Messages received before the identity, oldest first.
    pub backlog: Vec<Message>,
}

/// Build a [`NodeIdentity`] from the handshake payload.
pub fn identity_from(connected: SystemConnected, ip: Option<String>) -> NodeIdentity {
    NodeIdentity {
        name: connected.name,
        chain: connected.chain,
        implementation: connected.implementation,
        version: connected.version,
        address: connected.pubkey.as_deref().and_then(Address::from_quoted),
        network_id: connected.network_id,
        authority: connected.authority.unwrap_or(false),
        config: connected.config,
        ip,
    }
}

/// Wait for `system.connected` on `inbound`, buffering earlier messages.
pub async fn await_handshake<S>(
    inbound: &mut S,
    config: &SessionConfig,
    ip: Option<String>,
) -> Result<Accepted, NodeError>
where
    S: Stream<Item = Inbound> + Unpin,
{
    let mut buffer = HandshakeBuffer::new(config.handshake_buffer);
    let wait = async {
        loop {
            match inbound.next().await {
                Some(Inbound::Message(message)) => {
                    if let Some(connected) = buffer.push(message) {
                        return Ok(connected);
                    }
                }
                Some(Inbound::Pong) => {}
                Some(Inbound::Error(e)) => return Err(NodeError::Transport(e)),
                Some(Inbound::Closed) | None => return Err(NodeError::ClosedBeforeHandshake),
            }
        }
    };

    let connected = match tokio::time::timeout(config.handshake_timeout, wait).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(ip = ?ip, "handshake timed out");
            return Err(NodeError::HandshakeTimeout);
        }
    };
    info!(name = %connected.name, buffered = buffer.len(), "handshake complete");
    Ok(Accepted {
        identity: identity_from(connected, ip),
        backlog: buffer.into_messages(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::time::Duration;
    use tally_core::message::parse;

    fn import(height: u64) -> Message {
        parse(&format!(
            r#"{{"ts":{height},"msg":"block.import","best":"0x{height}","height":{height}}}"#
        ))
        .unwrap()
    }

    fn connected() -> Message {
        parse(
            r#"{"ts":1,"msg":"system.connected","name":"bob","chain":"Dev","implementation":"n",
            "version":"1","pubkey":"\"5Bob\"","authority":true}"#,
        )
        .unwrap()
    }

    #[test]
    fn buffer_keeps_most_recent() {
        let mut buf = HandshakeBuffer::new(3);
        for h in 1..=5 {
            assert!(buf.push(import(h)).is_none());
        }
        let heights: Vec<u64> = buf
            .into_messages()
            .iter()
            .map(|m| m.best_block().unwrap().height)
            .collect();
        assert_eq!(heights, vec![3, 4, 5]);
    }

    #[test]
    fn identity_message_is_not_buffered() {
        let mut buf = HandshakeBuffer::new(3);
        let c = buf.push(connected()).unwrap();
        assert_eq!(c.name, "bob");
        assert!(buf.is_empty());
    }

    #[test]
    fn identity_strips_quoted_pubkey() {
        let Payload::SystemConnected(c) = connected().payload else {
            panic!("expected handshake");
        };
        let id = identity_from(c, Some("10.0.0.1".into()));
        assert_eq!(id.address, Some(Address::from("5Bob")));
        assert!(id.authority);
        assert_eq!(id.ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn handshake_returns_backlog_in_order() {
        let mut inbound = stream::iter(vec![
            Inbound::Message(import(1)),
            Inbound::Pong,
            Inbound::Message(import(2)),
            Inbound::Message(connected()),
            Inbound::Message(import(3)),
        ]);
        let accepted = await_handshake(&mut inbound, &SessionConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(accepted.identity.name, "bob");
        assert_eq!(accepted.backlog.len(), 2);
        // the live message after the handshake is left on the stream
        assert!(matches!(inbound.next().await, Some(Inbound::Message(_))));
    }

    #[tokio::test]
    async fn closed_before_identity() {
        let mut inbound = stream::iter(vec![Inbound::Message(import(1)), Inbound::Closed]);
        let err = await_handshake(&mut inbound, &SessionConfig::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::ClosedBeforeHandshake);
    }

    #[tokio::test]
    async fn transport_error_fails_handshake() {
        let mut inbound = stream::iter(vec![Inbound::Error("reset".into())]);
        let err = await_handshake(&mut inbound, &SessionConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let mut inbound = stream::pending::<Inbound>();
        let config = SessionConfig {
            handshake_timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        };
        let err = await_handshake(&mut inbound, &config, None).await.unwrap_err();
        assert_eq!(err, NodeError::HandshakeTimeout);
    }
}
