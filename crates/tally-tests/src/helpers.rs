//! Shared helpers for integration tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tally_core::error::NodeError;
use tally_core::message::{Message, parse};
use tally_core::traits::Connection;
use tally_core::types::{Address, NodeId, NodeIdentity, Timestamp};
use tally_node::{EventSink, NodeEvent, NodeSession, SessionConfig, SessionEvent};
use tokio::sync::mpsc;

/// Decode a raw frame, panicking on malformed test input.
pub fn msg(raw: &str) -> Message {
    parse(raw).unwrap_or_else(|| panic!("bad test frame: {raw}"))
}

pub fn connected(name: &str, pubkey: &str) -> Message {
    msg(&format!(
        r#"{{"ts":0,"msg":"system.connected","name":"{name}","chain":"Local","config":"",
        "implementation":"tally-test","version":"0.1","pubkey":"\"{pubkey}\"","authority":true}}"#
    ))
}

pub fn block_import(ts: Timestamp, height: u64, hash: &str) -> Message {
    msg(&format!(
        r#"{{"ts":{ts},"msg":"block.import","best":"{hash}","height":{height}}}"#
    ))
}

pub fn interval(ts: Timestamp, peers: u64, txcount: u64) -> Message {
    msg(&format!(
        r#"{{"ts":{ts},"msg":"system.interval","peers":{peers},"txcount":{txcount}}}"#
    ))
}

pub fn interval_finalized(ts: Timestamp, height: u64, hash: &str) -> Message {
    msg(&format!(
        r#"{{"ts":{ts},"msg":"system.interval","peers":1,"txcount":0,
        "finalized_height":{height},"finalized_hash":"{hash}"}}"#
    ))
}

pub fn hardware(ts: Timestamp, cpu: f64, memory: f64) -> Message {
    msg(&format!(
        r#"{{"ts":{ts},"msg":"system.interval","peers":1,"txcount":0,"cpu":{cpu},
        "memory":{memory},"bandwidth_upload":0,"bandwidth_download":0}}"#
    ))
}

pub fn prevote(ts: Timestamp, height: u64, voter: &str) -> Message {
    vote("afg.received_prevote", ts, height, voter)
}

pub fn precommit(ts: Timestamp, height: u64, voter: &str) -> Message {
    vote("afg.received_precommit", ts, height, voter)
}

fn vote(kind: &str, ts: Timestamp, height: u64, voter: &str) -> Message {
    msg(&format!(
        r#"{{"ts":{ts},"msg":"{kind}","target_number":"{height}","target_hash":"0x{height:x}",
        "voter":"\"{voter}\""}}"#
    ))
}

pub fn afg_finalized(ts: Timestamp, height: u64) -> Message {
    msg(&format!(
        r#"{{"ts":{ts},"msg":"afg.finalized","finalized_number":"{height}","finalized_hash":"0x{height:x}"}}"#
    ))
}

/// `afg.authority_set` with `authorities` JSON-encoded inside a string.
pub fn authority_set(ts: Timestamp, set_id: u64, authorities: &[&str]) -> Message {
    let inner = serde_json::to_string(authorities).unwrap_or_default();
    let value = serde_json::json!({
        "ts": ts,
        "msg": "afg.authority_set",
        "authority_set_id": set_id.to_string(),
        "hash": "0xaa",
        "number": "1",
        "authorities": inner,
    });
    msg(&value.to_string())
}

/// Counters of the calls a session made on its connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionLog {
    pub pings: usize,
    pub closes: usize,
    pub terminates: usize,
    pub fail_ping: bool,
}

/// [`Connection`] that records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnection {
    pub log: Arc<Mutex<ConnectionLog>>,
}

impl RecordingConnection {
    pub fn snapshot(&self) -> ConnectionLog {
        self.log.lock().clone()
    }
}

impl Connection for RecordingConnection {
    fn ping(&mut self) -> Result<(), NodeError> {
        let mut log = self.log.lock();
        log.pings += 1;
        if log.fail_ping {
            Err(NodeError::PingFailed("recording connection".into()))
        } else {
            Ok(())
        }
    }

    fn close(&mut self) {
        self.log.lock().closes += 1;
    }

    fn terminate(&mut self) {
        self.log.lock().terminates += 1;
    }
}

pub fn identity(name: &str, address: &str) -> NodeIdentity {
    NodeIdentity {
        name: name.into(),
        chain: "Local".into(),
        address: Some(Address::from(address)),
        authority: true,
        ..NodeIdentity::default()
    }
}

/// A session wired to a recording connection and an inspectable event channel.
pub struct TestNode {
    pub session: NodeSession,
    pub connection: RecordingConnection,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestNode {
    pub fn new(address: &str) -> Self {
        Self::with_config(address, &SessionConfig::default())
    }

    pub fn with_config(address: &str, config: &SessionConfig) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let connection = RecordingConnection::default();
        let session = NodeSession::new(
            identity("test-node", address),
            Box::new(connection.clone()),
            EventSink::new(NodeId(1), tx),
            config,
            0,
        );
        Self {
            session,
            connection,
            events,
        }
    }

    /// Apply `message` at time `now`, panicking if the session rejects it.
    pub fn feed(&mut self, message: &Message, now: Timestamp) {
        self.session
            .handle_at(message, now)
            .unwrap_or_else(|e| panic!("{} rejected: {e}", message.kind()));
    }

    /// Events emitted since the last drain.
    pub fn drain(&mut self) -> Vec<NodeEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev.event);
        }
        out
    }

    /// Names of events emitted since the last drain.
    pub fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(NodeEvent::name).collect()
    }
}
