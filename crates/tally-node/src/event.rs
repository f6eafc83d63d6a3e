//! Events a node session emits for the registry.
//!
//! Each session owns an [`EventSink`]: the sending half of an unbounded
//! channel whose receiver belongs to the registry. Events are tagged with the
//! emitting [`NodeId`]. A closed channel is not an error for the session.

use serde::Serialize;
use tally_core::types::{AuthorityList, Block, BlockHash, Location, NodeId, Timestamp};
use tokio::sync::mpsc;
use tracing::trace;

/// Latest hardware series of a node, oldest sample first.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct HardwareSnapshot {
    pub memory: Vec<f64>,
    pub cpu: Vec<f64>,
    pub upload: Vec<f64>,
    pub download: Vec<f64>,
    pub timestamps: Vec<Timestamp>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum NodeEvent {
    Location(Location),
    Disconnect,
    Stats {
        peers: u64,
        tx_count: u64,
    },
    Finalized(Block),
    Hardware(HardwareSnapshot),
    Block {
        block: Block,
        block_time_ms: u64,
    },
    ConsensusInfo {
        height: u64,
    },
    AuthoritySetChanged {
        authorities: AuthorityList,
        set_id: u64,
        height: u64,
        hash: BlockHash,
    },
}

impl NodeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::Location(_) => "location",
            NodeEvent::Disconnect => "disconnect",
            NodeEvent::Stats { .. } => "stats",
            NodeEvent::Finalized(_) => "finalized",
            NodeEvent::Hardware(_) => "hardware",
            NodeEvent::Block { .. } => "block",
            NodeEvent::ConsensusInfo { .. } => "consensus-info",
            NodeEvent::AuthoritySetChanged { .. } => "authority-set-changed",
        }
    }
}

/// A [`NodeEvent`] tagged with the session that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub node: NodeId,
    pub event: NodeEvent,
}

/// Sending side of a session's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    node: NodeId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(node: NodeId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { node, tx }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn emit(&self, event: NodeEvent) {
        trace!(node = %self.node, event = event.name(), "emit");
        let _ = self.tx.send(SessionEvent {
            node: self.node,
            event,
        });
    }
}
