//! Connected-node registry.
//!
//! Tracks which nodes are connected and logs every event their sessions
//! publish. Aggregation and display are left to downstream consumers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tally_core::types::{NodeId, NodeIdentity};
use tally_node::{NodeEvent, SessionEvent};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct Registry {
    nodes: Mutex<HashMap<NodeId, NodeIdentity>>,
}

impl Registry {
    /// Record a node that completed its handshake.
    pub fn register(&self, id: NodeId, identity: NodeIdentity) {
        info!(node = %id, name = %identity.name, chain = %identity.chain, "node added");
        self.nodes.lock().insert(id, identity);
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.lock().contains_key(&id)
    }

    /// Apply one session event.
    pub fn apply(&self, ev: &SessionEvent) {
        match &ev.event {
            NodeEvent::Disconnect => {
                if let Some(identity) = self.nodes.lock().remove(&ev.node) {
                    info!(node = %ev.node, name = %identity.name, "node removed");
                }
            }
            NodeEvent::Block { block, block_time_ms } => {
                debug!(node = %ev.node, height = block.height, hash = %block.hash, block_time_ms, "block");
            }
            NodeEvent::Finalized(block) => {
                debug!(node = %ev.node, height = block.height, hash = %block.hash, "finalized");
            }
            NodeEvent::AuthoritySetChanged { set_id, authorities, height, .. } => {
                info!(node = %ev.node, set_id, authorities = authorities.len(), height, "authority set changed");
            }
            other => debug!(node = %ev.node, event = other.name(), "node event"),
        }
    }

    /// Consume session events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(ev) = events.recv().await {
            self.apply(&ev);
        }
        debug!("event channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> NodeIdentity {
        NodeIdentity {
            name: name.into(),
            ..NodeIdentity::default()
        }
    }

    #[test]
    fn disconnect_removes_node() {
        let registry = Registry::default();
        registry.register(NodeId(1), identity("a"));
        registry.register(NodeId(2), identity("b"));
        registry.apply(&SessionEvent {
            node: NodeId(1),
            event: NodeEvent::Disconnect,
        });
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(NodeId(1)));
        assert!(registry.contains(NodeId(2)));
    }

    #[tokio::test]
    async fn run_drains_channel() {
        let registry = Arc::new(Registry::default());
        registry.register(NodeId(5), identity("e"));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent {
            node: NodeId(5),
            event: NodeEvent::Disconnect,
        })
        .unwrap();
        drop(tx);
        Arc::clone(&registry).run(rx).await;
        assert!(registry.is_empty());
    }
}
