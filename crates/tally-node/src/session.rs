//! Node session state machine.
//!
//! A [`NodeSession`] is created once a node completes its handshake and lives
//! until it disconnects. It consumes decoded [`Message`]s in arrival order,
//! keeps the node's best/finalized blocks, block-time average, hardware
//! series, authority set and [`ConsensusView`], and emits [`NodeEvent`]s.
//!
//! The session never spawns work of its own. Deferred actions are exposed as
//! deadlines ([`NodeSession::next_deadline`]) that the driver waits on, so
//! dropping the session cancels them.

use serde_json::Value;
use tracing::{debug, info, warn};

use tally_consensus::ConsensusView;
use tally_core::error::NodeError;
use tally_core::message::{
    AfgAuthoritySet, AfgFinalized, AfgReceived, BestBlock, Message, NotifyFinalized, Payload,
    SystemInterval,
};
use tally_core::stats::{AverageWindow, SampleLog};
use tally_core::traits::Connection;
use tally_core::types::{
    Address, AuthorityList, Block, Location, NodeId, NodeIdentity, Timestamp, now_ms,
};

use crate::config::SessionConfig;
use crate::event::{EventSink, HardwareSnapshot, NodeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Disconnected,
}

/// Which vote phase an `afg.received_*` message reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Prevote,
    Precommit,
}

/// Hardware and bandwidth series of one node.
#[derive(Debug, Clone)]
struct Hardware {
    memory: SampleLog<f64>,
    cpu: SampleLog<f64>,
    upload: SampleLog<f64>,
    download: SampleLog<f64>,
    timestamps: SampleLog<Timestamp>,
}

impl Hardware {
    fn new(depth: usize) -> Self {
        Self {
            memory: SampleLog::new(depth),
            cpu: SampleLog::new(depth),
            upload: SampleLog::new(depth),
            download: SampleLog::new(depth),
            timestamps: SampleLog::new(depth),
        }
    }

    fn snapshot(&self) -> HardwareSnapshot {
        HardwareSnapshot {
            memory: self.memory.to_vec(),
            cpu: self.cpu.to_vec(),
            upload: self.upload.to_vec(),
            download: self.download.to_vec(),
            timestamps: self.timestamps.to_vec(),
        }
    }
}

/// Live state of one connected node.
pub struct NodeSession {
    id: NodeId,
    identity: NodeIdentity,
    connection: Box<dyn Connection>,
    events: EventSink,
    state: SessionState,

    best: Block,
    finalized: Block,
    latency_ms: u64,
    block_time_ms: u64,
    block_timestamp: Timestamp,
    propagation_time_ms: Option<u64>,
    block_times: AverageWindow,
    peers: u64,
    tx_count: u64,
    network_state: Option<Value>,
    hardware: Hardware,

    last_message_at: Timestamp,
    last_block_at: Option<Timestamp>,
    ping_sent_at: Option<Timestamp>,
    ping_throttled: bool,
    idle_timeout_ms: u64,

    /// Pending coalesced `block` emission.
    block_flush_at: Option<Timestamp>,
    block_coalesce_ms: u64,
    significant_block_time_ms: u64,

    authorities: AuthorityList,
    authority_set_id: u64,
    consensus: ConsensusView,
    location: Option<Location>,
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("id", &self.id)
            .field("name", &self.identity.name)
            .field("state", &self.state)
            .field("best", &self.best)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl NodeSession {
    /// Create an active session. `now` seeds the idle timer.
    pub fn new(
        identity: NodeIdentity,
        connection: Box<dyn Connection>,
        events: EventSink,
        config: &SessionConfig,
        now: Timestamp,
    ) -> Self {
        let id = events.node();
        info!(node = %id, name = %identity.name, chain = %identity.chain, "node session started");
        Self {
            id,
            identity,
            connection,
            events,
            state: SessionState::Active,
            best: Block::zero(),
            finalized: Block::zero(),
            latency_ms: 0,
            block_time_ms: 0,
            block_timestamp: 0,
            propagation_time_ms: None,
            block_times: AverageWindow::new(config.block_time_history),
            peers: 0,
            tx_count: 0,
            network_state: None,
            hardware: Hardware::new(config.hardware_history),
            last_message_at: now,
            last_block_at: None,
            ping_sent_at: None,
            ping_throttled: false,
            idle_timeout_ms: config.idle_timeout_ms,
            block_flush_at: None,
            block_coalesce_ms: config.block_coalesce_ms,
            significant_block_time_ms: config.significant_block_time_ms,
            authorities: Vec::new(),
            authority_set_id: 0,
            consensus: ConsensusView::new(config.cache_heights),
            location: None,
        }
    }

    // -------------------------------------------------------------------------
    // Message handling
    // -------------------------------------------------------------------------

    /// Handle one message at the current wall-clock time.
    pub fn handle(&mut self, message: &Message) -> Result<(), NodeError> {
        self.handle_at(message, now_ms())
    }

    /// Replay messages buffered during the handshake, oldest first.
    ///
    /// A message that fails to apply is logged and skipped.
    pub fn replay(&mut self, backlog: Vec<Message>, now: Timestamp) {
        debug!(node = %self.id, count = backlog.len(), "replaying handshake backlog");
        for message in &backlog {
            if let Err(e) = self.handle_at(message, now) {
                warn!(node = %self.id, kind = message.kind(), error = %e, "dropping replayed message");
            }
        }
    }

    /// Handle one message received at `now`.
    ///
    /// The consensus view is pruned after every message, including one whose
    /// handling failed.
    pub fn handle_at(&mut self, message: &Message, now: Timestamp) -> Result<(), NodeError> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        self.last_message_at = now;

        if let Some(best) = message.best_block() {
            self.update_best(best, now);
        }

        let result = match &message.payload {
            Payload::SystemInterval(interval) => {
                self.on_system_interval(interval, message.ts);
                Ok(())
            }
            Payload::NotifyFinalized(n) => {
                self.on_notify_finalized(n);
                Ok(())
            }
            Payload::AfgFinalized(f) => {
                self.on_afg_finalized(f);
                Ok(())
            }
            Payload::AfgReceivedPrecommit(r) => {
                self.on_vote(r, Vote::Precommit);
                Ok(())
            }
            Payload::AfgReceivedPrevote(r) => {
                self.on_vote(r, Vote::Prevote);
                Ok(())
            }
            Payload::AfgAuthoritySet(set) => self.on_authority_set(set),
            _ => Ok(()),
        };

        let pruned = self.consensus.prune();
        if pruned > 0 {
            debug!(node = %self.id, pruned, "pruned consensus heights");
        }
        result
    }

    fn update_best(&mut self, best: BestBlock, now: Timestamp) {
        if best.hash == self.best.hash || best.height < self.best.height {
            return;
        }

        let block_time = self
            .last_block_at
            .map_or(0, |prev| best.observed_at.saturating_sub(prev));
        self.block_time_ms = block_time;
        self.best = Block::new(best.height, best.hash);
        self.block_timestamp = now;
        self.last_block_at = Some(best.observed_at);
        self.block_times.push(block_time);

        if block_time > self.significant_block_time_ms {
            self.emit_block();
        } else if self.block_flush_at.is_none() {
            self.block_flush_at = Some(now + self.block_coalesce_ms);
        }

        let address = self.identity.address.clone();
        self.consensus.fill_gap(address.as_ref(), self.best.height);
    }

    fn emit_block(&self) {
        self.events.emit(NodeEvent::Block {
            block: self.best.clone(),
            block_time_ms: self.block_time_ms,
        });
    }

    fn on_system_interval(&mut self, interval: &SystemInterval, ts: Timestamp) {
        if let Some(state) = &interval.network_state {
            if self.network_state.as_ref() != Some(state) {
                self.network_state = Some(state.clone());
            }
        }

        if self.peers != interval.peers || self.tx_count != interval.txcount {
            self.peers = interval.peers;
            self.tx_count = interval.txcount;
            self.events.emit(NodeEvent::Stats {
                peers: self.peers,
                tx_count: self.tx_count,
            });
        }

        if let (Some(height), Some(hash)) = (interval.finalized_height, &interval.finalized_hash) {
            if height > self.finalized.height {
                self.finalized = Block::new(height, hash.clone());
                self.events.emit(NodeEvent::Finalized(self.finalized.clone()));
            }
        }

        if let (Some(cpu), Some(memory)) = (interval.cpu, interval.memory) {
            let hw = &mut self.hardware;
            let changed = hw.memory.push(memory)
                | hw.cpu.push(cpu)
                | hw.upload.push(interval.bandwidth_upload)
                | hw.download.push(interval.bandwidth_download)
                | hw.timestamps.push(ts);
            if changed {
                self.events.emit(NodeEvent::Hardware(hw.snapshot()));
            }
        }
    }

    fn on_notify_finalized(&mut self, notify: &NotifyFinalized) {
        let Some(address) = self.identity.address.clone() else {
            return;
        };
        self.consensus
            .ensure_entry(notify.height, &address)
            .finalized_hash = Some(notify.best.clone());
        self.events.emit(NodeEvent::ConsensusInfo {
            height: notify.height,
        });
    }

    fn on_afg_finalized(&mut self, finalized: &AfgFinalized) {
        let Some(address) = self.identity.address.clone() else {
            return;
        };
        let height = finalized.finalized_number;
        self.consensus
            .ensure_entry(height, &address)
            .mark_finalized(height, finalized.finalized_hash.clone());
        self.consensus.backfill(Some(&address), height, &mut |_, info| {
            info.mark_implicitly_finalized(height)
        });
        self.events.emit(NodeEvent::ConsensusInfo { height });
    }

    fn on_vote(&mut self, received: &AfgReceived, vote: Vote) {
        let Some(voter) = received.voter.as_deref().and_then(Address::from_quoted) else {
            debug!(node = %self.id, "vote without voter address");
            return;
        };
        let target = received.target_number;
        let info = self.consensus.ensure_entry(target, &voter);
        match vote {
            Vote::Prevote => info.prevote = true,
            Vote::Precommit => info.precommit = true,
        }
        self.consensus.backfill(Some(&voter), target, &mut |_, info| match vote {
            Vote::Prevote => info.mark_implicit_prevote(target),
            Vote::Precommit => info.mark_implicit_precommit(target),
        });
        self.events.emit(NodeEvent::ConsensusInfo { height: target });
    }

    fn on_authority_set(&mut self, set: &AfgAuthoritySet) -> Result<(), NodeError> {
        let authorities: AuthorityList = serde_json::from_str(&set.authorities)
            .map_err(|e| NodeError::AuthoritySet(e.to_string()))?;

        if authorities != self.authorities || set.authority_set_id != self.authority_set_id {
            info!(node = %self.id, set_id = set.authority_set_id, count = authorities.len(),
                "authority set changed");
            self.events.emit(NodeEvent::AuthoritySetChanged {
                authorities: authorities.clone(),
                set_id: set.authority_set_id,
                height: set.number,
                hash: set.hash.clone(),
            });
        }
        self.authorities = authorities;
        self.authority_set_id = set.authority_set_id;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Deferred work, liveness and teardown
    // -------------------------------------------------------------------------

    /// When the pending coalesced `block` event is due, if any.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.block_flush_at
    }

    /// Emit the coalesced `block` event if it is due. Returns `true` if it fired.
    pub fn flush_deferred(&mut self, now: Timestamp) -> bool {
        match self.block_flush_at {
            Some(at) if now >= at && self.state == SessionState::Active => {
                self.block_flush_at = None;
                self.emit_block();
                true
            }
            _ => false,
        }
    }

    /// Periodic liveness check. Disconnects an idle node, otherwise pings it
    /// unless a ping is already outstanding. Returns `true` once disconnected.
    pub fn check_timeout(&mut self, now: Timestamp) -> bool {
        if self.state == SessionState::Disconnected {
            return true;
        }
        if now.saturating_sub(self.last_message_at) > self.idle_timeout_ms {
            warn!(node = %self.id, idle_ms = now.saturating_sub(self.last_message_at), "node timed out");
            self.disconnect();
            return true;
        }
        if self.ping_sent_at.is_some() {
            self.ping_throttled = true;
            return false;
        }
        self.ping_sent_at = Some(now);
        if let Err(e) = self.connection.ping() {
            warn!(node = %self.id, error = %e, "ping failed");
            self.disconnect();
            return true;
        }
        false
    }

    /// Record the pong answering the outstanding ping.
    pub fn on_pong(&mut self, now: Timestamp) {
        if let Some(sent) = self.ping_sent_at.take() {
            self.latency_ms = now.saturating_sub(sent);
            self.ping_throttled = false;
            debug!(node = %self.id, latency_ms = self.latency_ms, "pong");
        }
    }

    /// Apply a geolocation result that arrived after the session started.
    pub fn set_location(&mut self, location: Location) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.location = Some(location.clone());
        self.events.emit(NodeEvent::Location(location));
    }

    /// Set by the registry once it has seen the block from other nodes.
    pub fn set_propagation_time(&mut self, propagation_time_ms: Option<u64>) {
        self.propagation_time_ms = propagation_time_ms;
    }

    /// Tear the session down. Idempotent: the connection is closed and
    /// terminated and `disconnect` is emitted only on the first call.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;
        self.block_flush_at = None;
        self.ping_sent_at = None;
        self.connection.close();
        self.connection.terminate();
        info!(node = %self.id, name = %self.identity.name, "node disconnected");
        self.events.emit(NodeEvent::Disconnect);
    }

    // -------------------------------------------------------------------------
    // Read-only accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    pub fn best(&self) -> &Block {
        &self.best
    }

    pub fn finalized(&self) -> &Block {
        &self.finalized
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn block_time_ms(&self) -> u64 {
        self.block_time_ms
    }

    pub fn average_block_time_ms(&self) -> u64 {
        self.block_times.average()
    }

    pub fn block_timestamp(&self) -> Timestamp {
        self.block_timestamp
    }

    pub fn propagation_time_ms(&self) -> Option<u64> {
        self.propagation_time_ms
    }

    pub fn peers(&self) -> u64 {
        self.peers
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    pub fn network_state(&self) -> Option<&Value> {
        self.network_state.as_ref()
    }

    pub fn hardware(&self) -> HardwareSnapshot {
        self.hardware.snapshot()
    }

    pub fn last_message_at(&self) -> Timestamp {
        self.last_message_at
    }

    /// When the outstanding ping was sent, `0` if none is outstanding.
    pub fn ping_sent_at(&self) -> Timestamp {
        self.ping_sent_at.unwrap_or(0)
    }

    /// Whether the last tick found the previous ping still unanswered.
    pub fn ping_throttled(&self) -> bool {
        self.ping_throttled
    }

    pub fn authorities(&self) -> &AuthorityList {
        &self.authorities
    }

    pub fn authority_set_id(&self) -> u64 {
        self.authority_set_id
    }

    pub fn consensus(&self) -> &ConsensusView {
        &self.consensus
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

impl Drop for NodeSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tally_core::message::parse;
    use tokio::sync::mpsc;

    use crate::event::SessionEvent;

    #[derive(Default)]
    struct Calls {
        pings: usize,
        closes: usize,
        terminates: usize,
        fail_ping: bool,
    }

    struct FakeConnection(Arc<Mutex<Calls>>);

    impl Connection for FakeConnection {
        fn ping(&mut self) -> Result<(), NodeError> {
            let mut c = self.0.lock().unwrap();
            c.pings += 1;
            if c.fail_ping {
                Err(NodeError::PingFailed("broken pipe".into()))
            } else {
                Ok(())
            }
        }
        fn close(&mut self) {
            self.0.lock().unwrap().closes += 1;
        }
        fn terminate(&mut self) {
            self.0.lock().unwrap().terminates += 1;
        }
    }

    struct Harness {
        session: NodeSession,
        calls: Arc<Mutex<Calls>>,
        rx: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn events(&mut self) -> Vec<&'static str> {
            let mut out = Vec::new();
            while let Ok(ev) = self.rx.try_recv() {
                out.push(ev.event.name());
            }
            out
        }
    }

    fn harness() -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Calls::default()));
        let identity = NodeIdentity {
            name: "alice".into(),
            address: Some(Address::from("self")),
            ..NodeIdentity::default()
        };
        let session = NodeSession::new(
            identity,
            Box::new(FakeConnection(Arc::clone(&calls))),
            EventSink::new(NodeId(1), tx),
            &SessionConfig::default(),
            0,
        );
        Harness { session, calls, rx }
    }

    fn msg(raw: &str) -> Message {
        parse(raw).unwrap()
    }

    fn import(ts: u64, height: u64, hash: &str) -> Message {
        msg(&format!(r#"{{"ts":{ts},"msg":"block.import","best":"{hash}","height":{height}}}"#))
    }

    #[test]
    fn best_block_never_regresses() {
        let mut h = harness();
        h.session.handle_at(&import(1_000, 10, "0x0a"), 1_000).unwrap();
        h.session.handle_at(&import(2_000, 9, "0x09"), 2_000).unwrap();
        assert_eq!(h.session.best(), &Block::new(10, "0x0a"));
        h.session.handle_at(&import(3_000, 10, "0xreorg"), 3_000).unwrap();
        assert_eq!(h.session.best(), &Block::new(10, "0xreorg"));
    }

    #[test]
    fn same_hash_is_ignored() {
        let mut h = harness();
        h.session.handle_at(&import(1_000, 10, "0x0a"), 1_000).unwrap();
        h.session.handle_at(&import(5_000, 11, "0x0a"), 5_000).unwrap();
        assert_eq!(h.session.best().height, 10);
    }

    #[test]
    fn slow_block_emits_immediately() {
        let mut h = harness();
        h.session.handle_at(&import(1_000, 1, "0x01"), 1_000).unwrap();
        h.events();
        h.session.handle_at(&import(7_000, 2, "0x02"), 7_000).unwrap();
        assert_eq!(h.session.block_time_ms(), 6_000);
        assert_eq!(h.events(), vec!["block"]);
    }

    #[test]
    fn fast_blocks_are_coalesced() {
        let mut h = harness();
        for i in 0..50u64 {
            let t = 10_000 + i * 10;
            h.session.handle_at(&import(t, i + 1, &format!("0x{i:02x}")), t).unwrap();
        }
        assert!(h.events().is_empty());
        assert_eq!(h.session.next_deadline(), Some(11_000));
        assert!(!h.session.flush_deferred(10_999));
        assert!(h.session.flush_deferred(11_000));
        assert_eq!(h.events(), vec!["block"]);
        assert!(h.session.next_deadline().is_none());
    }

    #[test]
    fn block_time_average() {
        let mut h = harness();
        for (ts, height) in [(0u64, 1u64), (10, 2), (30, 3), (60, 4)] {
            h.session.handle_at(&import(ts, height, &format!("0x{height}")), ts).unwrap();
        }
        // samples: 0, 10, 20, 30
        assert_eq!(h.session.average_block_time_ms(), 15);
    }

    #[test]
    fn interval_updates_stats_and_finalized() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"system.interval","peers":4,"txcount":2,
            "finalized_height":8,"finalized_hash":"0x08"}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();
        assert_eq!(h.events(), vec!["stats", "finalized"]);
        assert_eq!(h.session.finalized(), &Block::new(8, "0x08"));

        // same stats, lower finalized height: nothing happens
        let raw = r#"{"ts":2,"msg":"system.interval","peers":4,"txcount":2,
            "finalized_height":7,"finalized_hash":"0x07"}"#;
        h.session.handle_at(&msg(raw), 2).unwrap();
        assert!(h.events().is_empty());
        assert_eq!(h.session.finalized().height, 8);
    }

    #[test]
    fn hardware_requires_cpu_and_memory() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"system.interval","peers":0,"txcount":0,"cpu":5.0}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();
        assert!(h.events().is_empty());
        assert!(h.session.hardware().cpu.is_empty());

        let raw = r#"{"ts":2,"msg":"system.interval","peers":0,"txcount":0,"cpu":5.0,"memory":100,
            "bandwidth_upload":1,"bandwidth_download":2}"#;
        h.session.handle_at(&msg(raw), 2).unwrap();
        assert_eq!(h.events(), vec!["hardware"]);
        let hw = h.session.hardware();
        assert_eq!(hw.memory, vec![100.0]);
        assert_eq!(hw.timestamps, vec![2]);
    }

    #[test]
    fn network_state_is_kept() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"system.interval","peers":0,"txcount":0,"network_state":{"peerId":"Qm"}}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();
        assert_eq!(h.session.network_state().unwrap()["peerId"], "Qm");
    }

    #[test]
    fn prevote_backfills_across_tracked_heights() {
        let mut h = harness();
        for height in 1..=4 {
            let raw = format!(
                r#"{{"ts":1,"msg":"afg.received_prevote","target_number":"{height}","target_hash":"0x","voter":"\"other\""}}"#
            );
            h.session.handle_at(&msg(&raw), 1).unwrap();
        }
        let raw = r#"{"ts":1,"msg":"afg.received_prevote","target_number":"5","target_hash":"0x","voter":"\"v\""}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();

        let v = Address::from("v");
        let view = h.session.consensus();
        assert!(view.get(5, &v).unwrap().prevote);
        for height in 1..=4 {
            let info = view.get(height, &v).unwrap();
            assert!(info.implicit_prevote);
            assert_eq!(info.implicit_pointer, Some(5));
        }
        assert_eq!(h.events().len(), 5);
    }

    #[test]
    fn vote_without_voter_is_ignored() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"afg.received_precommit","target_number":3,"target_hash":"0x"}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();
        assert!(h.session.consensus().is_empty());
        assert!(h.events().is_empty());
    }

    #[test]
    fn afg_finalized_marks_self_and_backfills() {
        let mut h = harness();
        let me = Address::from("self");
        for height in 1..=3 {
            let raw = format!(
                r#"{{"ts":1,"msg":"afg.received_precommit","target_number":{height},"target_hash":"0x","voter":"\"other\""}}"#
            );
            h.session.handle_at(&msg(&raw), 1).unwrap();
        }
        let raw = r#"{"ts":1,"msg":"afg.finalized","finalized_number":"4","finalized_hash":"0x04"}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();

        let view = h.session.consensus();
        let top = view.get(4, &me).unwrap();
        assert!(top.finalized && top.prevote && top.precommit);
        assert_eq!(top.finalized_height, Some(4));
        for height in 1..=3 {
            let info = view.get(height, &me).unwrap();
            assert!(info.implicit_finalized);
            assert!(info.implicit_prevote && info.implicit_precommit);
            assert!(!info.finalized);
            assert_eq!(info.implicit_pointer, Some(4));
        }
    }

    #[test]
    fn notify_finalized_records_hash() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"notify.finalized","height":"6","best":"0x06"}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();
        let info = h.session.consensus().get(6, &Address::from("self")).unwrap();
        assert_eq!(info.finalized_hash.as_ref().unwrap().as_str(), "0x06");
        assert_eq!(h.events(), vec!["consensus-info"]);
    }

    #[test]
    fn authority_set_change_fires_once() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"afg.authority_set","authority_set_id":"1","hash":"0x1","number":"10",
            "authorities":"[\"a\",\"b\"]"}"#;
        h.session.handle_at(&msg(raw), 1).unwrap();
        h.session.handle_at(&msg(raw), 2).unwrap();
        assert_eq!(h.events(), vec!["authority-set-changed"]);
        assert_eq!(h.session.authorities().len(), 2);
        assert_eq!(h.session.authority_set_id(), 1);
    }

    #[test]
    fn malformed_authority_set_is_an_error() {
        let mut h = harness();
        let raw = r#"{"ts":1,"msg":"afg.authority_set","authority_set_id":"1","hash":"0x1","number":"10",
            "authorities":"[not json"}"#;
        let err = h.session.handle_at(&msg(raw), 1).unwrap_err();
        assert!(matches!(err, NodeError::AuthoritySet(_)));
        assert!(h.session.authorities().is_empty());
        assert!(!h.session.is_disconnected());
    }

    #[test]
    fn cache_is_pruned_per_message() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = SessionConfig {
            cache_heights: 3,
            ..SessionConfig::default()
        };
        let mut session = NodeSession::new(
            NodeIdentity::default(),
            Box::new(FakeConnection(Arc::default())),
            EventSink::new(NodeId(2), tx),
            &config,
            0,
        );
        for height in 1..=10 {
            let raw = format!(
                r#"{{"ts":1,"msg":"afg.received_prevote","target_number":{height},"target_hash":"0x","voter":"\"v\""}}"#
            );
            session.handle_at(&msg(&raw), 1).unwrap();
            assert!(session.consensus().len() <= 3);
        }
        assert_eq!(session.consensus().heights().collect::<Vec<_>>(), vec![8, 9, 10]);
    }

    #[test]
    fn idle_node_is_disconnected_once() {
        let mut h = harness();
        assert!(!h.session.check_timeout(30_000));
        assert!(h.session.check_timeout(60_001));
        assert!(h.session.check_timeout(70_000));
        h.session.disconnect();
        assert_eq!(h.events(), vec!["disconnect"]);
        let calls = h.calls.lock().unwrap();
        assert_eq!(calls.closes, 1);
        assert_eq!(calls.terminates, 1);
    }

    #[test]
    fn ping_pong_measures_latency() {
        let mut h = harness();
        assert!(!h.session.check_timeout(1_000));
        assert_eq!(h.session.ping_sent_at(), 1_000);
        // outstanding ping: no second ping
        assert!(!h.session.check_timeout(2_000));
        assert!(h.session.ping_throttled());
        assert_eq!(h.calls.lock().unwrap().pings, 1);

        h.session.on_pong(1_250);
        assert_eq!(h.session.latency_ms(), 250);
        assert_eq!(h.session.ping_sent_at(), 0);
        assert!(!h.session.ping_throttled());
    }

    #[test]
    fn failed_ping_disconnects() {
        let mut h = harness();
        h.calls.lock().unwrap().fail_ping = true;
        assert!(h.session.check_timeout(1_000));
        assert!(h.session.is_disconnected());
        assert_eq!(h.events(), vec!["disconnect"]);
    }

    #[test]
    fn disconnect_cancels_pending_block() {
        let mut h = harness();
        h.session.handle_at(&import(0, 1, "0x01"), 0).unwrap();
        assert!(h.session.next_deadline().is_some());
        h.session.disconnect();
        assert!(!h.session.flush_deferred(5_000));
        assert_eq!(h.events(), vec!["disconnect"]);
    }

    #[test]
    fn messages_after_disconnect_are_ignored() {
        let mut h = harness();
        h.session.disconnect();
        h.session.handle_at(&import(0, 5, "0x05"), 0).unwrap();
        assert_eq!(h.session.best().height, 0);
    }

    #[test]
    fn location_is_applied() {
        let mut h = harness();
        h.session.set_location(Location {
            lat: 52.5,
            lon: 13.4,
            city: "Berlin".into(),
        });
        assert_eq!(h.session.location().unwrap().city, "Berlin");
        assert_eq!(h.events(), vec!["location"]);
    }

    #[test]
    fn propagation_time_is_stored() {
        let mut h = harness();
        assert_eq!(h.session.propagation_time_ms(), None);
        h.session.set_propagation_time(Some(420));
        assert_eq!(h.session.propagation_time_ms(), Some(420));
    }

    #[test]
    fn drop_emits_disconnect() {
        let Harness { session, mut rx, calls } = harness();
        drop(session);
        assert_eq!(rx.try_recv().unwrap().event, NodeEvent::Disconnect);
        assert_eq!(calls.lock().unwrap().terminates, 1);
    }
}
