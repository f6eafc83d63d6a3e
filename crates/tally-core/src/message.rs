//! Decoded telemetry messages.
//!
//! Nodes send one JSON object per frame: a `ts` timestamp, a `msg` kind tag
//! and kind-specific fields. Numeric fields are emitted as JSON numbers by
//! some producers and as decimal strings by others; both are accepted.
//! Unknown kinds decode to [`Payload::Unknown`] and are ignored downstream.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::debug;

use crate::error::DecodeError;
use crate::types::{BlockHash, Timestamp};

/// One decoded telemetry message.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    /// When the node produced the message.
    #[serde(deserialize_with = "de_timestamp")]
    pub ts: Timestamp,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "msg")]
pub enum Payload {
    #[serde(rename = "system.connected")]
    SystemConnected(SystemConnected),
    #[serde(rename = "system.interval")]
    SystemInterval(SystemInterval),
    #[serde(rename = "node.start")]
    NodeStart(BlockReport),
    #[serde(rename = "block.import")]
    BlockImport(BlockReport),
    #[serde(rename = "notify.finalized")]
    NotifyFinalized(NotifyFinalized),
    #[serde(rename = "afg.finalized")]
    AfgFinalized(AfgFinalized),
    #[serde(rename = "afg.received_precommit")]
    AfgReceivedPrecommit(AfgReceived),
    #[serde(rename = "afg.received_prevote")]
    AfgReceivedPrevote(AfgReceived),
    #[serde(rename = "afg.authority_set")]
    AfgAuthoritySet(AfgAuthoritySet),
    #[serde(other)]
    Unknown,
}

/// Handshake payload.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SystemConnected {
    pub name: String,
    pub chain: String,
    #[serde(default)]
    pub config: String,
    pub implementation: String,
    pub version: String,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub authority: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SystemInterval {
    #[serde(default)]
    pub network_state: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "de_u64")]
    pub peers: u64,
    #[serde(default, deserialize_with = "de_u64")]
    pub txcount: u64,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<f64>,
    #[serde(default)]
    pub bandwidth_upload: f64,
    #[serde(default)]
    pub bandwidth_download: f64,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub finalized_height: Option<u64>,
    #[serde(default)]
    pub finalized_hash: Option<BlockHash>,
    #[serde(default)]
    pub best: Option<BlockHash>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub height: Option<u64>,
}

/// `node.start` and `block.import`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BlockReport {
    pub best: BlockHash,
    #[serde(deserialize_with = "de_u64")]
    pub height: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NotifyFinalized {
    #[serde(deserialize_with = "de_u64")]
    pub height: u64,
    pub best: BlockHash,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AfgFinalized {
    #[serde(deserialize_with = "de_u64")]
    pub finalized_number: u64,
    pub finalized_hash: BlockHash,
}

/// `afg.received_precommit` and `afg.received_prevote`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AfgReceived {
    #[serde(deserialize_with = "de_u64")]
    pub target_number: u64,
    pub target_hash: BlockHash,
    /// Raw voter field, a quoted string inside a string.
    #[serde(default)]
    pub voter: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AfgAuthoritySet {
    #[serde(deserialize_with = "de_u64")]
    pub authority_set_id: u64,
    pub hash: BlockHash,
    #[serde(deserialize_with = "de_u64")]
    pub number: u64,
    /// JSON-encoded authority list, decoded separately by the session.
    pub authorities: String,
}

/// A best-block observation extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestBlock {
    pub height: u64,
    pub hash: BlockHash,
    pub observed_at: Timestamp,
}

impl Message {
    /// The best block carried by this message, if its kind reports one.
    pub fn best_block(&self) -> Option<BestBlock> {
        let (height, hash) = match &self.payload {
            Payload::NodeStart(r) | Payload::BlockImport(r) => (r.height, r.best.clone()),
            Payload::SystemInterval(i) => match (i.height, &i.best) {
                (Some(height), Some(best)) => (height, best.clone()),
                _ => return None,
            },
            _ => return None,
        };
        Some(BestBlock {
            height,
            hash,
            observed_at: self.ts,
        })
    }

    /// Whether this is the `system.connected` handshake.
    pub fn is_handshake(&self) -> bool {
        matches!(self.payload, Payload::SystemConnected(_))
    }

    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::SystemConnected(_) => "system.connected",
            Payload::SystemInterval(_) => "system.interval",
            Payload::NodeStart(_) => "node.start",
            Payload::BlockImport(_) => "block.import",
            Payload::NotifyFinalized(_) => "notify.finalized",
            Payload::AfgFinalized(_) => "afg.finalized",
            Payload::AfgReceivedPrecommit(_) => "afg.received_precommit",
            Payload::AfgReceivedPrevote(_) => "afg.received_prevote",
            Payload::AfgAuthoritySet(_) => "afg.authority_set",
            Payload::Unknown => "unknown",
        }
    }
}

/// Decode one raw frame.
pub fn decode(raw: &str) -> Result<Message, DecodeError> {
    Ok(serde_json::from_str(raw)?)
}

/// Decode one raw frame, dropping it if it is malformed.
pub fn parse(raw: &str) -> Option<Message> {
    match decode(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!(error = %e, "dropping undecodable telemetry frame");
            None
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(u64),
    Float(f64),
    Str(String),
}

impl NumOrStr {
    fn into_u64<E: de::Error>(self) -> Result<u64, E> {
        match self {
            NumOrStr::Num(n) => Ok(n),
            NumOrStr::Float(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
            NumOrStr::Float(f) => Err(E::custom(format!("not an unsigned integer: {f}"))),
            NumOrStr::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("not an unsigned integer: {s:?}"))),
        }
    }
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    NumOrStr::deserialize(d)?.into_u64()
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Option::<NumOrStr>::deserialize(d)?
        .map(NumOrStr::into_u64)
        .transpose()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(u64),
    Rfc3339(String),
}

fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
    match RawTimestamp::deserialize(d)? {
        RawTimestamp::Millis(ms) => Ok(ms),
        RawTimestamp::Rfc3339(s) => chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.timestamp_millis().max(0) as Timestamp)
            .map_err(de::Error::custom),
    }
}
