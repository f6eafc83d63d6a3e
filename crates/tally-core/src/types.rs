//! Core value types: blocks, addresses, node identity.
//!
//! Timestamps are unix milliseconds (`u64`) throughout.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Unix time in milliseconds.
pub type Timestamp = u64;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Opaque block identifier as reported by the node (usually `0x`-prefixed hex).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct BlockHash(pub String);

impl BlockHash {
    /// The empty hash carried by [`Block::zero`].
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for BlockHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A `(height, hash)` pair.
///
/// Blocks are compared by height only, see [`Block::cmp_height`]; equality
/// still considers the hash so a same-height reorg is observable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Block {
    pub height: u64,
    pub hash: BlockHash,
}

impl Block {
    pub fn new(height: u64, hash: impl Into<BlockHash>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Height 0 with an empty hash.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.height == 0 && self.hash.is_empty()
    }

    /// Order two blocks by height, ignoring hashes.
    pub fn cmp_height(&self, other: &Block) -> Ordering {
        self.height.cmp(&other.height)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}

/// Network address (public key) of a node or a finality voter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Build an address from a raw voter field.
    ///
    /// Producers encode the voter as a JSON string inside a string, so the raw
    /// value arrives wrapped in quote characters. Returns `None` when nothing
    /// is left after stripping them.
    pub fn from_quoted(raw: &str) -> Option<Self> {
        let inner = raw.trim().trim_matches('"');
        if inner.is_empty() {
            None
        } else {
            Some(Self(inner.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Process-unique identifier assigned to each accepted node session.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Resolved geographic position of a node's IP.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub city: String,
}

/// Identity reported once in the `system.connected` handshake.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct NodeIdentity {
    pub name: String,
    pub chain: String,
    pub implementation: String,
    pub version: String,
    /// Network address; consensus tracking is disabled without it.
    pub address: Option<Address>,
    pub network_id: Option<String>,
    pub authority: bool,
    pub config: String,
    pub ip: Option<String>,
}

/// Current list of finality voters.
pub type AuthorityList = Vec<Address>;
