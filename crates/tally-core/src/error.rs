//! Error types for Tally.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid json: {0}")] Json(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("handshake timed out")] HandshakeTimeout,
    #[error("connection closed before handshake")] ClosedBeforeHandshake,
    #[error("transport: {0}")] Transport(String),
    #[error("ping failed: {0}")] PingFailed(String),
    #[error("malformed authority set: {0}")] AuthoritySet(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
