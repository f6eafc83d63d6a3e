//! Collaborator interfaces required by a node session.
//!
//! - [`Connection`]: the live duplex transport behind a session
//! - [`Locator`]: IP geolocation, resolved asynchronously

use async_trait::async_trait;

use crate::error::NodeError;
use crate::types::Location;

/// Control surface of the transport a node is connected over.
///
/// Inbound frames and pongs are delivered to the session by its driver; the
/// session only needs to ping and to tear the connection down.
pub trait Connection: Send {
    /// Send a transport-level ping. Failure is treated as a connection error.
    fn ping(&mut self) -> Result<(), NodeError>;

    /// Begin a graceful close.
    fn close(&mut self);

    /// Forcibly terminate the connection and release its listeners.
    fn terminate(&mut self);
}

/// Resolves a node IP to a [`Location`].
#[async_trait]
pub trait Locator: Send + Sync {
    /// Returns `None` when the address cannot be located.
    async fn locate(&self, ip: &str) -> Option<Location>;
}

/// A [`Locator`] that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocator;

#[async_trait]
impl Locator for NoopLocator {
    async fn locate(&self, _ip: &str) -> Option<Location> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_locator_resolves_nothing() {
        assert!(NoopLocator.locate("127.0.0.1").await.is_none());
    }
}
