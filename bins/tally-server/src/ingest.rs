//! WebSocket ingest endpoint.
//!
//! `GET /submit` upgrades to a WebSocket. Each connection goes through the
//! handshake, gets a [`NodeId`] and is then driven by
//! [`tally_node::run_session`] until it disconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, State},
    response::IntoResponse,
    routing::get,
};
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, StreamExt, future};
use tally_core::error::NodeError;
use tally_core::message::parse;
use tally_core::traits::{Connection, Locator};
use tally_core::types::NodeId;
use tally_node::{
    EventSink, IdGenerator, Inbound, SessionConfig, SessionEvent, await_handshake, run_session,
    start_session,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionConfig>,
    pub ids: Arc<IdGenerator>,
    pub locator: Arc<dyn Locator>,
    pub registry: Arc<Registry>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submit", get(submit))
        .with_state(state)
}

async fn submit(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let (mut sink, stream) = socket.split();
    let mut inbound = Box::pin(stream.filter_map(|frame| future::ready(to_inbound(frame))));

    let accepted = match await_handshake(&mut inbound, &state.session, Some(addr.ip().to_string())).await {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(peer = %addr, error = %e, "handshake failed");
            reject(&mut sink).await;
            return;
        }
    };

    let id = state.ids.next_id();
    state.registry.register(id, accepted.identity.clone());

    let (connection, writer) = WsConnection::spawn(id, sink);
    let session = start_session(
        accepted,
        Box::new(connection),
        EventSink::new(id, state.events.clone()),
        &state.session,
    );
    run_session(session, inbound, Arc::clone(&state.locator), state.session.tick_interval).await;

    if let Err(e) = writer.await {
        warn!(node = %id, error = %e, "writer task failed");
    }
    info!(node = %id, peer = %addr, "connection finished");
}

/// Send a close frame to a connection that never completed its handshake.
async fn reject<S>(sink: &mut S)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!(error = %e, "close frame not delivered");
    }
    let _ = sink.close().await;
}

/// Map one WebSocket frame to a session input. Pings are answered by the
/// WebSocket layer and undecodable frames are dropped.
fn to_inbound(frame: Result<Message, axum::Error>) -> Option<Inbound> {
    match frame {
        Ok(Message::Text(text)) => parse(&text).map(Inbound::Message),
        Ok(Message::Binary(bytes)) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(parse)
            .map(Inbound::Message),
        Ok(Message::Pong(_)) => Some(Inbound::Pong),
        Ok(Message::Ping(_)) => None,
        Ok(Message::Close(_)) => Some(Inbound::Closed),
        Err(e) => Some(Inbound::Error(e.to_string())),
    }
}

/// Control frames queued for the writer task.
#[derive(Debug)]
enum Outbound {
    Ping,
    Close,
}

/// [`Connection`] over the write half of a WebSocket.
///
/// Frames are handed to a writer task; dropping the queue sender lets the
/// writer drain and release the socket.
struct WsConnection {
    node: NodeId,
    tx: Option<mpsc::UnboundedSender<Outbound>>,
}

impl WsConnection {
    fn spawn(node: NodeId, mut sink: SplitSink<WebSocket, Message>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let (msg, last) = match frame {
                    Outbound::Ping => (Message::Ping(Vec::new()), false),
                    Outbound::Close => (Message::Close(None), true),
                };
                if let Err(e) = sink.send(msg).await {
                    debug!(node = %node, error = %e, "websocket send failed");
                    break;
                }
                if last {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        (Self { node, tx: Some(tx) }, writer)
    }

    fn queue(&self, frame: Outbound) -> Result<(), NodeError> {
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| NodeError::PingFailed("writer closed".into())),
            None => Err(NodeError::PingFailed("connection terminated".into())),
        }
    }
}

impl Connection for WsConnection {
    fn ping(&mut self) -> Result<(), NodeError> {
        self.queue(Outbound::Ping)
    }

    fn close(&mut self) {
        if self.queue(Outbound::Close).is_err() {
            debug!(node = %self.node, "close on finished connection");
        }
    }

    fn terminate(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_decode() {
        let frame = Message::Text(r#"{"ts":1,"msg":"block.import","best":"0x1","height":1}"#.into());
        assert!(matches!(to_inbound(Ok(frame)), Some(Inbound::Message(_))));
    }

    #[test]
    fn binary_frames_decode() {
        let frame = Message::Binary(br#"{"ts":1,"msg":"node.start","best":"0x1","height":1}"#.to_vec());
        assert!(matches!(to_inbound(Ok(frame)), Some(Inbound::Message(_))));
    }

    #[test]
    fn garbage_is_dropped() {
        assert!(to_inbound(Ok(Message::Text("{oops".into()))).is_none());
        assert!(to_inbound(Ok(Message::Ping(vec![1]))).is_none());
    }

    #[tokio::test]
    async fn rejected_handshake_gets_close_frame() {
        let mut sent: Vec<Message> = Vec::new();
        reject(&mut sent).await;
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Message::Close(None)));
    }

    #[test]
    fn control_frames_map() {
        assert_eq!(to_inbound(Ok(Message::Pong(vec![]))), Some(Inbound::Pong));
        assert_eq!(to_inbound(Ok(Message::Close(None))), Some(Inbound::Closed));
    }
}
