//! In-process WebSocket server for transport and session tests.
//!
//! Each accepted upgrade is handed to the test as a [`MockPeer`] so the test
//! drives the server side frame by frame.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::RealtimeConfig;
use crate::event::InboundEvent;
use crate::socket::EventReceiver;

pub(crate) const WAIT: Duration = Duration::from_secs(3);

/// Server side of one accepted connection.
pub(crate) struct MockPeer {
    pub conversation_id: String,
    pub token: Option<String>,
    pub socket: WebSocket,
}

impl MockPeer {
    pub async fn send_raw(&mut self, text: &str) {
        self.socket
            .send(Message::Text(text.to_owned().into()))
            .await
            .expect("mock peer send");
    }

    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.send_raw(&value.to_string()).await;
    }

    /// Next text frame from the client, or `None` on close / timeout.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match timeout(WAIT, self.socket.recv()).await {
                Ok(Some(Ok(Message::Text(text)))) => return Some(text.as_str().to_owned()),
                Ok(Some(Ok(Message::Close(_)) | Err(_)) | None) | Err(_) => return None,
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Read until the stream ends and return every message received.
    pub async fn drain(&mut self) -> Vec<Message> {
        let mut seen = Vec::new();
        while let Ok(Some(Ok(msg))) = timeout(WAIT, self.socket.recv()).await {
            seen.push(msg);
        }
        seen
    }

    /// Close from the server side, as an unexpected drop from the client's view.
    pub async fn hang_up(mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}

pub(crate) struct MockServer {
    pub addr: SocketAddr,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockServer {
    pub async fn start() -> Self {
        let (tx, peers) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/ws/chat/{conversation_id}", get(upgrade))
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server");
        });
        Self { addr, peers }
    }

    pub fn config(&self) -> RealtimeConfig {
        RealtimeConfig::new(&format!("ws://{}", self.addr)).expect("mock config")
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> MockPeer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("no connection within timeout")
            .expect("mock server stopped")
    }

    /// Assert no client connects within `window`.
    pub async fn assert_no_connection(&mut self, window: Duration) {
        assert!(timeout(window, self.peers.recv()).await.is_err(), "unexpected connection");
    }
}

async fn upgrade(
    State(peers): State<mpsc::UnboundedSender<MockPeer>>,
    Path(conversation_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.get("token").cloned();
    ws.on_upgrade(move |socket| async move {
        let _ = peers.send(MockPeer { conversation_id, token, socket });
    })
}

/// A config pointing at a port nothing listens on.
pub(crate) async fn refused_config() -> RealtimeConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    RealtimeConfig::new(&format!("ws://{addr}")).expect("refused config")
}

pub(crate) async fn next_event(rx: &mut EventReceiver) -> InboundEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event receive timed out")
        .expect("event channel closed")
}

/// Receive events until `stop` matches, returning all of them including the match.
pub(crate) async fn events_until<F>(rx: &mut EventReceiver, stop: F) -> Vec<InboundEvent>
where
    F: Fn(&InboundEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub(crate) async fn assert_quiet(rx: &mut EventReceiver, window: Duration) {
    if let Ok(Some(event)) = timeout(window, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
