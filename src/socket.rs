//! WebSocket transport for one conversation.
//!
//! DESIGN
//! ======
//! `ChatSocket::open` spawns a task that owns the WebSocket stream for its
//! whole life. The task connects, reads frames in arrival order, parses them
//! into [`InboundEvent`] and pushes them onto the consumer's channel. Outbound
//! payloads travel the other way through an unbounded queue that the task
//! drains into the socket while connected.
//!
//! LIFECYCLE
//! =========
//! 1. Connect → emit `connected`, reset backoff
//! 2. Read loop until remote close / read error / stream end
//! 3. Emit `disconnected`; consult [`Backoff`]
//! 4. Retry after `base_delay * N` with `reconnecting`, or emit the terminal
//!    error once attempts are spent
//!
//! When the task returns, for whatever reason, the socket reports
//! `is_finished()`; a finished socket never reconnects on its own.
//!
//! `close()` (or dropping the handle) flips an atomic flag and wakes the task.
//! The flag is checked before every emit, so nothing is delivered after close,
//! and the task sends exactly one close frame if it was connected.
//!
//! ERROR HANDLING
//! ==============
//! Malformed frames are logged and dropped. Transport errors become `error`
//! events. Nothing here panics or returns an error to the owner; sends report
//! delivery to the queue as a `bool`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::backoff::{Backoff, ReconnectPolicy, Retry};
use crate::config::RealtimeConfig;
use crate::event::{ConnectionStatus, InboundEvent, parse_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Consumer side of a socket's events.
pub type EventSender = mpsc::UnboundedSender<InboundEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// Message emitted when every reconnect attempt has failed.
pub const RECONNECT_EXHAUSTED: &str = "Max reconnection attempts reached";

/// State shared between the handle and its connection task.
struct Shared {
    id: Uuid,
    connected: AtomicBool,
    closed: AtomicBool,
    /// Set once the connection task has returned.
    finished: AtomicBool,
    shutdown: Notify,
    events: EventSender,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn emit(&self, event: InboundEvent) {
        if self.is_closed() {
            debug!(connection = %self.id, kind = event.kind(), "socket closed; event suppressed");
            return;
        }
        if self.events.send(event).is_err() {
            debug!(connection = %self.id, "event receiver dropped");
        }
    }

    fn dispatch(&self, text: &str) {
        match parse_frame(text) {
            Ok(event) => self.emit(event),
            Err(e) => warn!(connection = %self.id, error = %e, "dropping malformed frame"),
        }
    }
}

/// Handle to one realtime connection. Dropping it closes the connection.
pub struct ChatSocket {
    shared: Arc<Shared>,
    conversation_id: String,
    outbound: mpsc::UnboundedSender<String>,
}

impl ChatSocket {
    /// Start connecting to the conversation endpoint.
    ///
    /// Must be called from within a tokio runtime. Events, including the
    /// locally generated connection status changes, are sent to `events`.
    #[must_use]
    pub fn open(config: &RealtimeConfig, conversation_id: &str, token: &str, events: EventSender) -> Self {
        let endpoint = config.endpoint(conversation_id, token);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            shutdown: Notify::new(),
            events,
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        info!(connection = %shared.id, %conversation_id, "chat socket opening");
        let task_shared = Arc::clone(&shared);
        let policy = config.reconnect;
        tokio::spawn(async move {
            run(&task_shared, endpoint, policy, outbound_rx).await;
            task_shared.finished.store(true, Ordering::Release);
        });

        Self { shared, conversation_id: conversation_id.to_owned(), outbound }
    }

    /// Unique id of this socket instance (for log correlation).
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// True while the underlying WebSocket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.shared.is_closed() && self.shared.connected.load(Ordering::Acquire)
    }

    /// True once the connection task has stopped for good: after `close()`
    /// or after reconnect attempts ran out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Serialize `payload` as JSON and queue it for transmission.
    ///
    /// Fire-and-forget. Returns `false` without sending anything when the
    /// socket is not open or the payload cannot be serialized.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        if !self.is_connected() {
            debug!(connection = %self.shared.id, "send skipped: socket not open");
            return false;
        }
        match serde_json::to_string(payload) {
            Ok(json) => self.outbound.send(json).is_ok(),
            Err(e) => {
                warn!(connection = %self.shared.id, error = %e, "send skipped: payload not serializable");
                false
            }
        }
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Returns `true` for the call that initiated teardown; later calls do
    /// nothing and return `false`.
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.connected.store(false, Ordering::Release);
        self.shared.shutdown.notify_one();
        info!(connection = %self.shared.id, conversation_id = %self.conversation_id, "chat socket closed");
        true
    }
}

impl Drop for ChatSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChatSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSocket")
            .field("id", &self.shared.id)
            .field("conversation_id", &self.conversation_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

/// How a live connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Ended {
    /// Owner called `close()`.
    Shutdown,
    /// Remote close, read error, or end of stream.
    Lost,
}

async fn run(
    shared: &Shared,
    endpoint: Url,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut backoff = Backoff::new(policy);

    loop {
        let connected = tokio::select! {
            () = shared.shutdown.notified() => return,
            result = connect_async(endpoint.as_str()) => result,
        };

        match connected {
            Ok((stream, _response)) => {
                if shared.is_closed() {
                    return;
                }
                backoff.on_open();
                shared.connected.store(true, Ordering::Release);
                info!(connection = %shared.id, "chat socket connected");
                shared.emit(InboundEvent::status(ConnectionStatus::Connected));

                let ended = pump(shared, stream, &mut outbound).await;
                shared.connected.store(false, Ordering::Release);
                if ended == Ended::Shutdown {
                    return;
                }
            }
            Err(e) => {
                warn!(connection = %shared.id, error = %e, "chat socket connect failed");
                shared.emit(InboundEvent::error(format!("connection error: {e}")));
            }
        }

        if shared.is_closed() {
            return;
        }
        discard_queued(shared, &mut outbound);
        shared.emit(InboundEvent::status(ConnectionStatus::Disconnected));

        match backoff.on_unexpected_close() {
            Retry::After { attempt, delay } => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                info!(connection = %shared.id, attempt, delay_ms, "chat socket reconnecting");
                shared.emit(InboundEvent::status(ConnectionStatus::Reconnecting));
                tokio::select! {
                    () = shared.shutdown.notified() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Retry::Exhausted { attempts } => {
                warn!(connection = %shared.id, attempts, "chat socket giving up");
                // Must be observable by the time the terminal error arrives.
                shared.finished.store(true, Ordering::Release);
                shared.emit(InboundEvent::error(RECONNECT_EXHAUSTED));
                return;
            }
        }
    }
}

/// Shuttle frames both ways until the connection ends.
async fn pump(shared: &Shared, stream: WsStream, outbound: &mut mpsc::UnboundedReceiver<String>) -> Ended {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            () = shared.shutdown.notified() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(connection = %shared.id, error = %e, "close frame not delivered");
                }
                return Ended::Shutdown;
            }
            Some(json) = outbound.recv() => {
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    warn!(connection = %shared.id, error = %e, "chat socket write failed");
                    shared.emit(InboundEvent::error(format!("send failed: {e}")));
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection = %shared.id, ?frame, "chat socket closed by server");
                        return Ended::Lost;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(connection = %shared.id, bytes = data.len(), "dropping binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection = %shared.id, error = %e, "chat socket read failed");
                        shared.emit(InboundEvent::error(format!("connection error: {e}")));
                        return Ended::Lost;
                    }
                    None => return Ended::Lost,
                }
            }
        }
    }
}

/// Drop payloads queued for a connection that no longer exists.
fn discard_queued(shared: &Shared, outbound: &mut mpsc::UnboundedReceiver<String>) {
    let mut dropped = 0usize;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(connection = %shared.id, dropped, "discarded queued sends after disconnect");
    }
}

#[cfg(test)]
#[path = "socket_test.rs"]
mod tests;
