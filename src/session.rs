//! Realtime session: binds one chat socket to plain view state.
//!
//! DESIGN
//! ======
//! `RealtimeSession` owns at most one [`ChatSocket`] and its event receiver,
//! keyed by `(conversation_id, token)` while enabled. Every event from that
//! socket is folded into [`LiveState`], a struct of independently readable
//! fields a view can render directly.
//!
//! Replacing the connection is teardown-then-create: the old socket is closed
//! and its receiver dropped before the new socket exists. Late events from a
//! superseded socket have nowhere to go, so they cannot touch the state.
//!
//! ERROR HANDLING
//! ==============
//! Errors become a transient message in `LiveState` that reads as `None` once
//! `error_clear_after` has passed. Existing stream text and response history
//! are never discarded because of an error.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::event::{ConnectionStatus, InboundEvent, Mood};
use crate::socket::{ChatSocket, EventReceiver};
use crate::stream::StreamingText;

// =============================================================================
// LIVE STATE
// =============================================================================

/// Latest known realtime state for one view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveState {
    pub connected: bool,
    pub status: ConnectionStatus,
    pub mood: Option<Mood>,
    /// Server-reported budget; the daily limit until the first update.
    pub tokens_remaining: u64,
    /// Status text while the assistant works; cleared on `complete`.
    pub thinking: Option<String>,
    /// Current (or last finished) response.
    pub stream: StreamingText,
    /// Finished responses, oldest first.
    pub responses: Vec<String>,
    error: Option<TransientError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TransientError {
    message: String,
    /// `None` when the visibility window reaches past what `Instant` can hold.
    expires_at: Option<Instant>,
}

impl LiveState {
    #[must_use]
    pub fn new(daily_token_limit: u64) -> Self {
        Self {
            connected: false,
            status: ConnectionStatus::Disconnected,
            mood: None,
            tokens_remaining: daily_token_limit,
            thinking: None,
            stream: StreamingText::new(),
            responses: Vec::new(),
            error: None,
        }
    }

    /// Current error message, or `None` once it has expired.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error
            .as_ref()
            .filter(|e| e.expires_at.is_none_or(|at| Instant::now() < at))
            .map(|e| e.message.as_str())
    }

    /// Show `message` for `visible_for`. A newer error restarts the clock.
    ///
    /// A window too large to represent keeps the error until it is replaced
    /// or cleared.
    pub fn set_error(&mut self, message: impl Into<String>, visible_for: Duration) {
        let expires_at = Instant::now().checked_add(visible_for);
        self.error = Some(TransientError { message: message.into(), expires_at });
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// When the current error stops being visible, if it ever does.
    #[must_use]
    pub fn error_deadline(&self) -> Option<Instant> {
        self.error.as_ref().and_then(|e| e.expires_at)
    }

    /// Start a new streaming cycle. Unfinished text already shown is kept in
    /// `responses` rather than lost.
    pub fn begin_cycle(&mut self) {
        if !self.stream.is_complete() && !self.stream.is_empty() {
            self.responses.push(self.stream.content());
        }
        self.stream = StreamingText::new();
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.connected = status == ConnectionStatus::Connected;
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: &InboundEvent, error_visible_for: Duration) {
        match event {
            InboundEvent::MoodUpdate { mood } => self.mood = Some(mood.clone()),
            InboundEvent::ResponseChunk { chunk } => {
                // A chunk after `complete` with no new send opens a fresh cycle.
                if self.stream.is_complete() {
                    self.stream = StreamingText::new();
                }
                self.stream.push(chunk.as_str());
            }
            InboundEvent::Thinking { message } => self.thinking = Some(message.clone()),
            InboundEvent::TokenUpdate { tokens_remaining } => self.tokens_remaining = *tokens_remaining,
            InboundEvent::Complete => {
                self.thinking = None;
                if !self.stream.is_complete() {
                    self.stream.finish();
                    if !self.stream.is_empty() {
                        self.responses.push(self.stream.content());
                    }
                }
            }
            InboundEvent::Error { message } => self.set_error(message.as_str(), error_visible_for),
            InboundEvent::Connection { status } => self.set_status(*status),
        }
    }

    fn reset_connection(&mut self) {
        self.set_status(ConnectionStatus::Disconnected);
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// What [`RealtimeSession::next_update`] applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    Event(InboundEvent),
    ErrorCleared,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SessionKey {
    conversation_id: String,
    token: String,
}

struct Link {
    socket: ChatSocket,
    events: EventReceiver,
}

/// Owner of the live connection for one consuming view.
pub struct RealtimeSession {
    config: RealtimeConfig,
    key: Option<SessionKey>,
    link: Option<Link>,
    state: LiveState,
}

impl RealtimeSession {
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        let state = LiveState::new(config.daily_token_limit);
        Self { config, key: None, link: None, state }
    }

    #[must_use]
    pub fn state(&self) -> &LiveState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LiveState {
        &mut self.state
    }

    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// True while the socket is connected or still retrying.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.link.as_ref().is_some_and(|link| !link.socket.is_finished())
    }

    /// Id of the current socket, for log correlation.
    #[must_use]
    pub fn connection_id(&self) -> Option<Uuid> {
        self.link.as_ref().map(|link| link.socket.id())
    }

    /// True when [`RealtimeSession::next_update`] has nothing to wait for.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.link.is_none() && self.state.error_deadline().is_none()
    }

    /// Point the session at `(conversation_id, token)`, or switch it off.
    ///
    /// Must be called from within a tokio runtime when `enabled`. The previous
    /// connection, if any, is closed before a new one is opened. Calling
    /// again with the same tuple does nothing while its socket is still
    /// connected or retrying; once the socket has given up, it reconnects.
    pub fn configure(&mut self, conversation_id: &str, token: &str, enabled: bool) {
        let key = SessionKey { conversation_id: conversation_id.to_owned(), token: token.to_owned() };

        if enabled && self.is_active() && self.key.as_ref() == Some(&key) {
            return;
        }

        if self.key.as_ref().is_some_and(|old| old.conversation_id != key.conversation_id) {
            self.state.stream = StreamingText::new();
            self.state.thinking = None;
        }

        self.teardown();
        self.key = Some(key);

        if enabled {
            let (tx, events) = mpsc::unbounded_channel();
            let socket = ChatSocket::open(&self.config, conversation_id, token, tx);
            info!(connection = %socket.id(), %conversation_id, "realtime session attached");
            self.link = Some(Link { socket, events });
        }
    }

    /// Forward `payload` to the live socket. Safe no-op without one.
    ///
    /// A delivered message starts a new streaming cycle; see
    /// [`LiveState::begin_cycle`].
    pub fn send_message<T: Serialize + ?Sized>(&mut self, payload: &T) -> bool {
        let Some(link) = self.link.as_ref() else {
            debug!("send_message skipped: no live connection");
            return false;
        };
        let sent = link.socket.send(payload);
        if sent {
            self.state.begin_cycle();
        }
        sent
    }

    /// Close the live connection and reset connection fields.
    pub fn disconnect(&mut self) {
        self.teardown();
    }

    /// Apply an event from any producer, as if it arrived on the socket.
    pub fn apply(&mut self, event: &InboundEvent) {
        self.state.apply(event, self.config.error_clear_after);
    }

    /// Wait for the next event (or error expiry), apply it, and report it.
    ///
    /// Returns `None` immediately when idle.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let deadline = self.state.error_deadline();
        let expiry = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let Some(link) = self.link.as_mut() else {
            deadline?;
            expiry.await;
            self.state.clear_error();
            return Some(SessionUpdate::ErrorCleared);
        };

        tokio::select! {
            event = link.events.recv() => {
                let event = event?;
                self.state.apply(&event, self.config.error_clear_after);
                Some(SessionUpdate::Event(event))
            }
            () = expiry => {
                self.state.clear_error();
                Some(SessionUpdate::ErrorCleared)
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.socket.close();
            debug!(connection = %link.socket.id(), "realtime session detached");
        }
        self.state.reset_connection();
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
