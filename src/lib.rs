//! # spice-chat
//!
//! Realtime chat transport for the persona chat front-end.
//!
//! A [`RealtimeSession`] owns one [`ChatSocket`] per conversation. The socket
//! speaks a small JSON frame protocol (see [`event`]), reconnects with linear
//! backoff (see [`backoff`]), and feeds typed events into [`LiveState`], whose
//! streaming buffer is a [`StreamingText`].

pub mod backoff;
pub mod clipboard;
pub mod config;
pub mod event;
pub mod session;
pub mod socket;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::{ConfigError, RealtimeConfig};
pub use event::{ConnectionStatus, InboundEvent, Mood, MoodAnimation, OutboundMessage};
pub use session::{LiveState, RealtimeSession, SessionUpdate};
pub use socket::ChatSocket;
pub use stream::StreamingText;
