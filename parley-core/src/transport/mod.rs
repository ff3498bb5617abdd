//! Duplex transport abstraction.
//!
//! A [`Transport`] connects to a remote realtime service and returns a
//! [`TransportSession`] that is *pending*: it may not be sent to until the
//! `Open` event arrives. All four callbacks are bundled in
//! [`TransportCallbacks`] and handed over at connect time, so none can be
//! registered late. Events land on a tokio channel and are processed in
//! arrival order by the session's event loop.

#[cfg(feature = "gemini-live")]
pub mod gemini;

#[cfg(feature = "gemini-live")]
pub use gemini::GeminiLiveTransport;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{codec::EncodedFrame, error::Result};

/// Inline audio carried by a server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineAudio {
    /// Base64 16-bit PCM.
    pub data: String,
    /// e.g. `audio/pcm;rate=24000`. Empty when the server omits it.
    #[serde(default)]
    pub mime_type: String,
}

/// One server event, reduced to what the session acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Zero or one audio payload.
    pub audio: Option<InlineAudio>,
    pub text: Option<String>,
    /// The server cut its reply short (user barge-in).
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl ServerMessage {
    pub fn audio(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            audio: Some(InlineAudio {
                data: data.into(),
                mime_type: mime_type.into(),
            }),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.text.is_none() && !self.interrupted && !self.turn_complete
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(ServerMessage),
    /// Remote or local close, with an optional reason.
    Close(Option<String>),
    Error(String),
}

/// Sink for the transport's `on_open` / `on_message` / `on_close` /
/// `on_error` callbacks.
///
/// Cheap to clone. Sending after the receiving loop has gone is a no-op.
#[derive(Debug, Clone)]
pub struct TransportCallbacks {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportCallbacks {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on_open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn on_message(&self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message));
    }

    pub fn on_close(&self, reason: Option<String>) {
        self.emit(TransportEvent::Close(reason));
    }

    pub fn on_error(&self, error: impl Into<String>) {
        self.emit(TransportEvent::Error(error.into()));
    }

    fn emit(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("transport event dropped: session loop gone");
        }
    }
}

/// Parameters of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    pub model: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub system_instruction: Option<String>,
    pub voice: Option<String>,
}

/// Factory for duplex sessions.
pub trait Transport: Send + Sync + 'static {
    /// Begin connecting. Returns immediately with a pending session.
    ///
    /// Connection failures after this returns are reported through
    /// `callbacks.on_error`.
    fn connect(
        &self,
        config: &ConnectConfig,
        callbacks: TransportCallbacks,
    ) -> Result<Arc<dyn TransportSession>>;
}

/// A live (or pending) duplex session.
pub trait TransportSession: Send + Sync {
    /// Fire-and-forget send of one captured frame.
    fn send_realtime_input(&self, frame: &EncodedFrame) -> Result<()>;

    /// Close the session. Calling it more than once is harmless.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callbacks_deliver_events_in_order() {
        let (callbacks, mut rx) = TransportCallbacks::channel();
        callbacks.on_open();
        callbacks.on_message(ServerMessage::audio("AAAA", "audio/pcm;rate=24000"));
        callbacks.on_error("boom");
        callbacks.on_close(None);

        assert_eq!(rx.recv().await, Some(TransportEvent::Open));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Message(m)) if m.audio.is_some()));
        assert_eq!(rx.recv().await, Some(TransportEvent::Error("boom".into())));
        assert_eq!(rx.recv().await, Some(TransportEvent::Close(None)));
    }

    #[test]
    fn callbacks_after_receiver_dropped_are_ignored() {
        let (callbacks, rx) = TransportCallbacks::channel();
        drop(rx);
        callbacks.on_open();
        callbacks.on_error("late");
    }

    #[test]
    fn empty_message_detection() {
        assert!(ServerMessage::default().is_empty());
        assert!(!ServerMessage {
            turn_complete: true,
            ..ServerMessage::default()
        }
        .is_empty());
    }
}
