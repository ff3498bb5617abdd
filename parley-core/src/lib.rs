//! # parley-core
//!
//! Realtime duplex voice session engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioBackend → SPSC ring → capture worker (thread)
//!                                             │ resample → frame → encode
//!                                             ▼
//!                                   TransportSession::send_realtime_input
//!
//! Transport events → event loop (tokio) → decode → PlaybackScheduler
//!                                                      │ crossbeam
//!                                                      ▼
//!                                      PlaybackRenderer (output callback)
//!
//! capture / renderer taps → Visualizer (tokio interval) → VisualizationFrame
//! ```
//!
//! Device callbacks never allocate after warm-up or lock.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;
pub mod transport;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, StreamHandle, StreamKind};
pub use codec::{EncodedFrame, PlaybackBuffer};
pub use error::{ParleyError, Result};
pub use ipc::events::{
    ConversationEvent, ConversationEventKind, LevelReading, SessionStatusEvent, VisualizationFrame,
};
pub use session::{state::SessionState, DiagnosticsSnapshot, RealtimeSession, SessionConfig};
pub use transport::{
    ConnectConfig, ServerMessage, Transport, TransportCallbacks, TransportEvent, TransportSession,
};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;

#[cfg(feature = "gemini-live")]
pub use transport::GeminiLiveTransport;
