//! Broadcast event types.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `SessionStatusEvent` | `RealtimeSession::subscribe_status` |
//! | `VisualizationFrame` | `RealtimeSession::subscribe_visualization` |
//! | `ConversationEvent` | `RealtimeSession::subscribe_conversation` |

use serde::{Deserialize, Serialize};

use crate::session::state::SessionState;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Human-readable detail, set for `Error`.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Visualization
// ---------------------------------------------------------------------------

/// Amplitude summary of one analysis window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReading {
    /// Root-mean-square level in [0.0, 1.0].
    pub rms: f32,
    /// Mean absolute amplitude in [0.0, 1.0].
    pub mean_abs: f32,
    pub peak: f32,
}

/// One display-rate snapshot of input and output audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationFrame {
    /// Monotonically increasing per session.
    pub seq: u64,
    pub input_level: LevelReading,
    pub output_level: LevelReading,
    /// `fft_size / 2` bins, each in [0.0, 1.0].
    pub input_spectrum: Vec<f32>,
    pub output_spectrum: Vec<f32>,
    /// Mean absolute input amplitude is above the speech threshold.
    pub speech_present: bool,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Non-audio content from the server, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    pub seq: u64,
    pub kind: ConversationEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversationEventKind {
    Text { text: String },
    TurnComplete,
    /// The server cut its reply short; queued playback was flushed.
    Interrupted,
}
