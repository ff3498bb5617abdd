//! Session lifecycle states.
//!
//! ```text
//!                 start                 transport open
//! Disconnected ─────────► Connecting ─────────────────► Connected
//!      ▲  ▲                   │                             │
//!      │  │ stop / close      │ error                       │ error
//!      │  └───────────────────┼─────────────────────────────┤
//!      │                      ▼                             ▼
//!      └──────── stop ────── Error ◄────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected | Error, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting | Connected, Error) => true,
            _ => false,
        }
    }

    /// Holds, or is acquiring, audio and transport resources.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Captured frames may be sent only in this state.
    pub fn accepts_frames(self) -> bool {
        self == Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::{self, *};

    #[test]
    fn legal_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Error));
        assert!(Connecting.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));
        for s in [Disconnected, Connecting, Connected, Error] {
            assert!(s.can_transition_to(Disconnected), "{s} -> disconnected");
        }
    }

    #[test]
    fn illegal_edges() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Error));
        assert!(!Error.can_transition_to(Connected));
    }

    #[test]
    fn only_connected_accepts_frames() {
        assert!(Connected.accepts_frames());
        assert!(!Connecting.accepts_frames());
        assert!(Connecting.is_active());
        assert!(!Error.is_active());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }
}
