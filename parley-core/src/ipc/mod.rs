//! Event payloads broadcast by a [`RealtimeSession`](crate::RealtimeSession).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` with camelCase
//! fields so a host can forward them verbatim as JSON.

pub mod events;
