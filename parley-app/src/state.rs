//! Host application state.
//!
//! `AppState` is shared by the stdin command loop and the event-forwarding
//! tasks started in `main`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_core::{DiagnosticsSnapshot, RealtimeSession, SessionState};

use crate::settings::AppSettings;
use crate::storage::{ConversationRecordInput, LocalStore};

pub struct AppState {
    pub session: Arc<RealtimeSession>,
    /// Persisted app settings cache.
    pub settings: Arc<Mutex<AppSettings>>,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    /// `None` when the database could not be opened.
    pub store: Option<Arc<LocalStore>>,
    /// Conversation currently being recorded.
    pub draft: Arc<Mutex<ConversationDraft>>,
}

/// Accumulates one conversation between `Connecting` and teardown.
#[derive(Debug, Default)]
pub struct ConversationDraft {
    started_at: Option<DateTime<Utc>>,
    transcript: String,
}

impl ConversationDraft {
    pub fn is_open(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.transcript.clear();
    }

    /// Append server text. Ignored when no conversation is open.
    pub fn push_text(&mut self, text: &str) {
        if self.is_open() {
            self.transcript.push_str(text);
        }
    }

    /// Mark a turn boundary in the transcript.
    pub fn end_turn(&mut self) {
        if self.is_open() && !self.transcript.is_empty() && !self.transcript.ends_with('\n') {
            self.transcript.push('\n');
        }
    }

    /// Close the draft and produce the record to persist.
    pub fn finish(
        &mut self,
        now: DateTime<Utc>,
        state: SessionState,
        error: Option<String>,
        diagnostics: &DiagnosticsSnapshot,
    ) -> Option<ConversationRecordInput> {
        let started_at = self.started_at.take()?;
        Some(ConversationRecordInput {
            started_at,
            ended_at: now,
            final_state: state.as_str().to_string(),
            error,
            frames_sent: diagnostics.frames_sent,
            buffers_played: diagnostics.buffers_completed,
            interruptions: diagnostics.interruptions,
            transcript: std::mem::take(&mut self.transcript).trim_end().to_string(),
        })
    }
}
