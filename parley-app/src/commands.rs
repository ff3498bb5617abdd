//! Terminal command handlers.
//!
//! Each line read from stdin is parsed into a [`Command`] and run against the
//! shared [`AppState`].

use std::fmt::Write as _;

use parley_core::{SessionState, VisualizationFrame};
use tracing::{info, warn};

use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 10;

pub const HELP: &str = "\
commands:
  start        open the microphone and connect
  stop         end the conversation
  pause        pause model audio output
  resume       resume model audio output
  status       show session state and counters
  history [n]  list the n most recent conversations (default 10)
  help         show this list
  quit         stop and exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
    Status,
    History(usize),
    Help,
    Quit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();
        let command = match head.to_ascii_lowercase().as_str() {
            "start" | "s" => Self::Start,
            "stop" | "x" => Self::Stop,
            "pause" | "p" => Self::Pause,
            "resume" | "r" => Self::Resume,
            "status" | "st" => Self::Status,
            "history" | "h" => {
                let limit = match arg {
                    Some(raw) => raw
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| format!("history: '{raw}' is not a positive number"))?,
                    None => DEFAULT_HISTORY_LIMIT,
                };
                Self::History(limit)
            }
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("unknown command '{other}' (type 'help')")),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue(String),
    Quit,
}

pub fn execute(state: &AppState, command: Command) -> CommandOutcome {
    let reply = match command {
        Command::Start => match state.session.start() {
            Ok(()) => "connecting…".to_string(),
            Err(e) => {
                warn!("start failed: {e}");
                e.user_message()
            }
        },
        Command::Stop => {
            state.session.stop();
            "stopped".to_string()
        }
        Command::Pause => match state.session.pause_output() {
            Ok(()) => "output paused".to_string(),
            Err(e) => e.user_message(),
        },
        Command::Resume => match state.session.resume_output() {
            Ok(()) => "output resumed".to_string(),
            Err(e) => e.user_message(),
        },
        Command::Status => status_report(state),
        Command::History(limit) => history_report(state, limit),
        Command::Help => HELP.to_string(),
        Command::Quit => {
            state.session.stop();
            info!("quit requested");
            return CommandOutcome::Quit;
        }
    };
    CommandOutcome::Continue(reply)
}

fn status_report(state: &AppState) -> String {
    let session_state = state.session.state();
    let d = state.session.diagnostics_snapshot();
    let mut out = format!("state: {session_state}");
    if session_state == SessionState::Error {
        if let Some(err) = state.session.last_error() {
            let _ = write!(out, " ({err})");
        }
    }
    if state.session.is_output_paused() {
        out.push_str(" [output paused]");
    }
    let _ = write!(
        out,
        "\nframes sent {} dropped {} send errors {}\
         \nbuffers scheduled {} played {} active {} late {}\
         \ndecode errors {} interruptions {}",
        d.frames_sent,
        d.frames_dropped,
        d.send_errors,
        d.buffers_scheduled,
        d.buffers_completed,
        d.buffers_active,
        d.late_buffers,
        d.decode_errors,
        d.interruptions,
    );
    out
}

fn history_report(state: &AppState, limit: usize) -> String {
    let Some(store) = state.store.as_ref() else {
        return "conversation history is unavailable".to_string();
    };
    match store.list_recent(limit) {
        Ok(items) if items.is_empty() => "no conversations yet".to_string(),
        Ok(items) => {
            let mut out = String::new();
            for item in items {
                let _ = write!(
                    out,
                    "{}  {:>4}s  {:<12}",
                    item.started_at, item.duration_secs, item.final_state
                );
                if let Some(err) = item.error {
                    let _ = write!(out, " {err}");
                }
                if let Some(first) = item.transcript.lines().next() {
                    let _ = write!(out, "  \"{}\"", preview(first, 60));
                }
                out.push('\n');
            }
            out.trim_end().to_string()
        }
        Err(e) => {
            warn!("history query failed: {e}");
            format!("could not read history: {e}")
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// One-line input/output level meter.
pub fn meter_line(frame: &VisualizationFrame, width: usize) -> String {
    fn bar(level: f32, width: usize) -> String {
        let filled = ((level.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
        format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
    }
    format!(
        "mic [{}]{} model [{}]",
        bar(frame.input_level.peak, width),
        if frame.speech_present { "*" } else { " " },
        bar(frame.output_level.peak, width),
    )
}
