//! Parley terminal application entry point.
//!
//! Reads commands from stdin and forwards session events to the terminal:
//! status changes and model text on stdout, a live level meter on the
//! current line, and finished conversations into the local SQLite log.

mod commands;
mod settings;
mod state;
mod storage;

use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::Utc;
use parking_lot::Mutex;
use parley_core::{
    ConversationEventKind, CpalBackend, GeminiLiveTransport, RealtimeSession, SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use commands::{execute, meter_line, Command, CommandOutcome, HELP};
use settings::{default_db_path, default_settings_path, load_settings, save_settings};
use state::{AppState, ConversationDraft};
use storage::LocalStore;

const METER_INTERVAL: Duration = Duration::from_millis(100);
const METER_WIDTH: usize = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=info,parley_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Parley starting");

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    if !settings_path.exists() {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
    }
    info!(
        model = %app_settings.model,
        buffer_size = app_settings.buffer_size,
        input_rate = app_settings.input_sample_rate,
        output_rate = app_settings.output_sample_rate,
        "settings loaded"
    );

    let api_key = app_settings
        .resolve_api_key(|name| std::env::var(name).ok())
        .unwrap_or_default();
    if api_key.is_empty() {
        warn!("no API key configured; set PARLEY_API_KEY or apiKey in settings.json");
    }

    let store = if app_settings.history_enabled {
        match LocalStore::new(default_db_path()) {
            Ok(store) => {
                match store.prune_history(app_settings.retention_days) {
                    Ok(n) if n > 0 => info!(pruned = n, "expired conversations removed"),
                    Ok(_) => {}
                    Err(e) => warn!("history prune failed: {e}"),
                }
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!("conversation history disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let backend =
        CpalBackend::new().with_preferred_input(app_settings.preferred_input_device.clone());
    let session = Arc::new(RealtimeSession::new(
        Arc::new(backend),
        Arc::new(GeminiLiveTransport::new(api_key)),
        app_settings.session_config(),
    ));

    let state = Arc::new(AppState {
        session,
        settings: Arc::new(Mutex::new(app_settings)),
        settings_path,
        store,
        draft: Arc::new(Mutex::new(ConversationDraft::default())),
    });
    info!(settings = %state.settings_path.display(), "ready");

    spawn_status_forwarder(Arc::clone(&state));
    spawn_conversation_forwarder(Arc::clone(&state));
    if state.settings.lock().show_meter {
        spawn_meter(Arc::clone(&state));
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            execute(&state, Command::Quit);
            break;
        };
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => match execute(&state, command) {
                CommandOutcome::Continue(reply) => println!("{reply}"),
                CommandOutcome::Quit => break,
            },
            Err(msg) => println!("{msg}"),
        }
    }

    // Let the status forwarder persist the final conversation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("Parley exiting");
    Ok(())
}

fn spawn_status_forwarder(state: Arc<AppState>) {
    let mut status_rx = state.session.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    match &event.detail {
                        Some(detail) => println!("\r[{}] {detail}", event.state),
                        None => println!("\r[{}]", event.state),
                    }
                    match event.state {
                        SessionState::Connecting => state.draft.lock().begin(Utc::now()),
                        SessionState::Disconnected | SessionState::Error => {
                            persist_conversation(&state, event.state, event.detail);
                        }
                        SessionState::Connected => {}
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("status receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn persist_conversation(state: &AppState, final_state: SessionState, error: Option<String>) {
    let diagnostics = state.session.diagnostics_snapshot();
    let Some(record) = state
        .draft
        .lock()
        .finish(Utc::now(), final_state, error, &diagnostics)
    else {
        return;
    };
    let Some(store) = state.store.clone() else {
        return;
    };
    tokio::task::spawn_blocking(move || match store.insert_conversation(record) {
        Ok(id) => info!(%id, "conversation saved"),
        Err(e) => warn!("failed to save conversation: {e}"),
    });
}

fn spawn_conversation_forwarder(state: Arc<AppState>) {
    let mut conversation_rx = state.session.subscribe_conversation();
    tokio::spawn(async move {
        loop {
            match conversation_rx.recv().await {
                Ok(event) => match event.kind {
                    ConversationEventKind::Text { text } => {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                        state.draft.lock().push_text(&text);
                    }
                    ConversationEventKind::TurnComplete => {
                        println!();
                        state.draft.lock().end_turn();
                    }
                    ConversationEventKind::Interrupted => {
                        println!("\r[interrupted]");
                        state.draft.lock().end_turn();
                    }
                },
                Err(RecvError::Lagged(n)) => {
                    warn!("conversation receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_meter(state: Arc<AppState>) {
    let mut frames_rx = state.session.subscribe_visualization();
    tokio::spawn(async move {
        let mut last_draw = Instant::now();
        loop {
            match frames_rx.recv().await {
                Ok(frame) => {
                    if last_draw.elapsed() < METER_INTERVAL {
                        continue;
                    }
                    last_draw = Instant::now();
                    print!("\r{}", meter_line(&frame, METER_WIDTH));
                    let _ = std::io::stdout().flush();
                }
                // Frames are disposable.
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}
