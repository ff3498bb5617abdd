//! `RealtimeSession`: top-level lifecycle manager.
//!
//! ## Lifecycle
//!
//! ```text
//! start()
//!   ├─ Connecting: open microphone → open output → build scheduler → connect
//!   │              (capture ring fills; nothing is sent yet)
//!   ├─ on_open   → Connected: gate open, capture worker + visualizer spawned
//!   ├─ on_message→ decode → PlaybackScheduler::schedule (arrival order)
//!   │              turn complete → PlaybackScheduler::end_turn
//!   ├─ on_close  → teardown → Disconnected
//!   └─ on_error  → teardown → Error ("Connection error: …")
//! stop()         → teardown → Disconnected (any state)
//! ```
//!
//! Every attempt gets a generation number. Events and teardowns tagged with
//! an older generation are ignored, so at most one attempt owns resources.
//! Teardowns triggered by transport events run on the blocking pool.
//!
//! Teardown order: close gate → stop capture worker → release microphone →
//! close transport → close output → stop visualizer.

pub mod state;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{
        speech::{SpeechDetector, DEFAULT_HANGOVER_FRAMES, DEFAULT_SPEECH_THRESHOLD},
        Visualizer, VisualizerContext, DEFAULT_FFT_SIZE, DEFAULT_VISUALIZER_FPS,
    },
    audio::{AudioBackend, StreamHandle},
    buffering::{create_audio_ring, create_tap_ring, AudioConsumer, AudioProducer},
    capture::{spawn_capture, CaptureContext, CaptureStats, CaptureWorker},
    codec::{self, DEFAULT_INPUT_SAMPLE_RATE, DEFAULT_OUTPUT_SAMPLE_RATE},
    error::{ParleyError, Result},
    ipc::events::{ConversationEvent, ConversationEventKind, SessionStatusEvent, VisualizationFrame},
    playback::{self, PlaybackControl, PlaybackScheduler},
    transport::{
        ConnectConfig, ServerMessage, Transport, TransportCallbacks, TransportEvent,
        TransportSession,
    },
};
use state::SessionState;

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

const STATUS_CHANNEL_CAPACITY: usize = 64;
const VISUAL_CHANNEL_CAPACITY: usize = 16;
const CONVERSATION_CHANNEL_CAPACITY: usize = 256;

// ── Configuration ────────────────────────────────────────────────────────────

/// Per-session settings. Changes apply on the next [`RealtimeSession::start`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Rate of microphone audio on the wire (Hz).
    pub input_sample_rate: u32,
    /// Rate assumed for server audio without a `rate=` MIME parameter (Hz).
    pub output_sample_rate: u32,
    /// Samples per outbound frame at `input_sample_rate`.
    pub buffer_size: usize,
    pub model: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub visualizer_fps: u32,
    pub fft_size: usize,
    /// Mean absolute input amplitude counted as speech.
    pub speech_threshold: f32,
    pub speech_hangover_frames: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            system_instruction: None,
            visualizer_fps: DEFAULT_VISUALIZER_FPS,
            fft_size: DEFAULT_FFT_SIZE,
            speech_threshold: DEFAULT_SPEECH_THRESHOLD,
            speech_hangover_frames: DEFAULT_HANGOVER_FRAMES,
        }
    }
}

impl SessionConfig {
    /// # Errors
    /// `ParleyError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        const RATES: std::ops::RangeInclusive<u32> = 8_000..=96_000;
        if !RATES.contains(&self.input_sample_rate) {
            return Err(ParleyError::Config(format!(
                "inputSampleRate {} outside 8000..=96000",
                self.input_sample_rate
            )));
        }
        if !RATES.contains(&self.output_sample_rate) {
            return Err(ParleyError::Config(format!(
                "outputSampleRate {} outside 8000..=96000",
                self.output_sample_rate
            )));
        }
        if !self.buffer_size.is_power_of_two() || !(256..=16_384).contains(&self.buffer_size) {
            return Err(ParleyError::Config(format!(
                "bufferSize {} must be a power of two in 256..=16384",
                self.buffer_size
            )));
        }
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            return Err(ParleyError::Config(format!(
                "fftSize {} must be a power of two in 32..=32768",
                self.fft_size
            )));
        }
        if !(1..=240).contains(&self.visualizer_fps) {
            return Err(ParleyError::Config(format!(
                "visualizerFps {} outside 1..=240",
                self.visualizer_fps
            )));
        }
        if !(self.speech_threshold.is_finite() && (0.0..=1.0).contains(&self.speech_threshold)) {
            return Err(ParleyError::Config(format!(
                "speechThreshold {} outside 0..=1",
                self.speech_threshold
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ParleyError::Config("model must not be empty".into()));
        }
        Ok(())
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            model: self.model.trim().to_string(),
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            system_instruction: self.system_instruction.clone(),
            voice: self.voice.clone(),
        }
    }
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionCounters {
    buffers_scheduled: AtomicU64,
    buffers_completed: AtomicU64,
    late_buffers: AtomicU64,
    decode_errors: AtomicU64,
    interruptions: AtomicU64,
}

impl SessionCounters {
    fn reset(&self) {
        self.buffers_scheduled.store(0, Ordering::Relaxed);
        self.buffers_completed.store(0, Ordering::Relaxed);
        self.late_buffers.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.interruptions.store(0, Ordering::Relaxed);
    }
}

/// Counters for the current (or last) session attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_captured: usize,
    pub samples_discarded: usize,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub send_errors: usize,
    pub buffers_scheduled: u64,
    pub buffers_completed: u64,
    pub buffers_active: usize,
    pub late_buffers: u64,
    pub decode_errors: u64,
    pub interruptions: u64,
}

// ── Shared state ─────────────────────────────────────────────────────────────

/// Pieces created during Connecting and consumed by the open handler.
struct PendingCapture {
    consumer: AudioConsumer,
    device_sample_rate: u32,
    tap: AudioProducer,
}

#[derive(Default)]
struct SessionResources {
    mic: Option<StreamHandle>,
    output: Option<StreamHandle>,
    transport: Option<Arc<dyn TransportSession>>,
    capture: Option<CaptureWorker>,
    playback: Option<PlaybackControl>,
    pending_capture: Option<PendingCapture>,
    pending_visualizer: Option<VisualizerContext>,
    visualizer: Option<JoinHandle<()>>,
    event_loop: Option<JoinHandle<()>>,
}

struct SessionShared {
    state: Mutex<SessionState>,
    /// Open exactly while the state accepts frames.
    frame_gate: Arc<AtomicBool>,
    last_error: Mutex<Option<String>>,
    resources: Mutex<SessionResources>,
    generation: AtomicU64,
    capture_stats: Arc<CaptureStats>,
    counters: SessionCounters,
    conversation_seq: AtomicU64,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    visual_tx: broadcast::Sender<VisualizationFrame>,
    conversation_tx: broadcast::Sender<ConversationEvent>,
}

impl SessionShared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, next: SessionState, detail: Option<String>) {
        {
            let mut state = self.state.lock();
            if *state == next && detail.is_none() {
                return;
            }
            if !state.can_transition_to(next) {
                warn!(from = %*state, to = %next, "ignoring illegal state transition");
                return;
            }
            *state = next;
            self.frame_gate.store(next.accepts_frames(), Ordering::SeqCst);
        }
        self.announce(next, detail);
    }

    fn announce(&self, next: SessionState, detail: Option<String>) {
        if next == SessionState::Error {
            *self.last_error.lock() = detail.clone();
        }
        info!(state = %next, detail = detail.as_deref().unwrap_or(""), "session state");
        let _ = self.status_tx.send(SessionStatusEvent {
            state: next,
            detail,
        });
    }

    /// Claim the session for a new attempt and return its generation.
    ///
    /// The active check and the move to `Connecting` happen under one state
    /// lock, so concurrent callers get exactly one winner.
    fn begin_attempt(&self) -> Result<u64> {
        {
            let mut state = self.state.lock();
            if state.is_active() {
                return Err(ParleyError::AlreadyActive);
            }
            *state = SessionState::Connecting;
        }

        // Leftovers of a failed attempt.
        self.release_all(false);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.capture_stats.reset();
        self.counters.reset();
        *self.last_error.lock() = None;
        self.announce(SessionState::Connecting, None);
        Ok(generation)
    }

    /// Tear down the attempt `generation` and enter `next`.
    ///
    /// Returns `false` if that attempt was already superseded or torn down.
    fn teardown(
        &self,
        generation: u64,
        next: SessionState,
        detail: Option<String>,
        from_event_loop: bool,
    ) -> bool {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(generation, "teardown skipped: attempt already superseded");
            return false;
        }
        self.release_all(from_event_loop);
        self.set_state(next, detail);
        true
    }

    fn release_all(&self, from_event_loop: bool) {
        let mut res = std::mem::take(&mut *self.resources.lock());

        // 1. Stop accepting frames.
        self.frame_gate.store(false, Ordering::SeqCst);

        // 2. Stop the capture worker.
        if let Some(mut worker) = res.capture.take() {
            worker.stop();
        }

        // 3. Release the microphone.
        if let Some(mut mic) = res.mic.take() {
            suppress_teardown(mic.close());
        }

        // 4. Close the transport.
        if let Some(transport) = res.transport.take() {
            suppress_teardown(transport.close());
        }

        // 5. Close the output.
        if let Some(control) = res.playback.take() {
            self.counters
                .buffers_completed
                .store(control.completed_count(), Ordering::Relaxed);
            self.counters
                .late_buffers
                .store(control.late_count(), Ordering::Relaxed);
        }
        if let Some(mut output) = res.output.take() {
            suppress_teardown(output.close());
        }

        // 6. Stop the visualizer and event loop.
        if let Some(vis) = res.visualizer.take() {
            vis.abort();
        }
        if let Some(event_loop) = res.event_loop.take() {
            if !from_event_loop {
                event_loop.abort();
            }
        }
    }

    fn emit_conversation(&self, kind: ConversationEventKind) {
        let seq = self.conversation_seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.conversation_tx.send(ConversationEvent { seq, kind });
    }

    /// Start capture and the visualizer, then enter `Connected`.
    ///
    /// An error means the attempt must be torn down.
    fn on_open(&self, generation: u64, config: &SessionConfig) -> Result<()> {
        let mut res = self.resources.lock();
        if !self.is_current(generation) {
            return Ok(());
        }
        if *self.state.lock() != SessionState::Connecting {
            warn!("open event outside Connecting ignored");
            return Ok(());
        }
        let (Some(pending), Some(transport)) = (res.pending_capture.take(), res.transport.clone())
        else {
            warn!("open event without pending capture");
            return Ok(());
        };

        let worker = spawn_capture(CaptureContext {
            consumer: pending.consumer,
            device_sample_rate: pending.device_sample_rate,
            input_sample_rate: config.input_sample_rate,
            buffer_size: config.buffer_size,
            session: transport,
            gate: Arc::clone(&self.frame_gate),
            tap: Some(pending.tap),
            stats: Arc::clone(&self.capture_stats),
        });
        res.capture = Some(worker.inspect_err(|e| error!("failed to start capture worker: {e}"))?);

        if let Some(ctx) = res.pending_visualizer.take() {
            let visualizer = Visualizer::new(ctx);
            res.visualizer = Some(tokio::spawn(
                visualizer.run(config.visualizer_fps, self.visual_tx.clone()),
            ));
        }
        drop(res);

        self.set_state(SessionState::Connected, None);
        Ok(())
    }

    fn on_message(
        &self,
        scheduler: &mut PlaybackScheduler,
        config: &SessionConfig,
        message: ServerMessage,
    ) {
        if message.interrupted {
            scheduler.interrupt();
            self.counters.interruptions.fetch_add(1, Ordering::Relaxed);
            debug!("server interrupted reply; playback flushed");
            self.emit_conversation(ConversationEventKind::Interrupted);
        }

        if let Some(audio) = message.audio {
            let rate = codec::parse_pcm_rate(&audio.mime_type).unwrap_or(config.output_sample_rate);
            match codec::decode(&audio.data, rate, 1) {
                Ok(buffer) if buffer.is_empty() => {}
                Ok(buffer) => match scheduler.schedule(buffer) {
                    Ok(slot) => self.count_scheduled(slot.frames),
                    Err(e) => warn!("failed to schedule playback: {e}"),
                },
                Err(e) => {
                    self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("dropping undecodable audio payload: {e}");
                }
            }
        }

        if let Some(text) = message.text.filter(|t| !t.is_empty()) {
            self.emit_conversation(ConversationEventKind::Text { text });
        }
        if message.turn_complete {
            match scheduler.end_turn() {
                Ok(Some(tail)) => self.count_scheduled(tail.frames),
                Ok(None) => {}
                Err(e) => warn!("failed to schedule end of turn: {e}"),
            }
            self.emit_conversation(ConversationEventKind::TurnComplete);
        }
    }

    /// Slots with no frames only fed the rate converter.
    fn count_scheduled(&self, frames: u64) {
        if frames > 0 {
            self.counters
                .buffers_scheduled
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn suppress_teardown(result: Result<()>) {
    if let Err(e) = result {
        debug!("suppressed teardown error: {e}");
    }
}

/// Run a teardown on the blocking pool. Device close and the capture join
/// both block.
async fn teardown_blocking(
    shared: &Arc<SessionShared>,
    generation: u64,
    next: SessionState,
    detail: Option<String>,
) {
    let shared = Arc::clone(shared);
    if let Err(e) =
        tokio::task::spawn_blocking(move || shared.teardown(generation, next, detail, true)).await
    {
        error!("teardown task failed: {e}");
    }
}

async fn run_event_loop(
    shared: Arc<SessionShared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut scheduler: PlaybackScheduler,
    config: SessionConfig,
) {
    while let Some(event) = events.recv().await {
        if !shared.is_current(generation) {
            return;
        }
        match event {
            TransportEvent::Open => {
                if let Err(e) = shared.on_open(generation, &config) {
                    teardown_blocking(&shared, generation, SessionState::Error, Some(e.user_message()))
                        .await;
                    return;
                }
            }
            TransportEvent::Message(message) => shared.on_message(&mut scheduler, &config, message),
            TransportEvent::Close(reason) => {
                info!(reason = reason.as_deref().unwrap_or(""), "transport closed");
                teardown_blocking(&shared, generation, SessionState::Disconnected, None).await;
                return;
            }
            TransportEvent::Error(detail) => {
                let err = ParleyError::Transport(detail);
                error!("{err}");
                teardown_blocking(&shared, generation, SessionState::Error, Some(err.user_message()))
                    .await;
                return;
            }
        }
    }

    if shared.is_current(generation) {
        debug!("transport event channel ended");
        teardown_blocking(&shared, generation, SessionState::Disconnected, None).await;
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// A duplex realtime voice session.
///
/// Owns the microphone, output device, and transport for at most one
/// attempt at a time.
pub struct RealtimeSession {
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    config: Mutex<SessionConfig>,
    shared: Arc<SessionShared>,
}

impl RealtimeSession {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (visual_tx, _) = broadcast::channel(VISUAL_CHANNEL_CAPACITY);
        let (conversation_tx, _) = broadcast::channel(CONVERSATION_CHANNEL_CAPACITY);
        Self {
            backend,
            transport,
            config: Mutex::new(config),
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState::Disconnected),
                frame_gate: Arc::new(AtomicBool::new(false)),
                last_error: Mutex::new(None),
                resources: Mutex::new(SessionResources::default()),
                generation: AtomicU64::new(0),
                capture_stats: Arc::new(CaptureStats::default()),
                counters: SessionCounters::default(),
                conversation_seq: AtomicU64::new(0),
                status_tx,
                visual_tx,
                conversation_tx,
            }),
        }
    }

    /// Replace the configuration used by the next `start()`.
    ///
    /// # Errors
    /// `ParleyError::Config` if `config` fails validation.
    pub fn set_config(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        *self.config.lock() = config;
        Ok(())
    }

    pub fn config(&self) -> SessionConfig {
        self.config.lock().clone()
    }

    /// Acquire devices and begin connecting.
    ///
    /// Returns once the microphone and output are open and the transport
    /// connect has been issued. `Connected` follows asynchronously on the
    /// transport's open event. Must be called within a tokio runtime.
    ///
    /// # Errors
    /// - `ParleyError::AlreadyActive` while Connecting or Connected.
    /// - `ParleyError::Config` on invalid configuration.
    /// - Device and transport errors; the session is then in `Error`.
    pub fn start(&self) -> Result<()> {
        let config = self.config.lock().clone();
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ParleyError::Other(anyhow::anyhow!("start() requires a tokio runtime"))
        })?;

        let generation = self.shared.begin_attempt()?;

        let result = {
            let mut res = self.shared.resources.lock();
            self.acquire(generation, &config, &runtime, &mut res)
        };

        if let Err(e) = result {
            error!("session start failed: {e}");
            self.shared
                .teardown(generation, SessionState::Error, Some(e.user_message()), false);
            return Err(e);
        }
        info!(generation, model = %config.model, "session connecting");
        Ok(())
    }

    fn acquire(
        &self,
        generation: u64,
        config: &SessionConfig,
        runtime: &tokio::runtime::Handle,
        res: &mut SessionResources,
    ) -> Result<()> {
        let (mic_producer, mic_consumer) = create_audio_ring();
        let mic = self.backend.open_microphone(mic_producer)?;
        let device_sample_rate = mic.sample_rate();
        info!(
            kind = %mic.kind(),
            rate = device_sample_rate,
            channels = mic.channels(),
            "stream opened"
        );
        res.mic = Some(mic);

        let (in_tap_producer, in_tap_consumer) = create_tap_ring();
        let (out_tap_producer, out_tap_consumer) = create_tap_ring();

        let (link, renderer) = playback::link(Some(out_tap_producer));
        let output = self
            .backend
            .open_output(config.output_sample_rate, renderer)?;
        info!(
            kind = %output.kind(),
            rate = output.sample_rate(),
            channels = output.channels(),
            "stream opened"
        );
        let scheduler = PlaybackScheduler::new(link, config.output_sample_rate, output.sample_rate())?;
        res.output = Some(output);
        res.playback = Some(scheduler.control());

        res.pending_capture = Some(PendingCapture {
            consumer: mic_consumer,
            device_sample_rate,
            tap: in_tap_producer,
        });
        res.pending_visualizer = Some(VisualizerContext {
            input_tap: in_tap_consumer,
            output_tap: out_tap_consumer,
            fft_size: config.fft_size,
            speech: SpeechDetector::new(config.speech_threshold, config.speech_hangover_frames),
        });

        let (callbacks, events) = TransportCallbacks::channel();
        let transport = self.transport.connect(&config.connect_config(), callbacks)?;
        res.transport = Some(transport);

        res.event_loop = Some(runtime.spawn(run_event_loop(
            Arc::clone(&self.shared),
            generation,
            events,
            scheduler,
            config.clone(),
        )));
        Ok(())
    }

    /// Tear everything down and enter `Disconnected`. Safe in every state.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.release_all(false);
        self.shared.set_state(SessionState::Disconnected, None);
    }

    /// Suspend the output clock. Scheduled start times are preserved.
    ///
    /// # Errors
    /// `ParleyError::NotConnected` when no output is open.
    pub fn pause_output(&self) -> Result<()> {
        let control = self.playback_control()?;
        control.pause();
        info!("output paused");
        Ok(())
    }

    /// # Errors
    /// `ParleyError::NotConnected` when no output is open.
    pub fn resume_output(&self) -> Result<()> {
        let control = self.playback_control()?;
        control.resume();
        info!("output resumed");
        Ok(())
    }

    pub fn is_output_paused(&self) -> bool {
        self.shared
            .resources
            .lock()
            .playback
            .as_ref()
            .is_some_and(PlaybackControl::is_paused)
    }

    fn playback_control(&self) -> Result<PlaybackControl> {
        self.shared
            .resources
            .lock()
            .playback
            .clone()
            .ok_or(ParleyError::NotConnected)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// User-facing message of the most recent error, cleared on `start()`.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        let capture = self.shared.capture_stats.snapshot();
        let counters = &self.shared.counters;
        let playback = self.shared.resources.lock().playback.clone();
        let (completed, late, active) = match playback {
            Some(control) => (
                control.completed_count(),
                control.late_count(),
                control.active_count(),
            ),
            None => (
                counters.buffers_completed.load(Ordering::Relaxed),
                counters.late_buffers.load(Ordering::Relaxed),
                0,
            ),
        };
        DiagnosticsSnapshot {
            samples_captured: capture.samples_in,
            samples_discarded: capture.samples_discarded,
            frames_sent: capture.frames_sent,
            frames_dropped: capture.frames_dropped,
            send_errors: capture.send_errors,
            buffers_scheduled: counters.buffers_scheduled.load(Ordering::Relaxed),
            buffers_completed: completed,
            buffers_active: active,
            late_buffers: late,
            decode_errors: counters.decode_errors.load(Ordering::Relaxed),
            interruptions: counters.interruptions.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_visualization(&self) -> broadcast::Receiver<VisualizationFrame> {
        self.shared.visual_tx.subscribe()
    }

    pub fn subscribe_conversation(&self) -> broadcast::Receiver<ConversationEvent> {
        self.shared.conversation_tx.subscribe()
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if self.state().is_active() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.input_sample_rate, 16_000);
        assert_eq!(config.output_sample_rate, 24_000);
        assert_eq!(config.buffer_size, 4096);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn rejects_non_power_of_two_buffer() {
        let config = SessionConfig {
            buffer_size: 4000,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ParleyError::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let low = SessionConfig {
            input_sample_rate: 4_000,
            ..SessionConfig::default()
        };
        assert!(low.validate().is_err());
        let high = SessionConfig {
            output_sample_rate: 192_000,
            ..SessionConfig::default()
        };
        assert!(high.validate().is_err());
    }

    #[test]
    fn config_deserializes_partial_camel_case() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"bufferSize":2048,"voice":"Kore"}"#).unwrap();
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.voice.as_deref(), Some("Kore"));
        assert_eq!(config.input_sample_rate, 16_000);
    }

    #[test]
    fn connect_config_carries_model_and_rates() {
        let config = SessionConfig {
            model: "  models/custom ".into(),
            ..SessionConfig::default()
        };
        let cc = config.connect_config();
        assert_eq!(cc.model, "models/custom");
        assert_eq!(cc.input_sample_rate, 16_000);
        assert_eq!(cc.output_sample_rate, 24_000);
    }
}
