#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};

use parley_core::buffering::{AudioProducer, Producer};
use parley_core::codec;
use parley_core::playback::renderer::PlaybackRenderer;
use parley_core::{
    AudioBackend, ConnectConfig, EncodedFrame, ParleyError, RealtimeSession, Result,
    ServerMessage, SessionConfig, StreamHandle, StreamKind, Transport, TransportCallbacks,
    TransportSession,
};

// ── Audio backend ────────────────────────────────────────────────────────────

/// Scripted device layer. Holds the ring producer and renderer the session
/// hands over so tests can play "device".
pub struct FakeBackend {
    pub mic_rate: u32,
    pub output_rate: u32,
    pub mic_error: Mutex<Option<ParleyError>>,
    pub mic_producer: Mutex<Option<AudioProducer>>,
    pub renderer: Mutex<Option<PlaybackRenderer>>,
    pub mic_open: Arc<AtomicUsize>,
    pub output_open: Arc<AtomicUsize>,
    /// How long releasing each stream blocks, like a slow driver.
    pub release_delay: Duration,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            mic_rate: 16_000,
            output_rate: 24_000,
            mic_error: Mutex::new(None),
            mic_producer: Mutex::new(None),
            renderer: Mutex::new(None),
            mic_open: Arc::new(AtomicUsize::new(0)),
            output_open: Arc::new(AtomicUsize::new(0)),
            release_delay: Duration::ZERO,
        }
    }

    pub fn failing_with(error: ParleyError) -> Self {
        let backend = Self::new();
        *backend.mic_error.lock() = Some(error);
        backend
    }

    /// Write samples as the microphone callback would.
    pub fn speak(&self, samples: &[f32]) -> usize {
        match self.mic_producer.lock().as_mut() {
            Some(producer) => producer.push_slice(samples),
            None => 0,
        }
    }

    pub fn take_renderer(&self) -> PlaybackRenderer {
        self.renderer.lock().take().expect("output was opened")
    }

    pub fn open_streams(&self) -> usize {
        self.mic_open.load(Ordering::SeqCst) + self.output_open.load(Ordering::SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn open_microphone(&self, producer: AudioProducer) -> Result<StreamHandle> {
        if let Some(err) = self.mic_error.lock().take() {
            return Err(err);
        }
        *self.mic_producer.lock() = Some(producer);
        self.mic_open.fetch_add(1, Ordering::SeqCst);
        let open = Arc::clone(&self.mic_open);
        let delay = self.release_delay;
        Ok(StreamHandle::new(StreamKind::Microphone, self.mic_rate, 1, move || {
            std::thread::sleep(delay);
            open.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    fn open_output(
        &self,
        _preferred_sample_rate: u32,
        renderer: PlaybackRenderer,
    ) -> Result<StreamHandle> {
        *self.renderer.lock() = Some(renderer);
        self.output_open.fetch_add(1, Ordering::SeqCst);
        let open = Arc::clone(&self.output_open);
        let delay = self.release_delay;
        Ok(StreamHandle::new(StreamKind::Output, self.output_rate, 1, move || {
            std::thread::sleep(delay);
            open.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSession {
    pub frames: Mutex<Vec<EncodedFrame>>,
    pub closes: AtomicUsize,
    closed: AtomicBool,
}

impl FakeSession {
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl TransportSession for FakeSession {
    fn send_realtime_input(&self, frame: &EncodedFrame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ParleyError::NotConnected);
        }
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records connects; tests fire the server side through `callbacks()`.
/// Each connect hands out a fresh [`FakeSession`].
#[derive(Default)]
pub struct FakeTransport {
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    pub callbacks: Mutex<Option<TransportCallbacks>>,
    pub last_config: Mutex<Option<ConnectConfig>>,
    pub connects: AtomicUsize,
}

impl FakeTransport {
    pub fn callbacks(&self) -> TransportCallbacks {
        self.callbacks.lock().clone().expect("connect was called")
    }

    /// The session returned by the most recent connect.
    pub fn session(&self) -> Arc<FakeSession> {
        Arc::clone(self.sessions.lock().last().expect("connect was called"))
    }
}

impl Transport for FakeTransport {
    fn connect(
        &self,
        config: &ConnectConfig,
        callbacks: TransportCallbacks,
    ) -> Result<Arc<dyn TransportSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.callbacks.lock() = Some(callbacks);
        *self.last_config.lock() = Some(config.clone());
        let session = Arc::new(FakeSession::default());
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session as Arc<dyn TransportSession>)
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub transport: Arc<FakeTransport>,
    pub session: RealtimeSession,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(FakeBackend::new())
    }

    pub fn with_backend(backend: FakeBackend) -> Self {
        let backend = Arc::new(backend);
        let transport = Arc::new(FakeTransport::default());
        let session = RealtimeSession::new(
            Arc::clone(&backend) as Arc<dyn AudioBackend>,
            Arc::clone(&transport) as Arc<dyn Transport>,
            SessionConfig::default(),
        );
        Self {
            backend,
            transport,
            session,
        }
    }

    /// start() + server open, waiting for Connected.
    pub async fn connect(&self) {
        self.session.start().expect("start");
        self.transport.callbacks().on_open();
        let ok = wait_until(|| self.session.state() == parley_core::SessionState::Connected).await;
        assert!(ok, "session never reached Connected");
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
        }
    }
}

/// A server audio message carrying `frames` samples of `value` at 24 kHz.
pub fn audio_message(frames: usize, value: f32) -> ServerMessage {
    let encoded = codec::encode_samples(&vec![value; frames], 24_000);
    ServerMessage::audio(encoded.data, encoded.mime_type)
}
