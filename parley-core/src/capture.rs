//! Capture worker: microphone ring → wire frames.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain the capture ring (device rate, mono f32)
//! 2. Resample to the wire input rate
//! 3. Copy into the input analysis tap (lossy)
//! 4. Frame into buffer_size blocks; for every completed block, synchronously:
//!    a. encode to base64 PCM16
//!    b. gate open   → TransportSession::send_realtime_input
//!       gate closed → drop and count
//! ```
//!
//! The worker runs on its own OS thread and sleeps briefly when the ring is
//! empty, keeping the tokio executor free.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::ChunkFramer, AudioConsumer, AudioProducer, Consumer, Producer},
    codec,
    error::{ParleyError, Result},
    transport::TransportSession,
};

/// Samples drained from the ring per iteration: 20 ms at 48 kHz.
const DRAIN_CHUNK: usize = 960;

const SLEEP_EMPTY: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub samples_in: AtomicUsize,
    /// Samples captured before the transport opened and discarded.
    pub samples_discarded: AtomicUsize,
    pub frames_sent: AtomicUsize,
    /// Frames completed while the gate was closed.
    pub frames_dropped: AtomicUsize,
    pub send_errors: AtomicUsize,
}

impl CaptureStats {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_discarded.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    pub samples_in: usize,
    pub samples_discarded: usize,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub send_errors: usize,
}

/// Everything the worker needs, moved into its thread.
pub struct CaptureContext {
    pub consumer: AudioConsumer,
    pub device_sample_rate: u32,
    pub input_sample_rate: u32,
    pub buffer_size: usize,
    pub session: Arc<dyn TransportSession>,
    /// Open while the session is Connected. Cleared first on teardown.
    pub gate: Arc<AtomicBool>,
    pub tap: Option<AudioProducer>,
    pub stats: Arc<CaptureStats>,
}

/// Resample → tap → frame → encode → send, for one drained slice.
struct CaptureStage {
    converter: RateConverter,
    framer: ChunkFramer,
    session: Arc<dyn TransportSession>,
    gate: Arc<AtomicBool>,
    tap: Option<AudioProducer>,
    stats: Arc<CaptureStats>,
}

impl CaptureStage {
    fn new(
        device_sample_rate: u32,
        input_sample_rate: u32,
        buffer_size: usize,
        session: Arc<dyn TransportSession>,
        gate: Arc<AtomicBool>,
        tap: Option<AudioProducer>,
        stats: Arc<CaptureStats>,
    ) -> Result<Self> {
        let converter = RateConverter::new(device_sample_rate, input_sample_rate, DRAIN_CHUNK)?;
        if !converter.is_passthrough() {
            info!(
                from = device_sample_rate,
                to = input_sample_rate,
                "capture resampling enabled"
            );
        }
        Ok(Self {
            converter,
            framer: ChunkFramer::new(buffer_size, input_sample_rate),
            session,
            gate,
            tap,
            stats,
        })
    }

    fn process(&mut self, raw: &[f32]) {
        self.stats.samples_in.fetch_add(raw.len(), Ordering::Relaxed);

        let resampled = self.converter.process(raw);
        if resampled.is_empty() {
            return;
        }
        if let Some(tap) = self.tap.as_mut() {
            let _ = tap.push_slice(&resampled);
        }

        let session = &self.session;
        let gate = &self.gate;
        let stats = &self.stats;
        self.framer.push(&resampled, |chunk| {
            let frame = codec::encode(chunk);
            if !gate.load(Ordering::Acquire) {
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("frame dropped: transport not connected");
                return;
            }
            match session.send_realtime_input(&frame) {
                Ok(()) => {
                    stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    debug!("send_realtime_input failed: {e}");
                }
            }
        });
    }
}

/// Handle to a running capture thread.
pub struct CaptureWorker {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal the worker to exit and wait for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("capture worker panicked");
            }
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the capture worker.
///
/// Samples already waiting in the ring were captured before the transport
/// opened. They are discarded and counted before the thread starts.
///
/// # Errors
/// `ParleyError::Config` for unusable rates, `ParleyError::Io` if the thread
/// cannot be spawned.
pub fn spawn_capture(mut ctx: CaptureContext) -> Result<CaptureWorker> {
    let stale = ctx.consumer.clear();
    if stale > 0 {
        ctx.stats
            .samples_discarded
            .fetch_add(stale, Ordering::Relaxed);
        debug!(stale, "discarded samples captured before open");
    }

    let mut stage = CaptureStage::new(
        ctx.device_sample_rate,
        ctx.input_sample_rate,
        ctx.buffer_size,
        ctx.session,
        ctx.gate,
        ctx.tap,
        ctx.stats,
    )?;
    let mut consumer = ctx.consumer;

    let running = Arc::new(AtomicBool::new(true));
    let running_worker = Arc::clone(&running);

    let join = thread::Builder::new()
        .name("parley-capture".into())
        .spawn(move || {
            info!("capture worker started");
            let mut raw = vec![0f32; DRAIN_CHUNK];
            while running_worker.load(Ordering::Acquire) {
                let n = consumer.pop_slice(&mut raw);
                if n == 0 {
                    thread::sleep(SLEEP_EMPTY);
                    continue;
                }
                stage.process(&raw[..n]);
            }
            info!("capture worker stopped");
        })
        .map_err(ParleyError::Io)?;

    Ok(CaptureWorker {
        running,
        join: Some(join),
    })
}
