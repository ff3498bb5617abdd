//! Visualization feed.
//!
//! ```text
//! capture worker ──tap ring──┐
//!                            ├──► Visualizer::sample() ──► VisualizationFrame
//! output renderer ──tap ring─┘         (display cadence, tokio interval)
//! ```
//!
//! The taps are lossy SPSC rings, so a slow visualizer never stalls audio.
//! Each [`Analyser`] keeps the newest `fft_size` samples and derives levels
//! plus a smoothed, dB-scaled spectrum in [0, 1].

pub mod speech;

use std::sync::Arc;
use std::time::Duration;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::{
    buffering::{AudioConsumer, Consumer},
    ipc::events::{LevelReading, VisualizationFrame},
};
use speech::SpeechDetector;

pub const DEFAULT_FFT_SIZE: usize = 256;
pub const DEFAULT_VISUALIZER_FPS: u32 = 60;

const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Rolling-window level and spectrum analyser.
pub struct Analyser {
    fft_size: usize,
    history: Vec<f32>,
    hann_window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two, minimum 32.
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        Self {
            fft_size,
            history: vec![0.0; fft_size],
            hann_window: build_hann_window(fft_size),
            fft: FftPlanner::<f32>::new().plan_fft_forward(fft_size),
            fft_buf: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Append samples, keeping only the newest `fft_size`.
    pub fn push(&mut self, samples: &[f32]) {
        if samples.len() >= self.fft_size {
            self.history
                .copy_from_slice(&samples[samples.len() - self.fft_size..]);
            return;
        }
        self.history.drain(..samples.len());
        self.history.extend_from_slice(samples);
    }

    /// Forget the window (no audio arrived this tick).
    pub fn silence(&mut self) {
        self.history.fill(0.0);
    }

    pub fn level(&self) -> LevelReading {
        let n = self.history.len() as f32;
        let mut sum_sq = 0.0f32;
        let mut sum_abs = 0.0f32;
        let mut peak = 0.0f32;
        for &s in &self.history {
            sum_sq += s * s;
            sum_abs += s.abs();
            peak = peak.max(s.abs());
        }
        LevelReading {
            rms: (sum_sq / n).sqrt(),
            mean_abs: sum_abs / n,
            peak,
        }
    }

    /// `fft_size / 2` smoothed magnitude bins mapped from
    /// [-100 dB, -30 dB] onto [0, 1].
    pub fn frequency_bins(&mut self) -> Vec<f32> {
        for (i, v) in self.fft_buf.iter_mut().enumerate() {
            *v = Complex::new(self.history[i] * self.hann_window[i], 0.0);
        }
        self.fft.process(&mut self.fft_buf);

        let scale = 1.0 / self.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        self.smoothed
            .iter_mut()
            .zip(&self.fft_buf)
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * scale;
                *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * magnitude;
                let db = 20.0 * prev.max(1e-12).log10();
                ((db - MIN_DECIBELS) / range).clamp(0.0, 1.0)
            })
            .collect()
    }
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Inputs for a [`Visualizer`].
pub struct VisualizerContext {
    pub input_tap: AudioConsumer,
    pub output_tap: AudioConsumer,
    pub fft_size: usize,
    pub speech: SpeechDetector,
}

/// Samples both taps and builds [`VisualizationFrame`]s.
pub struct Visualizer {
    input_tap: AudioConsumer,
    output_tap: AudioConsumer,
    input: Analyser,
    output: Analyser,
    speech: SpeechDetector,
    scratch: Vec<f32>,
    seq: u64,
}

impl Visualizer {
    pub fn new(ctx: VisualizerContext) -> Self {
        Self {
            input_tap: ctx.input_tap,
            output_tap: ctx.output_tap,
            input: Analyser::new(ctx.fft_size),
            output: Analyser::new(ctx.fft_size),
            speech: ctx.speech,
            scratch: vec![0.0; 4096],
            seq: 0,
        }
    }

    /// Drain both taps and produce the next frame.
    pub fn sample(&mut self) -> VisualizationFrame {
        drain_into(&mut self.input_tap, &mut self.input, &mut self.scratch);
        drain_into(&mut self.output_tap, &mut self.output, &mut self.scratch);

        let input_level = self.input.level();
        let output_level = self.output.level();
        let speech_present = self.speech.update(input_level.mean_abs);

        let frame = VisualizationFrame {
            seq: self.seq,
            input_level,
            output_level,
            input_spectrum: self.input.frequency_bins(),
            output_spectrum: self.output.frequency_bins(),
            speech_present,
        };
        self.seq += 1;
        frame
    }

    /// Publish frames at `fps` until the task is aborted.
    pub async fn run(mut self, fps: u32, frames_tx: broadcast::Sender<VisualizationFrame>) {
        let period = Duration::from_secs_f64(1.0 / fps.clamp(1, 240) as f64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(fps, "visualizer started");

        loop {
            ticker.tick().await;
            let frame = self.sample();
            if frames_tx.send(frame).is_err() {
                trace!("no visualization subscribers");
            }
        }
    }
}

fn drain_into(tap: &mut AudioConsumer, analyser: &mut Analyser, scratch: &mut [f32]) {
    let mut fresh = 0;
    loop {
        let n = tap.pop_slice(scratch);
        if n == 0 {
            break;
        }
        analyser.push(&scratch[..n]);
        fresh += n;
    }
    if fresh == 0 {
        analyser.silence();
    }
}
