//! Gapless playback scheduling.
//!
//! ```text
//! PlaybackBuffer (wire rate) ──RateConverter──► device rate
//!        │
//!        ▼
//! ScheduleClock::reserve(now, frames) → start = max(next_start, now)
//!        │                              next_start = start + frames
//!        ▼
//! RenderCommand::Play ──crossbeam──► PlaybackRenderer (output callback)
//! ```
//!
//! Buffers are placed back-to-back on the output clock, so consecutive
//! server chunks play with neither gaps nor overlap. When the queue runs dry
//! the next buffer starts "now" (one callback block ahead, so it is never
//! late), not at the stale end of the previous one.

pub mod renderer;

use std::sync::{atomic::Ordering, Arc};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::{
    audio::resample::{RateConverter, DEFAULT_CONVERTER_CHUNK},
    buffering::AudioProducer,
    codec::PlaybackBuffer,
    error::{ParleyError, Result},
};
use renderer::{command_channel, PlaybackRenderer, PlaybackShared, RenderCommand, ScheduledBuffer};

/// Running "next start time" on the output clock, in frames.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleClock {
    next_start: u64,
}

impl ScheduleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `frames` frames, starting no earlier than `now`.
    ///
    /// Returns the start frame.
    pub fn reserve(&mut self, now: u64, frames: u64) -> u64 {
        let start = self.next_start.max(now);
        self.next_start = start + frames;
        start
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    /// Forget reservations; the next buffer starts at the current time.
    pub fn reset(&mut self) {
        self.next_start = 0;
    }
}

/// Placement of one scheduled buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlot {
    pub start_frame: u64,
    pub frames: u64,
    /// Start on the output clock, in seconds.
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl ScheduledSlot {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

/// Producer side of the scheduler ⇄ renderer link.
pub struct PlaybackLink {
    commands: Sender<RenderCommand>,
    shared: Arc<PlaybackShared>,
}

/// Create a connected link/renderer pair.
///
/// The renderer goes to [`AudioBackend::open_output`]; the link goes to
/// [`PlaybackScheduler::new`] once the device rate is known.
///
/// [`AudioBackend::open_output`]: crate::audio::AudioBackend::open_output
pub fn link(tap: Option<AudioProducer>) -> (PlaybackLink, PlaybackRenderer) {
    let (tx, rx) = command_channel();
    let shared = Arc::new(PlaybackShared::default());
    let renderer = PlaybackRenderer::new(rx, Arc::clone(&shared), tap);
    (
        PlaybackLink {
            commands: tx,
            shared,
        },
        renderer,
    )
}

/// Pause/resume and clock inspection shared with callers outside the
/// event loop.
#[derive(Clone)]
pub struct PlaybackControl {
    shared: Arc<PlaybackShared>,
    device_rate: u32,
}

impl PlaybackControl {
    /// Suspend the output clock. Scheduled buffers keep their start frames.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Buffers scheduled and not yet finished.
    pub fn active_count(&self) -> usize {
        self.shared.active()
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    pub fn late_count(&self) -> u64 {
        self.shared.late.load(Ordering::Relaxed)
    }

    /// Output clock in seconds.
    pub fn now_secs(&self) -> f64 {
        self.shared.now_frames() as f64 / self.device_rate as f64
    }
}

/// Places decoded buffers on the output clock.
pub struct PlaybackScheduler {
    link: PlaybackLink,
    clock: ScheduleClock,
    device_rate: u32,
    /// One converter per channel, created on first use of that channel count.
    converters: Vec<RateConverter>,
    wire_rate: u32,
}

impl PlaybackScheduler {
    /// # Errors
    /// `ParleyError::Config` on a zero sample rate.
    pub fn new(link: PlaybackLink, wire_rate: u32, device_rate: u32) -> Result<Self> {
        if wire_rate == 0 || device_rate == 0 {
            return Err(ParleyError::Config(format!(
                "playback rates must be non-zero (wire={wire_rate} device={device_rate})"
            )));
        }
        Ok(Self {
            link,
            clock: ScheduleClock::new(),
            device_rate,
            converters: Vec::new(),
            wire_rate,
        })
    }

    pub fn control(&self) -> PlaybackControl {
        PlaybackControl {
            shared: Arc::clone(&self.link.shared),
            device_rate: self.device_rate,
        }
    }

    /// Schedule `buffer` immediately after everything already scheduled.
    ///
    /// When the buffer needs rate conversion, the converters stream across
    /// calls: a partial block stays pending until the next buffer of the turn
    /// or [`PlaybackScheduler::end_turn`]. A buffer that only fills pending
    /// input yields an empty slot at the end of the schedule.
    ///
    /// # Errors
    /// `ParleyError::NotConnected` if the renderer is gone.
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledSlot> {
        let channels = self.to_device_rate(buffer)?;
        self.enqueue(channels)
    }

    /// Release the converter tail held back for the current turn.
    ///
    /// Returns `None` when nothing was pending.
    ///
    /// # Errors
    /// `ParleyError::NotConnected` if the renderer is gone.
    pub fn end_turn(&mut self) -> Result<Option<ScheduledSlot>> {
        let tail: Vec<Vec<f32>> = self.converters.iter_mut().map(RateConverter::flush).collect();
        if tail.first().map_or(true, Vec::is_empty) {
            return Ok(None);
        }
        self.enqueue(tail).map(Some)
    }

    /// Drop everything queued and restart scheduling at the current time.
    pub fn interrupt(&mut self) {
        if self.link.commands.send(RenderCommand::Flush).is_err() {
            warn!("playback renderer gone; nothing to flush");
        }
        self.clock.reset();
        for converter in &mut self.converters {
            converter.discard();
        }
    }

    fn enqueue(&mut self, channels: Vec<Vec<f32>>) -> Result<ScheduledSlot> {
        let frames = channels.first().map_or(0, |c| c.len() as u64);
        let rate = self.device_rate as f64;
        if frames == 0 {
            let start_frame = self.clock.next_start();
            return Ok(ScheduledSlot {
                start_frame,
                frames,
                start_secs: start_frame as f64 / rate,
                duration_secs: 0.0,
            });
        }

        let shared = &self.link.shared;
        // Anything earlier than one callback block ahead may already be
        // rendered by the time the command is drained.
        let now = shared.now_frames() + shared.block_frames.load(Ordering::Acquire);
        let start_frame = self.clock.reserve(now, frames);

        shared.active.fetch_add(1, Ordering::AcqRel);
        if self
            .link
            .commands
            .send(RenderCommand::Play(ScheduledBuffer {
                start_frame,
                channels,
            }))
            .is_err()
        {
            shared.active.fetch_sub(1, Ordering::AcqRel);
            return Err(ParleyError::NotConnected);
        }

        let slot = ScheduledSlot {
            start_frame,
            frames,
            start_secs: start_frame as f64 / rate,
            duration_secs: frames as f64 / rate,
        };
        debug!(
            start = slot.start_secs,
            duration = slot.duration_secs,
            "playback buffer scheduled"
        );
        Ok(slot)
    }

    fn to_device_rate(&mut self, buffer: PlaybackBuffer) -> Result<Vec<Vec<f32>>> {
        let source_rate = match buffer.sample_rate() {
            0 => self.wire_rate,
            r => r,
        };
        if source_rate == self.device_rate {
            return Ok(buffer.into_channels());
        }

        let n = buffer.channel_count();
        let rebuild = self.converters.len() != n
            || self
                .converters
                .first()
                .is_some_and(|c| c.source_rate() != source_rate);
        if rebuild {
            debug!(source_rate, channels = n, "playback converters rebuilt");
            self.converters = (0..n)
                .map(|_| RateConverter::new(source_rate, self.device_rate, DEFAULT_CONVERTER_CHUNK))
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(buffer
            .channels()
            .iter()
            .zip(self.converters.iter_mut())
            .map(|(samples, converter)| converter.process(samples))
            .collect())
    }
}
