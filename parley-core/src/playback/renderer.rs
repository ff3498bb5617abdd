//! Output-callback side of playback.
//!
//! The renderer owns every scheduled buffer that has not finished yet and
//! mixes them into the device's output block. The scheduler (control side)
//! talks to it through a `crossbeam_channel` of [`RenderCommand`]s and a set
//! of shared atomics. The renderer never locks.
//!
//! The output clock is the number of device frames rendered so far. It only
//! advances when the renderer is not paused, so a pause freezes every
//! scheduled start time relative to it.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};

use crate::buffering::{AudioProducer, Producer};

/// One decoded, device-rate buffer with its start position on the clock.
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    /// Output-clock frame where the first sample plays.
    pub start_frame: u64,
    /// Per-channel samples at the device rate.
    pub channels: Vec<Vec<f32>>,
}

impl ScheduledBuffer {
    pub fn frames(&self) -> u64 {
        self.channels.first().map_or(0, |c| c.len() as u64)
    }

    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frames()
    }
}

#[derive(Debug)]
pub enum RenderCommand {
    Play(ScheduledBuffer),
    /// Drop every queued buffer immediately (server barge-in / teardown).
    Flush,
}

/// State shared between the scheduler and the renderer.
#[derive(Debug, Default)]
pub struct PlaybackShared {
    /// Output clock in device frames.
    pub clock_frames: AtomicU64,
    /// Size of the last device callback block in frames.
    pub block_frames: AtomicU64,
    pub paused: AtomicBool,
    /// Buffers scheduled but not yet fully rendered.
    pub active: AtomicUsize,
    /// Buffers whose end was rendered.
    pub completed: AtomicU64,
    /// Buffers that reached the renderer after their start frame.
    pub late: AtomicU64,
}

impl PlaybackShared {
    pub fn now_frames(&self) -> u64 {
        self.clock_frames.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Mixes scheduled buffers into device output blocks.
pub struct PlaybackRenderer {
    commands: Receiver<RenderCommand>,
    shared: Arc<PlaybackShared>,
    queue: Vec<ScheduledBuffer>,
    tap: Option<AudioProducer>,
    mono_scratch: Vec<f32>,
}

impl PlaybackRenderer {
    pub(crate) fn new(
        commands: Receiver<RenderCommand>,
        shared: Arc<PlaybackShared>,
        tap: Option<AudioProducer>,
    ) -> Self {
        Self {
            commands,
            shared,
            queue: Vec::with_capacity(16),
            tap,
            mono_scratch: Vec::new(),
        }
    }

    /// Fill one interleaved output block of `channels` channels.
    ///
    /// Called from the device callback. Writes silence for any frame no
    /// buffer covers.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        out.fill(0.0);

        self.drain_commands();
        self.shared
            .block_frames
            .store(frames as u64, Ordering::Release);

        if self.shared.paused.load(Ordering::Acquire) {
            return;
        }

        let now = self.shared.clock_frames.load(Ordering::Acquire);
        let block_end = now + frames as u64;

        for buffer in &self.queue {
            let buf_end = buffer.end_frame();
            if buffer.start_frame >= block_end || buf_end <= now {
                continue;
            }
            let from = buffer.start_frame.max(now);
            let to = buf_end.min(block_end);
            let n_channels = buffer.channels.len().max(1);
            for clock in from..to {
                let frame_in_block = (clock - now) as usize;
                let frame_in_buf = (clock - buffer.start_frame) as usize;
                let base = frame_in_block * channels;
                for c in 0..channels {
                    out[base + c] += buffer.channels[c % n_channels][frame_in_buf];
                }
            }
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }

        if let Some(tap) = self.tap.as_mut() {
            self.mono_scratch.resize(frames, 0.0);
            for (f, m) in self.mono_scratch.iter_mut().enumerate() {
                let base = f * channels;
                *m = out[base..base + channels].iter().sum::<f32>() / channels as f32;
            }
            let _ = tap.push_slice(&self.mono_scratch);
        }

        self.shared.clock_frames.store(block_end, Ordering::Release);

        let before = self.queue.len();
        self.queue.retain(|b| b.end_frame() > block_end);
        let finished = before - self.queue.len();
        if finished > 0 {
            self.shared.active.fetch_sub(finished, Ordering::AcqRel);
            self.shared
                .completed
                .fetch_add(finished as u64, Ordering::Relaxed);
        }
    }

    fn drain_commands(&mut self) {
        let now = self.shared.clock_frames.load(Ordering::Acquire);
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                RenderCommand::Play(buffer) => {
                    if buffer.start_frame < now {
                        self.shared.late.fetch_add(1, Ordering::Relaxed);
                    }
                    if buffer.frames() == 0 {
                        self.shared.active.fetch_sub(1, Ordering::AcqRel);
                        self.shared.completed.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    self.queue.push(buffer);
                }
                RenderCommand::Flush => {
                    let dropped = self.queue.len();
                    self.queue.clear();
                    if dropped > 0 {
                        self.shared.active.fetch_sub(dropped, Ordering::AcqRel);
                    }
                }
            }
        }
    }
}

/// Create the command channel between a scheduler and its renderer.
pub(crate) fn command_channel() -> (Sender<RenderCommand>, Receiver<RenderCommand>) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_tap_ring, Consumer, Observer};

    fn renderer_with(
        tap: Option<AudioProducer>,
    ) -> (Sender<RenderCommand>, Arc<PlaybackShared>, PlaybackRenderer) {
        let (tx, rx) = command_channel();
        let shared = Arc::new(PlaybackShared::default());
        let renderer = PlaybackRenderer::new(rx, Arc::clone(&shared), tap);
        (tx, shared, renderer)
    }

    fn play(tx: &Sender<RenderCommand>, shared: &PlaybackShared, start: u64, samples: Vec<f32>) {
        shared.active.fetch_add(1, Ordering::AcqRel);
        tx.send(RenderCommand::Play(ScheduledBuffer {
            start_frame: start,
            channels: vec![samples],
        }))
        .unwrap();
    }

    #[test]
    fn renders_back_to_back_buffers_without_gap() {
        let (tx, shared, mut renderer) = renderer_with(None);
        play(&tx, &shared, 0, vec![0.1; 3]);
        play(&tx, &shared, 3, vec![0.2; 3]);

        let mut out = vec![9.0; 8];
        renderer.render(&mut out, 1);
        assert_eq!(&out[..3], &[0.1, 0.1, 0.1]);
        assert_eq!(&out[3..6], &[0.2, 0.2, 0.2]);
        assert_eq!(&out[6..], &[0.0, 0.0]);
        assert_eq!(shared.now_frames(), 8);
        assert_eq!(shared.active(), 0);
        assert_eq!(shared.completed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn buffer_spanning_blocks_continues_where_it_left_off() {
        let (tx, shared, mut renderer) = renderer_with(None);
        play(&tx, &shared, 2, vec![0.5, 0.6, 0.7, 0.8]);

        let mut out = vec![0.0; 4];
        renderer.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.6]);
        assert_eq!(shared.active(), 1);

        renderer.render(&mut out, 1);
        assert_eq!(out, vec![0.7, 0.8, 0.0, 0.0]);
        assert_eq!(shared.active(), 0);
    }

    #[test]
    fn paused_renderer_outputs_silence_and_freezes_clock() {
        let (tx, shared, mut renderer) = renderer_with(None);
        play(&tx, &shared, 0, vec![0.3; 4]);
        shared.paused.store(true, Ordering::Release);

        let mut out = vec![1.0; 4];
        renderer.render(&mut out, 1);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(shared.now_frames(), 0);

        shared.paused.store(false, Ordering::Release);
        renderer.render(&mut out, 1);
        assert_eq!(out, vec![0.3; 4]);
        assert_eq!(shared.now_frames(), 4);
    }

    #[test]
    fn mono_buffer_fans_out_to_every_device_channel() {
        let (tx, shared, mut renderer) = renderer_with(None);
        play(&tx, &shared, 0, vec![0.25, -0.25]);
        let mut out = vec![0.0; 4];
        renderer.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn flush_drops_queued_buffers() {
        let (tx, shared, mut renderer) = renderer_with(None);
        play(&tx, &shared, 0, vec![0.4; 100]);
        let mut out = vec![0.0; 10];
        renderer.render(&mut out, 1);
        assert_eq!(shared.active(), 1);

        tx.send(RenderCommand::Flush).unwrap();
        renderer.render(&mut out, 1);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(shared.active(), 0);
    }

    #[test]
    fn rendered_audio_reaches_tap() {
        let (tap_prod, tap_cons) = create_tap_ring();
        let (tx, shared, mut renderer) = renderer_with(Some(tap_prod));
        play(&tx, &shared, 0, vec![0.5; 4]);
        let mut out = vec![0.0; 4];
        renderer.render(&mut out, 1);

        let mut tap_cons = tap_cons;
        assert_eq!(tap_cons.occupied_len(), 4);
        let mut got = [0.0f32; 4];
        tap_cons.pop_slice(&mut got);
        assert_eq!(got, [0.5; 4]);
    }
}
