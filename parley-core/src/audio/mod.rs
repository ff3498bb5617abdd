//! Device audio abstraction.
//!
//! [`AudioBackend`] is the seam between the session and the platform audio
//! subsystem. It acquires the microphone and opens the output device. Both
//! calls return a [`StreamHandle`], the "audio context" of its direction.
//! Closing a handle releases the device. Closing it twice is reported as
//! `ParleyError::ResourceTeardown`, which callers suppress.
//!
//! # Device callback constraints
//!
//! Device callbacks run on OS audio threads at elevated priority. They **must
//! not** allocate after warm-up, block on a mutex, or perform I/O. The
//! microphone side writes into an SPSC ring producer. The output side runs
//! [`PlaybackRenderer::render`], which only touches atomics, a
//! `crossbeam_channel::Receiver::try_recv`, and a tap ring producer.
//!
//! [`PlaybackRenderer::render`]: crate::playback::renderer::PlaybackRenderer::render

#[cfg(feature = "audio-cpal")]
pub mod cpal_backend;
pub mod resample;

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;

use std::fmt;

use crate::{
    buffering::AudioProducer,
    error::{ParleyError, Result},
    playback::renderer::PlaybackRenderer,
};

/// Direction of an open device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Microphone,
    Output,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microphone => f.write_str("microphone"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Platform audio subsystem.
pub trait AudioBackend: Send + Sync + 'static {
    /// Acquire the microphone and stream mono f32 samples into `producer`
    /// from the device callback.
    ///
    /// # Errors
    /// - `ParleyError::PermissionDenied` when access is refused.
    /// - `ParleyError::DeviceNotFound` when no input device exists.
    /// - `ParleyError::AudioDevice` / `ParleyError::AudioStream` otherwise.
    fn open_microphone(&self, producer: AudioProducer) -> Result<StreamHandle>;

    /// Open the output device, preferably at `preferred_sample_rate`, and
    /// drive `renderer` from its callback.
    ///
    /// The negotiated rate is reported by [`StreamHandle::sample_rate`].
    fn open_output(
        &self,
        preferred_sample_rate: u32,
        renderer: PlaybackRenderer,
    ) -> Result<StreamHandle>;
}

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// Ownership of one open device stream.
///
/// Dropping the handle closes it.
pub struct StreamHandle {
    kind: StreamKind,
    sample_rate: u32,
    channels: u16,
    release: Option<ReleaseFn>,
}

impl StreamHandle {
    /// Wrap an open stream. `release` runs exactly once, on the first close.
    pub fn new<F>(kind: StreamKind, sample_rate: u32, channels: u16, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            kind,
            sample_rate,
            channels,
            release: Some(Box::new(release)),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Device sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_open(&self) -> bool {
        self.release.is_some()
    }

    /// Release the device.
    ///
    /// # Errors
    /// `ParleyError::ResourceTeardown` if the stream was already closed.
    pub fn close(&mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => {
                release();
                tracing::debug!(kind = %self.kind, "audio stream closed");
                Ok(())
            }
            None => Err(ParleyError::ResourceTeardown(format!(
                "{} stream already closed",
                self.kind
            ))),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("kind", &self.kind)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Classify a backend error description into a user-actionable kind.
///
/// Platform layers report refusals as free text ("access denied",
/// "not authorized", ...), so this is a keyword match.
pub fn classify_device_error(description: &str) -> ParleyError {
    const PERMISSION_KEYWORDS: &[&str] = &[
        "permission",
        "denied",
        "not authorized",
        "unauthorized",
        "not allowed",
        "notallowederror",
        "access is denied",
    ];
    const MISSING_KEYWORDS: &[&str] = &[
        "no such device",
        "device not found",
        "notfounderror",
        "no input device",
        "not available",
        "unplugged",
    ];

    let lowered = description.trim().to_ascii_lowercase();
    if PERMISSION_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ParleyError::PermissionDenied(description.trim().to_string())
    } else if MISSING_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        ParleyError::DeviceNotFound
    } else {
        ParleyError::AudioDevice(description.trim().to_string())
    }
}
