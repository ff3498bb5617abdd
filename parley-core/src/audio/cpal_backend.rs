//! cpal implementation of [`AudioBackend`].
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Each stream is therefore built, played, and dropped on its own
//! named OS thread. The opener blocks on a sync channel until that thread
//! reports the open result. The returned [`StreamHandle`] carries a release
//! hook that signals the thread to drop the stream and joins it.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BuildStreamError, DefaultStreamConfigError, PlayStreamError, SampleFormat, SampleRate, Stream,
    StreamConfig, SupportedStreamConfig,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

use super::{classify_device_error, AudioBackend, StreamHandle, StreamKind};
use crate::{
    buffering::{AudioProducer, Producer},
    error::{ParleyError, Result},
    playback::renderer::PlaybackRenderer,
};

/// Opens the host's default input and output devices.
#[derive(Debug, Default, Clone)]
pub struct CpalBackend {
    preferred_input: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer an input device by exact name, falling back to the default.
    pub fn with_preferred_input(mut self, name: Option<String>) -> Self {
        self.preferred_input = name.filter(|n| !n.trim().is_empty());
        self
    }
}

impl AudioBackend for CpalBackend {
    fn open_microphone(&self, producer: AudioProducer) -> Result<StreamHandle> {
        let preferred = self.preferred_input.clone();
        spawn_stream_thread(StreamKind::Microphone, move || {
            open_input_stream(producer, preferred.as_deref())
        })
    }

    fn open_output(
        &self,
        preferred_sample_rate: u32,
        renderer: PlaybackRenderer,
    ) -> Result<StreamHandle> {
        spawn_stream_thread(StreamKind::Output, move || {
            open_output_stream(preferred_sample_rate, renderer)
        })
    }
}

/// Result of opening a stream on its owning thread.
struct OpenedStream {
    stream: Stream,
    sample_rate: u32,
    channels: u16,
}

fn spawn_stream_thread<F>(kind: StreamKind, open: F) -> Result<StreamHandle>
where
    F: FnOnce() -> Result<OpenedStream> + Send + 'static,
{
    let (open_tx, open_rx) = mpsc::channel::<Result<(u32, u16)>>();
    let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);

    let join: JoinHandle<()> = thread::Builder::new()
        .name(format!("parley-{kind}"))
        .spawn(move || {
            let opened = match open() {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            let _ = open_tx.send(Ok((opened.sample_rate, opened.channels)));

            // Park until the handle is closed; a dropped sender also wakes us.
            let _ = stop_rx.recv();
            drop(opened.stream);
        })
        .map_err(ParleyError::Io)?;

    match open_rx.recv() {
        Ok(Ok((sample_rate, channels))) => {
            info!(%kind, sample_rate, channels, "audio stream open");
            Ok(StreamHandle::new(kind, sample_rate, channels, move || {
                let _ = stop_tx.send(());
                if join.join().is_err() {
                    error!(%kind, "audio stream thread panicked during shutdown");
                }
            }))
        }
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err(ParleyError::AudioStream(format!(
                "{kind} stream thread exited before reporting"
            )))
        }
    }
}

fn map_default_config_error(e: DefaultStreamConfigError) -> ParleyError {
    match e {
        DefaultStreamConfigError::DeviceNotAvailable => ParleyError::DeviceNotFound,
        DefaultStreamConfigError::BackendSpecific { err } => classify_device_error(&err.description),
        other => ParleyError::AudioDevice(other.to_string()),
    }
}

fn map_build_error(e: BuildStreamError) -> ParleyError {
    match e {
        BuildStreamError::DeviceNotAvailable => ParleyError::DeviceNotFound,
        BuildStreamError::BackendSpecific { err } => classify_device_error(&err.description),
        other => ParleyError::AudioStream(other.to_string()),
    }
}

fn map_play_error(e: PlayStreamError) -> ParleyError {
    match e {
        PlayStreamError::DeviceNotAvailable => ParleyError::DeviceNotFound,
        PlayStreamError::BackendSpecific { err } => classify_device_error(&err.description),
    }
}

fn open_input_stream(mut producer: AudioProducer, preferred: Option<&str>) -> Result<OpenedStream> {
    let host = cpal::default_host();

    let mut device = None;
    if let Some(name) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                device = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                if device.is_none() {
                    warn!("preferred input device '{name}' not found, falling back");
                }
            }
            Err(e) => warn!("failed to list input devices: {e}"),
        }
    }
    let device = match device.or_else(|| host.default_input_device()) {
        Some(d) => d,
        None => return Err(ParleyError::DeviceNotFound),
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(map_default_config_error)?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let ch = channels.max(1) as usize;
    let on_error = |err: cpal::StreamError| error!("input stream error: {err}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if ch == 1 {
                        push_all(&mut producer, data);
                        return;
                    }
                    mix_down(data, ch, &mut mono, |s| s);
                    push_all(&mut producer, &mono);
                },
                on_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    mix_down(data, ch, &mut mono, |s| s as f32 / 32768.0);
                    push_all(&mut producer, &mono);
                },
                on_error,
                None,
            )
        }
        SampleFormat::U8 => {
            let mut mono: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u8], _info| {
                    mix_down(data, ch, &mut mono, |s| (s as f32 - 128.0) / 128.0);
                    push_all(&mut producer, &mono);
                },
                on_error,
                None,
            )
        }
        fmt => {
            return Err(ParleyError::AudioStream(format!(
                "unsupported input sample format: {fmt:?}"
            )))
        }
    }
    .map_err(map_build_error)?;

    stream.play().map_err(map_play_error)?;

    Ok(OpenedStream {
        stream,
        sample_rate,
        channels,
    })
}

/// Average interleaved frames into `mono`, converting each sample with `to_f32`.
fn mix_down<T: Copy>(data: &[T], ch: usize, mono: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / ch;
    mono.resize(frames, 0.0);
    for (f, out) in mono.iter_mut().enumerate() {
        let base = f * ch;
        let sum: f32 = data[base..base + ch].iter().map(|&s| to_f32(s)).sum();
        *out = sum / ch as f32;
    }
}

fn push_all(producer: &mut AudioProducer, samples: &[f32]) {
    let written = producer.push_slice(samples);
    if written < samples.len() {
        warn!("capture ring full: dropped {} samples", samples.len() - written);
    }
}

/// Pick an output config at `preferred_rate` if the device supports it.
fn select_output_config(device: &cpal::Device, preferred_rate: u32) -> Result<SupportedStreamConfig> {
    let fallback = device
        .default_output_config()
        .map_err(map_default_config_error)?;

    let ranges = match device.supported_output_configs() {
        Ok(ranges) => ranges.collect::<Vec<_>>(),
        Err(e) => {
            warn!("failed to query output configs: {e}");
            return Ok(fallback);
        }
    };

    let rate = SampleRate(preferred_rate);
    let matching = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .filter(|r| matches!(r.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .max_by_key(|r| {
            (
                r.sample_format() == fallback.sample_format(),
                r.channels() == fallback.channels(),
            )
        });

    Ok(match matching {
        Some(range) => range.with_sample_rate(rate),
        None => {
            info!(
                preferred_rate,
                device_rate = fallback.sample_rate().0,
                "output device does not support preferred rate, resampling"
            );
            fallback
        }
    })
}

fn open_output_stream(preferred_rate: u32, mut renderer: PlaybackRenderer) -> Result<OpenedStream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ParleyError::AudioDevice("no output device available".into()))?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = select_output_config(&device, preferred_rate)?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let ch = channels.max(1) as usize;
    let on_error = |err: cpal::StreamError| error!("output stream error: {err}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |out: &mut [f32], _info| renderer.render(out, ch),
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |out: &mut [i16], _info| {
                    scratch.resize(out.len(), 0.0);
                    renderer.render(&mut scratch, ch);
                    for (dst, src) in out.iter_mut().zip(&scratch) {
                        *dst = crate::codec::float_to_pcm16(*src);
                    }
                },
                on_error,
                None,
            )
        }
        fmt => {
            return Err(ParleyError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(map_build_error)?;

    stream.play().map_err(map_play_error)?;

    Ok(OpenedStream {
        stream,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::mix_down;

    #[test]
    fn mixes_interleaved_stereo_to_mono() {
        let mut mono = Vec::new();
        mix_down(&[0.5f32, -0.5, 1.0, 0.0, 0.2, 0.2], 2, &mut mono, |s| s);
        assert_eq!(mono, vec![0.0, 0.5, 0.2]);
    }

    #[test]
    fn converts_unsigned_bytes_around_midpoint() {
        let mut mono = Vec::new();
        mix_down(&[128u8, 0, 255], 1, &mut mono, |s| (s as f32 - 128.0) / 128.0);
        assert_eq!(mono[0], 0.0);
        assert_eq!(mono[1], -1.0);
        assert!((mono[2] - 127.0 / 128.0).abs() < 1e-6);
    }
}
