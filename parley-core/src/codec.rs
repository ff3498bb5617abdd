//! Wire codec: f32 PCM ⇄ base64 16-bit little-endian PCM.
//!
//! ## Outbound
//!
//! ```text
//! AudioChunk (f32, [-1,1]) ──×32768, clamp──► i16 ──LE bytes──► base64
//!                                            mime: "audio/pcm;rate=<input rate>"
//! ```
//!
//! ## Inbound
//!
//! ```text
//! base64 ──► bytes ──► i16 LE ──÷32768──► f32 ──deinterleave──► PlaybackBuffer
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffering::chunk::AudioChunk;
use crate::error::{ParleyError, Result};

/// Scale between normalised floats and 16-bit PCM.
pub const PCM_SCALE: f32 = 32768.0;

/// Default rate of microphone audio on the wire (Hz).
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

/// Default rate of server audio on the wire (Hz).
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Wire representation of one [`AudioChunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFrame {
    /// Base64 of the little-endian i16 samples.
    pub data: String,
    /// `audio/pcm;rate=<sample rate>`.
    pub mime_type: String,
}

impl EncodedFrame {
    /// Sample rate declared by the MIME descriptor, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        parse_pcm_rate(&self.mime_type)
    }
}

/// Decoded output audio, one `Vec<f32>` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    /// Build a buffer from per-channel sample vectors.
    ///
    /// Channels shorter than the first are padded with silence.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        if channels.is_empty() {
            channels.push(Vec::new());
        }
        let frames = channels[0].len();
        for ch in channels.iter_mut() {
            ch.resize(frames, 0.0);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// MIME descriptor for PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{PCM_MIME_PREFIX};rate={sample_rate}")
}

/// Extract `rate=` from an `audio/pcm` MIME descriptor.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    let mut parts = mime_type.split(';').map(str::trim);
    let base = parts.next()?;
    if !base.eq_ignore_ascii_case(PCM_MIME_PREFIX) {
        return None;
    }
    parts
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// Quantise one float sample to i16.
///
/// Out-of-range input is clamped, so `1.0` maps to `32767` instead of
/// wrapping to `-32768`. NaN maps to silence.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// Quantise and little-endian pack a float slice.
pub fn pack_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&float_to_pcm16(s).to_le_bytes());
    }
    bytes
}

/// Encode a captured chunk for the wire. Consumes the chunk.
pub fn encode(chunk: AudioChunk) -> EncodedFrame {
    encode_samples(&chunk.samples, chunk.sample_rate)
}

/// Encode raw samples captured at `sample_rate`.
pub fn encode_samples(samples: &[f32], sample_rate: u32) -> EncodedFrame {
    EncodedFrame {
        data: BASE64.encode(pack_pcm16(samples)),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode a base64 16-bit PCM payload into a playable buffer.
///
/// Interleaved samples are split into `channel_count` channels. Trailing
/// bytes that do not form a whole frame are ignored.
///
/// # Errors
/// `ParleyError::Codec` on invalid base64 or a zero channel count.
pub fn decode(payload: &str, sample_rate: u32, channel_count: usize) -> Result<PlaybackBuffer> {
    if channel_count == 0 {
        return Err(ParleyError::Codec("channel count must be at least 1".into()));
    }
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ParleyError::Codec(format!("invalid base64: {e}")))?;

    let frame_bytes = 2 * channel_count;
    let frames = bytes.len() / frame_bytes;
    let leftover = bytes.len() - frames * frame_bytes;
    if leftover != 0 {
        debug!(leftover, "ignoring trailing bytes of incomplete PCM frame");
    }

    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for (i, pair) in bytes[..frames * frame_bytes].chunks_exact(2).enumerate() {
        let sample = pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]]));
        channels[i % channel_count].push(sample);
    }

    Ok(PlaybackBuffer::new(channels, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn full_scale_positive_clamps_to_max() {
        assert_eq!(float_to_pcm16(1.0), i16::MAX);
        assert_eq!(float_to_pcm16(1.7), i16::MAX);
        assert_eq!(float_to_pcm16(-1.0), i16::MIN);
        assert_eq!(float_to_pcm16(-3.0), i16::MIN);
        assert_eq!(float_to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn encode_full_scale_round_trips_to_max_representable() {
        let frame = encode(AudioChunk::new(vec![1.0], 16_000));
        let bytes = BASE64.decode(&frame.data).expect("valid base64");
        assert_eq!(bytes, 32767i16.to_le_bytes().to_vec());

        let buffer = decode(&frame.data, 16_000, 1).expect("decode");
        assert_abs_diff_eq!(buffer.channel(0)[0], 32767.0 / 32768.0);
    }

    #[test]
    fn encode_declares_input_rate() {
        let frame = encode(AudioChunk::new(vec![0.0; 8], 16_000));
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert_eq!(frame.sample_rate(), Some(16_000));
    }

    #[test]
    fn packs_little_endian() {
        let bytes = pack_pcm16(&[0.5, -0.5]);
        assert_eq!(bytes, vec![0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn round_trip_within_quantisation_error() {
        let samples: Vec<f32> = (0..2048)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([1.0, -1.0, 0.0, 1e-6, -1e-6])
            .collect();
        let frame = encode_samples(&samples, 16_000);
        let decoded = decode(&frame.data, 16_000, 1).expect("decode");
        assert_eq!(decoded.frames(), samples.len());
        for (orig, got) in samples.iter().zip(decoded.channel(0)) {
            assert!(
                (orig - got).abs() <= 1.0 / PCM_SCALE + f32::EPSILON,
                "orig={orig} got={got}"
            );
        }
    }

    #[test]
    fn decode_deinterleaves_channels() {
        let interleaved: Vec<u8> = [100i16, -100, 200, -200, 300, -300]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let payload = BASE64.encode(interleaved);
        let buffer = decode(&payload, 24_000, 2).expect("decode");
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 3);
        assert_abs_diff_eq!(buffer.channel(0)[2], 300.0 / PCM_SCALE);
        assert_abs_diff_eq!(buffer.channel(1)[1], -200.0 / PCM_SCALE);
    }

    #[test]
    fn decode_ignores_trailing_partial_sample() {
        let payload = BASE64.encode([0x00, 0x40, 0x7f]);
        let buffer = decode(&payload, 24_000, 1).expect("decode");
        assert_eq!(buffer.frames(), 1);
        assert_abs_diff_eq!(buffer.channel(0)[0], 0.5);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let err = decode("not base64!!", 24_000, 1).unwrap_err();
        assert!(matches!(err, ParleyError::Codec(_)));
    }

    #[test]
    fn duration_uses_sample_rate() {
        let buffer = PlaybackBuffer::mono(vec![0.0; 12_000], 24_000);
        assert_abs_diff_eq!(buffer.duration_secs(), 0.5);
    }

    #[test]
    fn parses_rate_parameter() {
        assert_eq!(parse_pcm_rate("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(parse_pcm_rate("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(parse_pcm_rate("audio/pcm"), None);
        assert_eq!(parse_pcm_rate("audio/opus;rate=48000"), None);
    }
}
