//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Where it sits
//!
//! ```text
//! capture:  device rate (44.1/48 kHz) ──RateConverter──► wire input rate (16 kHz)
//! playback: wire output rate (24 kHz) ──RateConverter──► device rate (48 kHz)
//! ```
//!
//! Both directions are continuous streams: [`RateConverter::process`] carries
//! partial blocks and the interpolation history into the next call, so
//! consecutive buffers join without a seam. Playback calls
//! [`RateConverter::flush`] once per model turn to release the held tail;
//! the flush pads with silence, so it also resets the resampler history.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{ParleyError, Result};

/// Default rubato input block used by both directions.
pub const DEFAULT_CONVERTER_CHUNK: usize = 480;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input blocks carried between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    source_rate: u32,
    target_rate: u32,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// `ParleyError::Config` on a zero rate, `ParleyError::AudioDevice` if
    /// rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ParleyError::Config(format!(
                "sample rates must be non-zero (from={source_rate} to={target_rate})"
            )));
        }
        let chunk_size = chunk_size.max(1);

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                source_rate,
                target_rate,
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| ParleyError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        debug!(source_rate, target_rate, chunk_size, "rate converter created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            source_rate,
            target_rate,
        })
    }

    /// Process streamed samples, returning converted output (may be empty).
    ///
    /// Samples are accumulated until a full `chunk_size` block is available;
    /// any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Convert whatever partial block is pending, padding with silence, and
    /// start the next call from a clean history.
    ///
    /// Output is trimmed to the length the pending input maps to plus the
    /// resampler delay, so the padding never reaches the caller.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }

        let pending = self.input_buf.len();
        let expected = ((pending as u64 * self.target_rate as u64) / self.source_rate as u64)
            as usize
            + resampler.output_delay();

        let input: [&[f32]; 1] = [&self.input_buf[..]];
        let out = match resampler.process_partial_into_buffer(
            Some(&input[..]),
            &mut self.output_buf,
            None,
        ) {
            Ok((_consumed, produced)) => {
                let keep = produced.min(expected);
                self.output_buf[0][..keep].to_vec()
            }
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        };
        self.input_buf.clear();
        resampler.reset();
        out
    }

    /// Drop pending input and interpolation history without producing output.
    pub fn discard(&mut self) {
        self.input_buf.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 480).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn zero_rate_is_a_config_error() {
        assert!(matches!(
            RateConverter::new(0, 16_000, 480),
            Err(ParleyError::Config(_))
        ));
    }

    #[test]
    fn capture_48k_to_16k_streams_in_blocks() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn playback_24k_to_48k_flush_releases_the_tail() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        // 1000 is not a multiple of the block size: the tail must still come out.
        let mut out = rc.process(&vec![0.25f32; 1000]);
        assert!(out.len() < 2000, "tail is held until flush");
        out.extend(rc.flush());
        assert!(
            (out.len() as isize - 2000).unsigned_abs() <= 20,
            "output len={}",
            out.len()
        );
        assert!(rc.flush().is_empty(), "nothing should stay pending");
    }

    #[test]
    fn consecutive_buffers_join_without_silence() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        let mut out = rc.process(&vec![0.5f32; 1000]);
        out.extend(rc.process(&vec![0.5f32; 1000]));
        out.extend(rc.process(&vec![0.5f32; 1000]));

        // Skip the warm-up from the empty initial history.
        let warm_up = 32;
        assert!(out.len() > 5000, "output len={}", out.len());
        for (i, s) in out.iter().enumerate().skip(warm_up) {
            assert!((s - 0.5).abs() < 1e-3, "sample {i} = {s}");
        }
    }

    #[test]
    fn discard_forgets_pending_input() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        rc.process(&vec![0.5f32; 300]);
        rc.discard();
        assert!(rc.flush().is_empty());
    }
}
