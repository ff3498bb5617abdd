//! Speech presence from input amplitude.
//!
//! ## Algorithm
//!
//! 1. Compute the mean absolute amplitude of the analysis window.
//! 2. At or above `threshold` → speech; reload the hangover counter.
//! 3. Below `threshold` with hangover left → still speech; count down.
//! 4. Otherwise → no speech.

/// Default mean-absolute threshold; quiet room noise sits well below it.
pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.01;

/// Default hangover in visualizer frames (≈ 130 ms at 60 Hz).
pub const DEFAULT_HANGOVER_FRAMES: u32 = 8;

#[derive(Debug, Clone)]
pub struct SpeechDetector {
    threshold: f32,
    hangover_frames: u32,
    hangover_counter: u32,
}

impl SpeechDetector {
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    /// Classify one window by its mean absolute amplitude.
    pub fn update(&mut self, mean_abs: f32) -> bool {
        if mean_abs >= self.threshold {
            self.hangover_counter = self.hangover_frames;
            true
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for SpeechDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SPEECH_THRESHOLD, DEFAULT_HANGOVER_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_not_speech() {
        let mut det = SpeechDetector::default();
        assert!(!det.update(0.0));
    }

    #[test]
    fn loud_window_is_speech() {
        let mut det = SpeechDetector::new(0.02, 0);
        assert!(det.update(0.3));
        assert!(!det.update(0.01));
    }

    #[test]
    fn hangover_extends_speech_then_expires() {
        let mut det = SpeechDetector::new(0.02, 2);
        assert!(det.update(0.5));
        assert!(det.update(0.0), "hangover 1");
        assert!(det.update(0.0), "hangover 2");
        assert!(!det.update(0.0), "hangover expired");
    }
}
