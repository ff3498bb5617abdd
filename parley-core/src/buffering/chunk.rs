//! Fixed-size audio blocks produced by the capture pipeline.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Immutable once produced by [`ChunkFramer`]; the encoder consumes it.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Accumulates an arbitrary sample stream and cuts it into blocks of exactly
/// `block_size` samples.
///
/// Each completed block is handed to the caller's closure synchronously,
/// inside [`ChunkFramer::push`], so no extra queueing sits between framing and
/// encoding. Remainders are carried into the next push.
#[derive(Debug)]
pub struct ChunkFramer {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl ChunkFramer {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples; emit every block completed by them, in order.
    ///
    /// Returns the number of blocks emitted.
    pub fn push<F>(&mut self, mut samples: &[f32], mut emit: F) -> usize
    where
        F: FnMut(AudioChunk),
    {
        let mut emitted = 0;
        while !samples.is_empty() {
            let wanted = self.block_size - self.pending.len();
            let take = wanted.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(AudioChunk::new(block, self.sample_rate));
                emitted += 1;
            }
        }
        emitted
    }

    /// Samples waiting for the current block to fill.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_full_blocks() {
        let mut framer = ChunkFramer::new(4, 16_000);
        let mut out = Vec::new();
        assert_eq!(framer.push(&[0.1, 0.2, 0.3], |c| out.push(c)), 0);
        assert!(out.is_empty());
        assert_eq!(framer.pending_len(), 3);

        assert_eq!(framer.push(&[0.4, 0.5], |c| out.push(c)), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(out[0].sample_rate, 16_000);
        assert_eq!(framer.pending_len(), 1);
    }

    #[test]
    fn large_push_emits_blocks_in_order() {
        let mut framer = ChunkFramer::new(3, 8_000);
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut out = Vec::new();
        assert_eq!(framer.push(&samples, |c| out.push(c)), 3);
        assert_eq!(out[0].samples, vec![0.0, 1.0, 2.0]);
        assert_eq!(out[1].samples, vec![3.0, 4.0, 5.0]);
        assert_eq!(out[2].samples, vec![6.0, 7.0, 8.0]);
        assert_eq!(framer.pending_len(), 1);
    }

    #[test]
    fn chunk_duration() {
        let chunk = AudioChunk::new(vec![0.0; 4096], 16_000);
        assert!((chunk.duration_secs() - 0.256).abs() < 1e-9);
        assert!(!chunk.is_empty());
    }
}
