//! Lock-free SPSC ring buffers for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and safe to
//! call from a real-time device callback. Two kinds of ring exist:
//!
//! - the **capture ring**: microphone callback → capture worker;
//! - **tap rings**: capture worker / playback renderer → visualizer. Taps are
//!   lossy: when the visualizer falls behind, pushes are simply truncated.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the device callback (or the tapped stage).
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture worker (or the visualizer).
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// Covers the window between microphone acquisition and transport open.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Tap ring capacity: ≈ 0.68 s at 48 kHz, several visualizer frames' worth.
pub const TAP_RING_CAPACITY: usize = 1 << 15;

/// Create the microphone → capture worker ring.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Create an analysis tap ring.
pub fn create_tap_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(TAP_RING_CAPACITY).split()
}
