//! Sample transport between the audio callback, the capture producer and the
//! recognition consumer.
//!
//! - `AudioProducer`/`AudioConsumer`: lock-free SPSC ring (`ringbuf::HeapRb<f32>`)
//!   whose `push_slice` is wait-free and safe inside the real-time callback.
//! - `WordSender`/`WordReceiver`: bounded FIFO of completed words
//!   (`crossbeam_channel::bounded`). `send` blocks when the consumer lags.

pub mod frame;

use crossbeam_channel::{Receiver, Sender};
use ringbuf::{traits::Split, HeapRb};

pub use frame::{Frame, WordBuffer, FRAME_BYTES, FRAME_SAMPLES, SAMPLE_RATE};
pub use ringbuf::traits::{Consumer, Producer};

/// Producer half of the sample ring, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the sample ring, held by the capture thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^20 f32 samples ≈ 21.8 s at 48 kHz.
pub const RING_CAPACITY: usize = 1 << 20;

/// Default number of completed words that may wait for the recognizer.
pub const WORD_QUEUE_CAPACITY: usize = 16;

pub type WordSender = Sender<WordBuffer>;
pub type WordReceiver = Receiver<WordBuffer>;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Create the single-producer/single-consumer word queue.
///
/// A zero capacity is bumped to one so a word can always be handed over.
pub fn create_word_queue(capacity: usize) -> (WordSender, WordReceiver) {
    crossbeam_channel::bounded(capacity.max(1))
}
