//! # wordrec-core
//!
//! Isolated-word speech recognition: energy endpoint detection, LBG vector
//! quantization and discrete left-to-right HMMs.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture::run (spawn_blocking)
//!                                                    │
//!                                            WordSegmenter (endpoint)
//!                                                    │
//!                                          bounded word queue (FIFO)
//!                                                    │
//!                                       pipeline::run (spawn_blocking)
//!                                                    │
//!                              RecognitionEngine: MFCC → Codebook → HMM
//!                                                    │
//!                                    broadcast::Sender<RecognitionEvent>
//! ```
//!
//! The audio callback never allocates once warm. All heap work happens on the
//! capture and recognition threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod engine;
pub mod error;
pub mod events;
pub mod features;
pub mod hmm;
mod persist;
pub mod recognizer;
pub mod segment;
pub mod store;
pub mod training;
pub mod vq;

// Convenience re-exports for downstream crates
pub use capture::{FrameSource, SampleFrameSource};
pub use engine::{Engine, EngineConfig};
pub use error::{Result, WordrecError};
pub use events::{EngineStatus, EngineStatusEvent, FrameActivityEvent, RecognitionEvent};
pub use features::{FeatureExtractor, Mfcc, MfccConfig};
pub use hmm::{HmmTrainingConfig, MarkovModel, TrainingPolicy};
pub use recognizer::{
    Dictionary, ModelLayout, Recognition, RecognitionEngine, RecognizerHandle, ScoringMode,
    WordRecognizer,
};
pub use segment::{CaptureMode, SegmenterConfig};
pub use training::{Corpus, TrainingConfig, VocabularyReport};
pub use vq::{Codebook, FeatureVector, LbgConfig};

#[cfg(feature = "sqlite")]
pub use store::CodebookStore;
