//! Word recognition abstraction.
//!
//! The `WordRecognizer` trait decouples the pipeline from the scoring backend.
//! `RecognitionEngine` is the production implementation; tests plug in fakes.
//!
//! `recognize` takes `&mut self` so stateful recognizers are possible. All
//! access is serialised through `RecognizerHandle`'s `parking_lot::Mutex`.

pub mod dictionary;
pub mod engine;
pub mod layout;

pub use dictionary::Dictionary;
pub use engine::{LoadFailure, LoadReport, RecognitionEngine};
pub use layout::ModelLayout;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffering::WordBuffer;
use crate::error::Result;

/// How candidate words are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Per-word codebooks; lowest total distortion wins.
    Vq,
    /// Shared codebook plus per-word HMMs; highest Viterbi log-probability wins.
    #[default]
    Hmm,
}

impl std::fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScoringMode::Vq => "vq",
            ScoringMode::Hmm => "hmm",
        })
    }
}

/// One vocabulary word and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub word: String,
    pub score: f64,
}

/// Best word plus every candidate's score, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recognition {
    pub word: String,
    pub score: f64,
    pub mode: ScoringMode,
    pub ranking: Vec<Candidate>,
}

/// Contract for word recognition backends.
pub trait WordRecognizer: Send + 'static {
    /// One-time preparation before the first word arrives.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Label one isolated word.
    ///
    /// # Errors
    /// `NoModel` when no vocabulary word is active; extraction and scoring
    /// errors otherwise.
    fn recognize(&mut self, word: &WordBuffer) -> Result<Recognition>;

    /// Words this recognizer can output.
    fn vocabulary(&self) -> Vec<String>;
}

/// Thread-safe reference-counted handle to any `WordRecognizer` implementor.
#[derive(Clone)]
pub struct RecognizerHandle(pub Arc<Mutex<dyn WordRecognizer>>);

impl RecognizerHandle {
    pub fn new<R: WordRecognizer>(recognizer: R) -> Self {
        Self(Arc::new(Mutex::new(recognizer)))
    }

    pub fn recognize(&self, word: &WordBuffer) -> Result<Recognition> {
        self.0.lock().recognize(word)
    }
}

impl std::fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerHandle").finish_non_exhaustive()
    }
}
