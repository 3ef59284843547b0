//! Feature extraction: word samples → sequence of feature vectors.
//!
//! `FeatureExtractor` is the seam between audio and the quantizer. `Mfcc` is
//! the default implementation; anything producing fixed-dimension vectors can
//! replace it, provided training and recognition use the same extractor.

pub mod mfcc;

pub use mfcc::{Mfcc, MfccConfig};

use crate::error::Result;
use crate::vq::FeatureVector;

/// Maps 16 kHz mono PCM onto a sequence of k-dimensional feature vectors.
///
/// Implementations must be pure: the same samples always yield the same
/// vectors, and concurrent calls on one instance are allowed.
pub trait FeatureExtractor: Send + Sync {
    /// k, the length of every vector `extract` returns.
    fn dimension(&self) -> usize;

    fn extract(&self, samples: &[i16]) -> Result<Vec<FeatureVector>>;
}
