//! Vector quantization: maps feature vectors onto a small symbol alphabet.

pub mod centroid;
pub mod codebook;
pub mod point;

pub use centroid::Centroid;
pub use codebook::{Codebook, LbgConfig, DEFAULT_CODEBOOK_SIZE, MIN_DISTORTION, SPLIT};
pub use point::FeatureVector;
