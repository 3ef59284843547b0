//! Turning the frame stream into isolated word buffers.
//!
//! The `WordSegmenter` trait is the extensibility point: `EndpointSegmenter`
//! (energy endpoint detection, continuous capture) and `DiscreteSegmenter`
//! (push-to-talk style, one word per capture) both plug into the capture loop.

pub mod discrete;
pub mod endpoint;

pub use discrete::DiscreteSegmenter;
pub use endpoint::{Calibration, EndpointSegmenter};

use serde::{Deserialize, Serialize};

use crate::buffering::{Frame, WordBuffer};

/// How a capture session delimits words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Energy endpoint detection; any number of words per session.
    #[default]
    Continuous,
    /// No endpoint detection; the whole capture becomes one word on stop.
    Discrete,
}

/// Tunables for energy endpoint detection.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Frames averaged to estimate the noise floor. Default: 3.
    pub calibration_frames: usize,
    /// Threshold = noise energy × this multiplier. Default: 36.
    pub energy_multiplier: f64,
    /// Thresholds above this mean the room is too noisy. Default: 1.07e9.
    pub noise_ceiling: f64,
    /// Quiet frames tolerated inside a word. The next quiet frame ends it.
    /// Default: 4.
    pub max_pause_frames: usize,
    /// Frames kept after a word as leading context for the next one. Default: 4.
    pub retained_frames: usize,
    /// Frames kept while quiet. Default: 5 (≈ 500 ms).
    pub quiet_window_frames: usize,
    /// Skip calibration and use this energy threshold.
    pub fixed_threshold: Option<f64>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            calibration_frames: 3,
            energy_multiplier: 36.0,
            noise_ceiling: 1_070_000_000.0,
            max_pause_frames: 4,
            retained_frames: 4,
            quiet_window_frames: 5,
            fixed_threshold: None,
        }
    }
}

/// Trait for all segmentation strategies.
///
/// Implementors are stateful; the capture loop owns exactly one.
pub trait WordSegmenter: Send + 'static {
    /// Feed the next frame. Returns a word when one has just been completed.
    fn push(&mut self, frame: Frame) -> Option<WordBuffer>;

    /// Capture ended: hand over whatever word is still buffered.
    fn finish(&mut self) -> Option<WordBuffer>;

    /// Noise-floor calibration, once known.
    fn calibration(&self) -> Option<Calibration> {
        None
    }

    /// Still measuring the noise floor; no word can start yet.
    fn calibration_pending(&self) -> bool {
        false
    }

    /// A word is in progress.
    fn is_voiced(&self) -> bool {
        false
    }

    /// Drop all buffered frames and state.
    fn reset(&mut self);
}

/// Build the segmenter matching a capture mode.
pub fn segmenter_for(mode: CaptureMode, config: &SegmenterConfig) -> Box<dyn WordSegmenter> {
    match mode {
        CaptureMode::Continuous => Box::new(EndpointSegmenter::new(config.clone())),
        CaptureMode::Discrete => Box::new(DiscreteSegmenter::new()),
    }
}
