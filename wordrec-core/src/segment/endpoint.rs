//! Energy endpoint detection over 100 ms frames.
//!
//! ## Algorithm
//!
//! 1. The first `calibration_frames` frames estimate the noise floor; the
//!    threshold is their mean energy × `energy_multiplier`.
//! 2. A frame above threshold marks the segmenter voiced and resets the pause
//!    counter.
//! 3. While voiced, up to `max_pause_frames` quiet frames are absorbed into the
//!    word. The next quiet frame closes it: every retained frame becomes one
//!    `WordBuffer` and the window is trimmed to its last `retained_frames`.
//! 4. While quiet, the window keeps at most `quiet_window_frames` frames of
//!    leading context.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::{SegmenterConfig, WordSegmenter};
use crate::buffering::{Frame, WordBuffer};

/// Result of the noise-floor measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Mean energy of the calibration frames.
    pub noise_energy: f64,
    /// Energy above which a frame counts as speech.
    pub threshold: f64,
    /// The threshold exceeded the configured ceiling.
    pub too_noisy: bool,
}

/// Continuous-mode segmenter.
#[derive(Debug, Clone)]
pub struct EndpointSegmenter {
    config: SegmenterConfig,
    calibration: Option<Calibration>,
    calibration_energy: f64,
    calibration_seen: usize,
    window: VecDeque<Frame>,
    voiced: bool,
    quiet_run: usize,
}

impl EndpointSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let calibration = config.fixed_threshold.map(|threshold| Calibration {
            noise_energy: threshold / config.energy_multiplier.max(f64::MIN_POSITIVE),
            threshold,
            too_noisy: threshold > config.noise_ceiling,
        });
        Self {
            config,
            calibration,
            calibration_energy: 0.0,
            calibration_seen: 0,
            window: VecDeque::new(),
            voiced: false,
            quiet_run: 0,
        }
    }

    /// Segmenter with a known threshold; no calibration phase.
    pub fn with_threshold(threshold: f64) -> Self {
        Self::new(SegmenterConfig {
            fixed_threshold: Some(threshold),
            ..SegmenterConfig::default()
        })
    }

    /// Frames currently retained (leading context and/or the word in progress).
    pub fn buffered_frames(&self) -> usize {
        self.window.len()
    }

    fn calibrate(&mut self, frame: &Frame) {
        self.calibration_energy += frame.avg_energy();
        self.calibration_seen += 1;
        if self.calibration_seen < self.config.calibration_frames.max(1) {
            return;
        }

        let noise_energy = self.calibration_energy / self.calibration_seen as f64;
        let threshold = noise_energy * self.config.energy_multiplier;
        let too_noisy = threshold > self.config.noise_ceiling;
        if too_noisy {
            warn!(
                threshold,
                ceiling = self.config.noise_ceiling,
                "environment too noisy for reliable endpoint detection"
            );
        } else {
            info!(noise_energy, threshold, "noise floor calibrated");
        }
        self.calibration = Some(Calibration {
            noise_energy,
            threshold,
            too_noisy,
        });
    }

    fn emit_word(&mut self) -> WordBuffer {
        let word = WordBuffer::from_frames(self.window.iter());
        let keep = self.config.retained_frames.min(self.window.len());
        let drop_count = self.window.len() - keep;
        self.window.drain(..drop_count);
        self.voiced = false;
        self.quiet_run = 0;
        debug!(samples = word.len(), "word completed");
        word
    }

    fn cap_quiet_window(&mut self) {
        while self.window.len() > self.config.quiet_window_frames {
            self.window.pop_front();
        }
    }
}

impl Default for EndpointSegmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

impl WordSegmenter for EndpointSegmenter {
    fn push(&mut self, frame: Frame) -> Option<WordBuffer> {
        let Some(calibration) = self.calibration else {
            self.calibrate(&frame);
            self.window.push_back(frame);
            self.cap_quiet_window();
            return None;
        };

        let loud = frame.avg_energy() > calibration.threshold;
        self.window.push_back(frame);

        if loud {
            if !self.voiced {
                debug!("speech onset");
            }
            self.voiced = true;
            self.quiet_run = 0;
            None
        } else if self.voiced {
            if self.quiet_run < self.config.max_pause_frames {
                self.quiet_run += 1;
                None
            } else {
                Some(self.emit_word())
            }
        } else {
            self.cap_quiet_window();
            None
        }
    }

    fn finish(&mut self) -> Option<WordBuffer> {
        if !self.voiced {
            return None;
        }
        info!(
            buffered_frames = self.window.len(),
            "capture stopped mid-word, flushing buffered word"
        );
        let word = WordBuffer::from_frames(self.window.iter());
        self.reset_word_state();
        Some(word)
    }

    fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    fn calibration_pending(&self) -> bool {
        self.calibration.is_none()
    }

    fn is_voiced(&self) -> bool {
        self.voiced
    }

    fn reset(&mut self) {
        self.reset_word_state();
        if self.config.fixed_threshold.is_none() {
            self.calibration = None;
            self.calibration_energy = 0.0;
            self.calibration_seen = 0;
        }
    }
}

impl EndpointSegmenter {
    fn reset_word_state(&mut self) {
        self.window.clear();
        self.voiced = false;
        self.quiet_run = 0;
    }
}
