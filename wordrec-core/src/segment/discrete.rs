//! Discrete capture: everything recorded between start and stop is one word.

use tracing::debug;

use super::WordSegmenter;
use crate::buffering::{Frame, WordBuffer};

#[derive(Debug, Default, Clone)]
pub struct DiscreteSegmenter {
    samples: Vec<i16>,
}

impl DiscreteSegmenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WordSegmenter for DiscreteSegmenter {
    fn push(&mut self, frame: Frame) -> Option<WordBuffer> {
        self.samples.extend_from_slice(frame.samples());
        None
    }

    fn finish(&mut self) -> Option<WordBuffer> {
        if self.samples.is_empty() {
            return None;
        }
        debug!(samples = self.samples.len(), "discrete capture complete");
        Some(WordBuffer::new(std::mem::take(&mut self.samples)))
    }

    fn is_voiced(&self) -> bool {
        !self.samples.is_empty()
    }

    fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_capture_becomes_one_word() {
        let mut seg = DiscreteSegmenter::new();
        assert!(seg.push(Frame::new(vec![1, 2])).is_none());
        assert!(seg.push(Frame::new(vec![30_000, 3])).is_none());

        let word = seg.finish().expect("one word");
        assert_eq!(word.samples(), &[1, 2, 30_000, 3]);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn empty_capture_yields_nothing() {
        assert!(DiscreteSegmenter::new().finish().is_none());
    }
}
