//! Frame sources: live ring buffer and in-memory samples.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use tracing::debug;

use super::FrameSource;
use crate::{
    audio::{resample::RateConverter, wav},
    buffering::{AudioConsumer, Consumer, Frame, FRAME_SAMPLES, SAMPLE_RATE},
    error::{Result, WordrecError},
};

/// Samples drained from the ring per read.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

fn sleep_empty() -> Duration {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    Duration::from_millis(*EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("WORDREC_CAPTURE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    }))
}

/// Live source: drains the cpal ring, resamples to 16 kHz and cuts frames.
pub struct RingFrameSource {
    consumer: AudioConsumer,
    converter: RateConverter,
    fault: Arc<AtomicBool>,
    raw: Vec<f32>,
    converted: Vec<f32>,
}

impl RingFrameSource {
    /// # Errors
    /// `Configuration` if the capture rate cannot be converted to 16 kHz.
    pub fn new(consumer: AudioConsumer, capture_rate: u32, fault: Arc<AtomicBool>) -> Result<Self> {
        Ok(Self {
            consumer,
            converter: RateConverter::new(capture_rate, SAMPLE_RATE, DRAIN_CHUNK)?,
            fault,
            raw: vec![0.0; DRAIN_CHUNK],
            converted: Vec::with_capacity(FRAME_SAMPLES * 2),
        })
    }
}

impl FrameSource for RingFrameSource {
    fn next_frame(&mut self, capturing: &AtomicBool) -> Result<Option<Frame>> {
        loop {
            if self.converted.len() >= FRAME_SAMPLES {
                let samples = self
                    .converted
                    .drain(..FRAME_SAMPLES)
                    .map(wav::to_i16)
                    .collect();
                return Ok(Some(Frame::new(samples)));
            }
            if self.fault.load(Ordering::Acquire) {
                return Err(WordrecError::AudioStream(
                    "input stream reported an error".into(),
                ));
            }
            if !capturing.load(Ordering::Acquire) {
                return Ok(None);
            }

            let n = self.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                std::thread::sleep(sleep_empty());
                continue;
            }
            self.converter
                .process_into(&self.raw[..n], &mut self.converted)?;
        }
    }
}

/// Offline source over a fixed sample buffer. The last frame is zero-padded.
#[derive(Debug, Clone)]
pub struct SampleFrameSource {
    samples: Vec<i16>,
    pos: usize,
    pacing: Option<Duration>,
}

impl SampleFrameSource {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            pos: 0,
            pacing: None,
        }
    }

    /// Read a 16 kHz WAV file.
    pub fn from_wav(path: &Path) -> Result<Self> {
        Ok(Self::new(wav::read_wav(path)?))
    }

    /// Sleep `interval` before each frame, simulating a live device.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    /// Frames not yet delivered.
    pub fn remaining_frames(&self) -> usize {
        self.samples.len().saturating_sub(self.pos).div_ceil(FRAME_SAMPLES)
    }
}

impl FrameSource for SampleFrameSource {
    fn next_frame(&mut self, capturing: &AtomicBool) -> Result<Option<Frame>> {
        if self.pos >= self.samples.len() {
            return Ok(None);
        }
        if let Some(interval) = self.pacing {
            std::thread::sleep(interval);
            if !capturing.load(Ordering::Acquire) {
                return Ok(None);
            }
        }

        let end = (self.pos + FRAME_SAMPLES).min(self.samples.len());
        let mut samples = self.samples[self.pos..end].to_vec();
        if samples.len() < FRAME_SAMPLES {
            debug!(real = samples.len(), "zero-padding final frame");
            samples.resize(FRAME_SAMPLES, 0);
        }
        self.pos = end;
        Ok(Some(Frame::new(samples)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_audio_ring, Producer};

    #[test]
    fn sample_source_pads_last_frame() {
        let mut source = SampleFrameSource::new(vec![7; FRAME_SAMPLES + 10]);
        let capturing = AtomicBool::new(true);
        assert_eq!(source.remaining_frames(), 2);

        let first = source.next_frame(&capturing).unwrap().unwrap();
        assert_eq!(first.samples(), &[7; FRAME_SAMPLES][..]);

        let last = source.next_frame(&capturing).unwrap().unwrap();
        assert_eq!(last.len(), FRAME_SAMPLES);
        assert_eq!(&last.samples()[..10], &[7; 10]);
        assert!(last.samples()[10..].iter().all(|&s| s == 0));

        assert!(source.next_frame(&capturing).unwrap().is_none());
    }

    #[test]
    fn ring_source_builds_frames_from_float_samples() {
        let (mut producer, consumer) = create_audio_ring();
        let mut source =
            RingFrameSource::new(consumer, SAMPLE_RATE, Arc::new(AtomicBool::new(false))).unwrap();
        producer.push_slice(&vec![0.5f32; FRAME_SAMPLES + 100]);

        let capturing = AtomicBool::new(true);
        let frame = source.next_frame(&capturing).unwrap().unwrap();
        assert!(frame.samples().iter().all(|&s| s == 16_384));

        // The 100 leftover samples never complete a frame.
        capturing.store(false, Ordering::Release);
        assert!(source.next_frame(&capturing).unwrap().is_none());
    }

    #[test]
    fn ring_source_surfaces_stream_fault() {
        let (_producer, consumer) = create_audio_ring();
        let fault = Arc::new(AtomicBool::new(true));
        let mut source = RingFrameSource::new(consumer, SAMPLE_RATE, fault).unwrap();
        let result = source.next_frame(&AtomicBool::new(true));
        assert!(matches!(result, Err(WordrecError::AudioStream(_))));
    }
}
