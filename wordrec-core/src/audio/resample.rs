//! Sample-rate conversion to the 16 kHz frame rate, using a rubato
//! `FastFixedIn` resampler.
//!
//! `cpal` delivers audio at the device's native rate (commonly 44.1 or 48 kHz).
//! `RateConverter` runs on the capture thread, where allocation is allowed.
//! When the device already runs at 16 kHz no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::info;

use crate::error::{Result, WordrecError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Input not yet handed to rubato.
    pending: Vec<f32>,
    /// Input frames per rubato call.
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `Configuration` if rubato rejects the rate pair.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(WordrecError::Configuration(format!(
                "invalid resampler setup: {capture_rate} Hz -> {target_rate} Hz, chunk {chunk_size}"
            )));
        }
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| WordrecError::Configuration(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(capture_rate, target_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed `samples` and append every completed output sample to `out`.
    ///
    /// Input short of a full rubato chunk is held for the next call.
    ///
    /// # Errors
    /// `AudioStream` if rubato fails mid-stream.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(samples);
            return Ok(());
        };

        self.pending.extend_from_slice(samples);
        let mut consumed_total = 0;
        while self.pending.len() - consumed_total >= self.chunk_size {
            let input = &self.pending[consumed_total..consumed_total + self.chunk_size];
            let (_, produced) = resampler
                .process_into_buffer(&[input], &mut self.output_buf, None)
                .map_err(|e| WordrecError::AudioStream(format!("resampler: {e}")))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
            consumed_total += self.chunk_size;
        }
        self.pending.drain(..consumed_total);
        Ok(())
    }

    /// Input samples waiting for a full chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let mut out = Vec::new();
        rc.process_into(&samples, &mut out).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn downsamples_48k_by_three() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let mut out = Vec::new();
        rc.process_into(&[0.0f32; 960], &mut out).unwrap();
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn partial_chunks_accumulate() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let mut out = Vec::new();
        rc.process_into(&[0.0f32; 500], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(rc.pending(), 500);

        rc.process_into(&[0.0f32; 500], &mut out).unwrap();
        assert!(!out.is_empty());
        assert_eq!(rc.pending(), 40);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 16_000, 960),
            Err(WordrecError::Configuration(_))
        ));
    }
}
