//! Mel-frequency cepstral coefficients.
//!
//! Per analysis frame: pre-emphasis, Hamming window, power spectrum, HTK
//! mel filterbank, natural log, DCT-II. Coefficient 0 (overall loudness) is
//! dropped by default so vectors are insensitive to recording gain.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::FeatureExtractor;
use crate::buffering::SAMPLE_RATE;
use crate::error::{Result, WordrecError};
use crate::vq::FeatureVector;

const LOG_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct MfccConfig {
    pub sample_rate: u32,
    /// Samples per analysis frame (also the FFT size).
    pub frame_len: usize,
    pub hop: usize,
    pub num_filters: usize,
    /// Cepstra computed before c0 is dropped.
    pub num_cepstra: usize,
    pub pre_emphasis: f64,
    pub low_hz: f64,
    pub high_hz: f64,
    pub drop_c0: bool,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_len: 512,
            hop: 256,
            num_filters: 20,
            num_cepstra: 13,
            pre_emphasis: 0.95,
            low_hz: 0.0,
            high_hz: 8_000.0,
            drop_c0: true,
        }
    }
}

/// MFCC extractor. Tables are built once; every `extract` call uses its own
/// scratch buffers.
pub struct Mfcc {
    config: MfccConfig,
    window: Vec<f64>,
    filters: Vec<Vec<f64>>,
    dct: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Mfcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mfcc").field("config", &self.config).finish()
    }
}

impl Mfcc {
    pub fn new(config: MfccConfig) -> Result<Self> {
        if config.frame_len < 2 || config.hop == 0 {
            return Err(WordrecError::Configuration(
                "MFCC frame length must be at least 2 and hop positive".into(),
            ));
        }
        if config.num_filters == 0 || config.num_cepstra == 0 || config.num_cepstra > config.num_filters {
            return Err(WordrecError::Configuration(format!(
                "MFCC needs 0 < cepstra ({}) <= filters ({})",
                config.num_cepstra, config.num_filters
            )));
        }
        if config.drop_c0 && config.num_cepstra < 2 {
            return Err(WordrecError::Configuration(
                "dropping c0 leaves no coefficients".into(),
            ));
        }
        let nyquist = config.sample_rate as f64 / 2.0;
        if !(0.0 <= config.low_hz && config.low_hz < config.high_hz && config.high_hz <= nyquist) {
            return Err(WordrecError::Configuration(format!(
                "mel band {}..{} Hz must lie within 0..{nyquist} Hz",
                config.low_hz, config.high_hz
            )));
        }

        Ok(Self::build(config))
    }

    fn build(config: MfccConfig) -> Self {
        let window = build_hamming_window(config.frame_len);
        let filters = build_mel_filters(
            config.frame_len,
            config.sample_rate,
            config.num_filters,
            config.low_hz,
            config.high_hz,
        );
        let dct = build_dct(config.num_filters, config.num_cepstra);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(config.frame_len);
        Self {
            config,
            window,
            filters,
            dct,
            fft,
        }
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Analysis frames produced for `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        let (frame_len, hop) = (self.config.frame_len, self.config.hop);
        if len <= frame_len {
            1
        } else {
            1 + (len - frame_len).div_ceil(hop)
        }
    }
}

impl Default for Mfcc {
    fn default() -> Self {
        Self::build(MfccConfig::default())
    }
}

impl FeatureExtractor for Mfcc {
    fn dimension(&self) -> usize {
        self.config.num_cepstra - usize::from(self.config.drop_c0)
    }

    fn extract(&self, samples: &[i16]) -> Result<Vec<FeatureVector>> {
        if samples.is_empty() {
            return Err(WordrecError::EmptyObservation);
        }
        let frame_len = self.config.frame_len;
        let n_freqs = frame_len / 2 + 1;
        let emphasized = pre_emphasize(samples, self.config.pre_emphasis);
        let frames = self.frame_count(emphasized.len());
        let first_coeff = usize::from(self.config.drop_c0);

        let mut fft_buf = vec![Complex::new(0.0f64, 0.0); frame_len];
        let mut power = vec![0.0f64; n_freqs];
        let mut log_energies = vec![0.0f64; self.config.num_filters];
        let mut out = Vec::with_capacity(frames);

        for frame in 0..frames {
            let start = frame * self.config.hop;
            for (i, v) in fft_buf.iter_mut().enumerate() {
                let s = emphasized.get(start + i).copied().unwrap_or(0.0);
                *v = Complex::new(s * self.window[i], 0.0);
            }
            self.fft.process(&mut fft_buf);
            for (p, c) in power.iter_mut().zip(&fft_buf) {
                *p = c.norm_sqr();
            }

            for (energy, filter) in log_energies.iter_mut().zip(&self.filters) {
                let e: f64 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                *energy = e.max(LOG_FLOOR).ln();
            }

            let coeffs: Vec<f64> = self.dct[first_coeff..]
                .iter()
                .map(|basis| basis.iter().zip(&log_energies).map(|(b, e)| b * e).sum::<f64>())
                .collect();
            out.push(FeatureVector::new(coeffs));
        }

        Ok(out)
    }
}

/// `y[n] = x[n] - a·x[n-1]`, samples scaled to [-1, 1).
fn pre_emphasize(samples: &[i16], coefficient: f64) -> Vec<f64> {
    let mut prev = 0.0;
    samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32_768.0;
            let y = x - coefficient * prev;
            prev = x;
            y
        })
        .collect()
}

fn build_hamming_window(n: usize) -> Vec<f64> {
    use std::f64::consts::PI;
    let denom = (n - 1).max(1) as f64;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

/// Triangular filters spaced evenly on the HTK mel scale, peak 1.
fn build_mel_filters(fft_size: usize, sr: u32, n_filters: usize, fmin: f64, fmax: f64) -> Vec<Vec<f64>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_pts: Vec<f64> = (0..=(n_filters + 1))
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_filters + 1) as f64))
        .collect();

    let mut filters = vec![vec![0.0; n_freqs]; n_filters];
    for (m, filter) in filters.iter_mut().enumerate() {
        let (lower, center, upper) = (hz_pts[m], hz_pts[m + 1], hz_pts[m + 2]);
        for (k, weight) in filter.iter_mut().enumerate() {
            let f = k as f64 * sr as f64 / fft_size as f64;
            *weight = if f > lower && f <= center {
                (f - lower) / (center - lower).max(1e-10)
            } else if f > center && f < upper {
                (upper - f) / (upper - center).max(1e-10)
            } else {
                0.0
            };
        }
    }
    filters
}

/// DCT-II basis rows: `cos(π·n·(m + ½) / M)`.
fn build_dct(n_filters: usize, n_cepstra: usize) -> Vec<Vec<f64>> {
    use std::f64::consts::PI;
    (0..n_cepstra)
        .map(|n| {
            (0..n_filters)
                .map(|m| (PI * n as f64 * (m as f64 + 0.5) / n_filters as f64).cos())
                .collect()
        })
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}
