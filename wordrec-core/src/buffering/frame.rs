//! Fixed-size capture frames and the word buffers assembled from them.

/// Samples per frame: 100 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 1600;

/// Bytes per frame on the device wire (16-bit little-endian PCM).
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Sample rate every frame and word buffer is expressed in.
pub const SAMPLE_RATE: u32 = 16_000;

/// 100 ms of mono i16 PCM plus its mean squared energy.
///
/// Immutable once built; the energy is computed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    samples: Vec<i16>,
    avg_energy: f64,
}

impl Frame {
    pub fn new(samples: Vec<i16>) -> Self {
        let avg_energy = mean_square(&samples);
        Self {
            samples,
            avg_energy,
        }
    }

    /// Decode a little-endian 16-bit PCM chunk.
    ///
    /// A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Mean of the squared samples.
    pub fn avg_energy(&self) -> f64 {
        self.avg_energy
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn mean_square(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    sum / samples.len() as f64
}

/// One isolated word: the samples of contiguous frames judged to contain speech.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordBuffer {
    samples: Vec<i16>,
}

impl WordBuffer {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Concatenate frames in order.
    pub fn from_frames<'a, I>(frames: I) -> Self
    where
        I: IntoIterator<Item = &'a Frame>,
    {
        let mut samples = Vec::new();
        for frame in frames {
            samples.extend_from_slice(frame.samples());
        }
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration at the fixed 16 kHz rate.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_is_mean_of_squares() {
        let frame = Frame::new(vec![3, -3, 3, -3]);
        assert_eq!(frame.avg_energy(), 9.0);
    }

    #[test]
    fn empty_frame_has_zero_energy() {
        assert_eq!(Frame::new(vec![]).avg_energy(), 0.0);
    }

    #[test]
    fn decodes_little_endian_pcm() {
        let frame = Frame::from_le_bytes(&[0x01, 0x04, 0xff, 0xff, 0x7f]);
        assert_eq!(frame.samples(), &[0x0401, -1]);
    }

    #[test]
    fn word_buffer_concatenates_frames_in_order() {
        let a = Frame::new(vec![1, 2]);
        let b = Frame::new(vec![3]);
        let word = WordBuffer::from_frames([&a, &b]);
        assert_eq!(word.samples(), &[1, 2, 3]);
        assert!((word.duration_secs() - 3.0 / 16_000.0).abs() < 1e-12);
    }
}
