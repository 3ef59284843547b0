//! WAV file I/O for training corpora and offline recognition.
//!
//! Everything is normalised to 16 kHz mono i16 on read; writes always produce
//! that format.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::buffering::SAMPLE_RATE;
use crate::error::{Result, WordrecError};

/// Read a PCM or float WAV file as 16 kHz mono i16.
///
/// Multi-channel audio is averaged to mono. Any sample rate other than
/// 16 kHz is a configuration error.
pub fn read_wav(path: &Path) -> Result<Vec<i16>> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE {
        return Err(WordrecError::Configuration(format!(
            "{}: sample rate {} Hz, expected {SAMPLE_RATE} Hz",
            path.display(),
            spec.sample_rate
        )));
    }
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int if spec.bits_per_sample <= 16 => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32_768.0))
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let full_scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let samples: Vec<i16> = interleaved
        .chunks(channels)
        .map(|frame| to_i16(frame.iter().sum::<f32>() / frame.len() as f32))
        .collect();
    debug!(
        path = %path.display(),
        channels,
        samples = samples.len(),
        "wav loaded"
    );
    Ok(samples)
}

/// Write 16 kHz mono 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// `.wav` files directly inside `dir`, sorted by name.
pub fn list_wavs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if path.is_file() && is_wav {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Convert a [-1, 1] float sample to i16, clamping out-of-range input.
pub(crate) fn to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
