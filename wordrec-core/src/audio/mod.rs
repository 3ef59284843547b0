//! Microphone capture via the cpal backend, plus WAV I/O and rate conversion.
//!
//! # Callback constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block, perform I/O or grow buffers once warm. Samples are
//! down-mixed to mono f32 and written straight into the SPSC ring producer,
//! whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so `AudioCapture` must be created and dropped on the same thread.
//! The engine does both inside one `spawn_blocking` closure.

pub mod device;
pub mod resample;
pub mod wav;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    buffering::AudioProducer,
    error::{Result, WordrecError},
};

/// Handle to an active input stream.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Cleared to make the callback drop incoming audio.
    running: Arc<AtomicBool>,
    /// Set by the stream error callback.
    fault: Arc<AtomicBool>,
    /// Native device rate (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open the input device named `preferred_device_name`, falling back to the
    /// host default and then to the first input device.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when the host has no inputs, `AudioDevice` when
    /// the device cannot report a configuration, `Configuration` for sample
    /// formats other than f32/i16/u8 and `AudioStream` if the stream cannot
    /// be built or started.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected = None;

        if let Some(preferred) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected = devices
                        .find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                    if selected.is_none() {
                        warn!("preferred input device '{preferred}' not found, falling back");
                    }
                }
                Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
            }
        }

        let device = match selected.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => {
                let mut devices = host
                    .input_devices()
                    .map_err(|e| WordrecError::AudioDevice(e.to_string()))?;
                let first = devices.next().ok_or(WordrecError::NoDefaultInputDevice)?;
                warn!("no default input device, falling back to first available input");
                first
            }
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| WordrecError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, format = ?supported.sample_format(), "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let fault = Arc::new(AtomicBool::new(false));
        let ctx = StreamContext {
            producer,
            running: Arc::clone(&running),
            fault: Arc::clone(&fault),
            channels: usize::from(channels.max(1)),
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, ctx, |s| s),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, ctx, |s| s as f32 / 32_768.0),
            SampleFormat::U8 => {
                build_stream::<u8>(&device, &config, ctx, |s| (s as f32 - 128.0) / 128.0)
            }
            other => {
                return Err(WordrecError::Configuration(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| WordrecError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            fault,
            sample_rate,
        })
    }

    /// Open the system default microphone.
    ///
    /// Must be called from the thread that will also drop the value.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Flag raised when the stream reports an error.
    pub fn fault_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fault)
    }

    /// Make the callback drop audio from its next invocation on.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// State moved into the input callback.
#[cfg(feature = "audio-cpal")]
struct StreamContext {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    fault: Arc<AtomicBool>,
    channels: usize,
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ctx: StreamContext,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: SizedSample + Copy + Send + 'static,
{
    use crate::buffering::Producer;

    let StreamContext {
        mut producer,
        running,
        fault,
        channels,
    } = ctx;
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / channels;
                mix_buf.resize(frames, 0.0);
                for (f, slot) in mix_buf.iter_mut().enumerate() {
                    let base = f * channels;
                    let sum: f32 = data[base..base + channels].iter().map(|&s| to_f32(s)).sum();
                    *slot = sum / channels as f32;
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    warn!("ring buffer full: dropped {} samples", mix_buf.len() - written);
                }
            },
            move |err| {
                error!("audio stream error: {err}");
                fault.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| WordrecError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(WordrecError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }
}

#[cfg(all(test, not(feature = "audio-cpal")))]
mod tests {
    use super::*;
    use crate::buffering::create_audio_ring;

    #[test]
    fn open_without_backend_reports_stream_error() {
        let (producer, _consumer) = create_audio_ring();
        let result = AudioCapture::open_default(producer, Arc::new(AtomicBool::new(true)));
        assert!(matches!(result, Err(WordrecError::AudioStream(_))));
    }
}
