//! Capture producer: frames in, isolated words out.
//!
//! ```text
//! FrameSource ──Frame──► WordSegmenter ──WordBuffer──► word queue
//!      │                      │
//!      │                      └──► FrameActivityEvent (broadcast)
//!      └── ring + resampler (live) or in-memory samples (offline)
//! ```
//!
//! `run` is blocking and lives on its own `spawn_blocking` thread. It checks the
//! `capturing` flag once per frame. On exit, normal or not, the segmenter is
//! flushed and the word sender is dropped so the consumer can drain.

pub mod source;

pub use source::{RingFrameSource, SampleFrameSource};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    buffering::{Frame, WordBuffer, WordSender},
    engine::{pipeline::PipelineDiagnostics, StatusReporter},
    error::Result,
    events::{EngineStatus, FrameActivityEvent},
    segment::{Calibration, WordSegmenter},
};

/// Anything that yields 100 ms frames of 16 kHz mono audio.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted or `capturing` has
    /// been cleared. May block while waiting for audio.
    fn next_frame(&mut self, capturing: &AtomicBool) -> Result<Option<Frame>>;
}

/// Everything the capture loop needs, moved onto its thread in one piece.
pub struct CaptureContext {
    pub source: Box<dyn FrameSource>,
    pub segmenter: Box<dyn WordSegmenter>,
    pub words: WordSender,
    pub capturing: Arc<AtomicBool>,
    pub activity_tx: broadcast::Sender<FrameActivityEvent>,
    pub status: StatusReporter,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the capture loop until the source ends, capture is stopped, or the
/// source fails.
///
/// # Errors
/// The source error that ended capture. Any word in progress has already been
/// flushed to the queue by then.
pub fn run(mut ctx: CaptureContext) -> Result<()> {
    info!("capture started");

    let mut calibrating = ctx.segmenter.calibration_pending();
    ctx.status.set(
        if calibrating {
            EngineStatus::Calibrating
        } else {
            EngineStatus::Listening
        },
        None,
    );

    let mut activity_seq = 0u64;
    let outcome = loop {
        if !ctx.capturing.load(Ordering::Acquire) {
            break Ok(());
        }
        let frame = match ctx.source.next_frame(&ctx.capturing) {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        ctx.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);
        let energy = frame.avg_energy();
        let word = ctx.segmenter.push(frame);

        if calibrating && !ctx.segmenter.calibration_pending() {
            calibrating = false;
            if let Some(calibration) = ctx.segmenter.calibration() {
                report_calibration(&ctx.status, calibration);
            }
        }

        let is_voiced = ctx.segmenter.is_voiced();
        if is_voiced {
            ctx.diagnostics.voiced_frames.fetch_add(1, Ordering::Relaxed);
        }
        let _ = ctx.activity_tx.send(FrameActivityEvent {
            seq: activity_seq,
            energy,
            is_voiced,
        });
        activity_seq += 1;

        if let Some(word) = word {
            if !hand_over(&ctx, word) {
                break Ok(());
            }
        }
    };

    if let Some(word) = ctx.segmenter.finish() {
        hand_over(&ctx, word);
    }
    info!(frames = activity_seq, "capture stopped");
    outcome
}

/// Run a source to exhaustion through a segmenter, collecting every word.
///
/// Offline counterpart of `run`, used for WAV files.
pub fn collect_words(
    source: &mut dyn FrameSource,
    segmenter: &mut dyn WordSegmenter,
) -> Result<Vec<WordBuffer>> {
    let capturing = AtomicBool::new(true);
    let mut words = Vec::new();
    while let Some(frame) = source.next_frame(&capturing)? {
        words.extend(segmenter.push(frame));
    }
    words.extend(segmenter.finish());
    debug!(words = words.len(), "offline segmentation complete");
    Ok(words)
}

/// Blocking send; `false` once the consumer has gone away.
fn hand_over(ctx: &CaptureContext, word: WordBuffer) -> bool {
    let samples = word.len();
    match ctx.words.send(word) {
        Ok(()) => {
            ctx.diagnostics.words_emitted.fetch_add(1, Ordering::Relaxed);
            debug!(samples, "word queued");
            true
        }
        Err(_) => {
            warn!(samples, "word queue closed, dropping word");
            false
        }
    }
}

fn report_calibration(status: &StatusReporter, calibration: Calibration) {
    let detail = calibration.too_noisy.then(|| {
        format!(
            "environment too noisy for endpoint detection (threshold {:.0})",
            calibration.threshold
        )
    });
    status.set(EngineStatus::Listening, detail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_word_queue, FRAME_SAMPLES};
    use crate::engine::StatusReporter;
    use crate::error::WordrecError;
    use crate::segment::{DiscreteSegmenter, EndpointSegmenter, SegmenterConfig};

    fn levels_to_samples(levels: &[i16]) -> Vec<i16> {
        levels
            .iter()
            .flat_map(|&l| std::iter::repeat(l).take(FRAME_SAMPLES))
            .collect()
    }

    struct Harness {
        ctx: CaptureContext,
        words: crate::buffering::WordReceiver,
        activity: broadcast::Receiver<FrameActivityEvent>,
        status: broadcast::Receiver<crate::events::EngineStatusEvent>,
        diagnostics: Arc<PipelineDiagnostics>,
    }

    fn harness(source: Box<dyn FrameSource>, segmenter: Box<dyn WordSegmenter>) -> Harness {
        let (tx, rx) = create_word_queue(16);
        let (activity_tx, activity) = broadcast::channel(256);
        let (status_tx, status) = broadcast::channel(16);
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        Harness {
            ctx: CaptureContext {
                source,
                segmenter,
                words: tx,
                capturing: Arc::new(AtomicBool::new(true)),
                activity_tx,
                status: StatusReporter::new(status_tx),
                diagnostics: Arc::clone(&diagnostics),
            },
            words: rx,
            activity,
            status,
            diagnostics,
        }
    }

    #[test]
    fn continuous_capture_emits_words_and_activity() {
        let samples = levels_to_samples(&[0, 0, 2_000, 2_000, 0, 0, 0, 0, 0, 0, 0]);
        let h = harness(
            Box::new(SampleFrameSource::new(samples)),
            Box::new(EndpointSegmenter::with_threshold(1_000_000.0)),
        );
        let mut activity = h.activity;

        run(h.ctx).unwrap();

        let words: Vec<_> = h.words.iter().collect();
        assert_eq!(words.len(), 1);
        let snap = h.diagnostics.snapshot();
        assert_eq!(snap.frames_in, 11);
        assert_eq!(snap.words_emitted, 1);
        assert!(snap.voiced_frames >= 2);

        let first = activity.try_recv().unwrap();
        assert_eq!(first.seq, 0);
        assert!(!first.is_voiced);
    }

    #[test]
    fn word_in_progress_is_flushed_when_source_ends() {
        let samples = levels_to_samples(&[0, 2_000, 2_000]);
        let h = harness(
            Box::new(SampleFrameSource::new(samples)),
            Box::new(EndpointSegmenter::with_threshold(1_000_000.0)),
        );
        run(h.ctx).unwrap();
        let words: Vec<_> = h.words.iter().collect();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].len(), 3 * FRAME_SAMPLES);
    }

    #[test]
    fn cleared_flag_stops_before_reading() {
        let samples = levels_to_samples(&[2_000; 5]);
        let h = harness(
            Box::new(SampleFrameSource::new(samples)),
            Box::new(DiscreteSegmenter::new()),
        );
        h.ctx.capturing.store(false, Ordering::Release);
        run(h.ctx).unwrap();
        assert_eq!(h.words.iter().count(), 0);
        assert_eq!(h.diagnostics.snapshot().frames_in, 0);
    }

    #[test]
    fn noisy_calibration_is_reported_on_status_channel() {
        let samples = levels_to_samples(&[20_000, 20_000, 20_000, 0]);
        let h = harness(
            Box::new(SampleFrameSource::new(samples)),
            Box::new(EndpointSegmenter::new(SegmenterConfig::default())),
        );
        let mut status = h.status;
        run(h.ctx).unwrap();

        assert_eq!(status.try_recv().unwrap().status, EngineStatus::Calibrating);
        let calibrated = status.try_recv().unwrap();
        assert_eq!(calibrated.status, EngineStatus::Listening);
        assert!(calibrated.detail.unwrap().contains("too noisy"));
    }

    struct FailingSource {
        frames_left: usize,
    }

    impl FrameSource for FailingSource {
        fn next_frame(&mut self, _capturing: &AtomicBool) -> Result<Option<Frame>> {
            if self.frames_left == 0 {
                return Err(WordrecError::AudioStream("device unplugged".into()));
            }
            self.frames_left -= 1;
            Ok(Some(Frame::new(vec![2_000; FRAME_SAMPLES])))
        }
    }

    #[test]
    fn source_error_ends_capture_but_keeps_buffered_word() {
        let h = harness(
            Box::new(FailingSource { frames_left: 2 }),
            Box::new(DiscreteSegmenter::new()),
        );
        let result = run(h.ctx);
        assert!(matches!(result, Err(WordrecError::AudioStream(_))));
        let words: Vec<_> = h.words.iter().collect();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].len(), 2 * FRAME_SAMPLES);
    }

    #[test]
    fn collect_words_splits_offline_signal() {
        let samples = levels_to_samples(&[0, 2_000, 0, 0, 0, 0, 0, 0, 2_000, 2_000]);
        let mut source = SampleFrameSource::new(samples);
        let mut segmenter = EndpointSegmenter::with_threshold(1_000_000.0);
        let words = collect_words(&mut source, &mut segmenter).unwrap();
        assert_eq!(words.len(), 2);
    }
}
