//! Blocking recognition consumer.
//!
//! ## Per word
//!
//! ```text
//! 1. Block on the word queue (FIFO)
//! 2. Recognizer scores the word against every vocabulary model
//! 3. Broadcast a RecognitionEvent (recognition or error)
//! ```
//!
//! The loop ends once the capture producer has dropped its sender and every
//! queued word has been processed. A failed word is logged and counted; it
//! never stops the loop.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{info, info_span, warn};

use crate::{
    buffering::{WordBuffer, WordReceiver},
    events::RecognitionEvent,
    recognizer::RecognizerHandle,
};

/// Counters shared by the capture producer and the recognition consumer.
#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub voiced_frames: AtomicUsize,
    pub words_emitted: AtomicUsize,
    pub words_recognized: AtomicUsize,
    pub recognition_errors: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.voiced_frames.store(0, Ordering::Relaxed);
        self.words_emitted.store(0, Ordering::Relaxed);
        self.words_recognized.store(0, Ordering::Relaxed);
        self.recognition_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            voiced_frames: self.voiced_frames.load(Ordering::Relaxed),
            words_emitted: self.words_emitted.load(Ordering::Relaxed),
            words_recognized: self.words_recognized.load(Ordering::Relaxed),
            recognition_errors: self.recognition_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub voiced_frames: usize,
    pub words_emitted: usize,
    pub words_recognized: usize,
    pub recognition_errors: usize,
}

/// All context the consumer needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub recognizer: RecognizerHandle,
    pub words: WordReceiver,
    pub recognition_tx: broadcast::Sender<RecognitionEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Recognise queued words until the queue is closed and empty.
pub fn run(ctx: PipelineContext) {
    info!("recognition pipeline started");

    for (index, word) in ctx.words.iter().enumerate() {
        let span = info_span!("word", index);
        let _enter = span.enter();
        recognize_word(&ctx, index as u64, &word);
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_in = snap.frames_in,
        voiced_frames = snap.voiced_frames,
        words_emitted = snap.words_emitted,
        words_recognized = snap.words_recognized,
        recognition_errors = snap.recognition_errors,
        "recognition pipeline stopped"
    );
}

fn recognize_word(ctx: &PipelineContext, word_index: u64, word: &WordBuffer) {
    let started = Instant::now();
    let result = ctx.recognizer.recognize(word);
    let latency_ms = started.elapsed().as_millis() as u64;

    let (recognition, error) = match result {
        Ok(recognition) => {
            ctx.diagnostics
                .words_recognized
                .fetch_add(1, Ordering::Relaxed);
            info!(
                word = %recognition.word,
                score = recognition.score,
                latency_ms,
                "word recognised"
            );
            (Some(recognition), None)
        }
        Err(e) => {
            ctx.diagnostics
                .recognition_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(latency_ms, "recognition failed: {e}");
            (None, Some(e.to_string()))
        }
    };

    let event = RecognitionEvent {
        seq: ctx.seq.fetch_add(1, Ordering::Relaxed),
        word_index,
        duration_ms: (word.duration_secs() * 1_000.0).round() as u64,
        recognition,
        error,
    };
    // No subscribers is fine.
    let _ = ctx.recognition_tx.send(event);
}
