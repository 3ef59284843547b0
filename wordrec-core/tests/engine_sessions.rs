use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use wordrec_core::buffering::{WordBuffer, FRAME_SAMPLES};
use wordrec_core::recognizer::Candidate;
use wordrec_core::{
    CaptureMode, Engine, EngineConfig, EngineStatus, Recognition, RecognitionEvent,
    RecognizerHandle, SampleFrameSource, ScoringMode, SegmenterConfig, WordRecognizer,
    WordrecError,
};

/// Labels a word by its loudest sample.
struct PeakRecognizer {
    delay: Duration,
    calls: Arc<AtomicUsize>,
    fail_first: bool,
}

impl PeakRecognizer {
    fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            fail_first: false,
        }
    }
}

impl WordRecognizer for PeakRecognizer {
    fn recognize(&mut self, word: &WordBuffer) -> wordrec_core::Result<Recognition> {
        thread::sleep(self.delay);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && call == 0 {
            return Err(WordrecError::NoModel("intentional test failure".into()));
        }
        let peak = word.samples().iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let label = if peak >= 5_000 { "high" } else { "low" };
        Ok(Recognition {
            word: label.into(),
            score: peak as f64,
            mode: ScoringMode::Vq,
            ranking: vec![Candidate {
                word: label.into(),
                score: peak as f64,
            }],
        })
    }

    fn vocabulary(&self) -> Vec<String> {
        vec!["low".into(), "high".into()]
    }
}

fn frames(levels: &[i16]) -> Vec<i16> {
    levels
        .iter()
        .flat_map(|&l| std::iter::repeat(l).take(FRAME_SAMPLES))
        .collect()
}

fn fixed_threshold_config() -> EngineConfig {
    EngineConfig {
        segmenter: SegmenterConfig {
            fixed_threshold: Some(1_000_000.0),
            ..SegmenterConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn drain(rx: &mut broadcast::Receiver<RecognitionEvent>) -> Vec<RecognitionEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
        }
    }
}

#[tokio::test]
async fn source_session_recognises_each_word_then_goes_idle() {
    let engine = Engine::new(
        fixed_threshold_config(),
        RecognizerHandle::new(PeakRecognizer::new()),
    );
    let mut rx = engine.subscribe_recognitions();
    let mut activity = engine.subscribe_activity();

    let samples = frames(&[0, 2_000, 2_000, 0, 0, 0, 0, 0, 8_000, 8_000, 0, 0, 0, 0, 0]);
    engine
        .start_with_source(Box::new(SampleFrameSource::new(samples)))
        .unwrap();
    engine.wait_idle().await;

    let events = drain(&mut rx);
    let labels: Vec<_> = events.iter().filter_map(|e| e.word()).collect();
    assert_eq!(labels, vec!["low", "high"]);
    assert_eq!(events[0].word_index, 0);
    assert_eq!(events[1].word_index, 1);

    let snap = engine.diagnostics_snapshot();
    assert_eq!(snap.frames_in, 15);
    assert_eq!(snap.words_emitted, 2);
    assert_eq!(snap.words_recognized, 2);
    assert!(!engine.is_running());
    assert_eq!(engine.status(), EngineStatus::Idle);

    assert_eq!(activity.try_recv().unwrap().seq, 0);
}

#[tokio::test]
async fn recognition_failure_does_not_end_the_session() {
    let recognizer = PeakRecognizer {
        fail_first: true,
        ..PeakRecognizer::new()
    };
    let engine = Engine::new(fixed_threshold_config(), RecognizerHandle::new(recognizer));
    let mut rx = engine.subscribe_recognitions();

    let samples = frames(&[2_000, 0, 0, 0, 0, 0, 8_000, 0, 0, 0, 0, 0]);
    engine
        .start_with_source(Box::new(SampleFrameSource::new(samples)))
        .unwrap();
    engine.wait_idle().await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events[0].error.as_deref().unwrap().contains("intentional"));
    assert_eq!(events[1].word(), Some("high"));

    let snap = engine.diagnostics_snapshot();
    assert_eq!(snap.recognition_errors, 1);
    assert_eq!(snap.words_recognized, 1);
}

#[tokio::test]
async fn stop_drains_every_queued_word() {
    let recognizer = PeakRecognizer {
        delay: Duration::from_millis(40),
        ..PeakRecognizer::new()
    };
    let engine = Engine::new(fixed_threshold_config(), RecognizerHandle::new(recognizer));
    let mut rx = engine.subscribe_recognitions();
    let mut status = engine.subscribe_status();

    // 40 words of one loud frame each, paced like a slow live device.
    let pattern: Vec<i16> = (0..40).flat_map(|_| [2_000, 0, 0, 0, 0, 0]).collect();
    let source = SampleFrameSource::new(frames(&pattern)).paced(Duration::from_millis(2));
    engine.start_with_source(Box::new(source)).unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first recognition in time")
        .unwrap();
    assert_eq!(first.word(), Some("low"));

    engine.stop().unwrap();
    engine.wait_idle().await;

    let snap = engine.diagnostics_snapshot();
    assert!(snap.words_emitted < 40, "capture did not stop early");
    let rest = drain(&mut rx);
    assert_eq!(1 + rest.len(), snap.words_emitted);
    assert_eq!(snap.words_recognized, snap.words_emitted);

    let mut seen = Vec::new();
    while let Ok(ev) = status.try_recv() {
        seen.push(ev.status);
    }
    assert!(seen.contains(&EngineStatus::Stopping));
    assert_eq!(seen.last(), Some(&EngineStatus::Idle));
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let engine = Engine::new(
        fixed_threshold_config(),
        RecognizerHandle::new(PeakRecognizer::new()),
    );
    let source = SampleFrameSource::new(frames(&[0; 200])).paced(Duration::from_millis(5));
    engine.start_with_source(Box::new(source)).unwrap();

    let again = engine.start_with_source(Box::new(SampleFrameSource::new(Vec::new())));
    assert!(matches!(again, Err(WordrecError::AlreadyRunning)));

    engine.stop().unwrap();
    engine.wait_idle().await;
    assert!(matches!(engine.stop(), Err(WordrecError::NotRunning)));
}

#[tokio::test]
async fn discrete_mode_turns_the_whole_capture_into_one_word() {
    let config = EngineConfig {
        capture_mode: CaptureMode::Discrete,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, RecognizerHandle::new(PeakRecognizer::new()));
    let mut rx = engine.subscribe_recognitions();

    let samples = frames(&[0, 8_000, 0, 0, 0, 0, 0, 0, 2_000, 0]);
    engine
        .start_with_source(Box::new(SampleFrameSource::new(samples)))
        .unwrap();
    engine.wait_idle().await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].duration_ms, 1_000);
    assert_eq!(events[0].word(), Some("high"));
}

#[tokio::test]
async fn engine_can_run_consecutive_sessions() {
    let engine = Engine::new(
        fixed_threshold_config(),
        RecognizerHandle::new(PeakRecognizer::new()),
    );
    let mut rx = engine.subscribe_recognitions();

    for _ in 0..2 {
        let samples = frames(&[2_000, 0, 0, 0, 0, 0]);
        engine
            .start_with_source(Box::new(SampleFrameSource::new(samples)))
            .unwrap();
        engine.wait_idle().await;
    }

    let seqs: Vec<_> = drain(&mut rx).iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![0, 1]);
}

#[cfg(not(feature = "audio-cpal"))]
#[tokio::test]
async fn live_start_without_backend_reports_error_status() {
    let engine = Engine::new(
        EngineConfig::default(),
        RecognizerHandle::new(PeakRecognizer::new()),
    );
    assert!(matches!(engine.start(), Err(WordrecError::AudioStream(_))));
    assert_eq!(engine.status(), EngineStatus::Error);
    assert!(!engine.is_running());
}
