//! `Engine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new()
//!     └─► warm_up()              → status = WarmingUp → Idle
//!         └─► start()            → device open, capture + consumer spawned
//!             │                    status = Calibrating | Listening
//!             └─► stop()         → capture ends, status = Stopping
//!                 └─► (drained)  → status = Idle
//! ```
//!
//! A session stays "running" until the consumer has recognised every queued
//! word, so `start()` during the drain returns `AlreadyRunning`.
//!
//! ## Threading
//!
//! Two `spawn_blocking` threads per session: the capture producer and the
//! recognition consumer, joined by a bounded word queue. `cpal::Stream` is
//! `!Send`, so `AudioCapture` is opened and dropped inside the capture closure;
//! a sync oneshot reports the open result back to `start()`.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{
    audio::AudioCapture,
    buffering::{create_audio_ring, create_word_queue, WordReceiver, WORD_QUEUE_CAPACITY},
    capture::{self, CaptureContext, FrameSource, RingFrameSource},
    error::{Result, WordrecError},
    events::{EngineStatus, EngineStatusEvent, FrameActivityEvent, RecognitionEvent},
    recognizer::RecognizerHandle,
    segment::{segmenter_for, CaptureMode, SegmenterConfig},
};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `Engine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default: continuous (endpoint detection).
    pub capture_mode: CaptureMode,
    pub segmenter: SegmenterConfig,
    /// Completed words allowed to wait for the recognizer. Default: 16.
    pub word_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capture_mode: CaptureMode::Continuous,
            segmenter: SegmenterConfig::default(),
            word_queue_capacity: WORD_QUEUE_CAPACITY,
        }
    }
}

/// Shared status cell plus its broadcast channel.
#[derive(Clone)]
pub struct StatusReporter {
    status: Arc<Mutex<EngineStatus>>,
    tx: broadcast::Sender<EngineStatusEvent>,
}

impl StatusReporter {
    pub fn new(tx: broadcast::Sender<EngineStatusEvent>) -> Self {
        Self {
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn set(&self, status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.tx.send(EngineStatusEvent { status, detail });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.tx.subscribe()
    }
}

/// The top-level engine handle.
///
/// `Engine` is `Send + Sync`; wrap it in `Arc<Engine>` to share it with
/// event-forwarding tasks.
pub struct Engine {
    config: EngineConfig,
    recognizer: RecognizerHandle,
    /// `true` from `start()` until the consumer has drained the queue.
    running: Arc<AtomicBool>,
    /// `true` while the capture producer should keep reading frames.
    capturing: Arc<AtomicBool>,
    status: StatusReporter,
    recognition_tx: broadcast::Sender<RecognitionEvent>,
    activity_tx: broadcast::Sender<FrameActivityEvent>,
    /// Monotonically increasing recognition event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine. Does not capture until `start()`.
    pub fn new(config: EngineConfig, recognizer: RecognizerHandle) -> Self {
        let (recognition_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            recognizer,
            running: Arc::new(AtomicBool::new(false)),
            capturing: Arc::new(AtomicBool::new(false)),
            status: StatusReporter::new(status_tx),
            recognition_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Prepare the recognizer. Call once before the first `start()`.
    pub fn warm_up(&self) -> Result<()> {
        self.status.set(EngineStatus::WarmingUp, None);
        info!("warming up recognizer");
        if let Err(e) = self.recognizer.0.lock().warm_up() {
            self.status.set(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }
        self.status.set(EngineStatus::Idle, None);
        info!("recognizer ready");
        Ok(())
    }

    /// Start capturing from the default input device.
    ///
    /// Blocks until the device is confirmed open (or fails).
    ///
    /// # Errors
    /// - `AlreadyRunning` if a session is active or still draining.
    /// - `NoDefaultInputDevice` / `AudioDevice` / `AudioStream` /
    ///   `Configuration` on device errors.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start capturing from the input device with this name, falling back to
    /// the default device.
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        self.begin_session()?;

        let (producer, consumer) = create_audio_ring();
        let (words_tx, words_rx) = create_word_queue(self.config.word_queue_capacity);
        let segmenter = segmenter_for(self.config.capture_mode, &self.config.segmenter);
        let capturing = Arc::clone(&self.capturing);
        let status = self.status.clone();
        let activity_tx = self.activity_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync oneshot: capture thread signals open success/failure to start().
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let capture_task = tokio::task::spawn_blocking(move || {
            // cpal::Stream is !Send: open and drop on this thread.
            let opened = AudioCapture::open_with_preference(
                producer,
                Arc::clone(&capturing),
                preferred_input_device.as_deref(),
            )
            .and_then(|audio| {
                let source =
                    RingFrameSource::new(consumer, audio.sample_rate, audio.fault_flag())?;
                Ok((audio, source))
            });
            let (audio, source) = match opened {
                Ok(parts) => {
                    let _ = open_tx.send(Ok(parts.0.sample_rate));
                    parts
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };

            let result = capture::run(CaptureContext {
                source: Box::new(source),
                segmenter,
                words: words_tx,
                capturing,
                activity_tx,
                status: status.clone(),
                diagnostics,
            });
            audio.stop();
            report_capture_result(&status, result);
            // Stream drops here, releasing the device on this thread.
            drop(audio);
        });

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => {
                self.track(capture_task);
                self.spawn_consumer(words_rx);
                info!(sample_rate, "engine started, listening");
                Ok(())
            }
            Ok(Err(e)) => {
                self.abort_session(Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                self.abort_session(Some("capture failed to start".into()));
                Err(WordrecError::Other(anyhow::anyhow!(
                    "capture task died unexpectedly"
                )))
            }
        }
    }

    /// Start a session fed by `source` instead of a device.
    ///
    /// The session ends by itself once the source is exhausted.
    pub fn start_with_source(&self, source: Box<dyn FrameSource>) -> Result<()> {
        self.begin_session()?;

        let (words_tx, words_rx) = create_word_queue(self.config.word_queue_capacity);
        let ctx = CaptureContext {
            source,
            segmenter: segmenter_for(self.config.capture_mode, &self.config.segmenter),
            words: words_tx,
            capturing: Arc::clone(&self.capturing),
            activity_tx: self.activity_tx.clone(),
            status: self.status.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let status = self.status.clone();
        let capture_task = tokio::task::spawn_blocking(move || {
            report_capture_result(&status, capture::run(ctx));
        });

        self.track(capture_task);
        self.spawn_consumer(words_rx);
        info!("engine started on frame source");
        Ok(())
    }

    /// Stop capturing. Words already queued are still recognised.
    ///
    /// # Errors
    /// `NotRunning` if no session is active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(WordrecError::NotRunning);
        }
        self.capturing.store(false, Ordering::SeqCst);
        if self.status.get() != EngineStatus::Error {
            self.status.set(EngineStatus::Stopping, None);
        }
        info!("engine stop requested");
        Ok(())
    }

    /// Wait for the current session's threads to finish.
    pub async fn wait_idle(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("engine task failed: {e}");
            }
        }
    }

    /// A session is capturing or draining.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to recognition results.
    pub fn subscribe_recognitions(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.recognition_tx.subscribe()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status.subscribe()
    }

    /// Subscribe to per-frame energy and voicing.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<FrameActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of session counters.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn begin_session(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WordrecError::AlreadyRunning);
        }
        self.tasks.lock().retain(|task| !task.is_finished());
        self.diagnostics.reset();
        self.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn abort_session(&self, detail: Option<String>) {
        self.capturing.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.status.set(EngineStatus::Error, detail);
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// The consumer owns the end of the session: once it has drained the
    /// queue the engine is idle again.
    fn spawn_consumer(&self, words: WordReceiver) {
        let ctx = pipeline::PipelineContext {
            recognizer: self.recognizer.clone(),
            words,
            recognition_tx: self.recognition_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let running = Arc::clone(&self.running);
        let status = self.status.clone();

        let task = tokio::task::spawn_blocking(move || {
            pipeline::run(ctx);
            if status.get() != EngineStatus::Error {
                status.set(EngineStatus::Idle, None);
            }
            running.store(false, Ordering::SeqCst);
        });
        self.track(task);
    }
}

fn report_capture_result(status: &StatusReporter, result: Result<()>) {
    if let Err(e) = result {
        error!("capture failed: {e}");
        status.set(EngineStatus::Error, Some(e.to_string()));
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("status", &self.status.get())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
