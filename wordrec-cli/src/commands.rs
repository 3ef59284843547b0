//! Subcommand handlers.
//!
//! Human-readable output goes to stdout; `--json` switches every command to
//! one JSON document (or one JSON line per event for streaming commands).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{info, warn};
use wordrec_core::{
    audio::{device, wav},
    capture::collect_words,
    recognizer::LoadReport,
    segment::segmenter_for,
    store::CodebookStore,
    training, Codebook, Corpus, Dictionary, Engine, EngineStatus, FeatureExtractor, FrameSource,
    Mfcc, RecognitionEngine, RecognitionEvent, RecognizerHandle, SampleFrameSource, ScoringMode,
};

use crate::settings::{save_settings, CliSettings};

const SESSION_POLL: Duration = Duration::from_millis(20);

/// List capture devices, default first.
pub fn devices(json: bool) -> anyhow::Result<()> {
    let devices = device::list_input_devices().context("enumerate input devices")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("no input devices found");
    }
    for d in devices {
        let marker = if d.is_default { " (default)" } else { "" };
        println!("{}{marker}", d.name);
    }
    Ok(())
}

/// Split a recording into isolated words and write each one as a WAV.
pub fn segment(
    settings: &CliSettings,
    input: &Path,
    out_dir: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let mut source = SampleFrameSource::from_wav(input)
        .with_context(|| format!("read {}", input.display()))?;
    let mut segmenter = segmenter_for(settings.capture_mode, &settings.segmenter_config());
    let words = collect_words(&mut source, segmenter.as_mut())?;

    if let Some(calibration) = segmenter.calibration().filter(|c| c.too_noisy) {
        warn!(
            threshold = calibration.threshold,
            "recording too noisy for reliable endpoint detection"
        );
    }

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("word");
    let mut written = Vec::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        let path = out_dir.join(format!("{stem}_{i:03}.wav"));
        wav::write_wav(&path, word.samples())
            .with_context(|| format!("write {}", path.display()))?;
        written.push(json!({
            "path": path,
            "durationSecs": word.duration_secs(),
        }));
        if !json {
            println!("{}  {:.2}s", path.display(), word.duration_secs());
        }
    }

    info!(input = %input.display(), words = words.len(), "segmentation finished");
    if json {
        println!("{}", serde_json::to_string_pretty(&json!({ "words": written }))?);
    } else if words.is_empty() {
        println!("no words detected in {}", input.display());
    }
    Ok(())
}

/// Train one model per word from `<samples>/<word>/*.wav`.
pub fn train(
    settings: &CliSettings,
    samples: &Path,
    words_file: Option<&Path>,
    db: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let corpus = Corpus::load(samples)
        .with_context(|| format!("load training corpus {}", samples.display()))?;
    if corpus.is_empty() {
        bail!("no recordings found under {}", samples.display());
    }
    let words = match words_file {
        Some(path) => Dictionary::load(path)
            .with_context(|| format!("load word list {}", path.display()))?,
        None => Dictionary::from_words(corpus.words()),
    };
    info!(
        words = words.len(),
        utterances = corpus.total_utterances(),
        mode = %settings.scoring_mode,
        "training vocabulary"
    );

    let layout = settings.model_layout();
    let extractor = Mfcc::default();
    let report = training::train_vocabulary(
        &extractor,
        &corpus,
        &words,
        &layout,
        &settings.training_config(),
    )?;

    let dictionary_path = settings.dictionary_path();
    report
        .dictionary()
        .save(&dictionary_path)
        .with_context(|| format!("write dictionary {}", dictionary_path.display()))?;

    if let Some(db) = db {
        export_codebooks(settings, &report.dictionary(), db)?;
    }

    if json {
        let trained: Vec<_> = report
            .trained
            .iter()
            .map(|t| json!({ "word": t.word, "utterances": t.utterances, "score": t.score }))
            .collect();
        let failures: Vec<_> = report
            .failures
            .iter()
            .map(|f| json!({ "word": f.word, "reason": f.reason }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "mode": settings.scoring_mode,
                "dictionary": dictionary_path,
                "trained": trained,
                "failures": failures,
            }))?
        );
    } else {
        for t in &report.trained {
            println!(
                "trained  {:<20} {:>3} utterances  score {:.3}",
                t.word, t.utterances, t.score
            );
        }
        for f in &report.failures {
            println!("FAILED   {:<20} {}", f.word, f.reason);
        }
        println!("dictionary written to {}", dictionary_path.display());
    }

    if report.trained.is_empty() {
        bail!("no word could be trained");
    }
    Ok(())
}

/// Copy trained codebooks into a SQLite store, one table per word.
fn export_codebooks(settings: &CliSettings, words: &Dictionary, db: &Path) -> anyhow::Result<()> {
    let layout = settings.model_layout();
    let mut store =
        CodebookStore::open(db).with_context(|| format!("open codebook store {}", db.display()))?;
    match settings.scoring_mode {
        ScoringMode::Vq => {
            for word in words.words() {
                let codebook = Codebook::load(&layout.codebook_path(word))?;
                store.save_codebook(word, &codebook)?;
            }
        }
        ScoringMode::Hmm => {
            let shared = Codebook::load(&layout.shared_codebook_path())?;
            store.save_codebook("shared", &shared)?;
        }
    }
    info!(db = %db.display(), "codebooks exported");
    Ok(())
}

fn load_recognizer(settings: &CliSettings) -> anyhow::Result<RecognitionEngine> {
    let dictionary_path = settings.dictionary_path();
    let dictionary = Dictionary::load(&dictionary_path)
        .with_context(|| format!("load dictionary {}", dictionary_path.display()))?;
    let extractor: Arc<dyn FeatureExtractor> = Arc::new(Mfcc::default());
    let (engine, report) = RecognitionEngine::load(
        settings.scoring_mode,
        extractor,
        &dictionary,
        &settings.model_layout(),
    )
    .context("load recognition models")?;
    warn_load_failures(&report);
    if engine.is_empty() {
        bail!(
            "no model could be loaded for any of the {} dictionary words",
            dictionary.len()
        );
    }
    Ok(engine)
}

fn warn_load_failures(report: &LoadReport) {
    for failure in &report.failures {
        eprintln!("warning: '{}' unavailable: {}", failure.word, failure.reason);
    }
}

/// Recognise WAV files: each file as one word, or split into words first.
pub async fn recognize(
    settings: &CliSettings,
    files: &[PathBuf],
    split: bool,
    json: bool,
) -> anyhow::Result<()> {
    let recognizer = load_recognizer(settings)?;
    if !split {
        for file in files {
            let samples = wav::read_wav(file).with_context(|| format!("read {}", file.display()))?;
            match recognizer.recognize_samples(&samples) {
                Ok(recognition) if json => println!(
                    "{}",
                    serde_json::to_string(&json!({ "file": file, "recognition": recognition }))?
                ),
                Ok(recognition) => println!(
                    "{}: {} (score {:.3})",
                    file.display(),
                    recognition.word,
                    recognition.score
                ),
                Err(e) if json => println!(
                    "{}",
                    serde_json::to_string(&json!({ "file": file, "error": e.to_string() }))?
                ),
                Err(e) => println!("{}: error: {e}", file.display()),
            }
        }
        return Ok(());
    }

    let engine = Engine::new(settings.engine_config(), RecognizerHandle::new(recognizer));
    for file in files {
        let source = SampleFrameSource::from_wav(file)
            .with_context(|| format!("read {}", file.display()))?;
        let events = run_source_session(&engine, Box::new(source)).await?;

        if !json {
            println!("{}:", file.display());
        }
        for event in &events {
            print_recognition(event, json)?;
        }
        if engine.status() == EngineStatus::Error {
            bail!("recognition session for {} failed", file.display());
        }
    }
    Ok(())
}

/// Run one source session, collecting its recognitions as they arrive.
async fn run_source_session(
    engine: &Engine,
    source: Box<dyn FrameSource>,
) -> anyhow::Result<Vec<RecognitionEvent>> {
    let mut rx = engine.subscribe_recognitions();
    engine.start_with_source(source)?;

    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(SESSION_POLL, rx.recv()).await {
            Ok(Ok(event)) => events.push(event),
            Ok(Err(RecvError::Lagged(n))) => warn!("recognition receiver lagged by {n} events"),
            Ok(Err(RecvError::Closed)) => break,
            Err(_) if !engine.is_running() => break,
            Err(_) => {}
        }
    }
    engine.wait_idle().await;
    // The last events can land between the timeout and the running check.
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(n)) => warn!("recognition receiver lagged by {n} events"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    Ok(events)
}

/// Live recognition from the microphone until Ctrl-C or `duration`.
pub async fn listen(
    settings: &CliSettings,
    device: Option<String>,
    duration: Option<Duration>,
    json: bool,
) -> anyhow::Result<()> {
    let recognizer = load_recognizer(settings)?;
    let engine = Engine::new(settings.engine_config(), RecognizerHandle::new(recognizer));
    engine.warm_up().context("warm up recognizer")?;

    let mut recognitions = engine.subscribe_recognitions();
    let mut status = engine.subscribe_status();
    let device = device.or_else(|| settings.preferred_input_device.clone());
    engine
        .start_with_device(device)
        .context("start audio capture")?;
    if !json {
        eprintln!("listening; press Ctrl-C to stop");
    }

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            event = recognitions.recv() => match event {
                Ok(event) => print_recognition(&event, json)?,
                Err(RecvError::Lagged(n)) => warn!("recognition receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            },
            event = status.recv() => match event {
                Ok(event) => {
                    if let Some(detail) = &event.detail {
                        eprintln!("[{:?}] {detail}", event.status);
                    }
                    if event.status == EngineStatus::Error || event.status == EngineStatus::Idle {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("status receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if engine.is_running() {
        if let Err(e) = engine.stop() {
            warn!("stop: {e}");
        }
    }
    engine.wait_idle().await;
    // Words queued before the stop are still recognised.
    while let Ok(event) = recognitions.try_recv() {
        print_recognition(&event, json)?;
    }

    let diag = engine.diagnostics_snapshot();
    info!(
        frames_in = diag.frames_in,
        words_emitted = diag.words_emitted,
        words_recognized = diag.words_recognized,
        recognition_errors = diag.recognition_errors,
        "listen session finished"
    );
    if engine.status() == EngineStatus::Error {
        bail!("capture session ended with an error");
    }
    Ok(())
}

fn print_recognition(event: &RecognitionEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match (&event.recognition, &event.error) {
        (Some(r), _) => {
            let runner_up = r
                .ranking
                .get(1)
                .map(|c| format!("  (next: {} {:.3})", c.word, c.score))
                .unwrap_or_default();
            println!(
                "  #{:<3} {:<20} {:.3}  {}ms{runner_up}",
                event.word_index, r.word, r.score, event.duration_ms
            );
        }
        (None, Some(err)) => println!("  #{:<3} error: {err}", event.word_index),
        (None, None) => println!("  #{:<3} (no result)", event.word_index),
    }
    Ok(())
}

/// Show the effective settings, or write them out with `init`.
pub fn config(
    settings_path: &Path,
    settings: &CliSettings,
    init: bool,
    json: bool,
) -> anyhow::Result<()> {
    if init {
        save_settings(settings_path, settings)
            .with_context(|| format!("write settings {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "path": settings_path, "settings": settings }))?
        );
    } else {
        println!("# {}", settings_path.display());
        println!("{}", serde_json::to_string_pretty(settings)?);
    }
    Ok(())
}
