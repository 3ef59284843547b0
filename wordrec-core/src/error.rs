use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by wordrec-core.
#[derive(Debug, Error)]
pub enum WordrecError {
    /// Unsupported device, sample format, or invalid parameter combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient training data: {available} points for a codebook of size {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("parse error in {source_name} (line {line}): {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("observation symbol {symbol} outside alphabet of size {num_symbols}")]
    InvalidObservation { symbol: usize, num_symbols: usize },

    #[error("empty observation sequence")]
    EmptyObservation,

    #[error("no recognition model available: {0}")]
    NoModel(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("model file not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WordrecError {
    pub(crate) fn parse(source_name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        WordrecError::Parse {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WordrecError>;
