//! Events broadcast by the engine.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `RecognitionEvent` | `Engine::subscribe_recognitions` |
//! | `EngineStatusEvent` | `Engine::subscribe_status` |
//! | `FrameActivityEvent` | `Engine::subscribe_activity` |

use serde::{Deserialize, Serialize};

use crate::recognizer::Recognition;

// ---------------------------------------------------------------------------
// Recognition events
// ---------------------------------------------------------------------------

/// One isolated word has been scored (or failed to score).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Position of the word within the capture session, from 0.
    pub word_index: u64,
    pub duration_ms: u64,
    /// Present when recognition succeeded.
    pub recognition: Option<Recognition>,
    /// Present when recognition failed; the pipeline keeps going.
    pub error: Option<String>,
}

impl RecognitionEvent {
    /// The recognised label, if any.
    pub fn word(&self) -> Option<&str> {
        self.recognition.as_ref().map(|r| r.word.as_str())
    }
}

// ---------------------------------------------------------------------------
// Frame activity events
// ---------------------------------------------------------------------------

/// Emitted for every 100 ms frame the segmenter consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameActivityEvent {
    pub seq: u64,
    /// Mean squared sample value of the frame.
    pub energy: f64,
    /// The segmenter is inside a word after this frame.
    pub is_voiced: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message or noise warning).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created, or a session ended and drained.
    Idle,
    /// Recognizer preparing.
    WarmingUp,
    /// Measuring the noise floor.
    Calibrating,
    /// Capturing and recognising.
    Listening,
    /// Stop requested; queued words are still being recognised.
    Stopping,
    /// Capture failed. The engine may be restarted.
    Error,
}
