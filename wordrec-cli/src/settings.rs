//! Persistent CLI settings (JSON file in the user config directory).
//!
//! Command-line flags override individual fields for one invocation; the
//! file only changes through `wordrec config --init`/`--set`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wordrec_core::{
    hmm::HmmTrainingConfig, CaptureMode, EngineConfig, LbgConfig, ModelLayout, ScoringMode,
    SegmenterConfig, TrainingConfig, TrainingPolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CliSettings {
    pub models_dir: PathBuf,
    /// Vocabulary file; `<modelsDir>/dictionary.txt` when unset.
    pub dictionary_path: Option<PathBuf>,
    /// Shared codebook for HMM scoring; `<modelsDir>/shared.vq` when unset.
    pub shared_codebook_path: Option<PathBuf>,
    pub scoring_mode: ScoringMode,
    pub capture_mode: CaptureMode,
    pub preferred_input_device: Option<String>,
    pub codebook_size: usize,
    pub shared_codebook_size: usize,
    pub hmm_states: usize,
    pub training_rounds: usize,
    pub calibration_frames: usize,
    pub energy_multiplier: f64,
    pub noise_ceiling: f64,
    pub max_pause_frames: usize,
    /// Skip calibration and use this frame energy threshold.
    pub fixed_threshold: Option<f64>,
    pub word_queue_capacity: usize,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            dictionary_path: None,
            shared_codebook_path: None,
            scoring_mode: ScoringMode::Hmm,
            capture_mode: CaptureMode::Continuous,
            preferred_input_device: None,
            codebook_size: 256,
            shared_codebook_size: 256,
            hmm_states: 5,
            training_rounds: 25,
            calibration_frames: 3,
            energy_multiplier: 36.0,
            noise_ceiling: 1_070_000_000.0,
            max_pause_frames: 4,
            fixed_threshold: None,
            word_queue_capacity: 16,
        }
    }
}

impl CliSettings {
    pub fn normalize(&mut self) {
        self.codebook_size = normalize_codebook_size(self.codebook_size);
        self.shared_codebook_size = normalize_codebook_size(self.shared_codebook_size);
        self.hmm_states = self.hmm_states.clamp(1, 64);
        self.training_rounds = self.training_rounds.clamp(1, 1_000);
        self.calibration_frames = self.calibration_frames.clamp(1, 50);
        if !self.energy_multiplier.is_finite() {
            self.energy_multiplier = 36.0;
        }
        self.energy_multiplier = self.energy_multiplier.clamp(1.0, 10_000.0);
        if !(self.noise_ceiling.is_finite() && self.noise_ceiling > 0.0) {
            self.noise_ceiling = 1_070_000_000.0;
        }
        self.max_pause_frames = self.max_pause_frames.min(50);
        self.fixed_threshold = self
            .fixed_threshold
            .filter(|t| t.is_finite() && *t > 0.0);
        self.word_queue_capacity = self.word_queue_capacity.clamp(1, 256);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn dictionary_path(&self) -> PathBuf {
        self.dictionary_path
            .clone()
            .unwrap_or_else(|| self.models_dir.join("dictionary.txt"))
    }

    pub fn model_layout(&self) -> ModelLayout {
        let layout = ModelLayout::new(&self.models_dir);
        match &self.shared_codebook_path {
            Some(path) => layout.with_shared_codebook(path),
            None => layout,
        }
    }

    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            calibration_frames: self.calibration_frames,
            energy_multiplier: self.energy_multiplier,
            noise_ceiling: self.noise_ceiling,
            max_pause_frames: self.max_pause_frames,
            fixed_threshold: self.fixed_threshold,
            ..SegmenterConfig::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            capture_mode: self.capture_mode,
            segmenter: self.segmenter_config(),
            word_queue_capacity: self.word_queue_capacity,
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            mode: self.scoring_mode,
            codebook_size: self.codebook_size,
            shared_codebook_size: self.shared_codebook_size,
            lbg: LbgConfig::default(),
            hmm: HmmTrainingConfig {
                num_states: self.hmm_states,
                policy: TrainingPolicy::Fixed(self.training_rounds),
                seed: None,
            },
        }
    }
}

/// LBG only builds power-of-two codebooks: round up, within [1, 4096].
pub fn normalize_codebook_size(raw: usize) -> usize {
    raw.clamp(1, 4_096).next_power_of_two()
}

pub fn parse_scoring_mode(raw: &str) -> Result<ScoringMode, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "vq" | "distortion" => Ok(ScoringMode::Vq),
        "hmm" | "markov" => Ok(ScoringMode::Hmm),
        other => Err(format!("unknown scoring mode '{other}' (expected vq or hmm)")),
    }
}

pub fn parse_capture_mode(raw: &str) -> Result<CaptureMode, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "continuous" | "endpoint" => Ok(CaptureMode::Continuous),
        "discrete" | "single" => Ok(CaptureMode::Discrete),
        other => Err(format!(
            "unknown capture mode '{other}' (expected continuous or discrete)"
        )),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wordrec")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("wordrec")
            .join("settings.json")
    }
}

/// Missing or malformed files fall back to defaults.
pub fn load_settings(path: &Path) -> CliSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<CliSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &CliSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json"));
        assert_eq!(settings, CliSettings::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "scoringMode": "vq", "codebookSize": 100 }"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.scoring_mode, ScoringMode::Vq);
        assert_eq!(settings.codebook_size, 128);
        assert_eq!(settings.hmm_states, 5);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), CliSettings::default());
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = CliSettings {
            codebook_size: 0,
            hmm_states: 0,
            energy_multiplier: f64::NAN,
            fixed_threshold: Some(-5.0),
            preferred_input_device: Some("   ".into()),
            word_queue_capacity: 0,
            ..CliSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.codebook_size, 1);
        assert_eq!(settings.hmm_states, 1);
        assert_eq!(settings.energy_multiplier, 36.0);
        assert_eq!(settings.fixed_threshold, None);
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.word_queue_capacity, 1);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = CliSettings {
            models_dir: PathBuf::from("/srv/models"),
            capture_mode: CaptureMode::Discrete,
            fixed_threshold: Some(2.5e6),
            ..CliSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"captureMode\": \"discrete\""));
    }

    #[test]
    fn derived_paths_follow_models_dir() {
        let settings = CliSettings {
            models_dir: PathBuf::from("m"),
            ..CliSettings::default()
        };
        assert_eq!(settings.dictionary_path(), PathBuf::from("m/dictionary.txt"));
        assert_eq!(
            settings.model_layout().shared_codebook_path(),
            PathBuf::from("m/shared.vq")
        );
    }

    #[test]
    fn mode_parsers_accept_aliases() {
        assert_eq!(parse_scoring_mode("VQ"), Ok(ScoringMode::Vq));
        assert_eq!(parse_capture_mode("single"), Ok(CaptureMode::Discrete));
        assert!(parse_scoring_mode("dtw").is_err());
    }
}
