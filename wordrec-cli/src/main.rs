//! `wordrec`: train isolated-word models and recognise words from WAV files
//! or a live microphone.

mod commands;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::debug;
use wordrec_core::{CaptureMode, ScoringMode};

use settings::{
    default_settings_path, load_settings, normalize_codebook_size, parse_capture_mode,
    parse_scoring_mode, CliSettings,
};

#[derive(Parser)]
#[command(author, version, about = "Isolated-word speech recognition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, env = "WORDREC_SETTINGS")]
    settings: Option<PathBuf>,

    /// Directory holding codebooks, HMMs and the dictionary
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    /// Dictionary file (defaults to <models>/dictionary.txt)
    #[arg(long, global = true)]
    dictionary: Option<PathBuf>,

    /// Scoring: vq (codebook distortion) or hmm (shared codebook + Markov models)
    #[arg(long, global = true, value_parser = parse_scoring_mode)]
    mode: Option<ScoringMode>,

    /// Capture: continuous (endpoint detection) or discrete (one word per capture)
    #[arg(long, global = true, value_parser = parse_capture_mode)]
    capture: Option<CaptureMode>,

    /// Fixed frame energy threshold instead of noise calibration
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio input devices
    Devices,

    /// Split a recording into one WAV per detected word
    Segment {
        /// Input WAV file
        input: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = "words")]
        out: PathBuf,
    },

    /// Train word models from <samples>/<word>/*.wav
    Train {
        /// Corpus root, one subdirectory per word
        samples: PathBuf,
        /// Restrict training to the words listed in this file
        #[arg(long)]
        words: Option<PathBuf>,
        /// Also store the trained codebooks in this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,
        /// Codebook size (rounded up to a power of two)
        #[arg(long)]
        codebook_size: Option<usize>,
        /// HMM states per word
        #[arg(long)]
        states: Option<usize>,
        /// Baum-Welch re-estimation rounds
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Recognise WAV files
    Recognize {
        /// Input WAV files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Split each file into words before recognising
        #[arg(long)]
        split: bool,
    },

    /// Recognise words from the microphone until Ctrl-C
    Listen {
        /// Input device name (defaults to the preferred, then the system default)
        #[arg(short, long)]
        device: Option<String>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Show the effective settings
    Config {
        /// Write the effective settings to the settings file
        #[arg(long)]
        init: bool,
    },
}

impl Cli {
    /// File settings with global flags applied on top.
    fn effective_settings(&self, mut settings: CliSettings) -> CliSettings {
        if let Some(models) = &self.models {
            settings.models_dir = models.clone();
        }
        if let Some(dictionary) = &self.dictionary {
            settings.dictionary_path = Some(dictionary.clone());
        }
        if let Some(mode) = self.mode {
            settings.scoring_mode = mode;
        }
        if let Some(capture) = self.capture {
            settings.capture_mode = capture;
        }
        if self.threshold.is_some() {
            settings.fixed_threshold = self.threshold;
        }
        if let Commands::Train {
            codebook_size,
            states,
            rounds,
            ..
        } = &self.command
        {
            if let Some(size) = codebook_size {
                settings.codebook_size = normalize_codebook_size(*size);
                settings.shared_codebook_size = settings.codebook_size;
            }
            if let Some(states) = states {
                settings.hmm_states = *states;
            }
            if let Some(rounds) = rounds {
                settings.training_rounds = *rounds;
            }
        }
        settings.normalize();
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wordrec=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = cli.effective_settings(load_settings(&settings_path));
    debug!(path = %settings_path.display(), ?settings, "settings resolved");

    match &cli.command {
        Commands::Devices => commands::devices(cli.json),
        Commands::Segment { input, out } => commands::segment(&settings, input, out, cli.json),
        Commands::Train {
            samples, words, db, ..
        } => commands::train(&settings, samples, words.as_deref(), db.as_deref(), cli.json),
        Commands::Recognize { files, split } => {
            commands::recognize(&settings, files, *split, cli.json).await
        }
        Commands::Listen { device, seconds } => {
            commands::listen(
                &settings,
                device.clone(),
                seconds.map(Duration::from_secs),
                cli.json,
            )
            .await
        }
        Commands::Config { init } => commands::config(&settings_path, &settings, *init, cli.json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_recognize_with_global_flags() {
        let cli = Cli::try_parse_from([
            "wordrec", "recognize", "a.wav", "b.wav", "--split", "--mode", "vq", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.mode, Some(ScoringMode::Vq));
        match cli.command {
            Commands::Recognize { files, split } => {
                assert_eq!(files.len(), 2);
                assert!(split);
            }
            _ => panic!("expected recognize"),
        }
    }

    #[test]
    fn recognize_requires_a_file() {
        assert!(Cli::try_parse_from(["wordrec", "recognize"]).is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["wordrec", "devices", "--mode", "dtw"]).is_err());
    }

    #[test]
    fn train_flags_override_file_settings() {
        let cli = Cli::try_parse_from([
            "wordrec",
            "train",
            "samples",
            "--codebook-size",
            "100",
            "--states",
            "7",
            "--models",
            "out",
            "--capture",
            "discrete",
        ])
        .unwrap();
        let settings = cli.effective_settings(CliSettings::default());
        assert_eq!(settings.codebook_size, 128);
        assert_eq!(settings.shared_codebook_size, 128);
        assert_eq!(settings.hmm_states, 7);
        assert_eq!(settings.models_dir, PathBuf::from("out"));
        assert_eq!(settings.capture_mode, CaptureMode::Discrete);
    }

    #[test]
    fn listen_parses_device_and_duration() {
        let cli = Cli::try_parse_from(["wordrec", "listen", "-d", "USB Mic", "--seconds", "10"])
            .unwrap();
        match cli.command {
            Commands::Listen { device, seconds } => {
                assert_eq!(device.as_deref(), Some("USB Mic"));
                assert_eq!(seconds, Some(10));
            }
            _ => panic!("expected listen"),
        }
    }
}
