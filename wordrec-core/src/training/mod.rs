//! Model training from labelled recordings.
//!
//! ```text
//! utterances ──FeatureExtractor──► feature vectors ──LBG──► Codebook
//!                                        │
//!                                  quantize (shared codebook)
//!                                        │
//!                                 symbol sequences ──Baum-Welch──► MarkovModel
//! ```
//!
//! Every vocabulary word is trained independently: a failure is recorded in
//! the `VocabularyReport` and the remaining words still train.

pub mod corpus;

pub use corpus::Corpus;

use tracing::{info, info_span, warn};

use crate::error::{Result, WordrecError};
use crate::features::FeatureExtractor;
use crate::hmm::{HmmTrainingConfig, MarkovModel, TrainingReport};
use crate::recognizer::{Dictionary, ModelLayout, ScoringMode};
use crate::vq::{Codebook, FeatureVector, LbgConfig, DEFAULT_CODEBOOK_SIZE};

/// Everything `train_vocabulary` needs besides the data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub mode: ScoringMode,
    /// Centroids per word codebook (VQ mode). Default: 256.
    pub codebook_size: usize,
    /// Centroids in the shared codebook (HMM mode). Default: 256.
    pub shared_codebook_size: usize,
    pub lbg: LbgConfig,
    pub hmm: HmmTrainingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: ScoringMode::default(),
            codebook_size: DEFAULT_CODEBOOK_SIZE,
            shared_codebook_size: DEFAULT_CODEBOOK_SIZE,
            lbg: LbgConfig::default(),
            hmm: HmmTrainingConfig::default(),
        }
    }
}

/// A word whose model was written.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedWord {
    pub word: String,
    pub utterances: usize,
    /// Final mean log-likelihood (HMM) or total distortion (VQ).
    pub score: f64,
}

/// A word that could not be trained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingFailure {
    pub word: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VocabularyReport {
    pub trained: Vec<TrainedWord>,
    pub failures: Vec<TrainingFailure>,
}

impl VocabularyReport {
    fn fail(&mut self, word: &str, reason: impl std::fmt::Display) {
        let reason = reason.to_string();
        warn!(word, %reason, "word not trained");
        self.failures.push(TrainingFailure {
            word: word.to_string(),
            reason,
        });
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Dictionary of the successfully trained words.
    pub fn dictionary(&self) -> Dictionary {
        Dictionary::from_words(self.trained.iter().map(|t| t.word.as_str()))
    }
}

/// Concatenate the feature vectors of every buffer, in order.
pub fn collect_features(
    extractor: &dyn FeatureExtractor,
    buffers: &[Vec<i16>],
) -> Result<Vec<FeatureVector>> {
    let mut out = Vec::new();
    for samples in buffers {
        out.extend(extractor.extract(samples)?);
    }
    Ok(out)
}

/// One word's VQ codebook.
pub fn train_word_codebook(
    extractor: &dyn FeatureExtractor,
    utterances: &[Vec<i16>],
    size: usize,
    lbg: &LbgConfig,
) -> Result<Codebook> {
    let features = collect_features(extractor, utterances)?;
    Codebook::train_with(&features, size, lbg)
}

/// Codebook over every utterance of every word.
pub fn train_shared_codebook(
    extractor: &dyn FeatureExtractor,
    corpus: &Corpus,
    size: usize,
    lbg: &LbgConfig,
) -> Result<Codebook> {
    let mut features = Vec::new();
    for (_, utterances) in corpus.iter() {
        features.extend(collect_features(extractor, utterances)?);
    }
    info!(points = features.len(), size, "training shared codebook");
    Codebook::train_with(&features, size, lbg)
}

/// One word's HMM, with one observation sequence per utterance.
pub fn train_word_model(
    extractor: &dyn FeatureExtractor,
    codebook: &Codebook,
    utterances: &[Vec<i16>],
    config: &HmmTrainingConfig,
) -> Result<(MarkovModel, TrainingReport)> {
    if utterances.is_empty() {
        return Err(WordrecError::InsufficientData {
            available: 0,
            required: 1,
        });
    }
    let sequences = utterances
        .iter()
        .map(|samples| codebook.quantize(&extractor.extract(samples)?))
        .collect::<Result<Vec<_>>>()?;

    let mut model = config.initial_model(codebook.len())?;
    let report = model.train(&sequences, config.policy)?;
    Ok((model, report))
}

/// Train and save a model for each word in `words`, using `corpus` samples.
///
/// Only a failure of the shared codebook (HMM mode) aborts the run.
pub fn train_vocabulary(
    extractor: &dyn FeatureExtractor,
    corpus: &Corpus,
    words: &Dictionary,
    layout: &ModelLayout,
    config: &TrainingConfig,
) -> Result<VocabularyReport> {
    let mut report = VocabularyReport::default();

    let shared = match config.mode {
        ScoringMode::Vq => None,
        ScoringMode::Hmm => {
            let shared =
                train_shared_codebook(extractor, corpus, config.shared_codebook_size, &config.lbg)?;
            shared.save(&layout.shared_codebook_path())?;
            Some(shared)
        }
    };

    for word in words.words() {
        let span = info_span!("train", word = %word);
        let _enter = span.enter();

        let Some(utterances) = corpus.utterances(word).filter(|u| !u.is_empty()) else {
            report.fail(word, "no recordings in corpus");
            continue;
        };

        let outcome = match &shared {
            None => train_word_codebook(extractor, utterances, config.codebook_size, &config.lbg)
                .and_then(|codebook| {
                    codebook.save(&layout.codebook_path(word))?;
                    Ok(codebook.total_distortion())
                }),
            Some(shared) => train_word_model(extractor, shared, utterances, &config.hmm).and_then(
                |(model, training)| {
                    model.save(&layout.hmm_path(word))?;
                    Ok(training.final_log_likelihood)
                },
            ),
        };

        match outcome {
            Ok(score) => {
                info!(utterances = utterances.len(), score, "word trained");
                report.trained.push(TrainedWord {
                    word: word.clone(),
                    utterances: utterances.len(),
                    score,
                });
            }
            Err(e) => report.fail(word, e),
        }
    }

    info!(
        mode = %config.mode,
        trained = report.trained.len(),
        failed = report.failures.len(),
        "vocabulary training finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::TrainingPolicy;

    /// One 2-d vector per 4 samples: (mean, first sample).
    struct BlockExtractor;

    impl FeatureExtractor for BlockExtractor {
        fn dimension(&self) -> usize {
            2
        }

        fn extract(&self, samples: &[i16]) -> Result<Vec<FeatureVector>> {
            if samples.is_empty() {
                return Err(WordrecError::EmptyObservation);
            }
            Ok(samples
                .chunks(4)
                .map(|block| {
                    let mean = block.iter().map(|&s| s as f64).sum::<f64>() / block.len() as f64;
                    FeatureVector::new(vec![mean, block[0] as f64])
                })
                .collect())
        }
    }

    fn utterance(base: i16) -> Vec<i16> {
        (0..64).map(|i| base + (i % 8) as i16).collect()
    }

    fn small_config(mode: ScoringMode) -> TrainingConfig {
        TrainingConfig {
            mode,
            codebook_size: 4,
            shared_codebook_size: 8,
            lbg: LbgConfig::default(),
            hmm: HmmTrainingConfig {
                num_states: 3,
                policy: TrainingPolicy::Fixed(5),
                seed: Some(7),
            },
        }
    }

    #[test]
    fn collect_features_concatenates_buffers() {
        let features = collect_features(&BlockExtractor, &[vec![1; 8], vec![2; 4]]).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[2].coords(), &[2.0, 2.0]);
    }

    #[test]
    fn word_model_alphabet_matches_codebook() {
        let utterances = vec![utterance(0), utterance(100)];
        let codebook =
            train_word_codebook(&BlockExtractor, &utterances, 4, &LbgConfig::default()).unwrap();
        let (model, report) = train_word_model(
            &BlockExtractor,
            &codebook,
            &utterances,
            &small_config(ScoringMode::Hmm).hmm,
        )
        .unwrap();
        assert_eq!(model.num_symbols(), 4);
        assert_eq!(model.num_states(), 3);
        assert_eq!(report.rounds, 5);
        assert!(report.final_log_likelihood.is_finite());
    }

    #[test]
    fn word_model_needs_recordings() {
        let codebook = Codebook::from_positions(vec![FeatureVector::zeros(2)]).unwrap();
        let result = train_word_model(&BlockExtractor, &codebook, &[], &HmmTrainingConfig::default());
        assert!(matches!(result, Err(WordrecError::InsufficientData { .. })));
    }

    #[test]
    fn vq_vocabulary_failure_is_isolated_to_one_word() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        let corpus = Corpus::from_entries([
            ("go".to_string(), vec![utterance(0), utterance(50)]),
            // 4 samples -> 1 feature vector, too few for 4 centroids.
            ("tiny".to_string(), vec![vec![1, 2, 3, 4]]),
        ]);
        let words = Dictionary::from_words(["go", "tiny", "absent"]);

        let report = train_vocabulary(
            &BlockExtractor,
            &corpus,
            &words,
            &layout,
            &small_config(ScoringMode::Vq),
        )
        .unwrap();

        assert_eq!(report.dictionary().words(), &["go"]);
        let failed: Vec<_> = report.failures.iter().map(|f| f.word.as_str()).collect();
        assert_eq!(failed, vec!["tiny", "absent"]);
        assert!(report.failures[0].reason.contains("insufficient"));
        assert!(layout.codebook_path("go").exists());
        assert!(!layout.codebook_path("tiny").exists());
    }

    #[test]
    fn hmm_vocabulary_writes_shared_codebook_and_models() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        let corpus = Corpus::from_entries([
            ("low".to_string(), vec![utterance(0), utterance(10)]),
            ("high".to_string(), vec![utterance(1_000), utterance(1_010)]),
        ]);
        let words = Dictionary::from_words(["low", "high"]);

        let report = train_vocabulary(
            &BlockExtractor,
            &corpus,
            &words,
            &layout,
            &small_config(ScoringMode::Hmm),
        )
        .unwrap();

        assert!(report.is_complete());
        assert_eq!(Codebook::load(&layout.shared_codebook_path()).unwrap().len(), 8);
        let model = MarkovModel::load(&layout.hmm_path("high")).unwrap();
        assert_eq!(model.num_symbols(), 8);
    }

    #[test]
    fn hmm_vocabulary_without_enough_data_fails_as_a_whole() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::from_entries([("a".to_string(), vec![vec![1, 2, 3, 4]])]);
        let result = train_vocabulary(
            &BlockExtractor,
            &corpus,
            &Dictionary::from_words(["a"]),
            &ModelLayout::new(dir.path()),
            &small_config(ScoringMode::Hmm),
        );
        assert!(matches!(result, Err(WordrecError::InsufficientData { .. })));
    }
}
