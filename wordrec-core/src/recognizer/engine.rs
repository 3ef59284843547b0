//! Word scoring against the loaded vocabulary.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::dictionary::Dictionary;
use super::layout::ModelLayout;
use super::{Candidate, Recognition, ScoringMode, WordRecognizer};
use crate::buffering::WordBuffer;
use crate::error::{Result, WordrecError};
use crate::features::FeatureExtractor;
use crate::hmm::MarkovModel;
use crate::vq::Codebook;

/// A vocabulary word that could not be activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub word: String,
    pub reason: String,
}

/// Outcome of loading one model per vocabulary word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    fn fail(&mut self, word: &str, reason: impl std::fmt::Display) {
        let reason = reason.to_string();
        warn!(word, %reason, "vocabulary word skipped");
        self.failures.push(LoadFailure {
            word: word.to_string(),
            reason,
        });
    }

    /// Append `later`'s outcome after this one's.
    fn merge(mut self, later: LoadReport) -> LoadReport {
        self.loaded.extend(later.loaded);
        self.failures.extend(later.failures);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Backend {
    Vq {
        codebooks: Vec<(String, Codebook)>,
    },
    Hmm {
        shared: Codebook,
        models: Vec<(String, MarkovModel)>,
    },
}

/// Orchestrates feature extraction, quantization and scoring.
///
/// Read-only once built; every call allocates its own scratch tables.
pub struct RecognitionEngine {
    extractor: Arc<dyn FeatureExtractor>,
    backend: Backend,
}

impl std::fmt::Debug for RecognitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionEngine")
            .field("mode", &self.mode())
            .field("vocabulary", &self.vocabulary())
            .finish_non_exhaustive()
    }
}

impl RecognitionEngine {
    /// Distortion scoring over in-memory per-word codebooks.
    ///
    /// Codebooks whose dimension differs from the extractor's are rejected
    /// into the report.
    pub fn with_codebooks<I>(extractor: Arc<dyn FeatureExtractor>, codebooks: I) -> (Self, LoadReport)
    where
        I: IntoIterator<Item = (String, Codebook)>,
    {
        let mut report = LoadReport::default();
        let mut active = Vec::new();
        for (word, codebook) in codebooks {
            if codebook.dimension() != extractor.dimension() {
                report.fail(
                    &word,
                    WordrecError::DimensionMismatch {
                        expected: extractor.dimension(),
                        actual: codebook.dimension(),
                    },
                );
                continue;
            }
            report.loaded.push(word.clone());
            active.push((word, codebook));
        }
        let engine = Self {
            extractor,
            backend: Backend::Vq { codebooks: active },
        };
        (engine, report)
    }

    /// HMM scoring over a shared codebook and in-memory per-word models.
    ///
    /// A shared codebook of the wrong dimension is fatal. Models whose
    /// alphabet differs from the codebook size are rejected into the report.
    pub fn with_models<I>(
        extractor: Arc<dyn FeatureExtractor>,
        shared: Codebook,
        models: I,
    ) -> Result<(Self, LoadReport)>
    where
        I: IntoIterator<Item = (String, MarkovModel)>,
    {
        if shared.dimension() != extractor.dimension() {
            return Err(WordrecError::DimensionMismatch {
                expected: extractor.dimension(),
                actual: shared.dimension(),
            });
        }
        let mut report = LoadReport::default();
        let mut active = Vec::new();
        for (word, model) in models {
            if model.num_symbols() != shared.len() {
                report.fail(
                    &word,
                    format!(
                        "model alphabet of {} symbols does not match shared codebook of size {}",
                        model.num_symbols(),
                        shared.len()
                    ),
                );
                continue;
            }
            report.loaded.push(word.clone());
            active.push((word, model));
        }
        let engine = Self {
            extractor,
            backend: Backend::Hmm {
                shared,
                models: active,
            },
        };
        Ok((engine, report))
    }

    /// Load `<word>.vq` for every vocabulary word.
    pub fn load_vq(
        extractor: Arc<dyn FeatureExtractor>,
        dictionary: &Dictionary,
        layout: &ModelLayout,
    ) -> (Self, LoadReport) {
        let mut failed = LoadReport::default();
        let mut codebooks = Vec::new();
        for word in dictionary.words() {
            match Codebook::load(&layout.codebook_path(word)) {
                Ok(codebook) => codebooks.push((word.clone(), codebook)),
                Err(e) => failed.fail(word, e),
            }
        }
        let (engine, report) = Self::with_codebooks(extractor, codebooks);
        let report = failed.merge(report);
        info!(
            mode = "vq",
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "recognition models loaded"
        );
        (engine, report)
    }

    /// Load the shared codebook and `<word>.hmm` for every vocabulary word.
    ///
    /// Fails only when the shared codebook itself is unusable.
    pub fn load_hmm(
        extractor: Arc<dyn FeatureExtractor>,
        dictionary: &Dictionary,
        layout: &ModelLayout,
    ) -> Result<(Self, LoadReport)> {
        let shared = Codebook::load(&layout.shared_codebook_path())?;
        let mut failed = LoadReport::default();
        let mut models = Vec::new();
        for word in dictionary.words() {
            match MarkovModel::load(&layout.hmm_path(word)) {
                Ok(model) => models.push((word.clone(), model)),
                Err(e) => failed.fail(word, e),
            }
        }
        let (engine, report) = Self::with_models(extractor, shared, models)?;
        let report = failed.merge(report);
        info!(
            mode = "hmm",
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "recognition models loaded"
        );
        Ok((engine, report))
    }

    /// Load whichever backend `mode` names.
    pub fn load(
        mode: ScoringMode,
        extractor: Arc<dyn FeatureExtractor>,
        dictionary: &Dictionary,
        layout: &ModelLayout,
    ) -> Result<(Self, LoadReport)> {
        match mode {
            ScoringMode::Vq => Ok(Self::load_vq(extractor, dictionary, layout)),
            ScoringMode::Hmm => Self::load_hmm(extractor, dictionary, layout),
        }
    }

    pub fn mode(&self) -> ScoringMode {
        match self.backend {
            Backend::Vq { .. } => ScoringMode::Vq,
            Backend::Hmm { .. } => ScoringMode::Hmm,
        }
    }

    /// Words with an active model, in vocabulary order.
    pub fn vocabulary(&self) -> Vec<String> {
        match &self.backend {
            Backend::Vq { codebooks } => codebooks.iter().map(|(w, _)| w.clone()).collect(),
            Backend::Hmm { models, .. } => models.iter().map(|(w, _)| w.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Vq { codebooks } => codebooks.len(),
            Backend::Hmm { models, .. } => models.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extractor(&self) -> &Arc<dyn FeatureExtractor> {
        &self.extractor
    }

    /// Label one word's samples.
    pub fn recognize_samples(&self, samples: &[i16]) -> Result<Recognition> {
        if self.is_empty() {
            return Err(WordrecError::NoModel(
                "no vocabulary word has a loaded model".into(),
            ));
        }
        let features = self.extractor.extract(samples)?;

        let mut ranking = match &self.backend {
            Backend::Vq { codebooks } => {
                let mut scored = Vec::with_capacity(codebooks.len());
                for (word, codebook) in codebooks {
                    scored.push(Candidate {
                        word: word.clone(),
                        score: codebook.get_distortion(&features)?,
                    });
                }
                scored
            }
            Backend::Hmm { shared, models } => {
                let symbols = shared.quantize(&features)?;
                let mut scored = Vec::with_capacity(models.len());
                for (word, model) in models {
                    scored.push(Candidate {
                        word: word.clone(),
                        score: model.viterbi(&symbols)?.log_probability,
                    });
                }
                scored
            }
        };

        let mode = self.mode();
        // Stable sort: equal scores keep vocabulary order.
        match mode {
            ScoringMode::Vq => ranking.sort_by(|a, b| a.score.total_cmp(&b.score)),
            ScoringMode::Hmm => ranking.sort_by(|a, b| b.score.total_cmp(&a.score)),
        }

        let best = ranking
            .first()
            .cloned()
            .ok_or_else(|| WordrecError::NoModel("no candidate scored".into()))?;
        debug!(word = %best.word, score = best.score, ?mode, "word recognized");
        Ok(Recognition {
            word: best.word,
            score: best.score,
            mode,
            ranking,
        })
    }
}

impl WordRecognizer for RecognitionEngine {
    fn recognize(&mut self, word: &WordBuffer) -> Result<Recognition> {
        self.recognize_samples(word.samples())
    }

    fn vocabulary(&self) -> Vec<String> {
        RecognitionEngine::vocabulary(self)
    }
}
