//! Discrete hidden Markov models over codebook symbols.

pub mod markov;

pub use markov::{
    Decoding, ForwardPass, MarkovModel, TrainingPolicy, TrainingReport, DELTA, MIN_PROBABILITY,
};

/// States per word model when none is configured.
pub const DEFAULT_NUM_STATES: usize = 5;

/// Parameters for training one word model.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmTrainingConfig {
    pub num_states: usize,
    pub policy: TrainingPolicy,
    /// Seed for the random initial model. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for HmmTrainingConfig {
    fn default() -> Self {
        Self {
            num_states: DEFAULT_NUM_STATES,
            policy: TrainingPolicy::default(),
            seed: None,
        }
    }
}

impl HmmTrainingConfig {
    /// Fresh untrained model for an alphabet of `num_symbols`.
    pub fn initial_model(&self, num_symbols: usize) -> crate::error::Result<MarkovModel> {
        match self.seed {
            Some(seed) => MarkovModel::with_seed(self.num_states, num_symbols, seed),
            None => MarkovModel::random(self.num_states, num_symbols, &mut rand::thread_rng()),
        }
    }
}
