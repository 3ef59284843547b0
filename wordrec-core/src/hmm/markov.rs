//! Left-to-right discrete HMM with scaled forward/backward recursion,
//! log-domain Viterbi decoding and multi-sequence Baum-Welch re-estimation.
//!
//! State `i` may only move to states `i..=i + DELTA`. Re-estimation never
//! creates probability mass outside that band.
//!
//! ## File format
//!
//! Labeled sections, each label on its own line followed by its rows:
//!
//! ```text
//! Number of States:
//! 5
//! Observation Symbols:
//! 256
//! Number of Samples:
//! 12
//! Output Matrix:
//! <N rows of M values>
//! Transition Matrix:
//! <N rows of N values>
//! pi:
//! <N values>
//! ```
//!
//! The loader looks sections up by label, so their order is free.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::{Result, WordrecError};
use crate::persist;

/// Probability floor used in place of exact zeros.
pub const MIN_PROBABILITY: f64 = 1e-11;

/// Maximum forward jump of a state transition.
pub const DELTA: usize = 2;

/// Tolerance for a probability row to count as summing to one.
const ROW_SUM_TOLERANCE: f64 = 1e-6;

const LABEL_STATES: &str = "Number of States:";
const LABEL_SYMBOLS: &str = "Observation Symbols:";
const LABEL_SAMPLES: &str = "Number of Samples:";
const LABEL_OUTPUT: &str = "Output Matrix:";
const LABEL_TRANSITION: &str = "Transition Matrix:";
const LABEL_PI: &str = "pi:";

const LABELS: [&str; 6] = [
    LABEL_STATES,
    LABEL_SYMBOLS,
    LABEL_SAMPLES,
    LABEL_OUTPUT,
    LABEL_TRANSITION,
    LABEL_PI,
];

/// How long Baum-Welch runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainingPolicy {
    /// Exactly this many re-estimation rounds.
    Fixed(usize),
    /// Stop once the mean log-likelihood gains less than `tolerance` in a round.
    Converge { max_rounds: usize, tolerance: f64 },
}

impl Default for TrainingPolicy {
    fn default() -> Self {
        TrainingPolicy::Fixed(25)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub rounds: usize,
    /// Mean per-sequence log-likelihood before each round.
    pub history: Vec<f64>,
    /// Mean per-sequence log-likelihood of the trained model.
    pub final_log_likelihood: f64,
    pub converged: bool,
}

/// Scaled forward variables of one observation sequence.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    alpha: Array2<f64>,
    scale: Vec<f64>,
    log_likelihood: f64,
}

impl ForwardPass {
    /// Row `t` sums to one.
    pub fn alpha(&self) -> &Array2<f64> {
        &self.alpha
    }

    /// Factor row `t` was multiplied by.
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// `ln P(observations | model)`.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn len(&self) -> usize {
        self.scale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_empty()
    }
}

/// Most likely state sequence and its log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoding {
    pub log_probability: f64,
    pub path: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkovModel {
    num_states: usize,
    num_symbols: usize,
    num_samples: usize,
    pi: Array1<f64>,
    transition: Array2<f64>,
    output: Array2<f64>,
}

impl MarkovModel {
    /// Random left-to-right model starting in state 0.
    pub fn random<R: Rng + ?Sized>(num_states: usize, num_symbols: usize, rng: &mut R) -> Result<Self> {
        if num_states == 0 || num_symbols == 0 {
            return Err(WordrecError::Configuration(format!(
                "HMM needs at least one state and one symbol (got {num_states} states, {num_symbols} symbols)"
            )));
        }

        let mut pi = Array1::zeros(num_states);
        pi[0] = 1.0;

        let mut transition = Array2::zeros((num_states, num_states));
        for i in 0..num_states {
            let reach = band(i, num_states);
            distribute(rng, reach.len(), |k, p| transition[[i, reach.start + k]] = p);
        }

        let mut output = Array2::zeros((num_states, num_symbols));
        for i in 0..num_states {
            distribute(rng, num_symbols, |k, p| output[[i, k]] = p);
        }

        Ok(Self {
            num_states,
            num_symbols,
            num_samples: 0,
            pi,
            transition,
            output,
        })
    }

    /// Random model from a seeded `StdRng`, for reproducible training.
    pub fn with_seed(num_states: usize, num_symbols: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::random(num_states, num_symbols, &mut rng)
    }

    /// Model from explicit parameters.
    ///
    /// Rows must be stochastic and transitions must stay inside the band.
    pub fn from_parts(pi: Vec<f64>, transition: Vec<Vec<f64>>, output: Vec<Vec<f64>>) -> Result<Self> {
        let num_states = pi.len();
        let num_symbols = output.first().map_or(0, Vec::len);
        let pi = Array1::from(pi);
        let transition = to_matrix(&transition, num_states, "transition")?;
        let output = to_matrix(&output, num_symbols, "output")?;
        let model = Self {
            num_states,
            num_symbols,
            num_samples: 0,
            pi,
            transition,
            output,
        };
        model.validate().map_err(WordrecError::Configuration)?;
        Ok(model)
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_symbols(&self) -> usize {
        self.num_symbols
    }

    /// Observation sequences seen by the last re-estimation round.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn pi(&self) -> &Array1<f64> {
        &self.pi
    }

    pub fn transition(&self) -> &Array2<f64> {
        &self.transition
    }

    pub fn output(&self) -> &Array2<f64> {
        &self.output
    }

    /// Scaled forward recursion.
    pub fn forward(&self, obs: &[usize]) -> Result<ForwardPass> {
        self.check_observations(obs)?;
        let (t_len, n) = (obs.len(), self.num_states);
        let mut alpha = Array2::zeros((t_len, n));
        let mut scale = vec![0.0; t_len];

        for i in 0..n {
            alpha[[0, i]] = self.pi[i] * self.output[[i, obs[0]]];
        }
        scale[0] = normalize_row(&mut alpha, 0)?;

        for t in 1..t_len {
            for j in 0..n {
                let mut sum = 0.0;
                for i in 0..n {
                    sum += alpha[[t - 1, i]] * self.transition[[i, j]];
                }
                alpha[[t, j]] = sum * self.output[[j, obs[t]]];
            }
            scale[t] = normalize_row(&mut alpha, t)?;
        }

        let log_likelihood = -scale.iter().map(|c| c.ln()).sum::<f64>();
        Ok(ForwardPass {
            alpha,
            scale,
            log_likelihood,
        })
    }

    /// Scaled backward recursion using the factors of `forward` over `obs`.
    pub fn backward(&self, obs: &[usize], forward: &ForwardPass) -> Result<Array2<f64>> {
        self.check_observations(obs)?;
        if forward.len() != obs.len() {
            return Err(WordrecError::DimensionMismatch {
                expected: obs.len(),
                actual: forward.len(),
            });
        }
        let (t_len, n) = (obs.len(), self.num_states);
        let scale = forward.scale();
        let mut beta = Array2::zeros((t_len, n));

        for i in 0..n {
            beta[[t_len - 1, i]] = scale[t_len - 1];
        }
        for t in (0..t_len - 1).rev() {
            for i in 0..n {
                let mut sum = 0.0;
                for j in band(i, n) {
                    sum += self.transition[[i, j]] * self.output[[j, obs[t + 1]]] * beta[[t + 1, j]];
                }
                beta[[t, i]] = sum * scale[t];
            }
        }
        Ok(beta)
    }

    pub fn log_likelihood(&self, obs: &[usize]) -> Result<f64> {
        Ok(self.forward(obs)?.log_likelihood())
    }

    /// Most likely state path. Ties go to the lowest state index.
    pub fn viterbi(&self, obs: &[usize]) -> Result<Decoding> {
        self.check_observations(obs)?;
        let (t_len, n) = (obs.len(), self.num_states);
        let log_pi = self.pi.mapv(floored_ln);
        let log_a = self.transition.mapv(floored_ln);
        let log_b = self.output.mapv(floored_ln);

        let mut phi = Array2::<f64>::zeros((t_len, n));
        let mut back = Array2::<usize>::zeros((t_len, n));

        for i in 0..n {
            phi[[0, i]] = log_pi[i] + log_b[[i, obs[0]]];
        }
        for t in 1..t_len {
            for j in 0..n {
                let mut best = (0, f64::NEG_INFINITY);
                for i in 0..n {
                    let score = phi[[t - 1, i]] + log_a[[i, j]];
                    if score > best.1 {
                        best = (i, score);
                    }
                }
                phi[[t, j]] = best.1 + log_b[[j, obs[t]]];
                back[[t, j]] = best.0;
            }
        }

        let mut last = (0, f64::NEG_INFINITY);
        for i in 0..n {
            if phi[[t_len - 1, i]] > last.1 {
                last = (i, phi[[t_len - 1, i]]);
            }
        }

        let mut path = vec![0; t_len];
        path[t_len - 1] = last.0;
        for t in (1..t_len).rev() {
            path[t - 1] = back[[t, path[t]]];
        }

        Ok(Decoding {
            log_probability: last.1,
            path,
        })
    }

    /// One Baum-Welch round over all sequences.
    ///
    /// Returns the mean log-likelihood of the sequences under the model as it
    /// was before the update.
    pub fn reestimate(&mut self, sequences: &[Vec<usize>]) -> Result<f64> {
        if sequences.is_empty() {
            return Err(WordrecError::InsufficientData {
                available: 0,
                required: 1,
            });
        }
        let (n, m) = (self.num_states, self.num_symbols);
        let mut xi_sum = Array2::<f64>::zeros((n, n));
        let mut gamma_leaving = Array1::<f64>::zeros(n);
        let mut gamma_total = Array1::<f64>::zeros(n);
        let mut emitted = Array2::<f64>::zeros((n, m));
        let mut log_likelihood = 0.0;

        for obs in sequences {
            let fwd = self.forward(obs)?;
            let beta = self.backward(obs, &fwd)?;
            let alpha = fwd.alpha();
            let scale = fwd.scale();
            let t_len = obs.len();
            log_likelihood += fwd.log_likelihood();

            for t in 0..t_len {
                for i in 0..n {
                    let gamma = alpha[[t, i]] * beta[[t, i]] / scale[t];
                    gamma_total[i] += gamma;
                    emitted[[i, obs[t]]] += gamma;
                    if t + 1 < t_len {
                        gamma_leaving[i] += gamma;
                    }
                }
            }
            for t in 0..t_len - 1 {
                for i in 0..n {
                    for j in band(i, n) {
                        xi_sum[[i, j]] += alpha[[t, i]]
                            * self.transition[[i, j]]
                            * self.output[[j, obs[t + 1]]]
                            * beta[[t + 1, j]];
                    }
                }
            }
        }

        for i in 0..n {
            if gamma_leaving[i] > 0.0 {
                let reach = band(i, n);
                let row: Vec<f64> = reach
                    .clone()
                    .map(|j| xi_sum[[i, j]] / gamma_leaving[i] + MIN_PROBABILITY)
                    .collect();
                let total: f64 = row.iter().sum();
                for (j, p) in reach.zip(row) {
                    self.transition[[i, j]] = p / total;
                }
            }
            if gamma_total[i] > 0.0 {
                let row: Vec<f64> = (0..m)
                    .map(|k| emitted[[i, k]] / gamma_total[i] + MIN_PROBABILITY)
                    .collect();
                let total: f64 = row.iter().sum();
                for (k, p) in row.into_iter().enumerate() {
                    self.output[[i, k]] = p / total;
                }
            }
        }

        self.num_samples = sequences.len();

        Ok(log_likelihood / sequences.len() as f64)
    }

    /// Run Baum-Welch under `policy`.
    pub fn train(&mut self, sequences: &[Vec<usize>], policy: TrainingPolicy) -> Result<TrainingReport> {
        if sequences.is_empty() {
            return Err(WordrecError::InsufficientData {
                available: 0,
                required: 1,
            });
        }
        for obs in sequences {
            self.check_observations(obs)?;
        }

        let (max_rounds, tolerance) = match policy {
            TrainingPolicy::Fixed(rounds) => (rounds, None),
            TrainingPolicy::Converge {
                max_rounds,
                tolerance,
            } => (max_rounds, Some(tolerance)),
        };

        let mut history = Vec::with_capacity(max_rounds);
        let mut converged = false;
        for round in 0..max_rounds {
            let ll = self.reestimate(sequences)?;
            debug!(round, log_likelihood = ll, "baum-welch round");
            let gain = history.last().map(|prev: &f64| ll - prev);
            history.push(ll);
            if let (Some(tolerance), Some(gain)) = (tolerance, gain) {
                if gain < tolerance {
                    converged = true;
                    break;
                }
            }
        }

        let final_log_likelihood = self.mean_log_likelihood(sequences)?;
        info!(
            states = self.num_states,
            symbols = self.num_symbols,
            sequences = sequences.len(),
            rounds = history.len(),
            final_log_likelihood,
            "HMM trained"
        );
        Ok(TrainingReport {
            rounds: history.len(),
            history,
            final_log_likelihood,
            converged,
        })
    }

    pub fn mean_log_likelihood(&self, sequences: &[Vec<usize>]) -> Result<f64> {
        if sequences.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for obs in sequences {
            total += self.log_likelihood(obs)?;
        }
        Ok(total / sequences.len() as f64)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_atomic(path, |w| self.to_writer(w))?;
        debug!(path = %path.display(), "HMM saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WordrecError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(reader, &path.display().to_string())
    }

    pub fn to_writer(&self, w: &mut dyn Write) -> Result<()> {
        writeln!(w, "{LABEL_STATES}\n{}", self.num_states)?;
        writeln!(w, "{LABEL_SYMBOLS}\n{}", self.num_symbols)?;
        writeln!(w, "{LABEL_SAMPLES}\n{}", self.num_samples)?;
        writeln!(w, "{LABEL_OUTPUT}")?;
        for row in self.output.rows() {
            writeln!(w, "{}", join(row.iter()))?;
        }
        writeln!(w, "{LABEL_TRANSITION}")?;
        for row in self.transition.rows() {
            writeln!(w, "{}", join(row.iter()))?;
        }
        writeln!(w, "{LABEL_PI}\n{}", join(self.pi.iter()))?;
        Ok(())
    }

    pub fn from_reader<R: BufRead>(reader: R, source_name: &str) -> Result<Self> {
        let mut sections: HashMap<&'static str, Section> = HashMap::new();
        let mut current: Option<&'static str> = None;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(label) = LABELS.iter().copied().find(|l| *l == trimmed) {
                sections.insert(
                    label,
                    Section {
                        label_line: line_no,
                        rows: Vec::new(),
                    },
                );
                current = Some(label);
                continue;
            }
            match current.and_then(|label| sections.get_mut(label)) {
                Some(section) => section.rows.push((line_no, trimmed.to_string())),
                None => {
                    return Err(WordrecError::parse(
                        source_name,
                        line_no,
                        "data before any section label",
                    ))
                }
            }
        }

        let section = |label: &'static str| {
            sections
                .get(label)
                .ok_or_else(|| WordrecError::parse(source_name, 0, format!("missing section `{label}`")))
        };

        let num_states = section(LABEL_STATES)?.scalar(source_name)?;
        let num_symbols = section(LABEL_SYMBOLS)?.scalar(source_name)?;
        let num_samples = section(LABEL_SAMPLES)
            .ok()
            .map(|s| s.scalar(source_name))
            .transpose()?
            .unwrap_or(0);
        if num_states == 0 || num_symbols == 0 {
            return Err(WordrecError::parse(
                source_name,
                0,
                "state and symbol counts must be positive",
            ));
        }

        let output = section(LABEL_OUTPUT)?.matrix(source_name, num_states, num_symbols)?;
        let transition = section(LABEL_TRANSITION)?.matrix(source_name, num_states, num_states)?;
        let pi_section = section(LABEL_PI)?;
        let pi = pi_section.matrix(source_name, 1, num_states)?.row(0).to_owned();

        let model = Self {
            num_states,
            num_symbols,
            num_samples,
            pi,
            transition,
            output,
        };
        model
            .validate()
            .map_err(|msg| WordrecError::parse(source_name, pi_section.label_line, msg))?;
        Ok(model)
    }

    fn check_observations(&self, obs: &[usize]) -> Result<()> {
        if obs.is_empty() {
            return Err(WordrecError::EmptyObservation);
        }
        if let Some(&symbol) = obs.iter().find(|&&s| s >= self.num_symbols) {
            return Err(WordrecError::InvalidObservation {
                symbol,
                num_symbols: self.num_symbols,
            });
        }
        Ok(())
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let n = self.num_states;
        if n == 0 || self.num_symbols == 0 {
            return Err("HMM needs at least one state and one symbol".into());
        }
        if self.transition.dim() != (n, n) || self.output.dim() != (n, self.num_symbols) {
            return Err("matrix shapes do not match the state/symbol counts".into());
        }
        check_stochastic(self.pi.iter(), "pi")?;
        // Left-to-right: every path starts in state 0.
        if (self.pi[0] - 1.0).abs() > ROW_SUM_TOLERANCE
            || self.pi.iter().skip(1).any(|&p| p != 0.0)
        {
            return Err(format!(
                "pi must start in state 0, got {}",
                join(self.pi.iter())
            ));
        }
        for (i, row) in self.transition.rows().into_iter().enumerate() {
            let reach = band(i, n);
            if row
                .iter()
                .enumerate()
                .any(|(j, &p)| !reach.contains(&j) && p != 0.0)
            {
                return Err(format!(
                    "transition row {i} has mass outside states {}..={}",
                    reach.start,
                    reach.end - 1
                ));
            }
            check_stochastic(row.iter(), &format!("transition row {i}"))?;
        }
        for (i, row) in self.output.rows().into_iter().enumerate() {
            check_stochastic(row.iter(), &format!("output row {i}"))?;
        }
        Ok(())
    }
}

/// Rows following one section label.
struct Section {
    label_line: usize,
    rows: Vec<(usize, String)>,
}

impl Section {
    fn scalar(&self, source_name: &str) -> Result<usize> {
        let (line, text) = self
            .rows
            .first()
            .ok_or_else(|| WordrecError::parse(source_name, self.label_line, "missing value"))?;
        text.parse()
            .map_err(|_| WordrecError::parse(source_name, *line, format!("invalid count `{text}`")))
    }

    fn matrix(&self, source_name: &str, rows: usize, cols: usize) -> Result<Array2<f64>> {
        if self.rows.len() < rows {
            return Err(WordrecError::parse(
                source_name,
                self.label_line,
                format!("expected {rows} rows, found {}", self.rows.len()),
            ));
        }
        let mut matrix = Array2::zeros((rows, cols));
        for (r, (line, text)) in self.rows.iter().take(rows).enumerate() {
            let values = text
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| WordrecError::parse(source_name, *line, e.to_string()))?;
            if values.len() != cols {
                return Err(WordrecError::parse(
                    source_name,
                    *line,
                    format!("expected {cols} values, found {}", values.len()),
                ));
            }
            for (c, v) in values.into_iter().enumerate() {
                matrix[[r, c]] = v;
            }
        }
        Ok(matrix)
    }
}

/// States reachable from `i`.
fn band(i: usize, num_states: usize) -> std::ops::Range<usize> {
    i..(i + DELTA + 1).min(num_states)
}

/// Random stochastic row: each entry takes a random share of the remaining
/// mass and the last entry absorbs what is left.
fn distribute<R: Rng + ?Sized>(rng: &mut R, len: usize, mut set: impl FnMut(usize, f64)) {
    let mut remainder = 1.0;
    for k in 0..len.saturating_sub(1) {
        let share = rng.gen::<f64>() * remainder;
        set(k, share);
        remainder -= share;
    }
    if len > 0 {
        set(len - 1, remainder);
    }
}

/// Scale row `t` to sum to one; returns the factor applied.
fn normalize_row(alpha: &mut Array2<f64>, t: usize) -> Result<f64> {
    let sum = alpha.row(t).sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return Err(WordrecError::NumericDegeneracy(format!(
            "forward variables at step {t} sum to {sum}"
        )));
    }
    let factor = 1.0 / sum;
    alpha.row_mut(t).mapv_inplace(|a| a * factor);
    Ok(factor)
}

fn floored_ln(p: f64) -> f64 {
    if p == 0.0 {
        MIN_PROBABILITY.ln()
    } else {
        p.ln()
    }
}

fn to_matrix(rows: &[Vec<f64>], cols: usize, name: &str) -> Result<Array2<f64>> {
    let mut matrix = Array2::zeros((rows.len(), cols));
    for (r, row) in rows.iter().enumerate() {
        if row.len() != cols {
            return Err(WordrecError::Configuration(format!(
                "{name} row {r} has {} entries, expected {cols}",
                row.len()
            )));
        }
        for (c, &v) in row.iter().enumerate() {
            matrix[[r, c]] = v;
        }
    }
    Ok(matrix)
}

fn check_stochastic<'a>(row: impl Iterator<Item = &'a f64>, name: &str) -> std::result::Result<(), String> {
    let mut sum = 0.0;
    for &p in row {
        if !(0.0..=1.0 + ROW_SUM_TOLERANCE).contains(&p) {
            return Err(format!("{name} has invalid probability {p}"));
        }
        sum += p;
    }
    if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(format!("{name} sums to {sum}"));
    }
    Ok(())
}

fn join<'a>(values: impl Iterator<Item = &'a f64>) -> String {
    values.map(f64::to_string).collect::<Vec<_>>().join(" ")
}
