//! Vocabulary word lists.

use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use super::layout::is_model_name;
use crate::error::{Result, WordrecError};

/// Ordered, duplicate-free vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    words: Vec<String>,
}

impl Dictionary {
    /// One word per line. Blank lines are skipped; repeats and words that
    /// cannot name a model file are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        Self::from_words(text.lines())
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for word in words {
            let word = word.as_ref().trim();
            if word.is_empty() {
                continue;
            }
            if !is_model_name(word) {
                warn!(word, "vocabulary word cannot name a model file, skipped");
                continue;
            }
            if !seen.insert(word.to_string()) {
                warn!(word, "duplicate vocabulary word skipped");
                continue;
            }
            out.push(word.to_string());
        }
        Self { words: out }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WordrecError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Write one word per line, atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::persist::write_atomic(path, |w| {
            for word in &self.words {
                writeln!(w, "{word}")?;
            }
            Ok(())
        })
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }
}
