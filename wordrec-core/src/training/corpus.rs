//! Labelled training corpora laid out as `<root>/<word>/*.wav`.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::audio::wav;
use crate::error::{Result, WordrecError};

/// Utterances grouped by word, in word-name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    entries: Vec<(String, Vec<Vec<i16>>)>,
}

impl Corpus {
    /// Read every `<root>/<word>/*.wav`.
    ///
    /// Unreadable files are skipped with a warning; a word directory with no
    /// readable file still appears, with no utterances.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(WordrecError::Configuration(format!(
                "corpus directory {} does not exist",
                root.display()
            )));
        }

        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut entries = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let Some(word) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                warn!(path = %dir.display(), "skipping non UTF-8 word directory");
                continue;
            };
            let mut utterances = Vec::new();
            for file in wav::list_wavs(&dir)? {
                match wav::read_wav(&file) {
                    Ok(samples) if !samples.is_empty() => utterances.push(samples),
                    Ok(_) => warn!(path = %file.display(), "skipping empty recording"),
                    Err(e) => warn!(path = %file.display(), "skipping unreadable recording: {e}"),
                }
            }
            debug!(word = %word, utterances = utterances.len(), "word samples loaded");
            entries.push((word, utterances));
        }

        let corpus = Self { entries };
        info!(
            words = corpus.len(),
            utterances = corpus.total_utterances(),
            root = %root.display(),
            "corpus loaded"
        );
        Ok(corpus)
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<Vec<i16>>)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(w, _)| w.as_str())
    }

    pub fn utterances(&self, word: &str) -> Option<&[Vec<i16>]> {
        self.entries
            .iter()
            .find(|(w, _)| w == word)
            .map(|(_, u)| u.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<i16>])> {
        self.entries.iter().map(|(w, u)| (w.as_str(), u.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_utterances(&self) -> usize {
        self.entries.iter().map(|(_, u)| u.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_word_directories_in_order() {
        let dir = tempfile::tempdir().unwrap();
        wav::write_wav(&dir.path().join("yes/1.wav"), &[1, 2, 3]).unwrap();
        wav::write_wav(&dir.path().join("yes/2.wav"), &[4]).unwrap();
        wav::write_wav(&dir.path().join("no/1.wav"), &[5, 6]).unwrap();
        std::fs::write(dir.path().join("README"), "not a word").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();
        assert_eq!(corpus.words().collect::<Vec<_>>(), vec!["empty", "no", "yes"]);
        assert_eq!(corpus.utterances("yes").unwrap(), &[vec![1, 2, 3], vec![4]]);
        assert_eq!(corpus.utterances("empty").unwrap().len(), 0);
        assert_eq!(corpus.total_utterances(), 3);
    }

    #[test]
    fn corrupt_recording_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        wav::write_wav(&dir.path().join("go/ok.wav"), &[9; 10]).unwrap();
        std::fs::write(dir.path().join("go/bad.wav"), b"not a riff file").unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();
        assert_eq!(corpus.utterances("go").unwrap().len(), 1);
    }

    #[test]
    fn missing_root_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Corpus::load(&dir.path().join("nope")),
            Err(WordrecError::Configuration(_))
        ));
    }
}
