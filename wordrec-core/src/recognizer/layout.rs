//! Where word models live on disk.
//!
//! ```text
//! <models>/<word>.vq     per-word codebook (distortion scoring)
//! <models>/<word>.hmm    per-word HMM
//! <models>/shared.vq     codebook shared by every HMM
//! ```

use std::path::{Path, PathBuf};

pub const CODEBOOK_EXT: &str = "vq";
pub const HMM_EXT: &str = "hmm";
pub const SHARED_CODEBOOK_NAME: &str = "shared.vq";
/// Reserved: a word with this name would overwrite the shared codebook.
pub const SHARED_CODEBOOK_STEM: &str = "shared";

/// Whether `word` can name model files inside the models directory.
///
/// Rejects path separators, leading dots (covers `..`), control characters
/// and the shared codebook's stem.
pub fn is_model_name(word: &str) -> bool {
    !word.is_empty()
        && !word.starts_with('.')
        && !word
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
        && !word.eq_ignore_ascii_case(SHARED_CODEBOOK_STEM)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayout {
    dir: PathBuf,
    shared_codebook: Option<PathBuf>,
}

impl ModelLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            shared_codebook: None,
        }
    }

    /// Use a shared codebook outside the models directory.
    pub fn with_shared_codebook(mut self, path: impl Into<PathBuf>) -> Self {
        self.shared_codebook = Some(path.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn codebook_path(&self, word: &str) -> PathBuf {
        self.dir.join(format!("{word}.{CODEBOOK_EXT}"))
    }

    pub fn hmm_path(&self, word: &str) -> PathBuf {
        self.dir.join(format!("{word}.{HMM_EXT}"))
    }

    pub fn shared_codebook_path(&self) -> PathBuf {
        self.shared_codebook
            .clone()
            .unwrap_or_else(|| self.dir.join(SHARED_CODEBOOK_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_word_names() {
        let layout = ModelLayout::new("/models");
        assert_eq!(layout.codebook_path("yes"), PathBuf::from("/models/yes.vq"));
        assert_eq!(layout.hmm_path("yes"), PathBuf::from("/models/yes.hmm"));
        assert_eq!(layout.shared_codebook_path(), PathBuf::from("/models/shared.vq"));

        let custom = layout.with_shared_codebook("/elsewhere/book.vq");
        assert_eq!(custom.shared_codebook_path(), PathBuf::from("/elsewhere/book.vq"));
    }

    #[test]
    fn model_names_stay_inside_the_directory() {
        for ok in ["yes", "turn left", "stop-now", "v2.1"] {
            assert!(is_model_name(ok), "{ok:?} rejected");
        }
        for bad in ["", "..", "../etc/passwd", "a/b", "a\\b", "c:x", ".hidden", "shared", "Shared"] {
            assert!(!is_model_name(bad), "{bad:?} accepted");
        }
    }
}
