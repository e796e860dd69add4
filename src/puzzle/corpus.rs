//! Word Corpus
//!
//! The filtered dictionary shared by key generation and validation.
//! Words keep their load order (key generation scans it linearly) and are
//! grouped into named weight blocks, most common words first.

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::Path;

use thiserror::Error;

use crate::MIN_WORD_LENGTH;

/// Failure to build a usable corpus. Fatal for puzzle generation.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No word survived filtering.
    #[error("corpus is empty")]
    EmptyCorpus,

    /// The corpus has no word with exactly seven distinct letters.
    #[error("corpus contains no pangram")]
    NoPangram,

    /// Word list could not be read.
    #[error("failed to read word list {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A named run of consecutive corpus positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightBlock {
    /// Block name from the word list header.
    pub name: String,
    /// Positions covered in the corpus.
    pub range: Range<usize>,
}

/// Immutable, pre-filtered word list.
#[derive(Clone, Debug)]
pub struct Corpus {
    words: Vec<String>,
    blocks: Vec<WeightBlock>,
    index: BTreeSet<String>,
}

impl Corpus {
    /// Build from `(block name, words)` pairs in weight order.
    ///
    /// Words are lowercased; words shorter than [`MIN_WORD_LENGTH`], words
    /// with characters outside `a-z`, and repeats are dropped.
    pub fn from_blocks<I, N, W, S>(blocks: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (N, W)>,
        N: Into<String>,
        W: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words = Vec::new();
        let mut index = BTreeSet::new();
        let mut ranges = Vec::new();

        for (name, block_words) in blocks {
            let start = words.len();
            for raw in block_words {
                let Some(word) = normalize(raw.as_ref()) else {
                    continue;
                };
                if index.insert(word.clone()) {
                    words.push(word);
                }
            }
            if words.len() > start {
                ranges.push(WeightBlock {
                    name: name.into(),
                    range: start..words.len(),
                });
            }
        }

        if words.is_empty() {
            return Err(ConfigurationError::EmptyCorpus);
        }

        Ok(Self {
            words,
            blocks: ranges,
            index,
        })
    }

    /// Build a single-block corpus.
    pub fn from_words<W, S>(words: W) -> Result<Self, ConfigurationError>
    where
        W: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_blocks([("default", words)])
    }

    /// Parse a word list.
    ///
    /// One word per line. A line starting with `#` opens a new block named by
    /// the rest of the line; words before the first header go to `default`.
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let mut blocks: Vec<(String, Vec<&str>)> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('#') {
                blocks.push((name.trim().to_string(), Vec::new()));
                continue;
            }
            match blocks.last_mut() {
                Some((_, words)) => words.push(line),
                None => blocks.push(("default".to_string(), vec![line])),
            }
        }

        Self::from_blocks(blocks)
    }

    /// Load and parse a word list file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false for a constructed corpus.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words in load order.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Word at a corpus position.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    /// Whether `word` is in the corpus.
    pub fn contains(&self, word: &str) -> bool {
        self.index.contains(word)
    }

    /// Weight blocks in order.
    pub fn blocks(&self) -> &[WeightBlock] {
        &self.blocks
    }

    /// Name of the block holding position `index`.
    pub fn block_of(&self, index: usize) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.range.contains(&index))
            .map(|b| b.name.as_str())
    }
}

fn normalize(raw: &str) -> Option<String> {
    let word = raw.trim().to_ascii_lowercase();
    if word.len() < MIN_WORD_LENGTH || !word.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    Some(word)
}
