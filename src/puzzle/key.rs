//! Puzzle Keys
//!
//! A key is one required center letter plus six others. The six are always
//! stored sorted, so a key's text form (center first, then the others
//! alphabetically) is canonical regardless of how it was generated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::rng::DeterministicRng;
use crate::puzzle::corpus::{ConfigurationError, Corpus};
use crate::puzzle::validate::is_pangram;
use crate::PANGRAM_LETTERS;

/// Invalid text form of a key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Not exactly seven letters.
    #[error("key must have exactly 7 letters, got {0}")]
    Length(usize),

    /// A character outside `a-z`.
    #[error("key letter {0:?} is not a lowercase ascii letter")]
    NotALetter(char),

    /// The same letter appears twice.
    #[error("key letter {0:?} is repeated")]
    Repeated(char),
}

/// The 7-letter alphabet of a game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PuzzleKey {
    center: char,
    others: [char; 6],
}

impl PuzzleKey {
    /// Build from a center and six other letters in any order.
    pub fn new(center: char, others: [char; 6]) -> Result<Self, KeyError> {
        let mut letters = [center; PANGRAM_LETTERS];
        letters[1..].copy_from_slice(&others);
        Self::from_letters(&letters)
    }

    /// First letter is the center.
    fn from_letters(letters: &[char]) -> Result<Self, KeyError> {
        if letters.len() != PANGRAM_LETTERS {
            return Err(KeyError::Length(letters.len()));
        }
        for (i, &c) in letters.iter().enumerate() {
            if !c.is_ascii_lowercase() {
                return Err(KeyError::NotALetter(c));
            }
            if letters[..i].contains(&c) {
                return Err(KeyError::Repeated(c));
            }
        }

        let mut others = [letters[1]; 6];
        others.copy_from_slice(&letters[1..]);
        others.sort_unstable();

        Ok(Self {
            center: letters[0],
            others,
        })
    }

    /// Generate a key from the corpus.
    ///
    /// Draws a start position, scans forward (wrapping) to the first pangram,
    /// shuffles its letters with the same generator, takes the first as the
    /// center and sorts the rest.
    pub fn generate(corpus: &Corpus, rng: &mut DeterministicRng) -> Result<Self, ConfigurationError> {
        let start = rng
            .next_int(corpus.len())
            .map_err(|_| ConfigurationError::EmptyCorpus)?;

        let pangram = (start..corpus.len())
            .chain(0..start)
            .filter_map(|i| corpus.get(i))
            .find(|word| is_pangram(word))
            .ok_or(ConfigurationError::NoPangram)?;

        let mut letters: Vec<char> = Vec::with_capacity(PANGRAM_LETTERS);
        for c in pangram.chars() {
            if !letters.contains(&c) {
                letters.push(c);
            }
        }

        let shuffled = rng.permute(&letters);
        debug!(
            start,
            block = corpus.block_of(start).unwrap_or("?"),
            pangram,
            "generated puzzle key"
        );

        // Corpus words are lowercase ascii and pangrams have exactly 7 letters.
        Self::from_letters(&shuffled).map_err(|_| ConfigurationError::NoPangram)
    }

    /// Generate a key from an optional seed string.
    ///
    /// The same seed always yields the same key for the same corpus.
    pub fn generate_seeded(corpus: &Corpus, seed: Option<&str>) -> Result<Self, ConfigurationError> {
        let mut rng = DeterministicRng::from_optional_seed(seed);
        Self::generate(corpus, &mut rng)
    }

    /// Required letter.
    pub fn center(&self) -> char {
        self.center
    }

    /// The six other letters, ascending.
    pub fn others(&self) -> &[char; 6] {
        &self.others
    }

    /// All seven letters, center first.
    pub fn letters(&self) -> [char; PANGRAM_LETTERS] {
        let mut letters = [self.center; PANGRAM_LETTERS];
        letters[1..].copy_from_slice(&self.others);
        letters
    }

    /// Whether `c` is one of the seven letters.
    pub fn contains(&self, c: char) -> bool {
        c == self.center || self.others.contains(&c)
    }
}

impl fmt::Display for PuzzleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.letters() {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for PuzzleKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let letters: Vec<char> = s.chars().collect();
        Self::from_letters(&letters)
    }
}

impl TryFrom<String> for PuzzleKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PuzzleKey> for String {
    fn from(key: PuzzleKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn corpus() -> Corpus {
        Corpus::parse(
            "# common\nface\ncafe\nstranger\nkitchen\n# rare\nmachine\nbalcony\nbeef\n",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_and_display_are_canonical() {
        let key: PuzzleKey = "agfedcb".parse().unwrap();
        assert_eq!(key.center(), 'a');
        assert_eq!(key.others(), &['b', 'c', 'd', 'e', 'f', 'g']);
        assert_eq!(key.to_string(), "abcdefg");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("abc".parse::<PuzzleKey>(), Err(KeyError::Length(3)));
        assert_eq!("abcdefA".parse::<PuzzleKey>(), Err(KeyError::NotALetter('A')));
        assert_eq!("abcdefa".parse::<PuzzleKey>(), Err(KeyError::Repeated('a')));
    }

    #[test]
    fn test_new_sorts_others() {
        let key = PuzzleKey::new('k', ['t', 'i', 'c', 'h', 'e', 'n']).unwrap();
        assert_eq!(key.to_string(), "kcehint");
        assert!(key.contains('k'));
        assert!(!key.contains('z'));
    }

    #[test]
    fn test_serde_as_string() {
        let key: PuzzleKey = "abcdefg".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"abcdefg\"");
        let back: PuzzleKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<PuzzleKey>("\"aab\"").is_err());
    }

    #[test]
    fn test_generated_key_comes_from_a_pangram() {
        let corpus = corpus();
        let key = PuzzleKey::generate_seeded(&corpus, Some("20240101")).unwrap();

        let pangrams = ["stranger", "kitchen", "machine", "balcony"];
        assert!(pangrams.iter().any(|p| {
            p.chars().all(|c| key.contains(c)) && key.letters().iter().all(|c| p.contains(*c))
        }));
    }

    #[test]
    fn test_no_pangram_is_configuration_error() {
        let corpus = Corpus::from_words(["face", "cafe", "beef"]).unwrap();
        let result = PuzzleKey::generate_seeded(&corpus, Some("x"));
        assert!(matches!(result, Err(ConfigurationError::NoPangram)));
    }

    proptest! {
        #[test]
        fn prop_seeded_generation_is_deterministic(seed in "[0-9]{8}") {
            let corpus = corpus();
            let a = PuzzleKey::generate_seeded(&corpus, Some(&seed)).unwrap();
            let b = PuzzleKey::generate_seeded(&corpus, Some(&seed)).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_key_invariants(seed in any::<u64>()) {
            let corpus = corpus();
            let key = PuzzleKey::generate(&corpus, &mut DeterministicRng::new(seed)).unwrap();
            let others = key.others();
            prop_assert!(!others.contains(&key.center()));
            prop_assert!(others.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
