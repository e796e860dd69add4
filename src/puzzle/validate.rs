//! Word Validation and Scoring
//!
//! Pure functions. Rejections are values the caller branches on, never
//! system faults.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::puzzle::corpus::Corpus;
use crate::puzzle::key::PuzzleKey;
use crate::{MIN_WORD_LENGTH, PANGRAM_LETTERS};

/// Why a submitted word was rejected.
///
/// Messages are user-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    /// Shorter than the minimum word length.
    #[error("Too short")]
    TooShort,

    /// Uses a letter outside the puzzle key.
    #[error("Invalid letter")]
    InvalidLetter,

    /// Does not use the center letter.
    #[error("Missing center letter")]
    MissingCenter,

    /// Not in the word list.
    #[error("Not in word list")]
    NotInWordList,

    /// Already found in this game.
    #[error("Already found")]
    AlreadyFound,
}

/// A candidate word with everything needed to judge it.
#[derive(Debug, Clone, Copy)]
pub struct WordCheck<'a> {
    /// Candidate word, lowercase.
    pub word: &'a str,
    /// Puzzle key supplying the allowed letters and center.
    pub key: &'a PuzzleKey,
    /// Words already found in this game.
    pub already_found: &'a BTreeSet<String>,
}

/// Judge a candidate word.
///
/// Checks run in a fixed order and stop at the first failure: length,
/// letters, center, word list, already found.
pub fn validate_word(check: WordCheck<'_>, corpus: &Corpus) -> Result<(), ValidationError> {
    let WordCheck {
        word,
        key,
        already_found,
    } = check;

    if word.chars().count() < MIN_WORD_LENGTH {
        return Err(ValidationError::TooShort);
    }
    if !word.chars().all(|c| key.contains(c)) {
        return Err(ValidationError::InvalidLetter);
    }
    if !word.contains(key.center()) {
        return Err(ValidationError::MissingCenter);
    }
    if !corpus.contains(word) {
        return Err(ValidationError::NotInWordList);
    }
    if already_found.contains(word) {
        return Err(ValidationError::AlreadyFound);
    }
    Ok(())
}

/// Whether `word` has exactly seven distinct letters.
pub fn is_pangram(word: &str) -> bool {
    word.chars().collect::<BTreeSet<_>>().len() == PANGRAM_LETTERS
}

/// Points for one word.
///
/// Four-letter words score 1; longer words score their length, doubled for
/// pangrams.
pub fn compute_score(word: &str) -> u32 {
    let len = word.chars().count() as u32;
    if len == MIN_WORD_LENGTH as u32 {
        1
    } else if is_pangram(word) {
        2 * len
    } else {
        len
    }
}

/// Sum of [`compute_score`] over `words`.
pub fn total_score<I, S>(words: I) -> u32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words.into_iter().map(|w| compute_score(w.as_ref())).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key() -> PuzzleKey {
        "abcdefg".parse().unwrap()
    }

    fn corpus() -> Corpus {
        Corpus::from_words(["face", "beef", "cafe", "decaf", "defaced"]).unwrap()
    }

    fn check<'a>(word: &'a str, key: &'a PuzzleKey, found: &'a BTreeSet<String>) -> WordCheck<'a> {
        WordCheck {
            word,
            key,
            already_found: found,
        }
    }

    #[test]
    fn test_accepts_valid_word() {
        let (key, corpus, found) = (key(), corpus(), BTreeSet::new());
        assert_eq!(validate_word(check("face", &key, &found), &corpus), Ok(()));
        assert_eq!(compute_score("face"), 1);
    }

    #[test]
    fn test_check_order() {
        let (key, corpus) = (key(), corpus());
        let found: BTreeSet<String> = ["face".to_string()].into();

        // Too short wins over invalid letter.
        assert_eq!(
            validate_word(check("dog", &key, &found), &corpus),
            Err(ValidationError::TooShort)
        );
        assert_eq!(
            validate_word(check("dogs", &key, &found), &corpus),
            Err(ValidationError::InvalidLetter)
        );
        assert_eq!(
            validate_word(check("beef", &key, &found), &corpus),
            Err(ValidationError::MissingCenter)
        );
        assert_eq!(
            validate_word(check("bead", &key, &found), &corpus),
            Err(ValidationError::NotInWordList)
        );
        assert_eq!(
            validate_word(check("face", &key, &found), &corpus),
            Err(ValidationError::AlreadyFound)
        );
    }

    #[test]
    fn test_scoring_branches() {
        assert_eq!(compute_score("cafe"), 1);
        assert_eq!(compute_score("decaf"), 5);
        assert_eq!(compute_score("kitchen"), 14);
        assert_eq!(compute_score("strangers"), 18);
        assert_eq!(total_score(["cafe", "decaf", "kitchen"]), 20);
        assert_eq!(total_score(Vec::<String>::new()), 0);
    }

    #[test]
    fn test_is_pangram() {
        assert!(is_pangram("stranger"));
        assert!(is_pangram("machine"));
        assert!(!is_pangram("face"));
        assert!(!is_pangram("teaching"));
    }

    #[test]
    fn test_messages() {
        assert_eq!(ValidationError::MissingCenter.to_string(), "Missing center letter");
        assert_eq!(ValidationError::AlreadyFound.to_string(), "Already found");
    }

    proptest! {
        #[test]
        fn prop_four_letter_score(word in "[a-z]{4,12}") {
            let score = compute_score(&word);
            prop_assert_eq!(score == 1, word.len() == 4 && !is_pangram(&word));
            if is_pangram(&word) {
                prop_assert_eq!(score, 2 * word.len() as u32);
            }
        }

        #[test]
        fn prop_total_is_order_independent(mut words in proptest::collection::vec("[a-z]{4,10}", 0..20)) {
            let forward = total_score(&words);
            words.reverse();
            prop_assert_eq!(forward, total_score(&words));
        }
    }
}
