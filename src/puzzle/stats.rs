//! Puzzle Statistics and Ranks
//!
//! `PuzzleStats` is computed once when a game is created and cached on the
//! game. Ranks map a score ratio onto a fixed ascending table.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::puzzle::corpus::Corpus;
use crate::puzzle::key::PuzzleKey;
use crate::puzzle::validate::{total_score, validate_word, WordCheck};

/// Aggregate figures for a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleStats {
    /// Number of valid words.
    pub max_words: u32,
    /// Score for finding every valid word.
    pub max_score: u32,
}

/// Every corpus word that is valid for `key`, in corpus order.
pub fn valid_words<'a>(key: &PuzzleKey, corpus: &'a Corpus) -> Vec<&'a str> {
    let none = BTreeSet::new();
    corpus
        .words()
        .iter()
        .map(String::as_str)
        .filter(|word| {
            validate_word(
                WordCheck {
                    word: *word,
                    key,
                    already_found: &none,
                },
                corpus,
            )
            .is_ok()
        })
        .collect()
}

/// Compute the stats for `key` over the whole corpus.
pub fn compute_stats(key: &PuzzleKey, corpus: &Corpus) -> PuzzleStats {
    let words = valid_words(key, corpus);
    PuzzleStats {
        max_words: words.len() as u32,
        max_score: total_score(&words),
    }
}

/// Qualitative progress rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    /// 0%
    Beginner,
    /// 2%
    GoodStart,
    /// 5%
    MovingUp,
    /// 8%
    Good,
    /// 15%
    Solid,
    /// 25%
    Nice,
    /// 40%
    Great,
    /// 50%
    Amazing,
    /// 70%
    Genius,
    /// Every word found.
    QueenBee,
}

/// Ratio-ranked entries, ascending. `QueenBee` is handled separately.
const RATIO_TABLE: [(u32, Rank); 9] = [
    (0, Rank::Beginner),
    (2, Rank::GoodStart),
    (5, Rank::MovingUp),
    (8, Rank::Good),
    (15, Rank::Solid),
    (25, Rank::Nice),
    (40, Rank::Great),
    (50, Rank::Amazing),
    (70, Rank::Genius),
];

impl Rank {
    /// All ranks, ascending.
    pub const ALL: [Rank; 10] = [
        Rank::Beginner,
        Rank::GoodStart,
        Rank::MovingUp,
        Rank::Good,
        Rank::Solid,
        Rank::Nice,
        Rank::Great,
        Rank::Amazing,
        Rank::Genius,
        Rank::QueenBee,
    ];

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            Rank::Beginner => "beginner",
            Rank::GoodStart => "good start",
            Rank::MovingUp => "moving up",
            Rank::Good => "good",
            Rank::Solid => "solid",
            Rank::Nice => "nice",
            Rank::Great => "great",
            Rank::Amazing => "amazing",
            Rank::Genius => "genius",
            Rank::QueenBee => "queen bee",
        }
    }

    /// Threshold as a percentage of the max score.
    pub fn percent(self) -> u32 {
        match self {
            Rank::QueenBee => 100,
            rank => RATIO_TABLE
                .iter()
                .find(|(_, r)| *r == rank)
                .map_or(0, |(p, _)| *p),
        }
    }

    /// Points needed for this rank: `ceil(ratio × max_score)`.
    pub fn threshold(self, max_score: u32) -> u32 {
        (self.percent() * max_score).div_ceil(100)
    }

    /// Rank for a score, ignoring completion.
    ///
    /// The highest ratio threshold not above `score / max_score`. Never
    /// returns `QueenBee`.
    pub fn for_score(score: u32, max_score: u32) -> Rank {
        if max_score == 0 {
            return Rank::Beginner;
        }
        // Integer form of `percent / 100 <= score / max_score`.
        let scaled = u64::from(score) * 100;
        RATIO_TABLE
            .iter()
            .rev()
            .find(|(p, _)| u64::from(*p) * u64::from(max_score) <= scaled)
            .map_or(Rank::Beginner, |(_, r)| *r)
    }

    /// Rank including the dedicated completion case.
    pub fn for_progress(words_found: u32, score: u32, stats: &PuzzleStats) -> Rank {
        if stats.max_words > 0 && words_found >= stats.max_words {
            Rank::QueenBee
        } else {
            Rank::for_score(score, stats.max_score)
        }
    }
}

/// Label for a score ratio.
pub fn progress_label(score: u32, max_score: u32) -> &'static str {
    Rank::for_score(score, max_score).label()
}

/// Every rank with its point threshold for display.
pub fn thresholds(max_score: u32) -> Vec<(Rank, u32)> {
    Rank::ALL
        .iter()
        .map(|r| (*r, r.threshold(max_score)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_stats() {
        let corpus = Corpus::from_words(["face", "beef", "cafe", "decaf", "zebra"]).unwrap();
        let key: PuzzleKey = "abcdefg".parse().unwrap();

        let stats = compute_stats(&key, &corpus);
        assert_eq!(stats.max_words, 3);
        assert_eq!(stats.max_score, 1 + 1 + 5);
        assert_eq!(valid_words(&key, &corpus), vec!["face", "cafe", "decaf"]);
    }

    #[test]
    fn test_progress_labels() {
        assert_eq!(progress_label(0, 100), "beginner");
        assert_eq!(progress_label(1, 100), "beginner");
        assert_eq!(progress_label(2, 100), "good start");
        assert_eq!(progress_label(49, 100), "great");
        assert_eq!(progress_label(50, 100), "amazing");
        assert_eq!(progress_label(70, 100), "genius");
        assert_eq!(progress_label(100, 100), "genius");
        assert_eq!(progress_label(5, 0), "beginner");
    }

    #[test]
    fn test_queen_bee_needs_every_word() {
        let stats = PuzzleStats {
            max_words: 10,
            max_score: 40,
        };
        assert_eq!(Rank::for_progress(9, 40, &stats), Rank::Genius);
        assert_eq!(Rank::for_progress(10, 40, &stats), Rank::QueenBee);
        assert_eq!(Rank::for_progress(0, 0, &PuzzleStats::default()), Rank::Beginner);
    }

    #[test]
    fn test_thresholds_round_up() {
        let table = thresholds(37);
        assert_eq!(table.first(), Some(&(Rank::Beginner, 0)));
        // ceil(0.02 * 37) = 1, ceil(0.15 * 37) = 6, ceil(0.7 * 37) = 26
        assert!(table.contains(&(Rank::GoodStart, 1)));
        assert!(table.contains(&(Rank::Solid, 6)));
        assert!(table.contains(&(Rank::Genius, 26)));
        assert_eq!(table.last(), Some(&(Rank::QueenBee, 37)));
    }
}
