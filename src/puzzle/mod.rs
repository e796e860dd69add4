//! Puzzle Engine
//!
//! Key generation, validation, scoring and stats. 100% deterministic and
//! free of I/O, so it is safe to call from any thread.
//!
//! ## Module Structure
//!
//! - `corpus`: Word list and weight blocks
//! - `key`: Puzzle keys and seeded generation
//! - `validate`: Word checks and scoring
//! - `stats`: Max words/score and rank table
//! - `game`: Game, found word and progress records

pub mod corpus;
pub mod game;
pub mod key;
pub mod stats;
pub mod validate;

// Re-export key types
pub use corpus::{ConfigurationError, Corpus, WeightBlock};
pub use game::{FoundWord, Game, GameDraft, GameId, GameProgress, GameStats, UserId, UserMeta};
pub use key::{KeyError, PuzzleKey};
pub use stats::{compute_stats, progress_label, thresholds, valid_words, PuzzleStats, Rank};
pub use validate::{compute_score, is_pangram, total_score, validate_word, ValidationError, WordCheck};
