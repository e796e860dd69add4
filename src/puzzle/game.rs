//! Game Records
//!
//! Persisted shapes for games and found words, plus the derived progress.
//! Field names serialize in camelCase; the local cache depends on it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::puzzle::key::PuzzleKey;
use crate::puzzle::stats::{PuzzleStats, Rank};
use crate::puzzle::validate::compute_score;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique game identifier.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub uuid::Uuid);

impl GameId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique user identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// GAME
// =============================================================================

/// A puzzle instance owned by one user, optionally shared with others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    /// Game identifier.
    pub id: GameId,
    /// Puzzle key.
    pub key: PuzzleKey,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creating user.
    pub owner_id: UserId,
    /// Cached count of valid words.
    pub max_words: u32,
    /// Cached maximum score.
    pub max_score: u32,
}

impl Game {
    /// Cached puzzle stats.
    pub fn stats(&self) -> PuzzleStats {
        PuzzleStats {
            max_words: self.max_words,
            max_score: self.max_score,
        }
    }
}

/// A game before a store has accepted it.
///
/// Stores keep `id` when present and assign one otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameDraft {
    /// Pre-assigned id (games created offline carry one).
    pub id: Option<GameId>,
    /// Puzzle key.
    pub key: PuzzleKey,
    /// Creating user.
    pub owner_id: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Stats computed at creation.
    pub stats: PuzzleStats,
}

impl GameDraft {
    /// Draft for `key` created now.
    pub fn new(key: PuzzleKey, owner_id: UserId, stats: PuzzleStats) -> Self {
        Self {
            id: None,
            key,
            owner_id,
            created_at: Utc::now(),
            stats,
        }
    }

    /// Finalize with `id`.
    pub fn into_game(self, id: GameId) -> Game {
        Game {
            id,
            key: self.key,
            created_at: self.created_at,
            owner_id: self.owner_id,
            max_words: self.stats.max_words,
            max_score: self.stats.max_score,
        }
    }
}

impl From<&Game> for GameDraft {
    fn from(game: &Game) -> Self {
        Self {
            id: Some(game.id),
            key: game.key,
            owner_id: game.owner_id,
            created_at: game.created_at,
            stats: game.stats(),
        }
    }
}

// =============================================================================
// FOUND WORDS
// =============================================================================

/// A word found in a game. `(game_id, word)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundWord {
    /// Game the word belongs to.
    pub game_id: GameId,
    /// The word.
    pub word: String,
    /// User who found it.
    pub finder_id: UserId,
    /// When it was found.
    pub added_at: DateTime<Utc>,
}

impl FoundWord {
    /// Word found now.
    pub fn new(game_id: GameId, word: impl Into<String>, finder_id: UserId) -> Self {
        Self {
            game_id,
            word: word.into(),
            finder_id,
            added_at: Utc::now(),
        }
    }
}

/// Per-user pointer to the game being played.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMeta {
    /// Current game, if any.
    pub current_game_id: Option<GameId>,
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Derived progress. Always recomputable from the found words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProgress {
    /// Number of words found.
    pub words_found: u32,
    /// Total score of those words.
    pub score: u32,
}

impl GameProgress {
    /// Recompute from a set of words.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        words.into_iter().fold(Self::default(), |acc, w| Self {
            words_found: acc.words_found + 1,
            score: acc.score + compute_score(w.as_ref()),
        })
    }
}

/// Everything the UI shows about a game's standing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
    /// Number of valid words.
    pub max_words: u32,
    /// Maximum score.
    pub max_score: u32,
    /// Words found so far.
    pub words_found: u32,
    /// Score so far.
    pub score: u32,
}

impl GameStats {
    /// Combine cached stats with live progress.
    pub fn new(stats: PuzzleStats, progress: GameProgress) -> Self {
        Self {
            max_words: stats.max_words,
            max_score: stats.max_score,
            words_found: progress.words_found,
            score: progress.score,
        }
    }

    /// Current rank.
    pub fn rank(&self) -> Rank {
        Rank::for_progress(
            self.words_found,
            self.score,
            &PuzzleStats {
                max_words: self.max_words,
                max_score: self.max_score,
            },
        )
    }
}
