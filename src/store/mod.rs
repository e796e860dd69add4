//! Storage Layer
//!
//! The narrow contract the engine consumes from a store of record, plus the
//! on-device cache. This layer is **non-deterministic** (I/O, clocks).
//!
//! - `memory`: In-memory store that pushes changes to subscribers
//! - `cache`: Local snapshot cache (JSON file or memory)

pub mod cache;
pub mod error;
pub mod memory;

use async_trait::async_trait;

use crate::puzzle::game::{FoundWord, Game, GameDraft, GameId, GameProgress, UserId, UserMeta};
use crate::sync::broker::{Callback, Subscription};

pub use cache::{CacheSource, CachedGame, JsonFileCache, LocalCache, MemoryCache};
pub use error::StorageError;
pub use memory::InMemoryStore;

/// A store of record for games and found words.
///
/// Implementations enforce `(game_id, word)` uniqueness and report a
/// duplicate as [`StorageError::Conflict`].
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Read the user's current-game pointer.
    async fn load_user_meta(&self, user: &UserId) -> Result<Option<UserMeta>, StorageError>;

    /// Point the user at a game.
    async fn set_current_game(&self, user: &UserId, game_id: &GameId) -> Result<(), StorageError>;

    /// Load a game. Fails with [`StorageError::NotFound`] if absent.
    async fn load_game(&self, game_id: &GameId) -> Result<Game, StorageError>;

    /// Games the user owns or has been shared into, oldest first.
    async fn load_games(&self, user: &UserId) -> Result<Vec<Game>, StorageError>;

    /// Words found in a game, in the order they were added.
    async fn load_words(&self, game_id: &GameId) -> Result<Vec<FoundWord>, StorageError>;

    /// Persist a new game, assigning an id when the draft has none.
    async fn add_game(&self, draft: GameDraft) -> Result<Game, StorageError>;

    /// Record a found word along with the finder's progress after it.
    ///
    /// `progress` is a cache for readers; it is never authoritative.
    async fn add_word(&self, word: &FoundWord, progress: &GameProgress) -> Result<FoundWord, StorageError>;

    /// Delete a game and its words.
    async fn remove_game(&self, game_id: &GameId) -> Result<(), StorageError>;

    /// Let another user play a game.
    async fn share_game(&self, game_id: &GameId, other: &UserId) -> Result<(), StorageError>;

    /// Revoke a share.
    async fn unshare_game(&self, game_id: &GameId, other: &UserId) -> Result<(), StorageError>;

    /// Watch a game's words.
    fn subscribe_to_words(&self, game_id: GameId, on_change: Callback<Vec<FoundWord>>) -> Subscription;

    /// Watch the games visible to a user.
    fn subscribe_to_new_games(&self, user: UserId, on_change: Callback<Vec<Game>>) -> Subscription;
}
