//! Puzzle Service
//!
//! The surface the UI talks to. Games are addressed by id; the service
//! makes the addressed game current on this device before acting on it,
//! so every play goes through the sync engine's local-first path.

use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, instrument};

use crate::core::rng::daily_seed;
use crate::puzzle::corpus::ConfigurationError;
use crate::puzzle::game::{FoundWord, Game, GameId, GameStats, UserId};
use crate::puzzle::key::PuzzleKey;
use crate::store::{GameStore, StorageError};
use crate::sync::broker::{Callback, Subscription};
use crate::sync::engine::SyncEngine;
use crate::sync::error::{SubmitError, SyncError};
use crate::sync::snapshot::Snapshot;

/// Errors from the puzzle surface (other than word rejections).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Only the game's owner may do this.
    #[error("Only the owner may {action} game {game_id}")]
    NotOwner {
        /// Game.
        game_id: GameId,
        /// What was attempted.
        action: &'static str,
    },

    /// Operation needs the remote store.
    #[error("Not connected to a remote store")]
    Offline,

    /// Sync failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Puzzle could not be generated.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Puzzle operations for one device.
#[derive(Clone)]
pub struct PuzzleService {
    engine: Arc<SyncEngine>,
}

impl PuzzleService {
    /// Wrap an engine.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Create a game with `key`, or a freshly generated key, and make it
    /// the user's current game.
    #[instrument(skip(self), fields(%user))]
    pub async fn create_game(&self, user: UserId, key: Option<PuzzleKey>) -> Result<Game, ServiceError> {
        let snapshot = match key {
            Some(key) => self.engine.create_game_with_key(user, key).await?,
            None => self.engine.create_game(user, None).await?,
        };
        Ok(snapshot.game)
    }

    /// Create the puzzle of the day. Everyone gets the same key on `date`.
    pub async fn create_daily_game(&self, user: UserId, date: NaiveDate) -> Result<Game, ServiceError> {
        let seed = daily_seed(date);
        info!(%user, %seed, "creating daily game");
        Ok(self.engine.create_game(user, Some(&seed)).await?.game)
    }

    /// Max and current figures for a game.
    pub async fn get_game_stats(&self, user: UserId, game_id: GameId) -> Result<GameStats, ServiceError> {
        if let Some(snapshot) = self.engine.snapshot(user, game_id).await? {
            return Ok(GameStats::new(snapshot.game.stats(), snapshot.progress()));
        }
        let remote = self.remote()?;
        let game = self.visible_game(remote.as_ref(), user, game_id).await?;
        let words = remote.load_words(&game_id).await?;
        let snapshot = Snapshot::new(game, words);
        Ok(GameStats::new(snapshot.game.stats(), snapshot.progress()))
    }

    /// Judge and record a word in a game.
    ///
    /// Rejections come back as [`SubmitError::Rejected`]; the caller shows
    /// the reason to the player.
    pub async fn submit_word(&self, user: UserId, game_id: GameId, word: &str) -> Result<FoundWord, SubmitError> {
        self.enter_game(user, game_id).await?;
        self.engine.submit_word(user, word).await
    }

    /// Games the user owns or was shared into.
    pub async fn list_games(&self, user: UserId) -> Result<Vec<Game>, ServiceError> {
        Ok(self.remote()?.load_games(&user).await?)
    }

    /// Make a game the user's current game.
    pub async fn set_current_game(&self, user: UserId, game_id: GameId) -> Result<Game, ServiceError> {
        Ok(self.enter_game(user, game_id).await?)
    }

    /// Let `other` play one of the user's games.
    #[instrument(skip(self), fields(%user))]
    pub async fn share_game(&self, user: UserId, game_id: GameId, other: UserId) -> Result<(), ServiceError> {
        let remote = self.owned_game(user, game_id, "share").await?;
        remote.share_game(&game_id, &other).await?;
        info!(%game_id, %other, "game shared");
        Ok(())
    }

    /// Revoke a share.
    #[instrument(skip(self), fields(%user))]
    pub async fn unshare_game(&self, user: UserId, game_id: GameId, other: UserId) -> Result<(), ServiceError> {
        let remote = self.owned_game(user, game_id, "unshare").await?;
        remote.unshare_game(&game_id, &other).await?;
        info!(%game_id, %other, "game unshared");
        Ok(())
    }

    /// Delete one of the user's games everywhere.
    #[instrument(skip(self), fields(%user))]
    pub async fn remove_game(&self, user: UserId, game_id: GameId) -> Result<(), ServiceError> {
        let remote = self.owned_game(user, game_id, "remove").await?;
        remote.remove_game(&game_id).await?;
        self.engine.forget_game(user, game_id).await?;
        Ok(())
    }

    /// Watch the games visible to the user.
    pub fn watch_games(&self, user: UserId, on_change: Callback<Vec<Game>>) -> Result<Subscription, ServiceError> {
        Ok(self.remote()?.subscribe_to_new_games(user, on_change))
    }

    fn remote(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        self.engine.remote().ok_or(ServiceError::Offline)
    }

    /// Switch the device to `game_id` unless it is already current.
    async fn enter_game(&self, user: UserId, game_id: GameId) -> Result<Game, SyncError> {
        if let Some(snapshot) = self.engine.current(user).await? {
            if snapshot.game.id == game_id {
                return Ok(snapshot.game);
            }
        }
        if let Some(snapshot) = self.engine.snapshot(user, game_id).await? {
            return Ok(self.engine.start_game(user, snapshot.game).await?.game);
        }
        let remote = self
            .engine
            .remote()
            .ok_or_else(|| StorageError::not_found(format!("game {game_id}")))?;
        let game = self.visible_game(remote.as_ref(), user, game_id).await?;
        Ok(self.engine.start_game(user, game).await?.game)
    }

    /// Load a game the user is allowed to see.
    async fn visible_game(&self, remote: &dyn GameStore, user: UserId, game_id: GameId) -> Result<Game, StorageError> {
        let game = remote.load_game(&game_id).await?;
        if game.owner_id == user {
            return Ok(game);
        }
        let shared = remote.load_games(&user).await?.iter().any(|g| g.id == game_id);
        if shared {
            Ok(game)
        } else {
            Err(StorageError::PermissionDenied(format!("user {user} is not in game {game_id}")))
        }
    }

    async fn owned_game(
        &self,
        user: UserId,
        game_id: GameId,
        action: &'static str,
    ) -> Result<Arc<dyn GameStore>, ServiceError> {
        let remote = self.remote()?;
        let game = remote.load_game(&game_id).await?;
        if game.owner_id != user {
            return Err(ServiceError::NotOwner { game_id, action });
        }
        Ok(remote)
    }
}

// =============================================================================
// TESTS
// =============================================================================
