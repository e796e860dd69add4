//! In-memory store implementation
//!
//! Suitable for tests, the demo binary and as a stand-in remote. Every
//! mutation is pushed to subscribers through [`PushBroker`]s, the way a
//! real-time document store notifies its clients.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::puzzle::game::{FoundWord, Game, GameDraft, GameId, GameProgress, UserId, UserMeta};
use crate::store::{GameStore, StorageError};
use crate::sync::broker::{Callback, PushBroker, Subscription, SubscriptionBroker};

#[derive(Debug, Default)]
struct StoreState {
    games: BTreeMap<GameId, Game>,
    words: BTreeMap<GameId, Vec<FoundWord>>,
    shares: BTreeMap<GameId, BTreeSet<UserId>>,
    progress: BTreeMap<(GameId, UserId), GameProgress>,
    meta: BTreeMap<UserId, UserMeta>,
    /// Games whose stored record no longer parses.
    malformed: BTreeSet<GameId>,
}

impl StoreState {
    fn visible_games(&self, user: &UserId) -> Vec<Game> {
        let mut games: Vec<Game> = self
            .games
            .values()
            .filter(|g| g.owner_id == *user || self.is_shared_with(&g.id, user))
            .cloned()
            .collect();
        games.sort_by_key(|g| (g.created_at, g.id));
        games
    }

    fn is_shared_with(&self, game_id: &GameId, user: &UserId) -> bool {
        self.shares.get(game_id).is_some_and(|s| s.contains(user))
    }

    fn members(&self, game_id: &GameId) -> Vec<UserId> {
        let mut members: Vec<UserId> = self
            .shares
            .get(game_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        if let Some(game) = self.games.get(game_id) {
            members.push(game.owner_id);
        }
        members
    }
}

type SharedState = Arc<RwLock<StoreState>>;

/// Store of record held in memory.
pub struct InMemoryStore {
    state: SharedState,
    online: AtomicBool,
    words_watch: PushBroker<GameId, Vec<FoundWord>>,
    games_watch: PushBroker<UserId, Vec<Game>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        let state: SharedState = Arc::new(RwLock::new(StoreState::default()));

        let words_state = state.clone();
        let words_watch = PushBroker::new(move |game_id: &GameId| {
            read(&words_state).words.get(game_id).cloned().unwrap_or_default()
        });

        let games_state = state.clone();
        let games_watch = PushBroker::new(move |user: &UserId| read(&games_state).visible_games(user));

        Self {
            state,
            online: AtomicBool::new(true),
            words_watch,
            games_watch,
        }
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        debug!(online, "store connectivity changed");
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether operations currently succeed.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Damage a game's stored record so loading it fails with
    /// [`StorageError::Malformed`], as a record written by an incompatible
    /// client would.
    pub fn corrupt_game(&self, game_id: &GameId) {
        write(&self.state).malformed.insert(*game_id);
    }

    /// Last progress a finder reported for a game.
    pub fn cached_progress(&self, game_id: &GameId, user: &UserId) -> Option<GameProgress> {
        read(&self.state).progress.get(&(*game_id, *user)).copied()
    }

    /// Whether anyone is watching a game's words.
    pub fn is_watching_words(&self, game_id: &GameId) -> bool {
        self.words_watch.is_watching(game_id)
    }

    fn check_online(&self) -> Result<(), StorageError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StorageError::unavailable("in-memory store is offline"))
        }
    }

    fn publish_words(&self, game_id: &GameId) {
        let words = read(&self.state).words.get(game_id).cloned().unwrap_or_default();
        self.words_watch.publish(game_id, words);
    }

    fn publish_games(&self, users: &[UserId]) {
        for user in users {
            let games = read(&self.state).visible_games(user);
            self.games_watch.publish(user, games);
        }
    }
}

fn read(state: &SharedState) -> RwLockReadGuard<'_, StoreState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(state: &SharedState) -> RwLockWriteGuard<'_, StoreState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl GameStore for InMemoryStore {
    async fn load_user_meta(&self, user: &UserId) -> Result<Option<UserMeta>, StorageError> {
        self.check_online()?;
        Ok(read(&self.state).meta.get(user).copied())
    }

    async fn set_current_game(&self, user: &UserId, game_id: &GameId) -> Result<(), StorageError> {
        self.check_online()?;
        let mut state = write(&self.state);
        if !state.games.contains_key(game_id) {
            return Err(StorageError::not_found(format!("game {game_id}")));
        }
        state.meta.insert(
            *user,
            UserMeta {
                current_game_id: Some(*game_id),
            },
        );
        Ok(())
    }

    async fn load_game(&self, game_id: &GameId) -> Result<Game, StorageError> {
        self.check_online()?;
        let state = read(&self.state);
        if state.malformed.contains(game_id) {
            return Err(StorageError::Malformed(format!("game {game_id} is missing required fields")));
        }
        state
            .games
            .get(game_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("game {game_id}")))
    }

    async fn load_games(&self, user: &UserId) -> Result<Vec<Game>, StorageError> {
        self.check_online()?;
        Ok(read(&self.state).visible_games(user))
    }

    async fn load_words(&self, game_id: &GameId) -> Result<Vec<FoundWord>, StorageError> {
        self.check_online()?;
        Ok(read(&self.state).words.get(game_id).cloned().unwrap_or_default())
    }

    async fn add_game(&self, draft: GameDraft) -> Result<Game, StorageError> {
        self.check_online()?;
        let game = {
            let mut state = write(&self.state);
            let id = draft.id.unwrap_or_default();
            if let Some(existing) = state.games.get(&id) {
                // Re-publishing an offline game is a no-op.
                return Ok(existing.clone());
            }
            let game = draft.into_game(id);
            state.games.insert(id, game.clone());
            state.words.insert(id, Vec::new());
            game
        };
        debug!(game = %game.id, key = %game.key, "game added");
        self.publish_games(&[game.owner_id]);
        Ok(game)
    }

    async fn add_word(&self, word: &FoundWord, progress: &GameProgress) -> Result<FoundWord, StorageError> {
        self.check_online()?;
        {
            let mut state = write(&self.state);
            let Some(game) = state.games.get(&word.game_id) else {
                return Err(StorageError::not_found(format!("game {}", word.game_id)));
            };
            if game.owner_id != word.finder_id && !state.is_shared_with(&word.game_id, &word.finder_id) {
                return Err(StorageError::PermissionDenied(format!(
                    "user {} is not in game {}",
                    word.finder_id, word.game_id
                )));
            }
            let words = state.words.entry(word.game_id).or_default();
            if words.iter().any(|w| w.word == word.word) {
                return Err(StorageError::Conflict(format!(
                    "{} already found in {}",
                    word.word, word.game_id
                )));
            }
            words.push(word.clone());
            state.progress.insert((word.game_id, word.finder_id), *progress);
        }
        trace!(game = %word.game_id, word = %word.word, "word added");
        self.publish_words(&word.game_id);
        Ok(word.clone())
    }

    async fn remove_game(&self, game_id: &GameId) -> Result<(), StorageError> {
        self.check_online()?;
        let members = {
            let mut state = write(&self.state);
            let members = state.members(game_id);
            if state.games.remove(game_id).is_none() {
                return Err(StorageError::not_found(format!("game {game_id}")));
            }
            state.words.remove(game_id);
            state.shares.remove(game_id);
            state.malformed.remove(game_id);
            state.progress.retain(|(g, _), _| g != game_id);
            for meta in state.meta.values_mut() {
                if meta.current_game_id == Some(*game_id) {
                    meta.current_game_id = None;
                }
            }
            members
        };
        self.publish_words(game_id);
        self.publish_games(&members);
        Ok(())
    }

    async fn share_game(&self, game_id: &GameId, other: &UserId) -> Result<(), StorageError> {
        self.check_online()?;
        {
            let mut state = write(&self.state);
            if !state.games.contains_key(game_id) {
                return Err(StorageError::not_found(format!("game {game_id}")));
            }
            state.shares.entry(*game_id).or_default().insert(*other);
        }
        self.publish_games(&[*other]);
        Ok(())
    }

    async fn unshare_game(&self, game_id: &GameId, other: &UserId) -> Result<(), StorageError> {
        self.check_online()?;
        let removed = {
            let mut state = write(&self.state);
            state
                .shares
                .get_mut(game_id)
                .is_some_and(|s| s.remove(other))
        };
        if removed {
            self.publish_games(&[*other]);
        }
        Ok(())
    }

    fn subscribe_to_words(&self, game_id: GameId, on_change: Callback<Vec<FoundWord>>) -> Subscription {
        self.words_watch.subscribe(game_id, on_change)
    }

    fn subscribe_to_new_games(&self, user: UserId, on_change: Callback<Vec<Game>>) -> Subscription {
        self.games_watch.subscribe(user, on_change)
    }
}
