//! Sync Engine
//!
//! Offline-first coordination between the local cache and an optional
//! remote store. Every local change lands in the cache first and the caller
//! gets its answer from there; remote writes happen in background tasks and
//! are retried with backoff until the store accepts them.
//!
//! ## Flow
//!
//! ```text
//!   submit_word ──▶ validate ──▶ cache write ──▶ WordAdded
//!                                    │
//!                                    └──▶ flush (task) ──▶ remote.add_word
//!                                               │ failure        │ ack
//!                                               ▼                ▼
//!                                        retry w/ backoff     Synced
//!
//!   remote words ──▶ remote_changed ──▶ merge ──▶ cache + remote writes ──▶ Merged
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock as StdRwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::puzzle::corpus::Corpus;
use crate::puzzle::game::{FoundWord, Game, GameDraft, GameId, GameProgress, GameStats, UserId};
use crate::puzzle::key::PuzzleKey;
use crate::puzzle::stats::compute_stats;
use crate::puzzle::validate::{validate_word, WordCheck};
use crate::store::{CacheSource, CachedGame, GameStore, LocalCache, StorageError};
use crate::sync::broker::{Callback, PollingBroker, Subscription, SubscriptionBroker};
use crate::sync::error::{SubmitError, SyncError};
use crate::sync::snapshot::{merge, Side, Snapshot};
use crate::sync::state::{RetryPolicy, SyncRecord, SyncState};

/// Tunables for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Backoff for failed remote writes.
    pub retry: RetryPolicy,
    /// How often local cache watches re-read the cache.
    pub poll_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Events broadcast by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A game's sync state moved.
    StateChanged {
        /// Game.
        game_id: GameId,
        /// Previous state.
        from: SyncState,
        /// New state.
        to: SyncState,
    },
    /// A word was accepted locally.
    WordAdded {
        /// Game.
        game_id: GameId,
        /// The word.
        word: FoundWord,
        /// Progress after the word.
        progress: GameProgress,
    },
    /// Local and remote state were reconciled.
    Merged {
        /// Game.
        game_id: GameId,
        /// Side whose game record was kept.
        winner: Side,
        /// Progress after the merge.
        progress: GameProgress,
    },
}

/// Outcome of one pass over a record's pending writes.
struct FlushReport {
    acked: Vec<String>,
    error: Option<StorageError>,
}

/// Offline-first sync coordinator.
pub struct SyncEngine {
    corpus: Arc<Corpus>,
    cache: Arc<dyn LocalCache>,
    remote: StdRwLock<Option<Arc<dyn GameStore>>>,
    options: SyncOptions,
    records: RwLock<BTreeMap<GameId, SyncRecord>>,
    /// Latest local snapshot of every game played here, current or not.
    games: RwLock<BTreeMap<(UserId, GameId), Snapshot>>,
    /// Serializes read-modify-write cycles on a user's cache entry.
    user_locks: Mutex<BTreeMap<UserId, Arc<Mutex<()>>>>,
    remote_watches: StdMutex<BTreeMap<GameId, Subscription>>,
    local_watch: PollingBroker<UserId, Option<CachedGame>>,
    event_tx: broadcast::Sender<SyncEvent>,
    weak_self: Weak<SyncEngine>,
}

impl SyncEngine {
    /// Create an engine. `remote` is `None` when playing logged out.
    pub fn new(
        corpus: Arc<Corpus>,
        cache: Arc<dyn LocalCache>,
        remote: Option<Arc<dyn GameStore>>,
        options: SyncOptions,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        let local_watch = PollingBroker::new(Arc::new(CacheSource(cache.clone())), options.poll_interval);

        Arc::new_cyclic(|weak_self| Self {
            corpus,
            cache,
            remote: StdRwLock::new(remote),
            options,
            records: RwLock::new(BTreeMap::new()),
            games: RwLock::new(BTreeMap::new()),
            user_locks: Mutex::new(BTreeMap::new()),
            remote_watches: StdMutex::new(BTreeMap::new()),
            local_watch,
            event_tx,
            weak_self: weak_self.clone(),
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Word list used for validation.
    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    /// Currently configured remote, if any.
    pub fn remote(&self) -> Option<Arc<dyn GameStore>> {
        self.remote
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether a remote store is configured.
    pub fn has_remote(&self) -> bool {
        self.remote().is_some()
    }

    /// Sync record for a game.
    pub async fn record(&self, game_id: GameId) -> Option<SyncRecord> {
        self.records.read().await.get(&game_id).cloned()
    }

    /// Sync state for a game.
    pub async fn state(&self, game_id: GameId) -> Option<SyncState> {
        self.record(game_id).await.map(|r| r.state)
    }

    /// Whether the engine is watching the remote for a game's words.
    pub fn is_watching_remote(&self, game_id: GameId) -> bool {
        lock(&self.remote_watches).contains_key(&game_id)
    }

    // =========================================================================
    // LOCAL READS
    // =========================================================================

    /// The user's current game as cached on this device.
    pub async fn current(&self, user: UserId) -> Result<Option<Snapshot>, SyncError> {
        Ok(self.cache.read(&user).await?.map(|entry| Snapshot::from_cached(&entry)))
    }

    /// Latest local snapshot of a game, whether or not it is current.
    pub async fn snapshot(&self, user: UserId, game_id: GameId) -> Result<Option<Snapshot>, SyncError> {
        match self.local_copy(user, game_id).await {
            Ok((snapshot, _)) => Ok(Some(snapshot)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stats for the user's current game.
    pub async fn game_stats(&self, user: UserId) -> Result<Option<GameStats>, SyncError> {
        Ok(self
            .current(user)
            .await?
            .map(|snapshot| GameStats::new(snapshot.game.stats(), snapshot.progress())))
    }

    /// Watch the user's cache entry. The current entry is delivered first.
    pub fn watch_local(&self, user: UserId, on_change: Callback<Option<CachedGame>>) -> Subscription {
        self.local_watch.subscribe(user, on_change)
    }

    // =========================================================================
    // BOOTSTRAP
    // =========================================================================

    /// Reconcile the user's cached game with the remote.
    ///
    /// Falls back to the cached game when the remote is unreachable; its
    /// words are flushed once the remote comes back.
    #[instrument(skip(self), fields(%user))]
    pub async fn open(&self, user: UserId) -> Result<Option<Snapshot>, SyncError> {
        let local = self.current(user).await?;

        let Some(remote) = self.remote() else {
            if let Some(snapshot) = &local {
                self.remember(user, snapshot).await;
                self.update_record(snapshot.game.id, user, SyncRecord::clone).await;
            }
            return Ok(local);
        };

        let game_id = match &local {
            Some(snapshot) => Some(snapshot.game.id),
            None => match remote.load_user_meta(&user).await {
                Ok(meta) => meta.and_then(|m| m.current_game_id),
                Err(e) => {
                    warn!("remote unreachable at startup: {}", e);
                    None
                }
            },
        };
        let Some(game_id) = game_id else {
            debug!("no game to open");
            return Ok(None);
        };

        let user_lock = self.user_lock(user).await;
        let _guard = user_lock.lock().await;

        match (local, self.load_remote(remote.as_ref(), game_id).await) {
            (Some(local), Ok(Some(remote_snapshot))) => {
                let merged = self.reconcile(user, &local, &remote_snapshot, remote.as_ref()).await?;
                self.watch_remote(game_id);
                Ok(Some(merged))
            }
            (Some(local), found) => {
                if let Err(e) = found {
                    warn!(%game_id, "remote unreachable, playing from cache: {}", e);
                }
                self.remember(user, &local).await;
                self.seed_pending(&local, user).await;
                self.schedule_flush(game_id, Duration::ZERO);
                Ok(Some(local))
            }
            (None, Ok(Some(remote_snapshot))) => {
                self.cache.write(&user, &remote_snapshot.to_cached()).await?;
                self.remember(user, &remote_snapshot).await;
                self.update_record(game_id, user, |r| SyncRecord::synced(r.game_id, r.user))
                    .await;
                self.watch_remote(game_id);
                info!(%game_id, words = remote_snapshot.word_count(), "game restored from remote");
                Ok(Some(remote_snapshot))
            }
            (None, Ok(None)) => Ok(None),
            (None, Err(e)) => Err(e.into()),
        }
    }

    /// Mark every cached word as unacknowledged unless already tracked.
    async fn seed_pending(&self, snapshot: &Snapshot, user: UserId) {
        let words: Vec<FoundWord> = snapshot.found_words.values().cloned().collect();
        let has_remote = self.has_remote();
        let now = Utc::now();
        let mut records = self.records.write().await;
        let record = records
            .entry(snapshot.game.id)
            .or_insert_with(|| SyncRecord::new(snapshot.game.id, user));
        if record.state == SyncState::Local {
            let mut next = record.local_mutation(None, has_remote, now);
            for word in words {
                next.pending.entry(word.word.clone()).or_insert(word);
            }
            *record = next;
        }
    }

    // =========================================================================
    // GAMES
    // =========================================================================

    /// Start a new game for the user, generating a key from `seed`.
    pub async fn create_game(&self, user: UserId, seed: Option<&str>) -> Result<Snapshot, SyncError> {
        let key = PuzzleKey::generate_seeded(&self.corpus, seed)?;
        self.create_game_with_key(user, key).await
    }

    /// Start a new game for the user with a given key.
    pub async fn create_game_with_key(&self, user: UserId, key: PuzzleKey) -> Result<Snapshot, SyncError> {
        let stats = compute_stats(&key, &self.corpus);
        let game = GameDraft::new(key, user, stats).into_game(GameId::new());
        info!(game = %game.id, %key, max_words = stats.max_words, max_score = stats.max_score, "game created");
        self.start_game(user, game).await
    }

    /// Make `game` the user's current game.
    ///
    /// Words found earlier on this device or already on the remote for that
    /// game are brought in. The outgoing game keeps syncing in the background.
    #[instrument(skip(self, game), fields(%user, game = %game.id))]
    pub async fn start_game(&self, user: UserId, game: Game) -> Result<Snapshot, SyncError> {
        let user_lock = self.user_lock(user).await;
        let _guard = user_lock.lock().await;

        if let Some(previous) = self.cache.read(&user).await? {
            if previous.game.id == game.id {
                return Ok(Snapshot::from_cached(&previous));
            }
            self.remember(user, &Snapshot::from_cached(&previous)).await;
            self.unwatch_remote(previous.game.id);
        }

        let game_id = game.id;
        let remote = self.remote();
        let existing = match &remote {
            Some(remote) => match self.load_remote(remote.as_ref(), game_id).await {
                Ok(found) => found.map(|snapshot| (remote.clone(), snapshot)),
                Err(e) => {
                    warn!("remote unreachable, starting game locally: {}", e);
                    None
                }
            },
            None => None,
        };
        let local = self.games.read().await.get(&(user, game_id)).cloned();

        let snapshot = match (local, existing) {
            (local, Some((remote, remote_snapshot))) => {
                let snapshot = match local {
                    Some(local) => {
                        self.cache.write(&user, &local.to_cached()).await?;
                        self.reconcile(user, &local, &remote_snapshot, remote.as_ref()).await?
                    }
                    None => {
                        self.cache.write(&user, &remote_snapshot.to_cached()).await?;
                        self.remember(user, &remote_snapshot).await;
                        self.update_record(game_id, user, |r| SyncRecord::synced(r.game_id, r.user))
                            .await;
                        remote_snapshot
                    }
                };
                if let Err(e) = remote.set_current_game(&user, &game_id).await {
                    warn!("could not update remote current game: {}", e);
                }
                self.watch_remote(game_id);
                snapshot
            }
            (local, None) => {
                let snapshot = local.unwrap_or_else(|| Snapshot::new(game, []));
                self.cache.write(&user, &snapshot.to_cached()).await?;
                self.remember(user, &snapshot).await;
                let has_remote = remote.is_some();
                self.update_record(game_id, user, |r| r.local_mutation(None, has_remote, Utc::now()))
                    .await;
                if has_remote {
                    self.schedule_flush(game_id, Duration::ZERO);
                }
                snapshot
            }
        };
        Ok(snapshot)
    }

    /// Drop all local state for a game (after it was removed).
    pub async fn forget_game(&self, user: UserId, game_id: GameId) -> Result<(), SyncError> {
        let user_lock = self.user_lock(user).await;
        let _guard = user_lock.lock().await;

        self.unwatch_remote(game_id);
        self.records.write().await.remove(&game_id);
        self.games.write().await.remove(&(user, game_id));
        if let Some(entry) = self.cache.read(&user).await? {
            if entry.game.id == game_id {
                self.cache.clear(&user).await?;
            }
        }
        info!(%game_id, "game forgotten");
        Ok(())
    }

    // =========================================================================
    // WORDS
    // =========================================================================

    /// Validate and record a word in the user's current game.
    ///
    /// Returns once the word is in the local cache; the remote write happens
    /// in the background.
    #[instrument(skip(self), fields(%user))]
    pub async fn submit_word(&self, user: UserId, word: &str) -> Result<FoundWord, SubmitError> {
        let word = word.trim().to_lowercase();

        let user_lock = self.user_lock(user).await;
        let guard = user_lock.lock().await;

        let Some(entry) = self.cache.read(&user).await? else {
            return Err(SyncError::NoGame(user).into());
        };
        let snapshot = Snapshot::from_cached(&entry);
        let game_id = snapshot.game.id;

        let check = WordCheck {
            word: &word,
            key: &snapshot.game.key,
            already_found: &snapshot.word_set(),
        };
        if let Err(reason) = validate_word(check, &self.corpus) {
            debug!(%word, %reason, "word rejected");
            return Err(reason.into());
        }

        let found = FoundWord::new(game_id, word, user);
        let next = snapshot.with_word(found.clone());
        self.cache.write(&user, &next.to_cached()).await?;
        self.remember(user, &next).await;

        let has_remote = self.has_remote();
        let pending = found.clone();
        self.update_record(game_id, user, |r| r.local_mutation(Some(pending), has_remote, Utc::now()))
            .await;
        drop(guard);

        let progress = next.progress();
        info!(word = %found.word, score = progress.score, words = progress.words_found, "word found");
        let _ = self.event_tx.send(SyncEvent::WordAdded {
            game_id,
            word: found.clone(),
            progress,
        });

        if has_remote {
            self.schedule_flush(game_id, Duration::ZERO);
        }
        Ok(found)
    }

    // =========================================================================
    // REMOTE WRITES
    // =========================================================================

    /// Push a game's pending writes to the remote.
    ///
    /// A failed write leaves the record `Syncing` and schedules a retry.
    #[instrument(skip(self))]
    pub async fn flush(&self, game_id: GameId) -> Result<SyncState, SyncError> {
        let remote = self.remote().ok_or(SyncError::NoRemote)?;
        let Some(record) = self.record(game_id).await else {
            return Err(StorageError::not_found(format!("sync record for game {game_id}")).into());
        };
        let user = record.user;

        let user_lock = self.user_lock(user).await;
        let _guard = user_lock.lock().await;

        let mut record = self.record(game_id).await.unwrap_or(record);
        match record.state {
            SyncState::Synced => return Ok(SyncState::Synced),
            SyncState::Local => {
                record = self
                    .update_record(game_id, user, |r| r.local_mutation(None, true, Utc::now()))
                    .await;
            }
            SyncState::Syncing | SyncState::Conflict => {}
        }

        let report = self.push(remote.as_ref(), &record).await;
        let failed = report.error.is_some();
        let next = self
            .update_record(game_id, user, |r| match (failed, report.acked.is_empty()) {
                (true, true) => r.write_failed(),
                (true, false) => r.write_acked(report.acked.iter().map(String::as_str)).write_failed(),
                (false, _) => r.write_acked(report.acked.iter().map(String::as_str)),
            })
            .await;

        if let Some(e) = report.error {
            let delay = self.retry_after(&next, e.is_transient());
            warn!(
                attempt = next.attempts,
                delay_ms = delay.as_millis() as u64,
                "remote write failed, will retry: {}",
                e
            );
            self.schedule_flush(game_id, delay);
        } else {
            debug!(acked = report.acked.len(), state = ?next.state, "flushed");
        }
        Ok(next.state)
    }

    async fn push(&self, remote: &dyn GameStore, record: &SyncRecord) -> FlushReport {
        let mut report = FlushReport {
            acked: Vec::new(),
            error: None,
        };

        let (snapshot, current) = match self.local_copy(record.user, record.game_id).await {
            Ok(found) => found,
            Err(e) => {
                report.error = Some(e);
                return report;
            }
        };

        if !record.remote_known {
            let published = async {
                remote.add_game(GameDraft::from(&snapshot.game)).await?;
                if current {
                    remote.set_current_game(&record.user, &record.game_id).await?;
                }
                Ok::<(), StorageError>(())
            };
            if let Err(e) = published.await {
                report.error = Some(e);
                return report;
            }
            info!(game = %record.game_id, "game published to remote");
            self.update_record(record.game_id, record.user, SyncRecord::game_published)
                .await;
            if current {
                self.watch_remote(record.game_id);
            }
        }

        let progress = snapshot.progress();
        let mut pending: Vec<&FoundWord> = record.pending.values().collect();
        pending.sort_by_key(|w| w.added_at);
        for word in pending {
            match remote.add_word(word, &progress).await {
                Ok(_) => report.acked.push(word.word.clone()),
                Err(StorageError::Conflict(_)) => {
                    debug!(word = %word.word, "already on remote");
                    report.acked.push(word.word.clone());
                }
                Err(e) => {
                    report.error = Some(e);
                    break;
                }
            }
        }
        report
    }

    fn schedule_flush(&self, game_id: GameId, delay: Duration) {
        let engine = self.weak_self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if let Err(e) = engine.flush(game_id).await {
                debug!(%game_id, "flush skipped: {}", e);
            }
        });
    }

    // =========================================================================
    // REMOTE READS
    // =========================================================================

    async fn load_remote(&self, remote: &dyn GameStore, game_id: GameId) -> Result<Option<Snapshot>, StorageError> {
        let game = match remote.load_game(&game_id).await {
            Ok(game) => game,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(StorageError::Malformed(reason)) => {
                warn!(%game_id, "malformed remote game treated as absent: {}", reason);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let words = remote.load_words(&game_id).await?;
        Ok(Some(Snapshot::new(game, words)))
    }

    fn watch_remote(&self, game_id: GameId) {
        let Some(remote) = self.remote() else {
            return;
        };
        let mut watches = lock(&self.remote_watches);
        if watches.contains_key(&game_id) {
            return;
        }

        let engine = self.weak_self.clone();
        let on_change: Callback<Vec<FoundWord>> = Arc::new(move |words: &Vec<FoundWord>| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            let words = words.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { engine.on_remote_words(game_id, words).await });
                }
                Err(_) => warn!(%game_id, "remote change outside a runtime dropped"),
            }
        });
        debug!(%game_id, "watching remote words");
        watches.insert(game_id, remote.subscribe_to_words(game_id, on_change));
    }

    fn unwatch_remote(&self, game_id: GameId) {
        let removed = lock(&self.remote_watches).remove(&game_id);
        if let Some(subscription) = removed {
            subscription.off();
            debug!(%game_id, "stopped watching remote words");
        }
    }

    /// Handle a remote snapshot of a game's words.
    async fn on_remote_words(&self, game_id: GameId, words: Vec<FoundWord>) {
        let Some(record) = self.record(game_id).await else {
            return;
        };
        let Some(remote) = self.remote() else {
            return;
        };
        let user = record.user;

        let user_lock = self.user_lock(user).await;
        let _guard = user_lock.lock().await;

        let local = match self.local_copy(user, game_id).await {
            Ok((local, _)) => local,
            Err(e) => {
                debug!(%game_id, "remote change ignored, no local copy: {}", e);
                return;
            }
        };

        if let Some(remote_updated) = words.iter().map(|w| w.added_at).max() {
            self.update_record(game_id, user, |r| r.remote_changed(remote_updated))
                .await;
        }

        let remote_snapshot = Snapshot::new(local.game.clone(), words);
        if let Err(e) = self.reconcile(user, &local, &remote_snapshot, remote.as_ref()).await {
            warn!(%game_id, "merge failed: {}", e);
        }
    }

    /// Merge, then write the result back to whichever side lacks it.
    ///
    /// Callers hold the user's lock.
    async fn reconcile(
        &self,
        user: UserId,
        local: &Snapshot,
        remote_snapshot: &Snapshot,
        remote: &dyn GameStore,
    ) -> Result<Snapshot, SyncError> {
        let game_id = local.game.id;
        let outcome = merge(local, remote_snapshot)?;
        let was_conflict = self.state(game_id).await == Some(SyncState::Conflict);

        self.remember(user, &outcome.snapshot).await;
        if outcome.local_changed() && self.is_current(user, game_id).await? {
            self.cache.write(&user, &outcome.snapshot.to_cached()).await?;
        }

        let mut unsent = Vec::new();
        let mut transient = true;
        for word in &outcome.remote_writes {
            match remote.add_word(word, &outcome.progress).await {
                Ok(_) | Err(StorageError::Conflict(_)) => {}
                Err(e) => {
                    warn!(word = %word.word, "merge write-back failed: {}", e);
                    transient &= e.is_transient();
                    unsent.push(word.clone());
                }
            }
        }

        if unsent.is_empty() {
            self.update_record(game_id, user, SyncRecord::merge_written).await;
        } else {
            let next = self
                .update_record(game_id, user, |r| {
                    let mut next = r.merge_written().local_mutation(None, true, Utc::now());
                    for word in unsent {
                        next.pending.insert(word.word.clone(), word);
                    }
                    next.write_failed()
                })
                .await;
            self.schedule_flush(game_id, self.retry_after(&next, transient));
        }

        if outcome.local_changed() || outcome.remote_changed() || was_conflict {
            info!(
                %game_id,
                winner = ?outcome.winner,
                words = outcome.progress.words_found,
                score = outcome.progress.score,
                "snapshots merged"
            );
            let _ = self.event_tx.send(SyncEvent::Merged {
                game_id,
                winner: outcome.winner,
                progress: outcome.progress,
            });
        }
        Ok(outcome.snapshot)
    }

    // =========================================================================
    // CONNECTIVITY
    // =========================================================================

    /// Attach a remote store (after login) and flush everything held locally.
    pub async fn connect(&self, remote: Arc<dyn GameStore>) {
        *self
            .remote
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(remote);

        let waiting: Vec<(GameId, UserId)> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.state != SyncState::Synced)
            .map(|r| (r.game_id, r.user))
            .collect();
        info!(games = waiting.len(), "remote connected");

        for (game_id, user) in waiting {
            self.update_record(game_id, user, |r| r.local_mutation(None, true, Utc::now()))
                .await;
            self.schedule_flush(game_id, Duration::ZERO);
        }
    }

    /// Detach the remote store (logout). Local play continues.
    pub fn disconnect(&self) {
        *self
            .remote
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        let watches = std::mem::take(&mut *lock(&self.remote_watches));
        for subscription in watches.values() {
            subscription.off();
        }
        info!("remote disconnected");
    }

    // =========================================================================
    // RECORDS
    // =========================================================================

    /// A game's local snapshot and whether it is the user's current game.
    ///
    /// The cache holds the current game; other games come from memory.
    async fn local_copy(&self, user: UserId, game_id: GameId) -> Result<(Snapshot, bool), StorageError> {
        if let Some(entry) = self.cache.read(&user).await? {
            if entry.game.id == game_id {
                return Ok((Snapshot::from_cached(&entry), true));
            }
        }
        self.games
            .read()
            .await
            .get(&(user, game_id))
            .cloned()
            .map(|snapshot| (snapshot, false))
            .ok_or_else(|| StorageError::not_found(format!("local copy of game {game_id}")))
    }

    async fn is_current(&self, user: UserId, game_id: GameId) -> Result<bool, StorageError> {
        Ok(self
            .cache
            .read(&user)
            .await?
            .is_some_and(|entry| entry.game.id == game_id))
    }

    async fn remember(&self, user: UserId, snapshot: &Snapshot) {
        self.games
            .write()
            .await
            .insert((user, snapshot.game.id), snapshot.clone());
    }

    /// Transient failures back off from the initial delay; others wait the cap.
    fn retry_after(&self, record: &SyncRecord, transient: bool) -> Duration {
        if transient {
            record.retry_delay(&self.options.retry)
        } else {
            self.options.retry.max
        }
    }

    async fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        self.user_locks.lock().await.entry(user).or_default().clone()
    }

    /// Apply a transition, broadcasting state changes.
    async fn update_record(
        &self,
        game_id: GameId,
        user: UserId,
        transition: impl FnOnce(&SyncRecord) -> SyncRecord,
    ) -> SyncRecord {
        let (from, next) = {
            let mut records = self.records.write().await;
            let current = records
                .get(&game_id)
                .cloned()
                .unwrap_or_else(|| SyncRecord::new(game_id, user));
            let next = transition(&current);
            records.insert(game_id, next.clone());
            (current.state, next)
        };

        if from != next.state {
            info!(%game_id, ?from, to = ?next.state, "sync state changed");
            let _ = self.event_tx.send(SyncEvent::StateChanged {
                game_id,
                from,
                to: next.state,
            });
        }
        next
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// TESTS
// =============================================================================
