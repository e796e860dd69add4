//! Sync State Machine
//!
//! Per-game record of where local progress stands relative to the remote
//! store. Records are values: every transition returns a new record.
//!
//! ```text
//!   Local ──mutation (remote configured)──▶ Syncing ──ack──▶ Synced
//!                                             │                 │
//!                            newer remote snapshot         mutation
//!                                             ▼                 │
//!                                          Conflict ◀───────────┘ (via Syncing)
//!                                             │
//!                                   merge written back
//!                                             ▼
//!                                           Synced
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::puzzle::game::{FoundWord, GameId, UserId};

/// Where a game's progress stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Only on this device.
    Local,
    /// A write to the remote is in flight or waiting to be retried.
    Syncing,
    /// Local and remote agree.
    Synced,
    /// The remote changed under an unflushed local change.
    Conflict,
}

/// Backoff for failed remote writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial.saturating_mul(1 << shift).min(self.max)
    }
}

/// Sync bookkeeping for one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    /// Game this record tracks.
    pub game_id: GameId,
    /// User whose local cache holds the game.
    pub user: UserId,
    /// Current state.
    pub state: SyncState,
    /// When the in-flight local write began.
    pub baseline: Option<DateTime<Utc>>,
    /// Words not yet acknowledged by the remote, by word.
    pub pending: BTreeMap<String, FoundWord>,
    /// Consecutive failed flushes.
    pub attempts: u32,
    /// Whether the remote has accepted the game itself.
    pub remote_known: bool,
}

impl SyncRecord {
    /// A fresh on-device record.
    pub fn new(game_id: GameId, user: UserId) -> Self {
        Self {
            game_id,
            user,
            state: SyncState::Local,
            baseline: None,
            pending: BTreeMap::new(),
            attempts: 0,
            remote_known: false,
        }
    }

    /// A record for a game both sides already agree on.
    pub fn synced(game_id: GameId, user: UserId) -> Self {
        Self {
            state: SyncState::Synced,
            remote_known: true,
            ..Self::new(game_id, user)
        }
    }

    /// A local change: a word added, or the game switched to (`word` is
    /// `None`). With no remote configured the record stays `Local`.
    pub fn local_mutation(&self, word: Option<FoundWord>, remote_configured: bool, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if let Some(word) = word {
            next.pending.insert(word.word.clone(), word);
        }
        if !remote_configured {
            next.state = SyncState::Local;
            return next;
        }
        match self.state {
            SyncState::Local | SyncState::Synced => {
                next.state = SyncState::Syncing;
                next.baseline = Some(now);
            }
            SyncState::Syncing | SyncState::Conflict => {}
        }
        next
    }

    /// The remote accepted the game record.
    pub fn game_published(&self) -> Self {
        Self {
            remote_known: true,
            ..self.clone()
        }
    }

    /// The remote acknowledged `words`.
    ///
    /// Once nothing is pending a `Syncing` record becomes `Synced`; a
    /// `Conflict` waits for its merge.
    pub fn write_acked<'a>(&self, words: impl IntoIterator<Item = &'a str>) -> Self {
        let mut next = self.clone();
        for word in words {
            next.pending.remove(word);
        }
        next.attempts = 0;
        if next.pending.is_empty() && next.state == SyncState::Syncing {
            next.state = SyncState::Synced;
            next.baseline = None;
        }
        next
    }

    /// A remote write failed. The mutation is kept for the retry.
    pub fn write_failed(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }

    /// A remote snapshot last updated at `remote_updated` arrived.
    pub fn remote_changed(&self, remote_updated: DateTime<Utc>) -> Self {
        let newer = self.baseline.map_or(true, |baseline| remote_updated > baseline);
        if self.state == SyncState::Syncing && newer {
            Self {
                state: SyncState::Conflict,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }

    /// The merged result was written to both sides.
    pub fn merge_written(&self) -> Self {
        Self {
            state: SyncState::Synced,
            baseline: None,
            pending: BTreeMap::new(),
            attempts: 0,
            remote_known: true,
            ..self.clone()
        }
    }

    /// Delay before the next retry.
    pub fn retry_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.delay(self.attempts)
    }
}
