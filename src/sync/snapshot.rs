//! Snapshots and Merge
//!
//! A snapshot is one side's view of a game: the game record plus its found
//! words. Progress is never stored on a snapshot; it is recomputed from the
//! words every time, so a merge can never disagree with its own score.
//!
//! ## Merge Rule
//!
//! The side with more found words wins (ties go to the remote). The result
//! keeps the winner's game record and the union of both word sets, so a
//! word found on either side is never lost.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::puzzle::game::{FoundWord, Game, GameProgress};
use crate::store::CachedGame;
use crate::sync::error::SyncError;

/// Which side of a merge prevailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// On-device state.
    Local,
    /// Store of record.
    Remote,
}

/// One side's view of a game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The game record.
    pub game: Game,
    /// Found words, by word.
    pub found_words: BTreeMap<String, FoundWord>,
    /// Latest change on this side.
    pub last_updated: DateTime<Utc>,
}

impl Snapshot {
    /// Build from a game and its words.
    ///
    /// Words from other games are dropped. A word listed twice keeps its
    /// earliest entry.
    pub fn new(game: Game, words: impl IntoIterator<Item = FoundWord>) -> Self {
        let mut found_words = BTreeMap::new();
        for word in words.into_iter().filter(|w| w.game_id == game.id) {
            insert_earliest(&mut found_words, word);
        }
        let last_updated = found_words
            .values()
            .map(|w: &FoundWord| w.added_at)
            .fold(game.created_at, DateTime::max);
        Self {
            game,
            found_words,
            last_updated,
        }
    }

    /// Snapshot of a cache entry.
    pub fn from_cached(entry: &CachedGame) -> Self {
        Self::new(entry.game.clone(), entry.words.iter().cloned())
    }

    /// Cache entry for this snapshot, words in the order they were found.
    pub fn to_cached(&self) -> CachedGame {
        let mut words: Vec<FoundWord> = self.found_words.values().cloned().collect();
        words.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.word.cmp(&b.word)));
        CachedGame {
            game: self.game.clone(),
            words,
        }
    }

    /// Number of found words.
    pub fn word_count(&self) -> usize {
        self.found_words.len()
    }

    /// The set of found words.
    pub fn word_set(&self) -> BTreeSet<String> {
        self.found_words.keys().cloned().collect()
    }

    /// Progress recomputed from the words.
    pub fn progress(&self) -> GameProgress {
        GameProgress::from_words(self.found_words.keys())
    }

    /// A copy with `word` added.
    pub fn with_word(&self, word: FoundWord) -> Self {
        let mut next = self.clone();
        next.last_updated = next.last_updated.max(word.added_at);
        insert_earliest(&mut next.found_words, word);
        next
    }
}

fn insert_earliest(words: &mut BTreeMap<String, FoundWord>, word: FoundWord) {
    match words.get(&word.word) {
        Some(existing) if existing.added_at <= word.added_at => {}
        _ => {
            words.insert(word.word.clone(), word);
        }
    }
}

/// Result of reconciling two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merged snapshot.
    pub snapshot: Snapshot,
    /// Side whose game record was kept.
    pub winner: Side,
    /// Progress of the merged snapshot.
    pub progress: GameProgress,
    /// Words the local side lacks.
    pub local_writes: Vec<FoundWord>,
    /// Words the remote side lacks.
    pub remote_writes: Vec<FoundWord>,
}

impl MergeOutcome {
    /// Whether the local side changes.
    pub fn local_changed(&self) -> bool {
        !self.local_writes.is_empty()
    }

    /// Whether the remote side changes.
    pub fn remote_changed(&self) -> bool {
        !self.remote_writes.is_empty()
    }
}

/// Reconcile a local and a remote snapshot of the same game.
///
/// The merged word count is at least the larger input count, and every
/// word on either side appears in the result.
pub fn merge(local: &Snapshot, remote: &Snapshot) -> Result<MergeOutcome, SyncError> {
    if local.game.id != remote.game.id {
        return Err(SyncError::GameMismatch {
            local: local.game.id,
            remote: remote.game.id,
        });
    }

    let winner = if local.word_count() > remote.word_count() {
        Side::Local
    } else {
        Side::Remote
    };
    let (base, other) = match winner {
        Side::Local => (local, remote),
        Side::Remote => (remote, local),
    };

    let mut snapshot = base.clone();
    for word in other.found_words.values() {
        insert_earliest(&mut snapshot.found_words, word.clone());
    }
    snapshot.last_updated = local.last_updated.max(remote.last_updated);

    let missing_from = |side: &Snapshot| -> Vec<FoundWord> {
        let mut words: Vec<FoundWord> = snapshot
            .found_words
            .values()
            .filter(|w| !side.found_words.contains_key(&w.word))
            .cloned()
            .collect();
        words.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.word.cmp(&b.word)));
        words
    };
    let local_writes = missing_from(local);
    let remote_writes = missing_from(remote);

    Ok(MergeOutcome {
        progress: snapshot.progress(),
        snapshot,
        winner,
        local_writes,
        remote_writes,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::game::{GameDraft, GameId, UserId};
    use crate::puzzle::stats::PuzzleStats;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const WORDS: [&str; 8] = ["face", "cafe", "decaf", "faced", "dace", "bead", "abed", "facade"];

    fn game() -> Game {
        GameDraft::new("abcdefg".parse().unwrap(), UserId::from_bytes([1; 16]), PuzzleStats::default())
            .into_game(GameId::from_bytes([9; 16]))
    }

    fn word_at(game: &Game, w: &str, second: u32) -> FoundWord {
        FoundWord {
            game_id: game.id,
            word: w.to_string(),
            finder_id: game.owner_id,
            added_at: Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, second).unwrap(),
        }
    }

    fn snapshot(words: &[(&str, u32)]) -> Snapshot {
        let game = game();
        let words: Vec<FoundWord> = words.iter().map(|(w, s)| word_at(&game, w, *s)).collect();
        Snapshot::new(game, words)
    }

    #[test]
    fn test_larger_side_wins_and_words_union() {
        let local = snapshot(&[("face", 1), ("cafe", 2), ("decaf", 3)]);
        let remote = snapshot(&[("face", 1), ("bead", 4)]);

        let outcome = merge(&local, &remote).unwrap();
        assert_eq!(outcome.winner, Side::Local);
        assert_eq!(outcome.snapshot.word_count(), 4);
        assert_eq!(outcome.progress, GameProgress::from_words(["face", "cafe", "decaf", "bead"]));
        assert_eq!(
            outcome.remote_writes.iter().map(|w| w.word.as_str()).collect::<Vec<_>>(),
            vec!["cafe", "decaf"]
        );
        assert_eq!(outcome.local_writes.len(), 1);
        assert_eq!(outcome.local_writes[0].word, "bead");
    }

    #[test]
    fn test_tie_goes_to_remote() {
        let local = snapshot(&[("face", 1)]);
        let remote = snapshot(&[("cafe", 2)]);
        let outcome = merge(&local, &remote).unwrap();
        assert_eq!(outcome.winner, Side::Remote);
        assert_eq!(outcome.snapshot.word_count(), 2);
    }

    #[test]
    fn test_identical_sides_write_nothing() {
        let side = snapshot(&[("face", 1), ("cafe", 2)]);
        let outcome = merge(&side, &side.clone()).unwrap();
        assert!(!outcome.local_changed());
        assert!(!outcome.remote_changed());
        assert_eq!(outcome.snapshot, side);
    }

    #[test]
    fn test_duplicate_keeps_earliest() {
        let local = snapshot(&[("face", 30)]);
        let remote = snapshot(&[("face", 10)]);
        let outcome = merge(&local, &remote).unwrap();
        assert_eq!(outcome.snapshot.found_words["face"].added_at, remote.found_words["face"].added_at);

        let merged_other_way = merge(&remote, &local).unwrap();
        assert_eq!(merged_other_way.snapshot.found_words, outcome.snapshot.found_words);
    }

    #[test]
    fn test_mismatched_games_refuse() {
        let local = snapshot(&[("face", 1)]);
        let mut remote = snapshot(&[]);
        remote.game.id = GameId::from_bytes([3; 16]);
        assert!(matches!(merge(&local, &remote), Err(SyncError::GameMismatch { .. })));
    }

    #[test]
    fn test_cache_entry_round_trip() {
        let side = snapshot(&[("cafe", 5), ("face", 1)]);
        let entry = side.to_cached();
        assert_eq!(entry.words[0].word, "face");
        assert_eq!(Snapshot::from_cached(&entry), side);
        assert_eq!(side.last_updated, entry.last_updated());
    }

    #[test]
    fn test_foreign_words_dropped() {
        let game = game();
        let mut stray = word_at(&game, "face", 1);
        stray.game_id = GameId::from_bytes([4; 16]);
        assert_eq!(Snapshot::new(game, [stray]).word_count(), 0);
    }

    fn side_strategy() -> impl Strategy<Value = Vec<(usize, u32)>> {
        prop::collection::vec((0..WORDS.len(), 0u32..60), 0..WORDS.len())
    }

    fn build(picks: &[(usize, u32)]) -> Snapshot {
        let words: Vec<(&str, u32)> = picks.iter().map(|(i, s)| (WORDS[*i], *s)).collect();
        snapshot(&words)
    }

    proptest! {
        #[test]
        fn prop_merge_never_loses_words(local in side_strategy(), remote in side_strategy()) {
            let local = build(&local);
            let remote = build(&remote);
            let outcome = merge(&local, &remote).unwrap();

            prop_assert!(outcome.snapshot.word_count() >= local.word_count().max(remote.word_count()));
            for w in local.found_words.keys().chain(remote.found_words.keys()) {
                prop_assert!(outcome.snapshot.found_words.contains_key(w));
            }
            prop_assert_eq!(outcome.progress, outcome.snapshot.progress());
            prop_assert_eq!(
                local.word_count() + outcome.local_writes.len(),
                outcome.snapshot.word_count()
            );
        }
    }
}
