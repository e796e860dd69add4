//! Local Snapshot Cache
//!
//! On-device copy of each user's current game. The file format is a JSON
//! object keyed by user id, each value `{ "game": {...}, "words": [...] }`.
//! Existing caches must stay loadable, so the shape only ever grows
//! optional fields.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::puzzle::game::{FoundWord, Game, UserId};
use crate::store::StorageError;
use crate::sync::broker::PollSource;

/// One user's cached game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedGame {
    /// The game.
    pub game: Game,
    /// Words found so far.
    pub words: Vec<FoundWord>,
}

impl CachedGame {
    /// Latest timestamp in the entry.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.words
            .iter()
            .map(|w| w.added_at)
            .fold(self.game.created_at, DateTime::max)
    }
}

/// On-device cache of the current game per user.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Cached entry for `user`. Unreadable entries read as `None`.
    async fn read(&self, user: &UserId) -> Result<Option<CachedGame>, StorageError>;

    /// Replace the entry for `user`.
    async fn write(&self, user: &UserId, entry: &CachedGame) -> Result<(), StorageError>;

    /// Drop the entry for `user`.
    async fn clear(&self, user: &UserId) -> Result<(), StorageError>;
}

// =============================================================================
// JSON FILE
// =============================================================================

/// Cache persisted as a single JSON file.
#[derive(Debug)]
pub struct JsonFileCache {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileCache {
    /// Cache stored at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed file contents. `None` when the file exists but does not parse.
    async fn load(&self) -> Result<Option<BTreeMap<String, serde_json::Value>>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Some(BTreeMap::new())),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(BTreeMap::new()));
        }
        match serde_json::from_slice(&bytes) {
            Ok(map) => Ok(Some(map)),
            Err(e) => {
                warn!(path = %self.path.display(), "cache file unreadable: {}", e);
                Ok(None)
            }
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, serde_json::Value>, StorageError> {
        Ok(self.load().await?.unwrap_or_default())
    }

    /// Contents to modify. An unreadable file is moved aside first so the
    /// next write cannot destroy it.
    async fn read_for_update(&self) -> Result<BTreeMap<String, serde_json::Value>, StorageError> {
        if let Some(map) = self.load().await? {
            return Ok(map);
        }
        let aside = self.corrupt_path();
        tokio::fs::rename(&self.path, &aside).await?;
        warn!(path = %aside.display(), "unreadable cache file moved aside");
        Ok(BTreeMap::new())
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    async fn write_all(&self, map: &BTreeMap<String, serde_json::Value>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalCache for JsonFileCache {
    async fn read(&self, user: &UserId) -> Result<Option<CachedGame>, StorageError> {
        let mut map = self.read_all().await?;
        let Some(value) = map.remove(&user.to_string()) else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(%user, "malformed cache entry ignored: {}", e);
                Ok(None)
            }
        }
    }

    async fn write(&self, user: &UserId, entry: &CachedGame) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_for_update().await?;
        map.insert(user.to_string(), serde_json::to_value(entry)?);
        self.write_all(&map).await?;
        debug!(%user, words = entry.words.len(), "cache written");
        Ok(())
    }

    async fn clear(&self, user: &UserId) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_for_update().await?;
        if map.remove(&user.to_string()).is_some() {
            self.write_all(&map).await?;
        }
        Ok(())
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// Cache held in memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<UserId, CachedGame>>,
}

impl MemoryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn read(&self, user: &UserId) -> Result<Option<CachedGame>, StorageError> {
        Ok(self.entries.read().await.get(user).cloned())
    }

    async fn write(&self, user: &UserId, entry: &CachedGame) -> Result<(), StorageError> {
        self.entries.write().await.insert(*user, entry.clone());
        Ok(())
    }

    async fn clear(&self, user: &UserId) -> Result<(), StorageError> {
        self.entries.write().await.remove(user);
        Ok(())
    }
}

// =============================================================================
// POLLING
// =============================================================================

/// Adapts a cache for [`PollingBroker`](crate::sync::broker::PollingBroker).
pub struct CacheSource(pub Arc<dyn LocalCache>);

#[async_trait]
impl PollSource<UserId, Option<CachedGame>> for CacheSource {
    async fn poll(&self, user: &UserId) -> Result<Option<CachedGame>, StorageError> {
        self.0.read(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::game::{GameDraft, GameId};
    use crate::puzzle::stats::PuzzleStats;

    fn entry(owner: UserId) -> CachedGame {
        let game = GameDraft::new("abcdefg".parse().unwrap(), owner, PuzzleStats::default())
            .into_game(GameId::new());
        let words = vec![FoundWord::new(game.id, "face", owner)];
        CachedGame { game, words }
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache.json"));
        let user = UserId::new();
        let other = UserId::new();

        assert_eq!(cache.read(&user).await.unwrap(), None);

        let mine = entry(user);
        cache.write(&user, &mine).await.unwrap();
        cache.write(&other, &entry(other)).await.unwrap();
        assert_eq!(cache.read(&user).await.unwrap(), Some(mine));

        cache.clear(&user).await.unwrap();
        assert_eq!(cache.read(&user).await.unwrap(), None);
        assert!(cache.read(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_format_is_keyed_by_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = JsonFileCache::new(&path);
        let user = UserId::from_bytes([7; 16]);

        cache.write(&user, &entry(user)).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let slot = &raw["07070707-0707-0707-0707-070707070707"];
        assert_eq!(slot["game"]["key"], "abcdefg");
        assert_eq!(slot["words"][0]["word"], "face");
        assert!(slot["words"][0].get("finderId").is_some());
    }

    #[tokio::test]
    async fn test_existing_cache_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{
              "07070707-0707-0707-0707-070707070707": {
                "game": {
                  "id": "02020202-0202-0202-0202-020202020202",
                  "key": "abcdefg",
                  "createdAt": "2024-06-15T08:00:00Z",
                  "ownerId": "07070707-0707-0707-0707-070707070707",
                  "maxWords": 3,
                  "maxScore": 7
                },
                "words": [{
                  "gameId": "02020202-0202-0202-0202-020202020202",
                  "word": "cafe",
                  "finderId": "07070707-0707-0707-0707-070707070707",
                  "addedAt": "2024-06-15T08:05:00Z"
                }]
              },
              "08080808-0808-0808-0808-080808080808": { "game": 12 }
            }"#,
        )
        .unwrap();

        let cache = JsonFileCache::new(&path);
        let entry = cache
            .read(&UserId::from_bytes([7; 16]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.game.max_score, 7);
        assert_eq!(entry.words[0].word, "cafe");
        assert_eq!(entry.last_updated().to_rfc3339(), "2024-06-15T08:05:00+00:00");

        // A malformed entry reads as empty rather than failing.
        assert_eq!(cache.read(&UserId::from_bytes([8; 16])).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();
        let cache = JsonFileCache::new(&path);
        assert_eq!(cache.read(&UserId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_file_is_kept_aside_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"07070707-0707-0707-0707-070707070707": {"game"#).unwrap();
        let cache = JsonFileCache::new(&path);
        let user = UserId::new();

        let mine = entry(user);
        cache.write(&user, &mine).await.unwrap();

        let aside = dir.path().join("cache.json.corrupt");
        assert_eq!(
            std::fs::read_to_string(&aside).unwrap(),
            r#"{"07070707-0707-0707-0707-070707070707": {"game"#
        );
        assert_eq!(cache.read(&user).await.unwrap(), Some(mine));
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryCache::new();
        let user = UserId::new();
        cache.write(&user, &entry(user)).await.unwrap();
        assert!(cache.read(&user).await.unwrap().is_some());
        cache.clear(&user).await.unwrap();
        assert!(cache.read(&user).await.unwrap().is_none());
    }
}
