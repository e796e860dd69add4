//! Runtime configuration.
//!
//! Defaults suit a local checkout; each field can be overridden from the
//! environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::engine::SyncOptions;
use crate::sync::state::RetryPolicy;

/// Engine and binary configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Word list file.
    pub word_list: PathBuf,
    /// Local snapshot cache file.
    pub cache_path: PathBuf,
    /// Delay before the first retry of a failed remote write.
    pub retry_initial: Duration,
    /// Cap on the retry delay.
    pub retry_max: Duration,
    /// Interval of the polling broker over the local cache.
    pub poll_interval: Duration,
    /// Use the date-derived seed instead of a random one.
    pub daily: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            word_list: PathBuf::from("data/words.txt"),
            cache_path: PathBuf::from("buzzword-cache.json"),
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_millis(30_000),
            poll_interval: Duration::from_millis(1000),
            daily: false,
        }
    }
}

impl Config {
    /// Create config from environment variables.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            word_list: lookup("BUZZWORD_WORD_LIST")
                .map(PathBuf::from)
                .unwrap_or(defaults.word_list),
            cache_path: lookup("BUZZWORD_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            retry_initial: millis("BUZZWORD_RETRY_MS", defaults.retry_initial),
            retry_max: millis("BUZZWORD_RETRY_MAX_MS", defaults.retry_max),
            poll_interval: millis("BUZZWORD_POLL_MS", defaults.poll_interval),
            daily: lookup("BUZZWORD_DAILY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.daily),
        }
    }

    /// Sync engine options.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            retry: RetryPolicy {
                initial: self.retry_initial,
                max: self.retry_max.max(self.retry_initial),
            },
            poll_interval: self.poll_interval,
        }
    }
}
