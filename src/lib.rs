//! # Buzzword
//!
//! Seven-letter word puzzle engine with offline-first progress sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         BUZZWORD                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Xorshift128+ PRNG, permute, seeds         │
//! │                                                              │
//! │  puzzle/         - Puzzle logic (deterministic)              │
//! │  ├── corpus.rs   - Word list and weight blocks               │
//! │  ├── key.rs      - Puzzle keys and generation                │
//! │  ├── validate.rs - Word checks and scoring                   │
//! │  ├── stats.rs    - Max words/score, ranks                    │
//! │  └── game.rs     - Games, found words, progress              │
//! │                                                              │
//! │  store/          - Storage (non-deterministic)               │
//! │  ├── memory.rs   - In-memory store of record                 │
//! │  └── cache.rs    - Local snapshot cache                      │
//! │                                                              │
//! │  sync/           - Offline-first sync                        │
//! │  ├── broker.rs   - Subscription brokers                      │
//! │  ├── snapshot.rs - Snapshots and merge                       │
//! │  ├── state.rs    - Sync state machine                        │
//! │  └── engine.rs   - Coordinator                               │
//! │                                                              │
//! │  service.rs      - Puzzle surface for the UI                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `puzzle/` modules are **100% deterministic**:
//! - No HashMap (uses BTreeMap/BTreeSet for sorted iteration)
//! - No clocks or I/O in key generation, validation or scoring
//! - All randomness from seeded Xorshift128+
//!
//! The same seed and word list produce the same puzzle key on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod puzzle;
pub mod service;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use core::rng::{daily_seed, DeterministicRng};
pub use puzzle::{Corpus, FoundWord, Game, GameId, GameStats, PuzzleKey, PuzzleStats, Rank, UserId, ValidationError};
pub use service::{PuzzleService, ServiceError};
pub use store::{GameStore, InMemoryStore, JsonFileCache, LocalCache, StorageError};
pub use sync::{SubmitError, SyncEngine, SyncError, SyncEvent, SyncState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shortest accepted word.
pub const MIN_WORD_LENGTH: usize = 4;

/// Letters in a puzzle key, and distinct letters in a pangram.
pub const PANGRAM_LETTERS: usize = 7;
