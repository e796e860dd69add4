//! Sync Layer
//!
//! Keeps the on-device cache and the remote store of record converging.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   submit/create   ┌──────────────┐
//!  │ PuzzleService│──────────────────▶│  SyncEngine  │──▶ SyncEvent (broadcast)
//!  └──────────────┘                   └──────┬───────┘
//!                                 cache first │ background flush
//!                          ┌─────────────────┼─────────────────┐
//!                          ▼                                   ▼
//!                   ┌────────────┐                      ┌────────────┐
//!                   │ LocalCache │◀─ PollingBroker      │ GameStore  │─▶ PushBroker
//!                   └────────────┘                      └────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - `broker`: Subscription brokers (push and polling)
//! - `snapshot`: Snapshots and the merge rule
//! - `state`: Per-game sync state machine and retry policy
//! - `engine`: The coordinator
//! - `error`: Sync and submission errors

pub mod broker;
pub mod engine;
pub mod error;
pub mod snapshot;
pub mod state;

pub use broker::{Callback, PollSource, PollingBroker, PushBroker, Subscription, SubscriptionBroker};
pub use engine::{SyncEngine, SyncEvent, SyncOptions};
pub use error::{SubmitError, SyncError};
pub use snapshot::{merge, MergeOutcome, Side, Snapshot};
pub use state::{RetryPolicy, SyncRecord, SyncState};
