//! Sync errors.

use thiserror::Error;

use crate::puzzle::corpus::ConfigurationError;
use crate::puzzle::game::{GameId, UserId};
use crate::puzzle::validate::ValidationError;
use crate::store::StorageError;

/// Errors from reconciling local and remote state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Merge inputs describe different games.
    #[error("Cannot merge game {local} with game {remote}")]
    GameMismatch {
        /// Local game id.
        local: GameId,
        /// Remote game id.
        remote: GameId,
    },

    /// User has no game in progress.
    #[error("No current game for user {0}")]
    NoGame(UserId),

    /// Operation needs a remote store and none is configured.
    #[error("No remote store configured")]
    NoRemote,

    /// Local or remote storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Puzzle could not be generated.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Why a word submission did not produce a found word.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The word was judged and rejected. Expected; shown to the player.
    #[error("{0}")]
    Rejected(#[from] ValidationError),

    /// Something went wrong around the judgement.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<StorageError> for SubmitError {
    fn from(err: StorageError) -> Self {
        match err {
            // The uniqueness constraint is the store's way of saying the
            // word was already found.
            StorageError::Conflict(_) => Self::Rejected(ValidationError::AlreadyFound),
            other => Self::Sync(SyncError::Storage(other)),
        }
    }
}

impl SubmitError {
    /// The rejection reason, when the word itself was at fault.
    pub fn rejection(&self) -> Option<ValidationError> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            Self::Sync(_) => None,
        }
    }
}
