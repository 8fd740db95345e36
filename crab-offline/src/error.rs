//! Error types for the offline sync core

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Sync error type
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Backend call failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No queued mutation with this sequence id
    #[error("Mutation not found: {0}")]
    MutationNotFound(u64),

    /// Operator action requires a failed mutation
    #[error("Mutation {0} is not in failed state")]
    NotFailed(u64),

    /// Mutation rejected before it was queued
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<redb::CommitError> for SyncError {
    fn from(e: redb::CommitError) -> Self {
        SyncError::Storage(StorageError::Commit(e))
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_error_maps_to_storage() {
        let err: SyncError = redb::CommitError::Storage(redb::StorageError::Corrupted("x".into())).into();
        assert!(matches!(err, SyncError::Storage(StorageError::Commit(_))));
    }
}
