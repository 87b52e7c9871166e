//! Error types for tether-sync.

use std::path::PathBuf;

use thiserror::Error;

use tether_core::StoreError;

use crate::orchestrator::SyncAttempt;

/// All errors that can arise from drift checks, merges and syncs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input; never worth retrying.
    #[error("validation error: {0}")]
    Validation(String),

    /// The snapshot store could not be reached. Raised before any write.
    #[error("snapshot store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Any other snapshot store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// Reading a location tree failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file write or removal failed while applying a sync.
    #[error("write failure at {path}: {source}")]
    WriteFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Restoring the pre-sync tree failed after `cause`.
    #[error("rollback failed for {} file(s) after: {cause}", failed_paths.len())]
    RollbackFailed {
        cause: Box<SyncError>,
        failed_paths: Vec<String>,
    },

    /// A sync failed mid-apply or mid-finalize. `attempt.status` says
    /// whether the target was restored (`rolled_back`) or not (`failed`).
    #[error(
        "sync of '{}' to {} failed ({}): {cause}",
        attempt.artifact_id,
        attempt.target,
        attempt.status
    )]
    SyncFailed {
        attempt: Box<SyncAttempt>,
        #[source]
        cause: Box<SyncError>,
    },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => SyncError::Validation(message),
            err if err.is_unavailable() => SyncError::StoreUnavailable(err),
            err => SyncError::Store(err),
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::WriteFailure`].
pub(crate) fn write_failure(path: impl Into<String>, source: std::io::Error) -> SyncError {
    SyncError::WriteFailure {
        path: path.into(),
        source,
    }
}
