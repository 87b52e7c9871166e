//! Error types for tether-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::VersionId;

/// All errors that can arise from snapshot store, manifest and config operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input: empty file set, unknown parent, bad identifier.
    #[error("validation error: {0}")]
    Validation(String),

    /// A version id that the store has never recorded.
    #[error("version not found: {id}")]
    VersionNotFound { id: VersionId },

    /// The persistence backend could not be read or written.
    #[error("snapshot store unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON error in a persisted store document.
    #[error("store JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// YAML serialization error (manifest/config write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl StoreError {
    /// True for errors that mean the backend itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Convenience constructor for [`StoreError::Unavailable`].
pub(crate) fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Unavailable {
        path: path.into(),
        source,
    }
}
