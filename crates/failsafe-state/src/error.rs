//! Error types for failsafe-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the snapshot persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No snapshot stored under the key
    #[error("snapshot not found: {key}")]
    NotFound { key: String },

    /// Key string does not follow `<label>.<fingerprint>`
    #[error("invalid snapshot key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// Snapshot handed to `save` carries a different key
    #[error("snapshot key mismatch: saving under {expected}, snapshot carries {found}")]
    KeyMismatch { expected: String, found: String },

    /// Storage root is missing or is not a directory
    #[error("storage path must be an existing directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Stored bytes exist but cannot be parsed back into a snapshot
    #[error("snapshot {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot could not be serialized for writing
    #[error("failed to serialize snapshot {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Backend-specific failure for implementations outside this crate
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Io { path, source }
    }
}
