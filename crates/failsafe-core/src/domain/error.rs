//! Error taxonomy for fail-safe contexts.

use failsafe_state::StorageError;

use crate::domain::phase::Phase;

/// Boxed error produced by a codec implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors moving a value between a `Binding<T>` and its JSON value form.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("binding is mutably borrowed; release the borrow before the context exits")]
    Busy,

    #[error("cannot capture value of type {type_name}: {source}")]
    Capture {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored value does not fit type {type_name}: {source}")]
    Convert {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A `BindingError` tagged with the attachment it came from.
#[derive(Debug, thiserror::Error)]
#[error("attachment {name:?}: {source}")]
pub struct AttachmentValueError {
    pub name: String,
    #[source]
    pub source: BindingError,
}

/// Errors from a value codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{codec} codec failed to encode value: {source}")]
    Encode {
        codec: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{codec} codec failed to decode value: {source}")]
    Decode {
        codec: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Errors declaring attachments.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("attachment {name:?} is already attached")]
    Duplicate { name: String },

    #[error("attachment name {name:?} must match [A-Za-z_][A-Za-z0-9_]* and be at most 128 bytes")]
    InvalidName { name: String },

    #[error("attachment {name:?} has no capturable value: {source}")]
    Unserializable {
        name: String,
        #[source]
        source: BindingError,
    },

    #[error("cannot change attachment {name:?}: context is {phase}")]
    Sealed { name: String, phase: Phase },
}

/// Errors selecting the backend, label or codec, or deriving identity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("a storage backend is already selected for this context")]
    BackendAlreadySelected,

    #[error("no storage backend selected; call `uses` before entering the context")]
    NoBackend,

    #[error("no attachments declared; a context needs at least one attachment to derive its identity")]
    NoAttachments,

    #[error("label {label:?} must be 1-64 chars of [A-Za-z0-9_-]")]
    InvalidLabel { label: String },

    #[error("cannot reconfigure context: context is {phase}")]
    Sealed { phase: Phase },

    #[error(
        "identity mismatch: context resolves to {key} but storage holds {found} under the same label; \
         attach the same names, use a distinct label, or clear the stale snapshot"
    )]
    IdentityMismatch { key: String, found: String },

    #[error("state directory {path} is unusable: {source}")]
    StateDir {
        path: String,
        #[source]
        source: StorageError,
    },
}

/// Re-entry of a context that already ran.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("context is {phase}; a FailSafeState can be entered only once")]
    AlreadyEntered { phase: Phase },
}

/// A stored snapshot exists but cannot be applied. The snapshot is left in
/// storage untouched.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("storage failed while looking up snapshot {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("snapshot {key} was written by codec {found:?}, context uses {expected:?}")]
    CodecMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("cannot decode attachment {name:?} from snapshot {key}: {source}")]
    Decode {
        key: String,
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("cannot restore from snapshot {key}: {source}")]
    Convert {
        key: String,
        #[source]
        source: AttachmentValueError,
    },
}

/// The failure path could not persist a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("cannot capture {0}")]
    Capture(#[from] AttachmentValueError),

    #[error("cannot encode attachment {name:?}: {source}")]
    Encode {
        name: String,
        #[source]
        source: CodecError,
    },

    #[error("cannot save snapshot {key}: {source}")]
    Save {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Errors raised by the context itself, as opposed to the caller's body.
#[derive(Debug, thiserror::Error)]
pub enum FailSafeError {
    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("restore error: {0}")]
    Restore(#[from] RestoreError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Success path could not remove the stale snapshot, so success is not reported.
    #[error("run succeeded but stale snapshot {key} could not be cleared: {source}")]
    Clear {
        key: String,
        #[source]
        source: StorageError,
    },
}

/// Outcome of a failed `FailSafeState::run`.
///
/// `Body` carries the body's own error exactly as it was returned.
/// `SnapshotLost` is the secondary failure: the body failed *and* its
/// snapshot could not be persisted; the original error is kept intact.
#[derive(Debug, thiserror::Error)]
pub enum RunError<E> {
    #[error("{0}")]
    Body(E),

    #[error(transparent)]
    Context(#[from] FailSafeError),

    #[error("snapshot lost after body failure ({original}): {source}")]
    SnapshotLost {
        original: E,
        #[source]
        source: SnapshotError,
    },
}

impl<E> RunError<E> {
    /// The body's error, if the body ran and failed.
    pub fn body(&self) -> Option<&E> {
        match self {
            RunError::Body(e) | RunError::SnapshotLost { original: e, .. } => Some(e),
            RunError::Context(_) => None,
        }
    }

    /// Take the body's error, if the body ran and failed.
    pub fn into_body(self) -> Option<E> {
        match self {
            RunError::Body(e) | RunError::SnapshotLost { original: e, .. } => Some(e),
            RunError::Context(_) => None,
        }
    }

    /// Error raised by the context itself rather than the body.
    pub fn context(&self) -> Option<&FailSafeError> {
        match self {
            RunError::Context(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the body failed and its snapshot was not persisted.
    pub fn is_snapshot_lost(&self) -> bool {
        matches!(self, RunError::SnapshotLost { .. })
    }
}

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, FailSafeError>;
