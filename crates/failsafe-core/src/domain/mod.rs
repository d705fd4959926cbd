//! Domain models for fail-safe contexts.
//!
//! - `Phase`: lifecycle state of one context
//! - error taxonomy shared by the registry, identity and orchestrator

pub mod error;
pub mod phase;

pub use error::{
    AttachmentError, AttachmentValueError, BindingError, CodecError, ConfigurationError,
    FailSafeError, LifecycleError, RestoreError, Result, RunError, SnapshotError,
};
pub use phase::Phase;
