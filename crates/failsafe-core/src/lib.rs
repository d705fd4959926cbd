//! Failsafe Core Library
//!
//! Runs a risky block of work inside a [`FailSafeState`] context. When the
//! block fails, the attached values are snapshotted to a storage backend and
//! the failure propagates unchanged. The next run of the same context restores
//! those values before the block starts again; a successful run clears the
//! snapshot.
//!
//! ```ignore
//! use std::sync::Arc;
//! use failsafe_core::{Binding, FailSafeState, LocalStorage};
//!
//! let cleaned: Binding<Vec<String>> = Binding::new(Vec::new());
//!
//! let mut state = FailSafeState::new();
//! state
//!     .uses(Arc::new(LocalStorage::create(".failsafe")?))?
//!     .attach("cleaned", &cleaned)?;
//!
//! state.run(|| {
//!     for (idx, raw) in inputs.iter().enumerate() {
//!         if idx < cleaned.borrow().len() {
//!             continue; // already done on a previous run
//!         }
//!         let value = risky_clean(raw)?;
//!         cleaned.borrow_mut().push(value);
//!     }
//!     Ok::<_, MyError>(())
//! })?;
//! ```

pub mod attachment;
pub mod codec;
pub mod config;
pub mod domain;
pub mod identity;
pub mod metrics;
pub mod obs;
pub mod state;
pub mod telemetry;

pub use attachment::{AttachmentRegistry, Binding};
pub use codec::{Codec, JsonCodec};
pub use config::FailSafeConfig;
pub use domain::{
    AttachmentError, AttachmentValueError, BindingError, CodecError, ConfigurationError,
    FailSafeError, LifecycleError, Phase, RestoreError, Result, RunError, SnapshotError,
};
pub use identity::{ContextIdentity, DEFAULT_LABEL};
pub use state::{ActiveScope, FailSafeState, RestoreReport};

pub use failsafe_state::{
    LocalStorage, MirroredStorage, Snapshot, SnapshotKey, StorageBackend, StorageError,
};

pub use metrics::METRICS;
pub use obs::{
    emit_context_entered, emit_restore_failed, emit_snapshot_cleared, emit_snapshot_lost,
    emit_snapshot_restored, emit_snapshot_saved, ContextSpan,
};
pub use telemetry::init_tracing;

/// Failsafe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
