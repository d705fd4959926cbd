//! Structured observability hooks for the fail-safe context lifecycle.
//!
//! - `ContextSpan`: RAII guard holding a context-scoped span while the
//!   context is active, so events from the body carry the snapshot key
//! - emission functions for entry, restore, save, clear and loss
//!
//! Events are emitted with an `event = "..."` field (filter via
//! `FAILSAFE_LOG` or `RUST_LOG`).

use tracing::{error, info, warn};

/// RAII guard that enters a context-scoped tracing span.
///
/// ```ignore
/// let _span = ContextSpan::enter("savedstate.e0d922eb61462f5d");
/// // tracing calls here carry key = "savedstate.e0d922eb61462f5d"
/// ```
pub struct ContextSpan {
    _span: tracing::span::EnteredSpan,
}

impl ContextSpan {
    pub fn enter(key: &str) -> Self {
        let span = tracing::info_span!("failsafe.context", key = %key);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_context_entered(key: &str, attachments: usize) {
    info!(event = "context.entered", key = %key, attachments = attachments);
}

/// Emit event: a prior snapshot was written into the bindings.
pub fn emit_snapshot_restored(key: &str, restored: usize, missing: usize, created_at: &str) {
    info!(
        event = "snapshot.restored",
        key = %key,
        restored = restored,
        missing = missing,
        created_at = %created_at,
    );
}

pub fn emit_snapshot_saved(key: &str, values: usize, bytes: usize) {
    info!(event = "snapshot.saved", key = %key, values = values, bytes = bytes);
}

pub fn emit_snapshot_cleared(key: &str) {
    info!(event = "snapshot.cleared", key = %key);
}

/// Emit event: the failure path could not persist its snapshot (error level).
pub fn emit_snapshot_lost(key: &str, error: &dyn std::fmt::Display) {
    error!(event = "snapshot.lost", key = %key, error = %error);
}

/// Emit event: a stored snapshot could not be applied (warn level).
pub fn emit_restore_failed(key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "restore.failed", key = %key, error = %error);
}
