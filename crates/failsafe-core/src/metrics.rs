//! Global atomic counters for fail-safe snapshot traffic.
//!
//! Counters are bumped by the context at each exit path. Call
//! [`Metrics::flush`] to emit the current values as one `tracing::info!`
//! event, e.g. before a long-running job exits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Snapshot counters: no allocations, no locking.
pub struct Metrics {
    snapshots_saved: AtomicU64,
    snapshots_restored: AtomicU64,
    snapshots_cleared: AtomicU64,
    snapshots_lost: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            snapshots_saved: AtomicU64::new(0),
            snapshots_restored: AtomicU64::new(0),
            snapshots_cleared: AtomicU64::new(0),
            snapshots_lost: AtomicU64::new(0),
        }
    }

    pub fn inc_saved(&self) {
        self.snapshots_saved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_saved", "counter incremented");
    }

    pub fn inc_restored(&self) {
        self.snapshots_restored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_restored", "counter incremented");
    }

    pub fn inc_cleared(&self) {
        self.snapshots_cleared.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_cleared", "counter incremented");
    }

    /// A failure snapshot that could not be captured or saved.
    pub fn inc_lost(&self) {
        self.snapshots_lost.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_lost", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            snapshots_saved = self.snapshots_saved(),
            snapshots_restored = self.snapshots_restored(),
            snapshots_cleared = self.snapshots_cleared(),
            snapshots_lost = self.snapshots_lost(),
        );
    }

    pub fn snapshots_saved(&self) -> u64 {
        self.snapshots_saved.load(Ordering::Relaxed)
    }

    pub fn snapshots_restored(&self) -> u64 {
        self.snapshots_restored.load(Ordering::Relaxed)
    }

    pub fn snapshots_cleared(&self) -> u64 {
        self.snapshots_cleared.load(Ordering::Relaxed)
    }

    pub fn snapshots_lost(&self) -> u64 {
        self.snapshots_lost.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.snapshots_saved.store(0, Ordering::Relaxed);
        self.snapshots_restored.store(0, Ordering::Relaxed);
        self.snapshots_cleared.store(0, Ordering::Relaxed);
        self.snapshots_lost.store(0, Ordering::Relaxed);
    }
}
