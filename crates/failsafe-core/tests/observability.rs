//! Observability tests for fail-safe context tracing.
//!
//! These tests verify that structured tracing events are emitted for the
//! key lifecycle events: entry, restore, save, clear and snapshot loss.

use std::sync::Arc;

use failsafe_core::{
    emit_context_entered, emit_restore_failed, emit_snapshot_cleared, emit_snapshot_lost,
    emit_snapshot_restored, emit_snapshot_saved, Binding, ContextSpan, FailSafeState, RunError,
    METRICS,
};
use failsafe_state::fakes::{FaultyStorage, MemoryStorage, Operation};
use tracing_test::traced_test;

const KEY: &str = "savedstate.e0d922eb61462f5d";

#[derive(Debug)]
struct Boom;

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("boom")
    }
}

#[traced_test]
#[test]
fn test_emit_context_entered_logs_key() {
    emit_context_entered(KEY, 3);
    assert!(logs_contain("context.entered"));
    assert!(logs_contain(KEY));
}

#[traced_test]
#[test]
fn test_emit_snapshot_events() {
    emit_snapshot_restored(KEY, 2, 1, "2024-06-01T12:00:00+00:00");
    emit_snapshot_saved(KEY, 2, 128);
    emit_snapshot_cleared(KEY);
    assert!(logs_contain("snapshot.restored"));
    assert!(logs_contain("snapshot.saved"));
    assert!(logs_contain("snapshot.cleared"));
}

#[traced_test]
#[test]
fn test_emit_snapshot_lost_logs_error() {
    emit_snapshot_lost(KEY, &"disk full");
    assert!(logs_contain("snapshot.lost"));
    assert!(logs_contain("disk full"));
    assert!(logs_contain("ERROR"));
}

#[traced_test]
#[test]
fn test_emit_restore_failed_logs_warning() {
    emit_restore_failed(KEY, &"truncated snapshot");
    assert!(logs_contain("restore.failed"));
    assert!(logs_contain("WARN"));
}

#[traced_test]
#[test]
fn test_context_span_enter_creates_span() {
    let span = ContextSpan::enter(KEY);
    tracing::info!("inside context");
    drop(span);
    assert!(logs_contain("failsafe.context"));
}

#[traced_test]
#[test]
fn test_failed_then_resumed_run_logs_full_cycle() {
    let storage = Arc::new(MemoryStorage::new());

    let total = Binding::new(0);
    let mut first = FailSafeState::new();
    first
        .uses(storage.clone())
        .expect("uses")
        .attach("total", &total)
        .expect("attach");
    let _ = first.run(|| {
        total.set(5);
        Err::<(), _>(Boom)
    });
    assert!(logs_contain("context.entered"));
    assert!(logs_contain("snapshot.saved"));

    let total = Binding::new(0);
    let mut second = FailSafeState::new();
    second
        .uses(storage)
        .expect("uses")
        .attach("total", &total)
        .expect("attach");
    let out: Result<(), RunError<Boom>> = second.run(|| Ok(()));

    assert!(out.is_ok());
    assert!(logs_contain("snapshot.restored"));
    assert!(logs_contain("snapshot.cleared"));
}

#[traced_test]
#[test]
fn test_lost_snapshot_is_logged_and_counted() {
    let before = METRICS.snapshots_lost();
    let storage = Arc::new(FaultyStorage::new().failing(Operation::Save));
    let total = Binding::new(0);
    let mut state = FailSafeState::new();
    state
        .uses(storage)
        .expect("uses")
        .attach("total", &total)
        .expect("attach");

    let err = state.run(|| Err::<(), _>(Boom)).unwrap_err();

    assert!(err.is_snapshot_lost());
    assert!(logs_contain("snapshot.lost"));
    assert!(logs_contain("injected Save failure"));
    assert!(METRICS.snapshots_lost() > before);
}

#[traced_test]
#[test]
fn test_metrics_flush_logs_counters() {
    METRICS.flush();
    assert!(logs_contain("snapshots_saved"));
    assert!(logs_contain("snapshots_lost"));
}

#[traced_test]
#[test]
fn test_panic_with_lost_snapshot_is_counted() {
    let before = METRICS.snapshots_lost();
    let storage = Arc::new(FaultyStorage::new().failing(Operation::Save));
    let total = Binding::new(0);
    let mut state = FailSafeState::new();
    state
        .uses(storage)
        .expect("uses")
        .attach("total", &total)
        .expect("attach");

    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: Result<(), RunError<Boom>> = state.run(|| panic!("worker died"));
    }));

    let payload = caught.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"worker died"));
    assert!(logs_contain("snapshot.lost"));
    assert!(METRICS.snapshots_lost() > before);
}
