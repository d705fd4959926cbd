//! Lifecycle tests for fail-safe contexts.
//!
//! Covers the save-on-failure / restore-on-entry / clear-on-success cycle
//! against in-memory storage, including the failure modes of each step.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use failsafe_core::{
    Binding, Codec, ConfigurationError, FailSafeError, FailSafeState, JsonCodec, Phase,
    RestoreError, RunError, SnapshotError, SnapshotKey, StorageBackend, StorageError,
};
use failsafe_state::fakes::{FaultyStorage, MemoryStorage, Operation};
use failsafe_state::{EncodedValue, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
struct ValueError(String);

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueError: {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    id: u32,
    data: String,
}

/// Context over `storage` with a single `total` attachment.
fn total_context(storage: Arc<dyn StorageBackend>, total: &Binding<i64>) -> FailSafeState {
    let mut state = FailSafeState::new();
    state
        .uses(storage)
        .expect("uses")
        .attach("total", total)
        .expect("attach total");
    state
}

/// Decode one stored value with the JSON codec.
fn stored_value(storage: &dyn StorageBackend, key: &SnapshotKey, name: &str) -> Value {
    let snapshot = storage.load(key).expect("load snapshot");
    let encoded = snapshot.values.get(name).expect("value present");
    JsonCodec::new()
        .decode(encoded.as_bytes())
        .expect("decode value")
}

fn encode(value: Value) -> EncodedValue {
    EncodedValue::from(JsonCodec::new().encode(&value).expect("encode"))
}

#[test]
fn success_without_snapshot_leaves_nothing_behind() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage.clone(), &total);

    let out: Result<&str, RunError<ValueError>> = state.run(|| {
        total.set(7);
        Ok("done")
    });

    assert_eq!(out.expect("run succeeds"), "done");
    assert_eq!(total.get(), 7);
    assert_eq!(state.phase(), Phase::Succeeded);
    assert!(state.restored().is_none());
    assert!(storage.list().expect("list").is_empty());
    assert_eq!(storage.save_count(), 0);
    assert_eq!(storage.clear_count(), 0);
}

#[test]
fn failure_snapshots_values_at_the_failure_point() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage.clone(), &total);
    let key = state.identity().expect("identity").key().clone();

    let err = state
        .run(|| {
            total.set(5);
            Err::<(), _>(ValueError("row 5 is malformed".to_string()))
        })
        .unwrap_err();

    assert!(matches!(&err, RunError::Body(e) if e.0 == "row 5 is malformed"));
    assert_eq!(err.to_string(), "ValueError: row 5 is malformed");
    assert_eq!(state.phase(), Phase::Failed);
    assert!(storage.exists(&key).expect("exists"));
    assert_eq!(stored_value(&*storage, &key, "total"), json!(5));

    let snapshot = storage.load(&key).expect("load");
    assert_eq!(snapshot.names, vec!["total".to_string()]);
    assert_eq!(snapshot.codec, "json");
}

#[test]
fn rerun_restores_then_success_clears() {
    let storage = Arc::new(MemoryStorage::new());

    let total = Binding::new(0);
    let mut first = total_context(storage.clone(), &total);
    let _ = first.run(|| {
        total.set(5);
        Err::<(), _>(ValueError("boom".to_string()))
    });

    let total = Binding::new(0);
    let mut second = total_context(storage.clone(), &total);
    let key = second.identity().expect("identity").key().clone();

    let seen: Result<i64, RunError<ValueError>> = second.run(|| Ok(total.get()));

    assert_eq!(seen.expect("second run succeeds"), 5);
    assert_eq!(total.get(), 5);
    assert_eq!(second.phase(), Phase::Succeeded);
    assert!(!storage.exists(&key).expect("exists"));
    assert_eq!(storage.clear_count(), 1);

    let report = second.restored().expect("restore report");
    assert_eq!(report.key, key);
    assert_eq!(report.restored, vec!["total".to_string()]);
    assert!(report.missing.is_empty());
}

#[test]
fn rerun_with_fewer_attachments_is_an_identity_mismatch() {
    let storage = Arc::new(MemoryStorage::new());

    let a = Binding::new(1);
    let b = Binding::new("x".to_string());
    let mut first = FailSafeState::new();
    first
        .uses(storage.clone())
        .expect("uses")
        .attach("a", &a)
        .expect("attach a")
        .attach("b", &b)
        .expect("attach b");
    let first_key = first.identity().expect("identity").key().clone();

    let _ = first.run(|| {
        a.set(2);
        b.set("y".to_string());
        Err::<(), _>(ValueError("halt".to_string()))
    });
    assert_eq!(stored_value(&*storage, &first_key, "a"), json!(2));
    assert_eq!(stored_value(&*storage, &first_key, "b"), json!("y"));

    let a = Binding::new(1);
    let mut second = FailSafeState::new();
    second
        .uses(storage.clone())
        .expect("uses")
        .attach("a", &a)
        .expect("attach a");

    let err = second.enter().unwrap_err();
    match err {
        FailSafeError::Configuration(ConfigurationError::IdentityMismatch { key, found }) => {
            assert_ne!(key, found);
            assert_eq!(found, first_key.to_string());
        }
        other => panic!("expected identity mismatch, got {other:?}"),
    }
    assert_eq!(a.get(), 1);
    assert_eq!(second.phase(), Phase::Configuring);
    assert!(storage.exists(&first_key).expect("exists"));
}

#[test]
fn distinct_labels_do_not_share_snapshots() {
    let storage = Arc::new(MemoryStorage::new());

    let total = Binding::new(0);
    let mut left = total_context(storage.clone(), &total);
    left.with_label("left").expect("label");
    let _ = left.run(|| {
        total.set(9);
        Err::<(), _>(ValueError("left failed".to_string()))
    });

    let total = Binding::new(0);
    let mut right = total_context(storage.clone(), &total);
    right.with_label("right").expect("label");
    let out: Result<(), RunError<ValueError>> = right.run(|| Ok(()));

    assert!(out.is_ok());
    assert_eq!(total.get(), 0);
    assert!(right.restored().is_none());
    assert_eq!(storage.list().expect("list").len(), 1);
}

#[test]
fn unrelated_unlabelled_contexts_share_a_backend() {
    let storage = Arc::new(MemoryStorage::new());

    let rows = Binding::new(0);
    let mut first = FailSafeState::new();
    first
        .uses(storage.clone())
        .expect("uses")
        .attach("rows", &rows)
        .expect("attach rows");
    let rows_key = first.identity().expect("identity").key().clone();
    let _ = first.run(|| {
        rows.set(3);
        Err::<(), _>(ValueError("rows failed".to_string()))
    });

    let pages = Binding::new(0);
    let mut second = FailSafeState::new();
    second
        .uses(storage.clone())
        .expect("uses")
        .attach("pages", &pages)
        .expect("attach pages");
    let out: Result<(), RunError<ValueError>> = second.run(|| {
        pages.set(1);
        Ok(())
    });

    assert!(out.is_ok());
    assert_eq!(second.phase(), Phase::Succeeded);
    assert!(second.restored().is_none());
    assert_eq!(storage.list().expect("list"), vec![rows_key.clone()]);
    assert_eq!(stored_value(&*storage, &rows_key, "rows"), json!(3));
}

#[test]
fn overlapping_names_in_another_order_are_an_identity_mismatch() {
    let storage = Arc::new(MemoryStorage::new());

    let a = Binding::new(1);
    let b = Binding::new(2);
    let mut first = FailSafeState::new();
    first
        .uses(storage.clone())
        .expect("uses")
        .attach("a", &a)
        .expect("attach a")
        .attach("b", &b)
        .expect("attach b");
    let _ = first.run(|| Err::<(), _>(ValueError("halt".to_string())));

    let a = Binding::new(1);
    let b = Binding::new(2);
    let mut second = FailSafeState::new();
    second
        .uses(storage)
        .expect("uses")
        .attach("b", &b)
        .expect("attach b")
        .attach("a", &a)
        .expect("attach a");

    assert!(matches!(
        second.enter().unwrap_err(),
        FailSafeError::Configuration(ConfigurationError::IdentityMismatch { .. })
    ));
    assert_eq!(second.phase(), Phase::Configuring);
}

#[test]
fn body_error_keeps_its_source_chain() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage, &total);

    let err = state
        .run(|| {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "checksum mismatch",
            ))
        })
        .unwrap_err();

    let body = err.into_body().expect("body error");
    assert_eq!(body.kind(), std::io::ErrorKind::InvalidData);
    assert_eq!(body.to_string(), "checksum mismatch");
}

#[test]
fn each_failure_replaces_the_previous_snapshot() {
    let storage = Arc::new(MemoryStorage::new());

    for attempt in 1..=3 {
        let total = Binding::new(0);
        let mut state = total_context(storage.clone(), &total);
        let _ = state.run(|| {
            total.update(|t| *t += attempt);
            Err::<(), _>(ValueError(format!("attempt {attempt}")))
        });
    }

    let total = Binding::new(0);
    let state = total_context(storage.clone(), &total);
    let key = state.identity().expect("identity").key().clone();
    assert_eq!(stored_value(&*storage, &key, "total"), json!(6));
    assert_eq!(storage.list().expect("list"), vec![key]);
}

#[test]
fn partial_snapshot_restores_present_values_only() {
    let storage = Arc::new(MemoryStorage::new());
    let cursor = Binding::new(0usize);
    let output: Binding<Vec<Record>> = Binding::default();

    let mut state = FailSafeState::new();
    state
        .uses(storage.clone())
        .expect("uses")
        .attach("cursor", &cursor)
        .expect("attach cursor")
        .attach("output", &output)
        .expect("attach output");
    let identity = state.identity().expect("identity");

    let mut values = BTreeMap::new();
    values.insert("cursor".to_string(), encode(json!(24)));
    let snapshot = Snapshot::new(
        identity.key().clone(),
        identity.names().to_vec(),
        "json",
        values,
    );
    storage.save(identity.key(), &snapshot).expect("seed");

    let scope = state.enter().expect("enter");
    let report = scope.restored().expect("report").clone();
    scope.complete().expect("complete");

    assert_eq!(cursor.get(), 24);
    assert!(output.get().is_empty());
    assert_eq!(report.restored, vec!["cursor".to_string()]);
    assert_eq!(report.missing, vec!["output".to_string()]);
}

#[test]
fn structured_values_round_trip_through_a_failure() {
    let storage = Arc::new(MemoryStorage::new());
    let records = vec![
        Record {
            id: 1,
            data: "AB".to_string(),
        },
        Record {
            id: 2,
            data: "cd".to_string(),
        },
    ];

    let output: Binding<Vec<Record>> = Binding::default();
    let mut first = FailSafeState::new();
    first
        .uses(storage.clone())
        .expect("uses")
        .attach("output", &output)
        .expect("attach");
    let _ = first.run(|| {
        output.set(records.clone());
        Err::<(), _>(ValueError("late failure".to_string()))
    });

    let output: Binding<Vec<Record>> = Binding::default();
    let mut second = FailSafeState::new();
    second
        .uses(storage.clone())
        .expect("uses")
        .attach("output", &output)
        .expect("attach");
    let scope = second.enter().expect("enter");
    assert_eq!(output.get(), records);
    scope.complete().expect("complete");
}

#[test]
fn panic_in_body_saves_snapshot_and_resumes_unwinding() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage.clone(), &total);
    let key = state.identity().expect("identity").key().clone();

    let payload = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), RunError<ValueError>> = state.run(|| {
            total.set(11);
            panic!("worker exploded");
        });
    }))
    .unwrap_err();

    assert_eq!(payload.downcast_ref::<&str>(), Some(&"worker exploded"));
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(stored_value(&*storage, &key, "total"), json!(11));
}

#[test]
fn save_failure_is_reported_as_snapshot_lost() {
    let storage = Arc::new(FaultyStorage::new().failing(Operation::Save));
    let total = Binding::new(0);
    let mut state = total_context(storage.clone(), &total);

    let err = state
        .run(|| {
            total.set(3);
            Err::<(), _>(ValueError("original".to_string()))
        })
        .unwrap_err();

    assert!(err.is_snapshot_lost());
    assert_eq!(err.body(), Some(&ValueError("original".to_string())));
    match &err {
        RunError::SnapshotLost { source, .. } => {
            assert!(matches!(
                source,
                SnapshotError::Save {
                    source: StorageError::Backend(_),
                    ..
                }
            ));
        }
        other => panic!("expected snapshot lost, got {other:?}"),
    }
    let msg = err.to_string();
    assert!(msg.contains("snapshot lost"));
    assert!(msg.contains("ValueError: original"));
    assert_eq!(state.phase(), Phase::Failed);
}

#[test]
fn clear_failure_fails_a_successful_run() {
    let storage = Arc::new(FaultyStorage::new());
    let total = Binding::new(0);

    let mut first = total_context(storage.clone(), &total);
    let key = first.identity().expect("identity").key().clone();
    let _ = first.run(|| Err::<(), _>(ValueError("first".to_string())));

    storage.set_failing(Operation::Clear, true);
    let total = Binding::new(0);
    let mut second = total_context(storage.clone(), &total);
    let err = second.run(|| Ok::<_, ValueError>(())).unwrap_err();

    assert!(matches!(
        err.context(),
        Some(FailSafeError::Clear {
            source: StorageError::Backend(_),
            ..
        })
    ));
    assert!(err.body().is_none());
    assert_eq!(second.phase(), Phase::Failed);
    assert!(storage.exists(&key).expect("exists"));
}

#[test]
fn corrupt_snapshot_aborts_entry_and_is_kept() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage.clone(), &total);
    let key = state.identity().expect("identity").key().clone();
    storage.insert_raw(key.clone(), b"{\"key\": \"trunc".to_vec());

    let mut ran = false;
    let err = state
        .run(|| {
            ran = true;
            Ok::<_, ValueError>(())
        })
        .unwrap_err();

    assert!(!ran);
    assert!(matches!(
        err.context(),
        Some(FailSafeError::Restore(RestoreError::Storage {
            source: StorageError::Corrupt { .. },
            ..
        }))
    ));
    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(total.get(), 0);
    assert!(storage.exists(&key).expect("exists"));
}

#[test]
fn mistyped_snapshot_value_leaves_every_binding_untouched() {
    let storage = Arc::new(MemoryStorage::new());
    let cursor = Binding::new(0usize);
    let output: Binding<Vec<Record>> = Binding::default();

    let mut state = FailSafeState::new();
    state
        .uses(storage.clone())
        .expect("uses")
        .attach("cursor", &cursor)
        .expect("attach cursor")
        .attach("output", &output)
        .expect("attach output");
    let identity = state.identity().expect("identity");

    let mut values = BTreeMap::new();
    values.insert("cursor".to_string(), encode(json!(3)));
    values.insert("output".to_string(), encode(json!({"not": "a list"})));
    let snapshot = Snapshot::new(
        identity.key().clone(),
        identity.names().to_vec(),
        "json",
        values,
    );
    storage.save(identity.key(), &snapshot).expect("seed");

    let err = state.enter().unwrap_err();
    assert!(matches!(
        err,
        FailSafeError::Restore(RestoreError::Convert { ref source, .. }) if source.name == "output"
    ));
    assert_eq!(cursor.get(), 0);
    assert!(output.get().is_empty());
    assert!(storage.exists(identity.key()).expect("exists"));
}

#[test]
fn snapshot_from_another_codec_is_refused() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage.clone(), &total);
    let identity = state.identity().expect("identity");

    let mut values = BTreeMap::new();
    values.insert("total".to_string(), EncodedValue::from(vec![0x80, 0x05]));
    let snapshot = Snapshot::new(
        identity.key().clone(),
        identity.names().to_vec(),
        "pickle",
        values,
    );
    storage.save(identity.key(), &snapshot).expect("seed");

    let err = state.enter().unwrap_err();
    assert!(matches!(
        err,
        FailSafeError::Restore(RestoreError::CodecMismatch { ref found, .. }) if found == "pickle"
    ));
    assert_eq!(total.get(), 0);
}

#[test]
fn storage_failure_on_lookup_aborts_entry() {
    let storage = Arc::new(FaultyStorage::new().failing(Operation::Exists));
    let total = Binding::new(0);
    let mut state = total_context(storage, &total);

    let err = state.enter().unwrap_err();
    assert!(matches!(
        err,
        FailSafeError::Restore(RestoreError::Storage { .. })
    ));
    assert_eq!(state.phase(), Phase::Failed);
}

#[test]
fn clearing_an_absent_snapshot_is_a_no_op() {
    let storage = MemoryStorage::new();
    let key = SnapshotKey::new("savedstate", "0123456789abcdef").expect("key");

    storage.clear(&key).expect("first clear");
    storage.clear(&key).expect("second clear");
    assert_eq!(storage.clear_count(), 0);
}

#[test]
fn manual_scope_abort_saves_and_complete_clears() {
    let storage = Arc::new(MemoryStorage::new());

    let total = Binding::new(0);
    let mut first = total_context(storage.clone(), &total);
    let scope = first.enter().expect("enter");
    let key = scope.key().clone();
    total.set(4);
    scope.abort().expect("abort saves");
    assert_eq!(stored_value(&*storage, &key, "total"), json!(4));

    let total = Binding::new(0);
    let mut second = total_context(storage.clone(), &total);
    let scope = second.enter().expect("enter");
    assert_eq!(total.get(), 4);
    scope.complete().expect("complete clears");
    assert!(!storage.exists(&key).expect("exists"));
}

#[test]
fn contexts_are_single_use() {
    let storage = Arc::new(MemoryStorage::new());
    let total = Binding::new(0);
    let mut state = total_context(storage, &total);

    let _: Result<(), RunError<ValueError>> = state.run(|| Ok(()));
    let err = state.run(|| Ok::<_, ValueError>(())).unwrap_err();

    assert!(matches!(
        err.context(),
        Some(FailSafeError::Lifecycle(_))
    ));
}

#[test]
fn pretty_encoded_snapshot_restores() {
    let storage = Arc::new(MemoryStorage::new());

    let total = Binding::new(0);
    let mut first = total_context(storage.clone(), &total);
    first.with_codec(JsonCodec::pretty()).expect("codec");
    let _ = first.run(|| {
        total.set(12);
        Err::<(), _>(ValueError("stop".to_string()))
    });

    let total = Binding::new(0);
    let mut second = total_context(storage, &total);
    let scope = second.enter().expect("enter");
    assert_eq!(total.get(), 12);
    scope.complete().expect("complete");
}
