//! In-memory fakes for the storage contract (testing only)
//!
//! Provides `MemoryStorage`, which satisfies the `StorageBackend` contract
//! without touching disk, and `FaultyStorage`, which injects failures on
//! chosen operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-memory snapshot store backed by a `BTreeMap<key, Snapshot>`.
///
/// Snapshots are stored as serialized JSON so a round trip exercises the same
/// encoding a disk backend would.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshots: Mutex<BTreeMap<SnapshotKey, Vec<u8>>>,
    saves: AtomicU64,
    clears: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshots(&self) -> MutexGuard<'_, BTreeMap<SnapshotKey, Vec<u8>>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Number of `clear` calls that removed a snapshot.
    pub fn clear_count(&self) -> u64 {
        self.clears.load(Ordering::Relaxed)
    }

    /// Store raw bytes under `key`, bypassing serialization. Used to plant
    /// corrupt snapshots in tests.
    pub fn insert_raw(&self, key: SnapshotKey, bytes: Vec<u8>) {
        self.snapshots().insert(key, bytes);
    }
}

impl StorageBackend for MemoryStorage {
    fn exists(&self, key: &SnapshotKey) -> StorageResult<bool> {
        Ok(self.snapshots().contains_key(key))
    }

    fn load(&self, key: &SnapshotKey) -> StorageResult<Snapshot> {
        let snapshots = self.snapshots();
        let bytes = snapshots.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        serde_json::from_slice(bytes).map_err(|source| StorageError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    fn save(&self, key: &SnapshotKey, snapshot: &Snapshot) -> StorageResult<()> {
        ensure_key_matches(key, snapshot)?;
        let bytes = serde_json::to_vec(snapshot).map_err(|source| StorageError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.snapshots().insert(key.clone(), bytes);
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clear(&self, key: &SnapshotKey) -> StorageResult<()> {
        if self.snapshots().remove(key).is_some() {
            self.clears.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<SnapshotKey>> {
        Ok(self.snapshots().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// FaultyStorage
// ---------------------------------------------------------------------------

/// Operation of the storage contract, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Exists,
    Load,
    Save,
    Clear,
    List,
}

/// `MemoryStorage` wrapper that fails selected operations with
/// `StorageError::Backend`.
#[derive(Debug, Default)]
pub struct FaultyStorage {
    inner: MemoryStorage,
    exists: AtomicBool,
    load: AtomicBool,
    save: AtomicBool,
    clear: AtomicBool,
    list: AtomicBool,
}

impl FaultyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` fail (or succeed again) from now on.
    pub fn set_failing(&self, op: Operation, failing: bool) {
        self.flag(op).store(failing, Ordering::SeqCst);
    }

    /// Builder form of [`set_failing`](Self::set_failing).
    pub fn failing(self, op: Operation) -> Self {
        self.set_failing(op, true);
        self
    }

    /// The wrapped store, for seeding and inspection.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    fn flag(&self, op: Operation) -> &AtomicBool {
        match op {
            Operation::Exists => &self.exists,
            Operation::Load => &self.load,
            Operation::Save => &self.save,
            Operation::Clear => &self.clear,
            Operation::List => &self.list,
        }
    }

    fn check(&self, op: Operation) -> StorageResult<()> {
        if self.flag(op).load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

impl StorageBackend for FaultyStorage {
    fn exists(&self, key: &SnapshotKey) -> StorageResult<bool> {
        self.check(Operation::Exists)?;
        self.inner.exists(key)
    }

    fn load(&self, key: &SnapshotKey) -> StorageResult<Snapshot> {
        self.check(Operation::Load)?;
        self.inner.load(key)
    }

    fn save(&self, key: &SnapshotKey, snapshot: &Snapshot) -> StorageResult<()> {
        self.check(Operation::Save)?;
        self.inner.save(key, snapshot)
    }

    fn clear(&self, key: &SnapshotKey) -> StorageResult<()> {
        self.check(Operation::Clear)?;
        self.inner.clear(key)
    }

    fn list(&self) -> StorageResult<Vec<SnapshotKey>> {
        self.check(Operation::List)?;
        self.inner.list()
    }
}
