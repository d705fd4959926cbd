//! Fan-out backend that keeps the same snapshot in several stores.

use std::sync::Arc;

use tracing::warn;

use crate::error::StorageError;
use crate::storage_traits::{Snapshot, SnapshotKey, StorageBackend, StorageResult};

/// Writes every snapshot to all mirrors and reads from the first mirror that
/// holds the key.
///
/// `save` and `clear` are attempted on every mirror even after one fails; the
/// first error is returned so a partial write is never reported as success.
pub struct MirroredStorage {
    mirrors: Vec<Arc<dyn StorageBackend>>,
}

impl MirroredStorage {
    pub fn new(mirrors: Vec<Arc<dyn StorageBackend>>) -> Self {
        Self { mirrors }
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    fn each(
        &self,
        op: &'static str,
        key: &SnapshotKey,
        mut f: impl FnMut(&dyn StorageBackend) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let mut first_err = None;
        for (idx, mirror) in self.mirrors.iter().enumerate() {
            if let Err(e) = f(mirror.as_ref()) {
                warn!(op, key = %key, mirror = idx, error = %e, "mirror operation failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl StorageBackend for MirroredStorage {
    fn exists(&self, key: &SnapshotKey) -> StorageResult<bool> {
        for mirror in &self.mirrors {
            if mirror.exists(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn load(&self, key: &SnapshotKey) -> StorageResult<Snapshot> {
        for mirror in &self.mirrors {
            if mirror.exists(key)? {
                return mirror.load(key);
            }
        }
        Err(StorageError::NotFound {
            key: key.to_string(),
        })
    }

    fn save(&self, key: &SnapshotKey, snapshot: &Snapshot) -> StorageResult<()> {
        self.each("save", key, |mirror| mirror.save(key, snapshot))
    }

    fn clear(&self, key: &SnapshotKey) -> StorageResult<()> {
        self.each("clear", key, |mirror| mirror.clear(key))
    }

    fn list(&self) -> StorageResult<Vec<SnapshotKey>> {
        let mut keys = Vec::new();
        for mirror in &self.mirrors {
            keys.extend(mirror.list()?);
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
