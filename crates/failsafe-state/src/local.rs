use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{ensure_key_matches, Snapshot, SnapshotKey, StorageBackend, StorageResult};

const SNAPSHOT_SUFFIX: &str = ".snapshot.json";

/// Filesystem-backed snapshot store: one pretty-printed JSON file per key.
///
/// Layout: `<dir>/<label>.<fingerprint>.snapshot.json`
#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    /// Use an existing directory. Fails with `StorageError::NotADirectory`
    /// if `dir` is missing or is a file.
    pub fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(StorageError::NotADirectory { path: dir });
        }
        Ok(Self { dir })
    }

    /// Create `dir` (and parents) if needed, then use it.
    pub fn create(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(StorageError::io(dir))?;
        Self::new(dir)
    }

    /// Root directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the snapshot for `key`.
    pub fn snapshot_path(&self, key: &SnapshotKey) -> PathBuf {
        self.dir.join(format!("{key}{SNAPSHOT_SUFFIX}"))
    }

    fn ensure_dir(&self) -> StorageResult<()> {
        if !self.dir.is_dir() {
            return Err(StorageError::NotADirectory {
                path: self.dir.clone(),
            });
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> StorageResult<()> {
        fs::File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(StorageError::io(&self.dir))
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, key: &SnapshotKey) -> StorageResult<bool> {
        self.ensure_dir()?;
        let path = self.snapshot_path(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io { path, source: e }),
        }
    }

    fn load(&self, key: &SnapshotKey) -> StorageResult<Snapshot> {
        let path = self.snapshot_path(key);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    fn save(&self, key: &SnapshotKey, snapshot: &Snapshot) -> StorageResult<()> {
        ensure_key_matches(key, snapshot)?;
        self.ensure_dir()?;

        let bytes =
            serde_json::to_vec_pretty(snapshot).map_err(|source| StorageError::Serialization {
                key: key.to_string(),
                source,
            })?;
        let path = self.snapshot_path(key);

        // Atomic write: temp file in the same directory, fsync, then rename.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(StorageError::io(&self.dir))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(StorageError::io(tmp.path()))?;
        tmp.persist(&path)
            .map_err(|e| StorageError::io(&path)(e.error))?;
        self.sync_dir()?;

        debug!(key = %key, path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    fn clear(&self, key: &SnapshotKey) -> StorageResult<()> {
        let path = self.snapshot_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io { path, source: e }),
        }
    }

    fn list(&self) -> StorageResult<Vec<SnapshotKey>> {
        let entries = fs::read_dir(&self.dir).map_err(StorageError::io(&self.dir))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StorageError::io(&self.dir))?;
            let file_name = entry.file_name();
            let Some(stem) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(SNAPSHOT_SUFFIX))
            else {
                continue;
            };
            match stem.parse::<SnapshotKey>() {
                Ok(key) => keys.push(key),
                Err(_) => debug!(file = ?file_name, "skipping file with unparseable key"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
