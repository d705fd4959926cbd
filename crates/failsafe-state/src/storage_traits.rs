//! Storage trait definitions for fail-safe snapshots
//!
//! - `SnapshotKey`: validated `<label>.<fingerprint>` address of one context
//! - `Snapshot`: the values captured when a context fails
//! - `StorageBackend`: the capability set a context needs from storage
//!
//! The contract is synchronous: a context occupies its caller's thread for
//! the whole active phase and never suspends.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Number of fingerprint hex characters carried in a key.
pub const FINGERPRINT_LEN: usize = 16;

/// Longest label accepted in a key.
pub const MAX_LABEL_LEN: usize = 64;

/// Whether `label` may be used as the label part of a `SnapshotKey`.
///
/// Labels are 1-64 characters of ASCII alphanumerics, `_` or `-`, so a key
/// is always safe to use as a file name.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// SnapshotKey
// ---------------------------------------------------------------------------

/// Storage address of one logical context: `<label>.<16 lowercase hex>`.
///
/// The inner field is private so a key is always well-formed; build one with
/// [`SnapshotKey::new`] or parse it with `TryFrom<String>` / `FromStr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotKey(String);

impl SnapshotKey {
    /// Build a key from a label and a hex fingerprint. Only the first
    /// [`FINGERPRINT_LEN`] characters of the fingerprint are kept.
    pub fn new(label: &str, fingerprint: &str) -> StorageResult<Self> {
        let short = fingerprint.get(..FINGERPRINT_LEN).unwrap_or(fingerprint);
        Self::try_from(format!("{label}.{}", short.to_ascii_lowercase()))
    }

    /// Full key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label part (before the dot).
    pub fn label(&self) -> &str {
        self.0.split_once('.').map(|(label, _)| label).unwrap_or("")
    }

    /// Fingerprint part (after the dot).
    pub fn fingerprint(&self) -> &str {
        self.0.split_once('.').map(|(_, fp)| fp).unwrap_or("")
    }
}

impl TryFrom<String> for SnapshotKey {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let invalid = |key: String, reason| StorageError::InvalidKey { key, reason };

        let Some((label, fingerprint)) = s.split_once('.') else {
            return Err(invalid(s, "missing '.' separator"));
        };
        if !is_valid_label(label) {
            return Err(invalid(s, "label must be 1-64 chars of [A-Za-z0-9_-]"));
        }
        if fingerprint.len() != FINGERPRINT_LEN
            || !fingerprint
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(invalid(s, "fingerprint must be 16 lowercase hex chars"));
        }
        Ok(SnapshotKey(s))
    }
}

impl FromStr for SnapshotKey {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl From<SnapshotKey> for String {
    fn from(key: SnapshotKey) -> Self {
        key.0
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Codec output for one attachment. Serialized as a lowercase hex string.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct EncodedValue(Vec<u8>);

impl EncodedValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncodedValue {
    fn from(bytes: Vec<u8>) -> Self {
        EncodedValue(bytes)
    }
}

impl fmt::Debug for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedValue({} bytes)", self.0.len())
    }
}

impl Serialize for EncodedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for EncodedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(EncodedValue)
            .map_err(serde::de::Error::custom)
    }
}

/// Values captured from a failed context.
///
/// Each failure snapshot fully replaces the previous one for the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Key of the context that produced this snapshot
    pub key: SnapshotKey,
    /// Attachment names in declaration order
    pub names: Vec<String>,
    /// Name of the codec that produced `values`
    pub codec: String,
    /// Encoded value per attachment name
    pub values: BTreeMap<String, EncodedValue>,
    /// When the snapshot was captured
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        key: SnapshotKey,
        names: Vec<String>,
        codec: impl Into<String>,
        values: BTreeMap<String, EncodedValue>,
    ) -> Self {
        Self {
            key,
            names,
            codec: codec.into(),
            values,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Key-addressed snapshot store.
///
/// Guarantees:
/// - `load` returns the last snapshot passed to `save` for that key, or
///   `StorageError::NotFound` if none is stored.
/// - `save` is durable before it returns and replaces any previous snapshot.
/// - `clear` is a no-op when nothing is stored.
/// - Undecodable stored data is an error, never "absent".
pub trait StorageBackend: Send + Sync {
    /// Check whether a snapshot is stored under `key`.
    fn exists(&self, key: &SnapshotKey) -> StorageResult<bool>;

    /// Retrieve the snapshot for `key`. Returns `StorageError::NotFound` if absent.
    fn load(&self, key: &SnapshotKey) -> StorageResult<Snapshot>;

    /// Store `snapshot` under `key`. Fails with `StorageError::KeyMismatch`
    /// if `snapshot.key != *key`.
    fn save(&self, key: &SnapshotKey, snapshot: &Snapshot) -> StorageResult<()>;

    /// Remove the snapshot for `key`. No-op if absent.
    fn clear(&self, key: &SnapshotKey) -> StorageResult<()>;

    /// All stored keys, sorted.
    fn list(&self) -> StorageResult<Vec<SnapshotKey>>;
}

pub(crate) fn ensure_key_matches(key: &SnapshotKey, snapshot: &Snapshot) -> StorageResult<()> {
    if snapshot.key != *key {
        return Err(StorageError::KeyMismatch {
            expected: key.to_string(),
            found: snapshot.key.to_string(),
        });
    }
    Ok(())
}
