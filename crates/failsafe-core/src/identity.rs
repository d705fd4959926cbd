//! Context identity: the stable key that ties a re-run to its predecessor's snapshot.
//!
//! The identity is a pure function of the label and the ordered attachment
//! names. Two contexts with the same label and names resolve to the same key
//! across process runs; that is what lets a resumed run find its snapshot.
//!
//! Unrelated contexts that share a label and name sequence share snapshots
//! too. Give each logical job its own label when that can happen.

use failsafe_state::{is_valid_label, SnapshotKey};
use sha2::{Digest, Sha256};

use crate::domain::error::ConfigurationError;

/// Label used when the caller does not supply one.
pub const DEFAULT_LABEL: &str = "savedstate";

/// Deterministic identity of one logical context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextIdentity {
    label: String,
    names: Vec<String>,
    fingerprint: String,
    key: SnapshotKey,
}

impl ContextIdentity {
    /// Derive the identity for `names` (in declaration order) under `label`,
    /// or under [`DEFAULT_LABEL`] when `label` is `None`.
    pub fn derive<'a>(
        label: Option<&str>,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ConfigurationError> {
        let label = label.unwrap_or(DEFAULT_LABEL);
        if !is_valid_label(label) {
            return Err(ConfigurationError::InvalidLabel {
                label: label.to_string(),
            });
        }

        let names: Vec<String> = names.into_iter().map(str::to_string).collect();
        if names.is_empty() {
            return Err(ConfigurationError::NoAttachments);
        }

        let fingerprint = fingerprint(&names);
        let key = SnapshotKey::new(label, &fingerprint).map_err(|_| {
            ConfigurationError::InvalidLabel {
                label: label.to_string(),
            }
        })?;

        Ok(Self {
            label: label.to_string(),
            names,
            fingerprint,
            key,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Attachment names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Full SHA-256 hex fingerprint of the name sequence.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Storage key for this identity.
    pub fn key(&self) -> &SnapshotKey {
        &self.key
    }

    /// Whether `other` is another key stored under this label.
    pub fn shares_label_with(&self, other: &SnapshotKey) -> bool {
        other.label() == self.label && other != &self.key
    }

    /// Whether a snapshot holding `names` under this label was written by
    /// a partial match of this context: some names shared, sequence differs.
    pub fn conflicts_with(&self, names: &[String]) -> bool {
        names != self.names.as_slice() && names.iter().any(|n| self.names.contains(n))
    }
}

/// SHA-256 of the compact JSON array of names, e.g. `["a","b"]`.
///
/// Attachment names are identifiers, so no JSON escaping is needed.
fn fingerprint(names: &[String]) -> String {
    let mut canonical = Vec::with_capacity(names.iter().map(|n| n.len() + 3).sum::<usize>() + 2);
    canonical.push(b'[');
    for (idx, name) in names.iter().enumerate() {
        if idx > 0 {
            canonical.push(b',');
        }
        canonical.push(b'"');
        canonical.extend_from_slice(name.as_bytes());
        canonical.push(b'"');
    }
    canonical.push(b']');
    hex::encode(Sha256::digest(&canonical))
}
