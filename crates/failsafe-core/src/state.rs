//! The fail-safe context: configure, enter, run, exit.
//!
//! A [`FailSafeState`] moves through [`Phase::Configuring`] →
//! [`Phase::Active`] → [`Phase::Succeeded`] | [`Phase::Failed`] exactly
//! once. Entering returns an [`ActiveScope`] guard; exactly one of
//! clear (success) or save (failure) runs before the guard goes away.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use failsafe_state::{
    is_valid_label, EncodedValue, Snapshot, SnapshotKey, StorageBackend, StorageError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::attachment::{AttachmentRegistry, Binding};
use crate::codec::{Codec, JsonCodec};
use crate::domain::error::{
    AttachmentError, ConfigurationError, FailSafeError, LifecycleError, RestoreError, Result,
    RunError, SnapshotError,
};
use crate::domain::phase::Phase;
use crate::identity::{ContextIdentity, DEFAULT_LABEL};
use crate::metrics::METRICS;
use crate::obs::{self, ContextSpan};

/// What a context restored from a prior failure when it was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub key: SnapshotKey,
    /// When the restored snapshot was captured
    pub created_at: DateTime<Utc>,
    /// Attachments overwritten from the snapshot, in declaration order
    pub restored: Vec<String>,
    /// Attachments the snapshot had no value for; left as they were
    pub missing: Vec<String>,
}

/// Single-use fail-safe context.
pub struct FailSafeState {
    label: String,
    registry: AttachmentRegistry,
    backend: Option<Arc<dyn StorageBackend>>,
    codec: Box<dyn Codec>,
    phase: Phase,
    restored: Option<RestoreReport>,
}

impl Default for FailSafeState {
    fn default() -> Self {
        Self::new()
    }
}

impl FailSafeState {
    pub fn new() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            registry: AttachmentRegistry::new(),
            backend: None,
            codec: Box::new(JsonCodec::new()),
            phase: Phase::Configuring,
            restored: None,
        }
    }

    /// Disambiguating label, part of the identity.
    pub fn with_label(&mut self, label: impl Into<String>) -> Result<&mut Self> {
        self.ensure_configurable()?;
        let label = label.into();
        if !is_valid_label(&label) {
            return Err(ConfigurationError::InvalidLabel { label }.into());
        }
        self.label = label;
        Ok(self)
    }

    pub fn with_codec(&mut self, codec: impl Codec + 'static) -> Result<&mut Self> {
        self.ensure_configurable()?;
        self.codec = Box::new(codec);
        Ok(self)
    }

    /// Select the storage backend. Can be called once.
    pub fn uses(&mut self, backend: Arc<dyn StorageBackend>) -> Result<&mut Self> {
        self.ensure_configurable()?;
        if self.backend.is_some() {
            return Err(ConfigurationError::BackendAlreadySelected.into());
        }
        self.backend = Some(backend);
        Ok(self)
    }

    /// Attach `binding` under `name`. Declaration order is part of the identity.
    pub fn attach<T>(&mut self, name: impl Into<String>, binding: &Binding<T>) -> Result<&mut Self>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let name = name.into();
        if self.phase != Phase::Configuring {
            return Err(AttachmentError::Sealed {
                name,
                phase: self.phase,
            }
            .into());
        }
        self.registry.register(name, binding)?;
        Ok(self)
    }

    /// Remove an attachment. Returns whether it was attached.
    pub fn detach(&mut self, name: &str) -> Result<bool> {
        if self.phase != Phase::Configuring {
            return Err(AttachmentError::Sealed {
                name: name.to_string(),
                phase: self.phase,
            }
            .into());
        }
        Ok(self.registry.unregister(name))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn attachments(&self) -> &AttachmentRegistry {
        &self.registry
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Identity this context resolves to with its current attachments.
    pub fn identity(&self) -> Result<ContextIdentity> {
        Ok(ContextIdentity::derive(
            Some(self.label.as_str()),
            self.registry.names(),
        )?)
    }

    /// Set once entry restored a prior snapshot.
    pub fn restored(&self) -> Option<&RestoreReport> {
        self.restored.as_ref()
    }

    /// Enter the context, restoring a prior snapshot if one is stored.
    ///
    /// Configuration errors leave the context in `Configuring`. A snapshot
    /// that cannot be read or applied moves it to `Failed` and stays in
    /// storage.
    pub fn enter(&mut self) -> Result<ActiveScope<'_>> {
        if self.phase != Phase::Configuring {
            return Err(LifecycleError::AlreadyEntered { phase: self.phase }.into());
        }
        let backend = self
            .backend
            .clone()
            .ok_or(ConfigurationError::NoBackend)?;
        let identity = self.identity()?;

        let span = ContextSpan::enter(identity.key().as_str());
        let stored = self
            .lookup(&identity, backend.as_ref())
            .map_err(|e| self.fail_entry(&identity, e))?;

        self.phase = Phase::Active;
        obs::emit_context_entered(identity.key().as_str(), self.registry.len());

        if let Some(snapshot) = stored {
            let report = self
                .restore(&identity, snapshot)
                .map_err(|e| self.fail_entry(&identity, e.into()))?;
            METRICS.inc_restored();
            obs::emit_snapshot_restored(
                identity.key().as_str(),
                report.restored.len(),
                report.missing.len(),
                &report.created_at.to_rfc3339(),
            );
            self.restored = Some(report);
        }

        Ok(ActiveScope {
            state: self,
            backend,
            identity,
            settled: false,
            _span: span,
        })
    }

    /// Enter, run `body`, and exit on its outcome.
    ///
    /// A panic in `body` is a failure: the snapshot is saved and the panic
    /// resumes with its original payload. If that save fails the panic
    /// still resumes; the loss shows up only as a `snapshot.lost` error
    /// event and in [`METRICS`]`.snapshots_lost()`.
    pub fn run<R, E, F>(&mut self, body: F) -> std::result::Result<R, RunError<E>>
    where
        F: FnOnce() -> std::result::Result<R, E>,
    {
        let scope = self.enter()?;
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => {
                scope.complete()?;
                Ok(value)
            }
            Ok(Err(original)) => match scope.abort() {
                Ok(()) => Err(RunError::Body(original)),
                Err(source) => Err(RunError::SnapshotLost { original, source }),
            },
            Err(payload) => {
                // loss is already logged by the failure path
                let _ = scope.abort();
                panic::resume_unwind(payload)
            }
        }
    }

    fn ensure_configurable(&self) -> std::result::Result<(), ConfigurationError> {
        if self.phase != Phase::Configuring {
            return Err(ConfigurationError::Sealed { phase: self.phase });
        }
        Ok(())
    }

    /// Find the stored snapshot for `identity`. When there is none, a
    /// snapshot under the same label whose names overlap ours is a mismatch.
    /// Unreadable candidates are skipped.
    fn lookup(
        &self,
        identity: &ContextIdentity,
        backend: &dyn StorageBackend,
    ) -> Result<Option<Snapshot>> {
        let key = identity.key();
        let storage = |source| RestoreError::Storage {
            key: key.to_string(),
            source,
        };

        if backend.exists(key).map_err(storage)? {
            return Ok(Some(backend.load(key).map_err(storage)?));
        }

        let stored = backend.list().map_err(storage)?;
        for found in stored.iter().filter(|k| identity.shares_label_with(k)) {
            let candidate = match backend.load(found) {
                Ok(candidate) => candidate,
                Err(StorageError::NotFound { .. } | StorageError::Corrupt { .. }) => {
                    debug!(key = %found, "skipping unreadable snapshot during identity check");
                    continue;
                }
                Err(source) => return Err(storage(source).into()),
            };
            if identity.conflicts_with(&candidate.names) {
                return Err(ConfigurationError::IdentityMismatch {
                    key: key.to_string(),
                    found: found.to_string(),
                }
                .into());
            }
        }
        Ok(None)
    }

    fn restore(
        &self,
        identity: &ContextIdentity,
        snapshot: Snapshot,
    ) -> std::result::Result<RestoreReport, RestoreError> {
        let key = identity.key();
        if snapshot.codec != self.codec.name() {
            return Err(RestoreError::CodecMismatch {
                key: key.to_string(),
                expected: self.codec.name().to_string(),
                found: snapshot.codec,
            });
        }

        let mut values = BTreeMap::new();
        for (name, encoded) in snapshot.values {
            if !self.registry.contains(&name) {
                continue;
            }
            let value = self
                .codec
                .decode(encoded.as_bytes())
                .map_err(|source| RestoreError::Decode {
                    key: key.to_string(),
                    name: name.clone(),
                    source,
                })?;
            values.insert(name, value);
        }

        let restored = self
            .registry
            .write_all(values)
            .map_err(|source| RestoreError::Convert {
                key: key.to_string(),
                source,
            })?;
        let missing = self
            .registry
            .names()
            .into_iter()
            .filter(|name| !restored.iter().any(|r| r == name))
            .map(str::to_string)
            .collect();

        Ok(RestoreReport {
            key: key.clone(),
            created_at: snapshot.created_at,
            restored,
            missing,
        })
    }

    fn fail_entry(&mut self, identity: &ContextIdentity, err: FailSafeError) -> FailSafeError {
        if !matches!(err, FailSafeError::Configuration(_)) {
            self.phase = Phase::Failed;
            obs::emit_restore_failed(identity.key().as_str(), &err);
        }
        err
    }

    /// Capture, encode and save every attachment's current value.
    fn save_snapshot(
        &self,
        identity: &ContextIdentity,
        backend: &dyn StorageBackend,
    ) -> std::result::Result<(), SnapshotError> {
        let captured = self.registry.read_all()?;

        let mut values = BTreeMap::new();
        let mut bytes = 0;
        for (name, value) in captured {
            let encoded = self
                .codec
                .encode(&value)
                .map_err(|source| SnapshotError::Encode {
                    name: name.clone(),
                    source,
                })?;
            bytes += encoded.len();
            values.insert(name, EncodedValue::from(encoded));
        }

        let key = identity.key();
        let snapshot = Snapshot::new(
            key.clone(),
            identity.names().to_vec(),
            self.codec.name(),
            values,
        );
        backend
            .save(key, &snapshot)
            .map_err(|source| SnapshotError::Save {
                key: key.to_string(),
                source,
            })?;

        METRICS.inc_saved();
        obs::emit_snapshot_saved(key.as_str(), snapshot.values.len(), bytes);
        Ok(())
    }
}

impl fmt::Debug for FailSafeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailSafeState")
            .field("label", &self.label)
            .field("phase", &self.phase)
            .field("attachments", &self.registry)
            .field("codec", &self.codec.name())
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

/// Guard for an active context.
///
/// Settle it with [`complete`](Self::complete) or [`abort`](Self::abort).
/// Dropping it unsettled takes the failure path.
pub struct ActiveScope<'a> {
    state: &'a mut FailSafeState,
    backend: Arc<dyn StorageBackend>,
    identity: ContextIdentity,
    settled: bool,
    _span: ContextSpan,
}

impl ActiveScope<'_> {
    pub fn key(&self) -> &SnapshotKey {
        self.identity.key()
    }

    pub fn identity(&self) -> &ContextIdentity {
        &self.identity
    }

    pub fn restored(&self) -> Option<&RestoreReport> {
        self.state.restored()
    }

    /// Success path: remove the stored snapshot, if any.
    ///
    /// If the stale snapshot cannot be removed the context ends `Failed`.
    pub fn complete(mut self) -> Result<()> {
        self.settled = true;
        let key = self.identity.key();
        let cleared = self
            .backend
            .exists(key)
            .and_then(|found| {
                if found {
                    self.backend.clear(key)?;
                }
                Ok(found)
            })
            .map_err(|source| FailSafeError::Clear {
                key: key.to_string(),
                source,
            });

        match cleared {
            Ok(found) => {
                if found {
                    METRICS.inc_cleared();
                    obs::emit_snapshot_cleared(key.as_str());
                }
                self.state.phase = Phase::Succeeded;
                Ok(())
            }
            Err(e) => {
                self.state.phase = Phase::Failed;
                Err(e)
            }
        }
    }

    /// Failure path: save a snapshot of every attachment's current value.
    pub fn abort(mut self) -> std::result::Result<(), SnapshotError> {
        self.fail()
    }

    fn fail(&mut self) -> std::result::Result<(), SnapshotError> {
        self.settled = true;
        self.state.phase = Phase::Failed;
        let result = self
            .state
            .save_snapshot(&self.identity, self.backend.as_ref());
        if let Err(e) = &result {
            METRICS.inc_lost();
            obs::emit_snapshot_lost(self.identity.key().as_str(), e);
        }
        result
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.fail();
        }
    }
}

impl fmt::Debug for ActiveScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveScope")
            .field("key", self.identity.key())
            .field("settled", &self.settled)
            .finish()
    }
}
