//! Environment-driven configuration.
//!
//! Reads:
//! - `FAILSAFE_STATE_DIR` (optional, default: `.`) - directory for snapshot files
//! - `FAILSAFE_LABEL` (optional) - label used instead of `savedstate`
//! - `FAILSAFE_PRETTY` (optional, default: false) - pretty-print encoded values

use std::path::PathBuf;
use std::sync::Arc;

use failsafe_state::{LocalStorage, StorageResult};
use serde::Serialize;

use crate::codec::JsonCodec;
use crate::domain::error::{ConfigurationError, Result};
use crate::state::FailSafeState;

pub const STATE_DIR_ENV: &str = "FAILSAFE_STATE_DIR";
pub const LABEL_ENV: &str = "FAILSAFE_LABEL";
pub const PRETTY_ENV: &str = "FAILSAFE_PRETTY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailSafeConfig {
    pub state_dir: PathBuf,
    pub label: Option<String>,
    pub pretty: bool,
}

impl Default for FailSafeConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            label: None,
            pretty: false,
        }
    }
}

impl FailSafeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let present = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();
        Self {
            state_dir: present(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            label: present(LABEL_ENV),
            pretty: present(PRETTY_ENV)
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.pretty),
        }
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn codec(&self) -> JsonCodec {
        if self.pretty {
            JsonCodec::pretty()
        } else {
            JsonCodec::new()
        }
    }

    /// Open the state directory, creating it if needed.
    pub fn storage(&self) -> StorageResult<LocalStorage> {
        LocalStorage::create(&self.state_dir)
    }

    /// A context with this configuration's label, codec and storage applied.
    pub fn context(&self) -> Result<FailSafeState> {
        let storage = self
            .storage()
            .map_err(|source| ConfigurationError::StateDir {
                path: self.state_dir.display().to_string(),
                source,
            })?;

        let mut state = FailSafeState::new();
        if let Some(label) = &self.label {
            state.with_label(label.clone())?;
        }
        state.with_codec(self.codec())?.uses(Arc::new(storage))?;
        Ok(state)
    }
}

/// Boolean coercion for environment values.
///
/// `true`/`false` in any case map to themselves, all-digit strings are true
/// when non-zero, and any other non-blank string is true.
pub fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        return true;
    }
    if value.eq_ignore_ascii_case("false") {
        return false;
    }
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        return value.chars().any(|c| c != '0');
    }
    !value.is_empty()
}
