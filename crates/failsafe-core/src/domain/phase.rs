//! Lifecycle phase of a fail-safe context.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of a `FailSafeState`.
///
/// Transitions: `Configuring → Active → Succeeded | Failed`. Both end phases
/// are terminal; a context is single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Configuring,
    Active,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Configuring => "configuring",
            Phase::Active => "active",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}
