//! Commit-phase error types
//!
//! Commit runs with the registry write lock held and is documented as
//! not cleanly unwindable: every failure here leaves the in-memory
//! registry poisoned and is treated as fatal.

use crate::InstallCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommitError {
    #[error("commit exceeded the write-lock budget of {budget_ms}ms")]
    WatchdogExpired { budget_ms: u64 },

    #[error("persisting the registry snapshot failed: {message}")]
    PersistFailed { message: String },

    #[error("commit invariant violated: {message}")]
    InvariantViolated { message: String },
}

impl CommitError {
    #[must_use]
    pub fn code(&self) -> InstallCode {
        match self {
            Self::WatchdogExpired { .. } => InstallCode::WatchdogExpired,
            Self::PersistFailed { .. } => InstallCode::PersistFailed,
            Self::InvariantViolated { .. } => InstallCode::Internal,
        }
    }
}
