//! Registry error types

use crate::InstallCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegistryError {
    #[error("registry is poisoned by an earlier commit failure; restart and reload")]
    Poisoned,

    #[error("package not found: {package}")]
    PackageNotFound { package: String },

    #[error("shared user not found: {name}")]
    SharedUserNotFound { name: String },

    #[error("no free app identities remain")]
    AppIdExhausted,

    #[error("app id {app_id} is already bound to {owner}")]
    AppIdInUse { app_id: u32, owner: String },

    #[error("persisted snapshot is unreadable: {message}")]
    SnapshotCorrupt { message: String },

    #[error("snapshot schema version {found} is not supported (max {supported})")]
    SchemaVersionUnsupported { found: u32, supported: u32 },

    #[error("snapshot store failure: {message}")]
    StoreFailure { message: String },
}

impl RegistryError {
    #[must_use]
    pub fn code(&self) -> InstallCode {
        match self {
            Self::Poisoned => InstallCode::RegistryPoisoned,
            Self::AppIdExhausted => InstallCode::AppIdExhausted,
            Self::SnapshotCorrupt { .. }
            | Self::SchemaVersionUnsupported { .. }
            | Self::StoreFailure { .. } => InstallCode::PersistFailed,
            Self::PackageNotFound { .. } | Self::SharedUserNotFound { .. } => {
                InstallCode::InvalidRequest
            }
            Self::AppIdInUse { .. } => InstallCode::Internal,
        }
    }
}
