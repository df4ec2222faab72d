//! Preparation-phase error types
//!
//! Prepare failures are detected per request before any shared mutation
//! and abort only the containing batch.

use crate::InstallCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrepareError {
    #[error("no install requests in batch")]
    EmptyBatch,

    #[error("invalid package name: {name}")]
    BadPackageName { name: String },

    #[error("package {package} already installed and replace was not requested")]
    AlreadyExists { package: String },

    #[error(
        "downgrade of {package} from version code {installed} to {requested} is not permitted"
    )]
    VersionDowngrade {
        package: String,
        requested: i64,
        installed: i64,
    },

    #[error("package {package} targets SDK {target}, below the enforced floor {floor}")]
    TargetSdkTooLow {
        package: String,
        target: u32,
        floor: u32,
    },

    #[error("package {package} is marked test-only and the batch does not allow it")]
    TestOnly { package: String },

    #[error("package {package} is not eligible for instant install: {reason}")]
    InstantIneligible { package: String, reason: String },

    #[error("invalid install request for {package}: {message}")]
    InvalidRequest { package: String, message: String },
}

impl PrepareError {
    #[must_use]
    pub fn code(&self) -> InstallCode {
        match self {
            Self::EmptyBatch | Self::InvalidRequest { .. } => InstallCode::InvalidRequest,
            Self::BadPackageName { .. } => InstallCode::BadPackageName,
            Self::AlreadyExists { .. } => InstallCode::AlreadyExists,
            Self::VersionDowngrade { .. } => InstallCode::VersionDowngrade,
            Self::TargetSdkTooLow { .. } => InstallCode::TargetSdkTooLow,
            Self::TestOnly { .. } => InstallCode::TestOnly,
            Self::InstantIneligible { .. } => InstallCode::InstantIneligible,
        }
    }
}
