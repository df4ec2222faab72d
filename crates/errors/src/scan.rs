//! Scanner error types

use crate::InstallCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanError {
    #[error("package {package} carries no signing certificates")]
    NotSigned { package: String },

    #[error(
        "package {package} signed with {new_signer} is incompatible with installed data signed with {installed_signer}"
    )]
    UpdateIncompatible {
        package: String,
        installed_signer: String,
        new_signer: String,
    },

    #[error("package {package} cannot join shared user {shared_user}: signing mismatch")]
    SharedUserIncompatible {
        package: String,
        shared_user: String,
    },

    #[error("package {package} changes shared-user grouping on update ({installed:?} -> {requested:?})")]
    SharedUserChanged {
        package: String,
        installed: Option<String>,
        requested: Option<String>,
    },

    #[error("package {package} has no ABI in common with this system (declared: {declared})")]
    UnsupportedAbi { package: String, declared: String },

    #[error("descriptor re-declares the reserved platform package name")]
    ReservedName,

    #[error("permission group {group} already declared by {owner} under a different signer")]
    DuplicatePermissionGroup { group: String, owner: String },

    #[error(
        "SDK library {package} bumps major version {old_major} -> {new_major} without an SDK floor change"
    )]
    SdkLibraryMajorMismatch {
        package: String,
        old_major: i64,
        new_major: i64,
    },

    #[error("static library base name {base} collides with installed package {owner}")]
    StaticLibraryNameCollision { base: String, owner: String },

    #[error("static library package {package} must be named {expected}")]
    StaticLibraryNameMismatch { package: String, expected: String },

    #[error("no free app identities remain")]
    AppIdExhausted,

    #[error("internal scan invariant violated: {message}")]
    Internal { message: String },
}

impl ScanError {
    #[must_use]
    pub fn code(&self) -> InstallCode {
        match self {
            Self::NotSigned { .. } => InstallCode::NotSigned,
            Self::UpdateIncompatible { .. } => InstallCode::UpdateIncompatible,
            Self::SharedUserIncompatible { .. } | Self::SharedUserChanged { .. } => {
                InstallCode::SharedUserIncompatible
            }
            Self::UnsupportedAbi { .. } => InstallCode::UnsupportedAbi,
            Self::ReservedName => InstallCode::ReservedPlatformName,
            Self::DuplicatePermissionGroup { .. } => InstallCode::DuplicatePermissionGroup,
            Self::SdkLibraryMajorMismatch { .. } => InstallCode::SdkLibraryMajorMismatch,
            Self::StaticLibraryNameCollision { .. } | Self::StaticLibraryNameMismatch { .. } => {
                InstallCode::StaticLibraryNameCollision
            }
            Self::AppIdExhausted => InstallCode::AppIdExhausted,
            Self::Internal { .. } => InstallCode::Internal,
        }
    }

    /// Caller error vs violated internal invariant
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}
