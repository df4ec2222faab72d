//! Reconciliation error types
//!
//! Cross-package validation failures. A batch install is atomic across
//! all its members, so any one of these fails the whole batch.

use crate::InstallCode;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReconcileError {
    #[error("package {package} appears more than once in the batch")]
    DuplicatePackage { package: String },

    #[error("package {package} requires shared library {library} version {version}, not present")]
    MissingSharedLibrary {
        package: String,
        library: String,
        version: i64,
    },

    #[error(
        "static library {library} version {version} falls between published versions {below} and {above}"
    )]
    StaticLibraryOrder {
        library: String,
        version: i64,
        below: i64,
        above: i64,
    },

    #[error("shared user {shared_user} would end with conflicting signing identities (via {package})")]
    SharedUserSigningConflict {
        shared_user: String,
        package: String,
    },

    #[error("permission {permission} declared by {package} is owned by the platform")]
    PermissionOwnedByPlatform {
        permission: String,
        package: String,
    },

    #[error("internal reconcile invariant violated: {message}")]
    Internal { message: String },
}

impl ReconcileError {
    #[must_use]
    pub fn code(&self) -> InstallCode {
        match self {
            Self::DuplicatePackage { .. } => InstallCode::DuplicatePackageInBatch,
            Self::MissingSharedLibrary { .. } => InstallCode::MissingSharedLibrary,
            Self::StaticLibraryOrder { .. } => InstallCode::StaticLibraryOrder,
            Self::SharedUserSigningConflict { .. } => InstallCode::SharedUserSigningConflict,
            Self::PermissionOwnedByPlatform { .. } => InstallCode::PermissionOwnedByPlatform,
            Self::Internal { .. } => InstallCode::Internal,
        }
    }
}
