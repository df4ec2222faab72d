#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the pkgd installation engine
//!
//! Errors are organized by pipeline phase. Every phase before Commit
//! returns failures value-style with no shared mutation to unwind;
//! Commit failures are fatal and poison the registry. Each error kind
//! carries a stable numeric [`InstallCode`] as structured data.

use thiserror::Error;

pub mod codes;
pub mod commit;
pub mod config;
pub mod prepare;
pub mod reconcile;
pub mod registry;
pub mod scan;

pub use codes::InstallCode;
pub use commit::CommitError;
pub use config::ConfigError;
pub use prepare::PrepareError;
pub use reconcile::ReconcileError;
pub use registry::RegistryError;
pub use scan::ScanError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    #[error("prepare error: {0}")]
    Prepare(#[from] PrepareError),

    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[cfg_attr(feature = "serde", serde(skip))]
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// The stable numeric status code for this error
    #[must_use]
    pub fn code(&self) -> InstallCode {
        match self {
            Self::Prepare(err) => err.code(),
            Self::Scan(err) => err.code(),
            Self::Reconcile(err) => err.code(),
            Self::Commit(err) => err.code(),
            Self::Registry(err) => err.code(),
            Self::Config(_) | Self::Internal(_) | Self::Io { .. } => InstallCode::Internal,
            Self::Cancelled => InstallCode::BatchAborted,
        }
    }

    /// Fatal errors escalate to a process restart rather than a retry
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.code().is_fatal()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Registry(RegistryError::SnapshotCorrupt {
            message: err.to_string(),
        })
    }
}

/// Result type alias for pkgd operations
pub type Result<T> = std::result::Result<T, Error>;
