//! CLI error handling

use std::fmt;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Engine error from the install pipeline or registry
    Engine(pkgd_errors::Error),
    /// System setup error
    Setup(String),

    /// Invalid command arguments
    InvalidArguments(String),
    /// The batch aborted; per-package outcomes were already rendered
    BatchFailed(i32),
    /// I/O error
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Engine(e) => {
                write!(f, "{e}")?;
                write!(f, "\n  Code: {}", e.code())
            }
            CliError::Setup(msg) => write!(f, "System setup error: {msg}"),

            CliError::InvalidArguments(msg) => write!(f, "Invalid arguments: {msg}"),
            CliError::BatchFailed(code) => write!(f, "install batch failed (code {code})"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Engine(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<pkgd_errors::Error> for CliError {
    fn from(e: pkgd_errors::Error) -> Self {
        CliError::Engine(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
