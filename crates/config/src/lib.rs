#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration for the pkgd installation engine
//!
//! Precedence, lowest to highest: built-in defaults, config file,
//! `PKGD_*` environment variables, then whatever flags the embedding
//! binary applies on top.

mod core;

pub use core::{Config, GeneralConfig, InstallerConfig, RegistryConfig};

use pkgd_errors::{ConfigError, Error};
use std::path::Path;

impl Config {
    /// Load configuration from a toml file, or defaults when the file is
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ReadFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge environment-variable overrides (`PKGD_*`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(value) = std::env::var("PKGD_REGISTRY_ROOT") {
            self.registry.root = Some(value.into());
        }
        if let Ok(value) = std::env::var("PKGD_PLATFORM_CERT") {
            self.registry.platform_cert = Some(value.into());
        }
        if let Ok(value) = std::env::var("PKGD_COMMIT_BUDGET_MS") {
            self.installer.commit_budget_ms =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "PKGD_COMMIT_BUDGET_MS".to_string(),
                    message: format!("not a duration in ms: {value}"),
                })?;
        }
        if let Ok(value) = std::env::var("PKGD_MAX_BATCHES") {
            self.installer.max_concurrent_batches =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "PKGD_MAX_BATCHES".to_string(),
                    message: format!("not a count: {value}"),
                })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        if self.installer.max_concurrent_batches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "installer.max_concurrent_batches".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.installer.commit_budget_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "installer.commit_budget_ms".to_string(),
                message: "must be nonzero".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
