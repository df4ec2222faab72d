//! Core configuration structures

use pkgd_types::Abi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// General daemon behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level filter: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit debug events alongside tracing output
    #[serde(default)]
    pub verbose_events: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            verbose_events: false,
        }
    }
}

/// Installation pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Batches admitted to the pipeline at once
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Packages scanned in parallel within one batch
    #[serde(default = "default_scan_parallelism")]
    pub scan_parallelism: usize,
    /// Commit watchdog budget; exceeding it is fatal
    #[serde(default = "default_commit_budget_ms")]
    pub commit_budget_ms: u64,
    /// How long a commit waits for a pending restore token
    #[serde(default = "default_restore_wait_ms")]
    pub restore_wait_ms: u64,
    /// Oldest target SDK accepted for new installs
    #[serde(default = "default_target_sdk_floor")]
    pub target_sdk_floor: u32,
    /// ABIs this device can execute, preferred first
    #[serde(default = "default_supported_abis")]
    pub supported_abis: Vec<Abi>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: default_max_concurrent_batches(),
            scan_parallelism: default_scan_parallelism(),
            commit_budget_ms: default_commit_budget_ms(),
            restore_wait_ms: default_restore_wait_ms(),
            target_sdk_floor: default_target_sdk_floor(),
            supported_abis: default_supported_abis(),
        }
    }
}

/// Registry persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding the settings snapshot; `None` keeps the
    /// registry in memory only
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Certificate file seeding the platform signing identity
    #[serde(default)]
    pub platform_cert: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_batches() -> usize {
    2
}

fn default_scan_parallelism() -> usize {
    4
}

fn default_commit_budget_ms() -> u64 {
    10_000
}

fn default_restore_wait_ms() -> u64 {
    60_000
}

fn default_target_sdk_floor() -> u32 {
    23
}

fn default_supported_abis() -> Vec<Abi> {
    vec![Abi::Arm64V8a, Abi::X86_64]
}
