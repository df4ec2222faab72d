//! System setup and initialization

use crate::error::CliError;
use async_trait::async_trait;
use pkgd_config::Config;
use pkgd_errors::{Error, PrepareError};
use pkgd_events::EventSender;
use pkgd_install::{DescriptorParser, InstallService, Installer, PipelineConfig};
use pkgd_registry::{JsonSnapshotStore, MemorySnapshotStore, PackageRegistry, SnapshotStore};
use pkgd_types::{ParsedDescriptor, PermissionDecl, ProtectionLevel, SigningDetails};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Permissions only the platform identity may define
const PLATFORM_PERMISSIONS: &[(&str, ProtectionLevel)] = &[
    ("pkgd.permission.INSTALL_PACKAGES", ProtectionLevel::Signature),
    ("pkgd.permission.DELETE_PACKAGES", ProtectionLevel::Signature),
    ("pkgd.permission.CLEAR_APP_DATA", ProtectionLevel::Signature),
];

/// Broadcast actions reserved for the platform
const PROTECTED_BROADCASTS: &[&str] = &[
    "pkgd.intent.PACKAGE_ADDED",
    "pkgd.intent.PACKAGE_REMOVED",
    "pkgd.intent.PACKAGE_REPLACED",
];

/// Fallback signing seed for development setups without a configured
/// platform certificate
const DEV_PLATFORM_CERT: &[u8] = b"pkgd-dev-platform";

/// System setup and component initialization
pub struct SystemSetup {
    config: Config,
    store: Option<Arc<dyn SnapshotStore>>,
    registry: Option<PackageRegistry>,
    service: Option<InstallService>,
    parser: Arc<dyn DescriptorParser>,
}

impl SystemSetup {
    /// Create new system setup
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            registry: None,
            service: None,
            parser: Arc::new(JsonDescriptorParser),
        }
    }

    /// Initialize all system components
    pub async fn initialize(&mut self, tx: EventSender) -> Result<(), CliError> {
        info!("Initializing pkgd system components");

        self.ensure_registry_root().await?;
        self.init_store();
        self.init_registry(tx).await?;
        self.init_service();

        info!("System initialization completed");
        Ok(())
    }

    /// Get snapshot store
    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone().expect("store not initialized")
    }

    /// Get package registry
    pub fn registry(&self) -> &PackageRegistry {
        self.registry.as_ref().expect("registry not initialized")
    }

    /// Get install service
    pub fn service(&self) -> &InstallService {
        self.service.as_ref().expect("service not initialized")
    }

    /// Get descriptor parser
    pub fn parser(&self) -> Arc<dyn DescriptorParser> {
        self.parser.clone()
    }

    /// Get configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ensure the snapshot directory exists when persistence is configured
    async fn ensure_registry_root(&self) -> Result<(), CliError> {
        let Some(root) = &self.config.registry.root else {
            return Ok(());
        };
        if !root.exists() {
            debug!("Creating registry root: {}", root.display());
            tokio::fs::create_dir_all(root).await.map_err(|e| {
                CliError::Setup(format!(
                    "failed to create registry root {}: {e}",
                    root.display()
                ))
            })?;
        }
        Ok(())
    }

    fn init_store(&mut self) {
        let store: Arc<dyn SnapshotStore> = match &self.config.registry.root {
            Some(root) => {
                debug!("Using snapshot store at {}", root.display());
                Arc::new(JsonSnapshotStore::new(root))
            }
            None => {
                info!("No registry root configured; running in memory");
                Arc::new(MemorySnapshotStore::new())
            }
        };
        self.store = Some(store);
    }

    async fn init_registry(&mut self, tx: EventSender) -> Result<(), CliError> {
        let store = self.store();
        let registry = PackageRegistry::new().with_events(tx);

        let loaded = registry.load_from(store.as_ref()).await?;
        if !loaded {
            info!("No snapshot found; starting with an empty registry");
        }

        let signing = self.platform_signing().await?;
        registry
            .seed_platform(signing, platform_permissions(), protected_broadcasts())
            .await?;

        self.registry = Some(registry);
        Ok(())
    }

    fn init_service(&mut self) {
        let installer_config = &self.config.installer;
        let pipeline = PipelineConfig::default()
            .with_scan_parallelism(installer_config.scan_parallelism)
            .with_commit_budget(Duration::from_millis(installer_config.commit_budget_ms))
            .with_restore_wait(Duration::from_millis(installer_config.restore_wait_ms))
            .with_target_sdk_floor(installer_config.target_sdk_floor)
            .with_supported_abis(installer_config.supported_abis.clone());

        let registry = self
            .registry
            .clone()
            .expect("registry initialized before service");
        let installer = Installer::new(pipeline, registry, self.store());
        self.service = Some(InstallService::new(
            Arc::new(installer),
            installer_config.max_concurrent_batches,
        ));
    }

    async fn platform_signing(&self) -> Result<SigningDetails, CliError> {
        match &self.config.registry.platform_cert {
            Some(path) => {
                let cert = tokio::fs::read(path).await.map_err(|e| {
                    CliError::Setup(format!(
                        "failed to read platform certificate {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(SigningDetails::from_cert(&cert))
            }
            None => {
                debug!("No platform certificate configured; using development identity");
                Ok(SigningDetails::from_cert(DEV_PLATFORM_CERT))
            }
        }
    }
}

fn platform_permissions() -> Vec<PermissionDecl> {
    PLATFORM_PERMISSIONS
        .iter()
        .map(|(name, protection)| PermissionDecl {
            name: (*name).to_string(),
            group: None,
            protection: *protection,
        })
        .collect()
}

fn protected_broadcasts() -> Vec<String> {
    PROTECTED_BROADCASTS
        .iter()
        .map(|action| (*action).to_string())
        .collect()
}

/// Parses staged descriptor files as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDescriptorParser;

#[async_trait]
impl DescriptorParser for JsonDescriptorParser {
    async fn parse(&self, path: &Path) -> Result<ParsedDescriptor, Error> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        serde_json::from_slice(&raw).map_err(|e| {
            PrepareError::InvalidRequest {
                package: path.display().to_string(),
                message: format!("descriptor is not valid JSON: {e}"),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgd_types::PLATFORM_PACKAGE_NAME;

    #[tokio::test]
    async fn initialize_seeds_the_platform() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.registry.root = Some(dir.path().to_path_buf());

        let (tx, _rx) = pkgd_events::channel();
        let mut setup = SystemSetup::new(config);
        setup.initialize(tx).await.expect("initialize");

        let platform = setup
            .registry()
            .package_info(PLATFORM_PACKAGE_NAME)
            .await
            .expect("registry readable");
        assert!(platform.is_some());
        assert!(setup.service().available_slots() > 0);
    }

    #[tokio::test]
    async fn parser_reads_a_staged_descriptor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("com.example.app.json");
        tokio::fs::write(
            &path,
            r#"{
                "name": "com.example.app",
                "version_code": 3,
                "version": "1.1.0",
                "signing": { "signers": [], "lineage": [] },
                "code_path": "/data/staging/com.example.app"
            }"#,
        )
        .await
        .expect("write descriptor");

        let parsed = JsonDescriptorParser
            .parse(&path)
            .await
            .expect("parse descriptor");
        assert_eq!(parsed.name, "com.example.app");
        assert_eq!(parsed.version_code, 3);
    }

    #[tokio::test]
    async fn parser_rejects_malformed_descriptors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.expect("write");

        let err = JsonDescriptorParser
            .parse(&path)
            .await
            .expect_err("must fail");
        assert_eq!(err.code(), pkgd_errors::InstallCode::InvalidRequest);
    }
}
