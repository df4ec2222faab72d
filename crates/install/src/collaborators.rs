//! Service seams the pipeline calls out to during commit and post-install.
//!
//! Every trait ships a no-op implementation so the pipeline runs standalone;
//! hosts swap in real services through [`Collaborators`].

use async_trait::async_trait;
use pkgd_errors::Error;
use pkgd_types::{AppId, ParsedDescriptor, UserId};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Turns a staged descriptor file into a [`ParsedDescriptor`].
///
/// The pipeline itself consumes already-parsed descriptors; hosts use this
/// at the edge to build requests from staged artifacts.
#[async_trait]
pub trait DescriptorParser: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not describe a
    /// valid package.
    async fn parse(&self, path: &Path) -> Result<ParsedDescriptor, Error>;
}

/// Ahead-of-time compilation for staged code.
#[async_trait]
pub trait CompileService: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if compilation fails; the pipeline records the
    /// failure and continues, runtime falls back to on-demand compilation.
    async fn compile(&self, package: &str, code_path: &Path) -> Result<(), Error>;
}

/// Answer from the backup subsystem when a freshly installed package may
/// have data waiting to be restored.
pub enum RestoreDecision {
    /// No restore applies; post-install proceeds immediately.
    Rejected,
    /// A restore is running. The receiver resolves when it finishes and the
    /// package may be handed to the user.
    Pending {
        token: Uuid,
        done: oneshot::Receiver<()>,
    },
}

#[async_trait]
pub trait BackupService: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backup subsystem cannot be reached.
    async fn restore_at_install(
        &self,
        package: &str,
        user: UserId,
    ) -> Result<RestoreDecision, Error>;
}

/// Records enough state for a later rollback of this install.
#[async_trait]
pub trait RollbackService: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if rollback state cannot be captured.
    async fn enable_rollback(
        &self,
        package: &str,
        replaced_version: Option<i64>,
    ) -> Result<(), Error>;
}

/// Creates, clears, and removes per-app storage.
#[async_trait]
pub trait DataDirHelper: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or re-owned.
    async fn prepare_app_data(
        &self,
        package: &str,
        app_id: AppId,
        previous_app_id: Option<AppId>,
        users: &[UserId],
    ) -> Result<(), Error>;

    /// # Errors
    ///
    /// Returns an error if existing data cannot be wiped.
    async fn clear_app_data(&self, package: &str, users: &[UserId]) -> Result<(), Error>;

    /// # Errors
    ///
    /// Returns an error if the staged or replaced code path cannot be
    /// deleted.
    async fn remove_code_path(&self, path: &Path) -> Result<(), Error>;
}

/// Stops running processes of a package. Best effort; failures are logged
/// by implementations, never surfaced to the batch.
#[async_trait]
pub trait ProcessController: Send + Sync {
    async fn kill_package(&self, package: &str, reason: &str);
}

/// Inert defaults used when a host wires no real service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompileService;

#[async_trait]
impl CompileService for NoopCompileService {
    async fn compile(&self, _package: &str, _code_path: &Path) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackupService;

#[async_trait]
impl BackupService for NoopBackupService {
    async fn restore_at_install(
        &self,
        _package: &str,
        _user: UserId,
    ) -> Result<RestoreDecision, Error> {
        Ok(RestoreDecision::Rejected)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRollbackService;

#[async_trait]
impl RollbackService for NoopRollbackService {
    async fn enable_rollback(
        &self,
        _package: &str,
        _replaced_version: Option<i64>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDataDirHelper;

#[async_trait]
impl DataDirHelper for NoopDataDirHelper {
    async fn prepare_app_data(
        &self,
        _package: &str,
        _app_id: AppId,
        _previous_app_id: Option<AppId>,
        _users: &[UserId],
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn clear_app_data(&self, _package: &str, _users: &[UserId]) -> Result<(), Error> {
        Ok(())
    }

    async fn remove_code_path(&self, _path: &Path) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProcessController;

#[async_trait]
impl ProcessController for NoopProcessController {
    async fn kill_package(&self, _package: &str, _reason: &str) {}
}

/// Bundle of services the pipeline calls during commit and post-install.
#[derive(Clone)]
pub struct Collaborators {
    pub compiler: Arc<dyn CompileService>,
    pub backup: Arc<dyn BackupService>,
    pub rollback: Arc<dyn RollbackService>,
    pub data_dirs: Arc<dyn DataDirHelper>,
    pub processes: Arc<dyn ProcessController>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            compiler: Arc::new(NoopCompileService),
            backup: Arc::new(NoopBackupService),
            rollback: Arc::new(NoopRollbackService),
            data_dirs: Arc::new(NoopDataDirHelper),
            processes: Arc::new(NoopProcessController),
        }
    }
}

impl Collaborators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn CompileService>) -> Self {
        self.compiler = compiler;
        self
    }

    #[must_use]
    pub fn with_backup(mut self, backup: Arc<dyn BackupService>) -> Self {
        self.backup = backup;
        self
    }

    #[must_use]
    pub fn with_rollback(mut self, rollback: Arc<dyn RollbackService>) -> Self {
        self.rollback = rollback;
        self
    }

    #[must_use]
    pub fn with_data_dirs(mut self, data_dirs: Arc<dyn DataDirHelper>) -> Self {
        self.data_dirs = data_dirs;
        self
    }

    #[must_use]
    pub fn with_processes(mut self, processes: Arc<dyn ProcessController>) -> Self {
        self.processes = processes;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
