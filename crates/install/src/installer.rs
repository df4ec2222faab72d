//! Batch installer orchestration
//!
//! Drives one batch through prepare, scan, compile, reconcile, commit
//! and post-install. The batch is atomic: every request commits or none
//! does, and nothing before commit touches persisted state. Freezes and
//! the install hold span the whole batch, post-install included.
//!
//! Lock discipline: the registry write guard is taken after compilation
//! has finished and covers exactly the reconcile and commit phases, so
//! a compiling batch never blocks an unrelated one. A watchdog bounds
//! the time the guard may be held; blowing the budget poisons the
//! registry because a stuck commit cannot be unwound.

use crate::collaborators::{Collaborators, RestoreDecision};
use crate::commit::{CommitOutcome, Committer};
use crate::freezer::PackageFreezer;
use crate::hold::InstallHoldController;
use crate::prepare::Preparer;
use crate::reconcile::Reconciler;
use crate::request::{InstallContext, InstallRequest, RequestStatus};
use crate::result::{BatchResult, RequestOutcome};
use crate::scan::{ScanResult, Scanner};
use pkgd_errors::{CommitError, InstallCode, ReconcileError, ScanError};
use pkgd_events::{
    AppEvent, BroadcastEvent, EventEmitter, EventSender, InstallEvent, PipelinePhase,
};
use pkgd_registry::{PackageRegistry, RegistrySnapshot, SnapshotStore};
use pkgd_types::Abi;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Tunables for the pipeline, mapped from host configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent scans per batch
    pub scan_parallelism: usize,
    /// Watchdog budget for the reconcile-and-commit lock span
    pub commit_budget: Duration,
    /// How long post-install waits on a pending restore
    pub restore_wait: Duration,
    /// Minimum target SDK accepted for non-system installs
    pub target_sdk_floor: u32,
    /// ABIs the device can execute, in preference order
    pub supported_abis: Vec<Abi>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan_parallelism: 4,
            commit_budget: Duration::from_secs(10),
            restore_wait: Duration::from_secs(60),
            target_sdk_floor: 23,
            supported_abis: vec![Abi::Arm64V8a, Abi::X86_64],
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_scan_parallelism(mut self, parallelism: usize) -> Self {
        self.scan_parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn with_commit_budget(mut self, budget: Duration) -> Self {
        self.commit_budget = budget;
        self
    }

    #[must_use]
    pub fn with_restore_wait(mut self, wait: Duration) -> Self {
        self.restore_wait = wait;
        self
    }

    #[must_use]
    pub fn with_target_sdk_floor(mut self, floor: u32) -> Self {
        self.target_sdk_floor = floor;
        self
    }

    #[must_use]
    pub fn with_supported_abis(mut self, abis: Vec<Abi>) -> Self {
        self.supported_abis = abis;
        self
    }
}

/// Why a batch stopped before commit completed
struct BatchFailure {
    /// Request the failure is attributable to; `None` charges the whole
    /// batch
    cause: Option<String>,
    code: InstallCode,
    message: String,
}

impl BatchFailure {
    fn batch(code: InstallCode, message: impl Into<String>) -> Self {
        Self {
            cause: None,
            code,
            message: message.into(),
        }
    }

    fn request(package: impl Into<String>, code: InstallCode, message: impl Into<String>) -> Self {
        Self {
            cause: Some(package.into()),
            code,
            message: message.into(),
        }
    }
}

fn reconcile_failure(err: &ReconcileError) -> BatchFailure {
    let cause = match err {
        ReconcileError::DuplicatePackage { package }
        | ReconcileError::MissingSharedLibrary { package, .. }
        | ReconcileError::SharedUserSigningConflict { package, .. }
        | ReconcileError::PermissionOwnedByPlatform { package, .. } => Some(package.clone()),
        ReconcileError::StaticLibraryOrder { .. } | ReconcileError::Internal { .. } => None,
    };
    BatchFailure {
        cause,
        code: err.code(),
        message: err.to_string(),
    }
}

/// End-to-end installer for request batches
pub struct Installer {
    config: PipelineConfig,
    registry: PackageRegistry,
    store: Arc<dyn SnapshotStore>,
    collaborators: Collaborators,
    freezer: PackageFreezer,
    holds: InstallHoldController,
}

impl Installer {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        registry: PackageRegistry,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            collaborators: Collaborators::default(),
            freezer: PackageFreezer::new(),
            holds: InstallHoldController::new(),
        }
    }

    #[must_use]
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    #[must_use]
    pub fn freezer(&self) -> &PackageFreezer {
        &self.freezer
    }

    #[must_use]
    pub fn holds(&self) -> &InstallHoldController {
        &self.holds
    }

    /// Run one batch to completion. Always returns a result carrying one
    /// outcome per request; consult [`BatchResult::fatal_code`] to tell
    /// recoverable failures from ones that require a process restart.
    pub async fn install(&self, mut context: InstallContext) -> BatchResult {
        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let mut result = BatchResult::new(batch_id);

        if context.requests.is_empty() {
            context.emit(AppEvent::Install(InstallEvent::BatchFailed {
                batch: batch_id,
                code: InstallCode::InvalidRequest.as_i32(),
                message: "batch carries no requests".to_string(),
            }));
            result.duration = started.elapsed();
            return result;
        }

        let packages: Vec<String> = context
            .requests
            .iter()
            .map(|request| request.package_name().to_string())
            .collect();
        context.emit(AppEvent::Install(InstallEvent::BatchStarted {
            batch: batch_id,
            packages: packages.clone(),
        }));
        for request in &mut context.requests {
            request.mark_phase(PipelinePhase::Created);
        }

        // Held for the wall-clock life of the batch so the host cannot
        // suspend mid-install; released exactly once on every exit path.
        let hold = self.holds.acquire(context.requests.len());

        // Freeze current names plus any rename sources so nothing mutates
        // or observes them while the batch is in flight.
        let mut names = packages;
        for request in &context.requests {
            if let Some(original) = &request.descriptor.original_name {
                names.push(original.clone());
            }
        }
        let frozen = self
            .freezer
            .freeze_batch(names, context.event_sender.clone())
            .await;

        match self.run(&mut context, batch_id).await {
            Ok(outcomes) => {
                self.post_install(&mut context, batch_id, outcomes, &mut result)
                    .await;
            }
            Err(failure) => {
                self.abort(&mut context, batch_id, failure, &mut result).await;
            }
        }

        drop(frozen);
        hold.release();
        result.duration = started.elapsed();

        if result.succeeded() {
            context.emit(AppEvent::Install(InstallEvent::BatchCompleted {
                batch: batch_id,
                duration: result.duration,
                packages: result.outcomes.len(),
            }));
        }
        result
    }

    /// Everything up to and including commit. On `Err` nothing durable
    /// has changed unless the error is fatal, in which case the registry
    /// is already poisoned.
    async fn run(
        &self,
        context: &mut InstallContext,
        batch_id: Uuid,
    ) -> Result<Vec<CommitOutcome>, BatchFailure> {
        let tx = context.event_sender.clone();
        let scan_flags = context.scan_flags;
        let known_users = context.users();

        // The frozen snapshot every pre-commit phase validates against.
        let snapshot = Arc::new(
            self.registry
                .snapshot()
                .await
                .map_err(|err| BatchFailure::batch(err.code(), err.to_string()))?,
        );

        let phase_started = Instant::now();
        let preparer = Preparer::new(self.config.target_sdk_floor);
        for request in &mut context.requests {
            if let Err(err) = preparer.prepare(request, &snapshot, scan_flags) {
                return Err(BatchFailure::request(
                    request.package_name(),
                    err.code(),
                    err.to_string(),
                ));
            }
            request.mark_phase(PipelinePhase::Preparing);
        }
        tx.emit(AppEvent::Install(InstallEvent::PhaseCompleted {
            batch: batch_id,
            phase: PipelinePhase::Preparing,
            duration: phase_started.elapsed(),
        }));

        let phase_started = Instant::now();
        let scans = self.scan_all(context, &snapshot, batch_id).await?;
        tx.emit(AppEvent::Install(InstallEvent::PhaseCompleted {
            batch: batch_id,
            phase: PipelinePhase::Scanned,
            duration: phase_started.elapsed(),
        }));

        // Compilation is awaited with no lock held; a failure defers the
        // package to on-demand compilation and never fails the batch.
        let phase_started = Instant::now();
        self.compile_batch(&tx, batch_id, &scans).await;
        for request in &mut context.requests {
            request.mark_phase(PipelinePhase::Compiling);
        }
        tx.emit(AppEvent::Install(InstallEvent::PhaseCompleted {
            batch: batch_id,
            phase: PipelinePhase::Compiling,
            duration: phase_started.elapsed(),
        }));

        // Reconcile and commit share one write-lock span.
        let phase_started = Instant::now();
        let mut guard = self
            .registry
            .begin_write()
            .await
            .map_err(|err| BatchFailure::batch(err.code(), err.to_string()))?;
        let reconciled = match Reconciler::new().reconcile(scans, &guard.snapshot()) {
            Ok(batch) => batch,
            Err(err) => return Err(reconcile_failure(&err)),
        };
        for request in &mut context.requests {
            request.mark_phase(PipelinePhase::Reconciled);
        }
        tx.emit(AppEvent::Install(InstallEvent::PhaseCompleted {
            batch: batch_id,
            phase: PipelinePhase::Reconciled,
            duration: phase_started.elapsed(),
        }));

        let phase_started = Instant::now();
        let committer = Committer::new(
            Arc::clone(&self.store),
            self.collaborators.clone(),
            context.event_sender.clone(),
        );
        let commit = committer.commit(&mut guard, reconciled, batch_id, &known_users, scan_flags);
        let outcomes = match tokio::time::timeout(self.config.commit_budget, commit).await {
            Ok(Ok(outcomes)) => outcomes,
            Ok(Err(err)) => {
                return Err(BatchFailure::batch(err.code(), err.to_string()));
            }
            Err(_) => {
                // The commit future was cancelled mid-mutation; nothing
                // under the guard can be trusted any more.
                guard.poison("commit watchdog expired");
                let err = CommitError::WatchdogExpired {
                    budget_ms: u64::try_from(self.config.commit_budget.as_millis())
                        .unwrap_or(u64::MAX),
                };
                return Err(BatchFailure::batch(err.code(), err.to_string()));
            }
        };
        drop(guard);

        for request in &mut context.requests {
            request.mark_phase(PipelinePhase::Committed);
        }
        tx.emit(AppEvent::Install(InstallEvent::PhaseCompleted {
            batch: batch_id,
            phase: PipelinePhase::Committed,
            duration: phase_started.elapsed(),
        }));
        Ok(outcomes)
    }

    /// Scan every request against the frozen snapshot, bounded by the
    /// configured parallelism. Results come back in batch order; the
    /// earliest failure in batch order wins so aborts are deterministic.
    async fn scan_all(
        &self,
        context: &mut InstallContext,
        snapshot: &Arc<RegistrySnapshot>,
        batch_id: Uuid,
    ) -> Result<Vec<ScanResult>, BatchFailure> {
        let tx = context.event_sender.clone();
        let scan_flags = context.scan_flags;
        let scanner = Scanner::new(self.registry.clone(), self.config.supported_abis.clone());
        let permits = Arc::new(Semaphore::new(self.config.scan_parallelism.max(1)));

        let mut tasks: JoinSet<(usize, Result<ScanResult, ScanError>)> = JoinSet::new();
        for (index, request) in context.requests.iter().enumerate() {
            let scanner = scanner.clone();
            let snapshot = Arc::clone(snapshot);
            let permits = Arc::clone(&permits);
            let probe = InstallRequest::new(request.descriptor.clone())
                .with_flags(request.flags)
                .with_user(request.user)
                .with_source(request.source.clone());
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            Err(ScanError::Internal {
                                message: "scan limiter closed".to_string(),
                            }),
                        );
                    }
                };
                (index, scanner.scan(&probe, &snapshot, scan_flags))
            });
        }

        let mut slots: Vec<Option<ScanResult>> = std::iter::repeat_with(|| None)
            .take(context.requests.len())
            .collect();
        let mut first_error: Option<(usize, ScanError)> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(scan))) => slots[index] = Some(scan),
                Ok((index, Err(err))) => {
                    if first_error.as_ref().is_none_or(|(held, _)| index < *held) {
                        first_error = Some((index, err));
                    }
                }
                Err(err) => {
                    return Err(BatchFailure::batch(
                        InstallCode::Internal,
                        format!("scan task failed: {err}"),
                    ));
                }
            }
        }
        if let Some((index, err)) = first_error {
            return Err(BatchFailure::request(
                context.requests[index].package_name(),
                err.code(),
                err.to_string(),
            ));
        }

        let mut scans = Vec::with_capacity(slots.len());
        for (slot, request) in slots.into_iter().zip(&mut context.requests) {
            let Some(scan) = slot else {
                return Err(BatchFailure::batch(
                    InstallCode::Internal,
                    "a scan result went missing",
                ));
            };
            tx.emit(AppEvent::Install(InstallEvent::ScanCompleted {
                batch: batch_id,
                package: scan.setting.name.clone(),
                app_id: scan.setting.app_id.0,
                replace: scan.update,
            }));
            request.mark_phase(PipelinePhase::Scanned);
            scans.push(scan);
        }
        Ok(scans)
    }

    async fn compile_batch(&self, tx: &Option<EventSender>, batch_id: Uuid, scans: &[ScanResult]) {
        let mut jobs = Vec::with_capacity(scans.len());
        for scan in scans {
            tx.emit(AppEvent::Install(InstallEvent::CompileQueued {
                batch: batch_id,
                package: scan.setting.name.clone(),
            }));
            let compiler = Arc::clone(&self.collaborators.compiler);
            let package = scan.setting.name.clone();
            let code_path = scan.setting.code_path.clone();
            jobs.push(async move {
                let outcome = compiler.compile(&package, &code_path).await;
                (package, outcome)
            });
        }
        for (package, outcome) in futures::future::join_all(jobs).await {
            match outcome {
                Ok(()) => tx.emit(AppEvent::Install(InstallEvent::CompileCompleted {
                    batch: batch_id,
                    package,
                })),
                Err(err) => tx.emit(AppEvent::Install(InstallEvent::CompileDeferred {
                    batch: batch_id,
                    package,
                    error: err.to_string(),
                })),
            }
        }
    }

    /// Per-package work after the batch became durable. Failures here are
    /// warnings: the install already happened.
    async fn post_install(
        &self,
        context: &mut InstallContext,
        batch_id: Uuid,
        outcomes: Vec<CommitOutcome>,
        result: &mut BatchResult,
    ) {
        let tx = context.event_sender.clone();
        for (request, outcome) in context.requests.iter_mut().zip(outcomes) {
            let mut entry = RequestOutcome {
                package: outcome.package.clone(),
                code: InstallCode::Success.as_i32(),
                message: String::new(),
                app_id: Some(outcome.app_id.0),
                update: outcome.update,
                deferred_cleanup: None,
            };

            // When the data copy beat the incoming system copy there is
            // nothing to provision; the user-visible install is unchanged.
            if !outcome.disabled_system {
                self.provision(&tx, &outcome, &mut entry).await;
            }

            request.mark_phase(PipelinePhase::PostInstall);
            tx.emit(AppEvent::Install(InstallEvent::PostInstallCompleted {
                batch: batch_id,
                package: outcome.package.clone(),
            }));
            request.finish(RequestStatus::success());
            request.mark_phase(PipelinePhase::Done);
            result.outcomes.push(entry);
        }
    }

    async fn provision(
        &self,
        tx: &Option<EventSender>,
        outcome: &CommitOutcome,
        entry: &mut RequestOutcome,
    ) {
        if let Err(err) = self
            .collaborators
            .data_dirs
            .prepare_app_data(
                &outcome.package,
                outcome.app_id,
                outcome.previous_app_id,
                &outcome.users,
            )
            .await
        {
            tx.emit_warning(format!("preparing app data for {}: {err}", outcome.package));
        }

        if outcome.flags.rollback_eligible {
            if let Err(err) = self
                .collaborators
                .rollback
                .enable_rollback(&outcome.package, outcome.replaced_version)
                .await
            {
                tx.emit_warning(format!("enabling rollback for {}: {err}", outcome.package));
            }
        }

        // Fresh installs may have backed-up data waiting; updates keep the
        // data they already have.
        if !outcome.update {
            self.await_restore(tx, outcome).await;
        }

        if outcome.update {
            tx.emit(AppEvent::Broadcast(BroadcastEvent::Removed {
                package: outcome.package.clone(),
                users: outcome.users.clone(),
            }));
        }
        tx.emit(AppEvent::Broadcast(BroadcastEvent::Installed {
            package: outcome.package.clone(),
            users: outcome.users.clone(),
            update: outcome.update,
        }));

        if let Some(path) = &outcome.replaced_code_path {
            if outcome.flags.dont_kill {
                // the old image stays mapped until the app exits
                tx.emit(AppEvent::Install(InstallEvent::CleanupDeferred {
                    package: outcome.package.clone(),
                    path: path.clone(),
                }));
                entry.deferred_cleanup = Some(path.clone());
            } else if let Err(err) = self.collaborators.data_dirs.remove_code_path(path).await {
                tx.emit_warning(format!(
                    "removing replaced code at {}: {err}",
                    path.display()
                ));
            }
        }
    }

    async fn await_restore(&self, tx: &Option<EventSender>, outcome: &CommitOutcome) {
        match self
            .collaborators
            .backup
            .restore_at_install(&outcome.package, outcome.user)
            .await
        {
            Ok(RestoreDecision::Rejected) => {}
            Ok(RestoreDecision::Pending { token, done }) => {
                tx.emit(AppEvent::Install(InstallEvent::RestorePending {
                    package: outcome.package.clone(),
                    token,
                }));
                match tokio::time::timeout(self.config.restore_wait, done).await {
                    Ok(Ok(())) => {
                        tx.emit(AppEvent::Install(InstallEvent::RestoreCompleted {
                            package: outcome.package.clone(),
                            token,
                        }));
                    }
                    Ok(Err(_)) => {
                        tx.emit_warning(format!(
                            "restore for {} was abandoned by the backup service",
                            outcome.package
                        ));
                    }
                    Err(_) => {
                        tx.emit_warning(format!(
                            "restore for {} did not finish in time; continuing without it",
                            outcome.package
                        ));
                    }
                }
            }
            Err(err) => {
                tx.emit_warning(format!("restore query for {} failed: {err}", outcome.package));
            }
        }
    }

    /// Settle every request after a pre-commit failure. The causing
    /// request keeps its own code; the rest report the batch abort.
    async fn abort(
        &self,
        context: &mut InstallContext,
        batch_id: Uuid,
        failure: BatchFailure,
        result: &mut BatchResult,
    ) {
        let tx = context.event_sender.clone();
        for request in &mut context.requests {
            let own_failure = failure
                .cause
                .as_deref()
                .is_none_or(|cause| cause == request.package_name());
            let status = if own_failure {
                RequestStatus::failure(failure.code, failure.message.clone())
            } else {
                RequestStatus::failure(
                    InstallCode::BatchAborted,
                    format!("batch aborted: {}", failure.message),
                )
            };
            request.mark_phase(PipelinePhase::Failed);
            result
                .outcomes
                .push(RequestOutcome::from_status(request.package_name(), &status));
            request.finish(status);
        }

        // Staged artifacts are not kept for a failed batch. System-image
        // paths are read-only and stay where they are.
        if !context.scan_flags.from_system_image {
            for request in &context.requests {
                let staged = &request.descriptor.code_path;
                if staged.as_os_str().is_empty() {
                    continue;
                }
                if let Err(err) = self.collaborators.data_dirs.remove_code_path(staged).await {
                    tx.emit_debug(format!(
                        "staged cleanup for {}: {err}",
                        request.package_name()
                    ));
                }
            }
        }

        tx.emit(AppEvent::Install(InstallEvent::BatchFailed {
            batch: batch_id,
            code: failure.code.as_i32(),
            message: failure.message,
        }));
    }
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .field("holds", &self.holds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pkgd_errors::Error;
    use pkgd_registry::MemorySnapshotStore;
    use pkgd_types::{InstallFlags, ParsedDescriptor, SigningDetails, UserId, Version};
    use tokio::sync::oneshot;

    fn descriptor(name: &str, version_code: i64) -> ParsedDescriptor {
        let mut d = ParsedDescriptor::new(name, version_code, Version::new(1, 0, 0));
        d.signing = SigningDetails::from_cert(b"k1");
        d.sdk.target = 30;
        d.code_path = std::path::PathBuf::from(format!("/data/staging/{name}-{version_code}"));
        d
    }

    fn installer() -> Installer {
        Installer::new(
            PipelineConfig::default(),
            PackageRegistry::new(),
            Arc::new(MemorySnapshotStore::new()),
        )
    }

    #[tokio::test]
    async fn empty_batch_fails_without_side_effects() {
        let installer = installer();
        let result = installer.install(InstallContext::new()).await;
        assert!(!result.succeeded());
        assert!(result.outcomes.is_empty());
        assert!(installer.holds().is_idle());
    }

    #[tokio::test]
    async fn single_fresh_install_runs_to_done() {
        let installer = installer();
        let (done_tx, mut done_rx) = oneshot::channel();
        let context = InstallContext::new().add_request(
            InstallRequest::new(descriptor("com.example.app", 1))
                .with_completion_notifier(done_tx),
        );

        let result = installer.install(context).await;

        assert!(result.succeeded());
        let outcome = result.outcome_for("com.example.app").expect("outcome");
        assert!(outcome.app_id.is_some());
        assert!(!outcome.update);

        let status = done_rx.try_recv().expect("completion fired");
        assert!(status.is_success());

        let snapshot = installer.registry().snapshot().await.expect("snapshot");
        assert!(snapshot.is_installed("com.example.app", UserId::PRIMARY));
        assert!(installer.holds().is_idle());
        assert!(!installer.freezer().is_frozen("com.example.app"));
    }

    #[tokio::test]
    async fn one_bad_request_aborts_the_whole_batch() {
        let installer = installer();
        let mut unsigned = descriptor("com.example.bad", 1);
        unsigned.signing = SigningDetails::default();
        let context = InstallContext::new()
            .add_request(InstallRequest::new(descriptor("com.example.good", 1)))
            .add_request(InstallRequest::new(unsigned));

        let result = installer.install(context).await;

        assert!(!result.succeeded());
        assert_eq!(
            result.outcome_for("com.example.bad").map(|o| o.code),
            Some(InstallCode::NotSigned.as_i32())
        );
        assert_eq!(
            result.outcome_for("com.example.good").map(|o| o.code),
            Some(InstallCode::BatchAborted.as_i32())
        );

        // nothing committed, nothing held
        let snapshot = installer.registry().snapshot().await.expect("snapshot");
        assert!(snapshot.package("com.example.good").is_none());
        assert!(installer.holds().is_idle());
    }

    #[tokio::test]
    async fn replace_reports_update_and_keeps_app_id() {
        let installer = installer();
        let first = installer
            .install(
                InstallContext::new().add_request(InstallRequest::new(descriptor(
                    "com.example.app",
                    1,
                ))),
            )
            .await;
        let original_app_id = first.outcomes[0].app_id;

        let second = installer
            .install(
                InstallContext::new().add_request(
                    InstallRequest::new(descriptor("com.example.app", 2))
                        .with_flags(InstallFlags::replace()),
                ),
            )
            .await;

        assert!(second.succeeded());
        let outcome = second.outcome_for("com.example.app").expect("outcome");
        assert!(outcome.update);
        assert_eq!(outcome.app_id, original_app_id);
    }

    struct SlowStore;

    #[async_trait]
    impl SnapshotStore for SlowStore {
        async fn write(&self, _snapshot: &RegistrySnapshot) -> Result<u64, Error> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(0)
        }

        async fn read(&self) -> Result<Option<RegistrySnapshot>, Error> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_poisons_a_stuck_commit() {
        let registry = PackageRegistry::new();
        let installer = Installer::new(
            PipelineConfig::default().with_commit_budget(Duration::from_millis(50)),
            registry.clone(),
            Arc::new(SlowStore),
        );
        let context = InstallContext::new()
            .add_request(InstallRequest::new(descriptor("com.example.app", 1)));

        let result = installer.install(context).await;

        assert_eq!(result.fatal_code(), Some(InstallCode::WatchdogExpired));
        assert!(registry.is_poisoned());
        // a poisoned registry refuses further work until reload
        assert!(registry.snapshot().await.is_err());
        assert!(installer.holds().is_idle());
    }
}
