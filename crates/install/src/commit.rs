//! Commit phase: apply a reconciled batch to the registry
//!
//! Commit is the only phase that mutates durable state. It runs under
//! the registry write guard and is not cleanly unwindable: any failure
//! past the first mutation poisons the registry, and the hosting process
//! restarts from the last persisted snapshot. The snapshot itself is
//! written exactly once per batch, after every in-memory mutation
//! succeeded, so the persisted state is always the pre-batch or the
//! post-batch world, never anything in between.

use crate::collaborators::Collaborators;
use crate::reconcile::{PermissionDecision, ReconciledBatch, ReconciledPackage, ResolvedLibrary};
use pkgd_errors::CommitError;
use pkgd_events::{
    AppEvent, EventEmitter, EventSender, InstallEvent, RegistryEvent,
};
use pkgd_registry::{
    PackageUserState, PermissionEntry, PermissionGroupEntry, RegistryWriteGuard, SnapshotStore,
};
use pkgd_types::{AppId, InstallFlags, ScanFlags, UserId};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// What commit durably decided for one package, driving post-install
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub package: String,
    pub app_id: AppId,
    pub version_code: i64,
    pub update: bool,
    /// Version code of the record this install replaced
    pub replaced_version: Option<i64>,
    /// Old code path left behind by the replace, removed in post-install
    pub replaced_code_path: Option<PathBuf>,
    pub previous_app_id: Option<AppId>,
    /// The incoming system copy was archived; the data copy stays active
    pub disabled_system: bool,
    /// Users the package is installed for after this commit
    pub users: Vec<UserId>,
    pub user: UserId,
    pub flags: InstallFlags,
}

pub struct Committer {
    store: Arc<dyn SnapshotStore>,
    collaborators: Collaborators,
    tx: Option<EventSender>,
}

impl Committer {
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        collaborators: Collaborators,
        tx: Option<EventSender>,
    ) -> Self {
        Self {
            store,
            collaborators,
            tx,
        }
    }

    /// Apply the whole batch and persist once.
    ///
    /// # Errors
    ///
    /// Every error here has already poisoned the registry; the caller
    /// reports it as fatal and the process restarts to reload.
    pub async fn commit(
        &self,
        guard: &mut RegistryWriteGuard,
        batch: ReconciledBatch,
        batch_id: Uuid,
        known_users: &[UserId],
        scan_flags: ScanFlags,
    ) -> Result<Vec<CommitOutcome>, CommitError> {
        match self.apply(guard, batch, batch_id, known_users, scan_flags).await {
            Ok(outcomes) => Ok(outcomes),
            Err(err) => {
                guard.poison(&err.to_string());
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        guard: &mut RegistryWriteGuard,
        mut batch: ReconciledBatch,
        batch_id: Uuid,
        known_users: &[UserId],
        scan_flags: ScanFlags,
    ) -> Result<Vec<CommitOutcome>, CommitError> {
        let mut outcomes = Vec::with_capacity(batch.packages.len());
        for package in &mut batch.packages {
            outcomes.push(
                self.apply_package(guard, package, known_users, scan_flags)
                    .await?,
            );
        }

        // Dependency edges land after every provider row exists, so a
        // consumer may precede its provider in batch order.
        for package in &batch.packages {
            if package.disable_incoming_system {
                continue;
            }
            let consumer = package.scan.setting.name.as_str();
            for library in &package.resolved_libraries {
                match library {
                    ResolvedLibrary::Static { name, version } => {
                        guard.add_static_library_dependent(name, *version, consumer);
                    }
                    ResolvedLibrary::Sdk { name } => {
                        guard.add_sdk_library_dependent(name, consumer);
                    }
                }
            }
        }

        for (group, signing) in batch.shared_user_updates {
            guard.update_shared_user_signing(&group, signing);
        }

        guard
            .persist(self.store.as_ref())
            .await
            .map_err(|err| CommitError::PersistFailed {
                message: err.to_string(),
            })?;

        // Only a durable batch announces itself.
        for outcome in &outcomes {
            if outcome.disabled_system {
                continue;
            }
            self.emit(AppEvent::Install(InstallEvent::Committed {
                batch: batch_id,
                package: outcome.package.clone(),
                version_code: outcome.version_code,
                app_id: outcome.app_id.0,
                update: outcome.update,
            }));
        }
        Ok(outcomes)
    }

    async fn apply_package(
        &self,
        guard: &mut RegistryWriteGuard,
        package: &mut ReconciledPackage,
        known_users: &[UserId],
        scan_flags: ScanFlags,
    ) -> Result<CommitOutcome, CommitError> {
        let name = package.scan.setting.name.clone();

        if package.disable_incoming_system {
            // The data copy won the tie-break: the incoming system copy
            // is archived as the factory fallback and nothing else moves.
            let mut archived = package.scan.setting.clone();
            archived.user_state = BTreeMap::new();
            guard.archive_disabled_system(archived);
            let users = guard
                .package(&name)
                .map(pkgd_registry::PackageSetting::installed_users)
                .unwrap_or_default();
            return Ok(CommitOutcome {
                package: name,
                app_id: package.scan.setting.app_id,
                version_code: package.scan.setting.version_code,
                update: true,
                replaced_version: None,
                replaced_code_path: None,
                previous_app_id: None,
                disabled_system: true,
                users,
                user: package.scan.user,
                flags: package.scan.flags,
            });
        }

        let scan = &mut package.scan;
        let mut replaced_version = None;
        let mut replaced_code_path = None;

        // Rename migration: the old record is consumed, its group
        // membership and permission ownership move with the name.
        let mut prior = None;
        if let Some(old_name) = scan.replaces.clone() {
            let Some(old) = guard.remove_package(&old_name) else {
                return Err(CommitError::InvariantViolated {
                    message: format!("rename source {old_name} vanished under the freeze"),
                });
            };
            guard.record_rename(&old_name, &name);
            if let Some(group) = &old.shared_user {
                guard.remove_shared_user_member(group, &old_name);
                guard.prune_shared_user_if_empty(group);
            }
            guard.remove_permissions_owned_by(&old_name);
            replaced_version = Some(old.version_code);
            if old.code_path != scan.setting.code_path {
                replaced_code_path = Some(old.code_path.clone());
            }
            prior = Some(old);
        }

        if let Some(reservation) = scan.reservation.take() {
            let granted = reservation.commit();
            if granted != scan.setting.app_id {
                return Err(CommitError::InvariantViolated {
                    message: format!(
                        "identity {granted} was reserved but {} was scanned for {name}",
                        scan.setting.app_id
                    ),
                });
            }
        }

        let existing = guard.package(&name).cloned();

        // Per-user state: carry what the replaced record knew, make sure
        // every known user has an entry, and install for the requester.
        let mut user_state = prior
            .as_ref()
            .or(existing.as_ref())
            .map(|record| record.user_state.clone())
            .unwrap_or_default();
        for user in known_users {
            user_state.entry(*user).or_insert(PackageUserState {
                installed: false,
                ..PackageUserState::default()
            });
        }
        let target_state = if scan.flags.instant {
            PackageUserState::instant()
        } else {
            PackageUserState::default()
        };
        user_state.insert(scan.user, target_state);
        scan.setting.user_state = user_state;

        // The first data update over a system package archives the
        // pristine factory copy; later updates must not clobber it.
        if let Some(old) = &existing {
            if old.system
                && !scan_flags.from_system_image
                && guard.disabled_system_package(&name).is_none()
            {
                guard.archive_disabled_system(old.clone());
            }
        }

        if let Some(old) = guard.insert_package(scan.setting.clone()) {
            replaced_version = replaced_version.or(Some(old.version_code));
            if replaced_code_path.is_none() && old.code_path != scan.setting.code_path {
                replaced_code_path = Some(old.code_path);
            }
        }

        if let Some(group) = scan.setting.shared_user.clone() {
            guard.add_shared_user_member(&group, &name, scan.setting.app_id, &scan.setting.signing);
        }

        if let Some(decl) = scan.setting.static_library.clone() {
            guard.register_static_library(&decl.name, decl.version, name.clone());
        }
        if let Some(decl) = scan.setting.sdk_library.clone() {
            let previous = guard.register_sdk_library(&decl.name, decl.version_major, name.clone());
            if previous.is_some_and(|major| major != decl.version_major) {
                self.propagate_library_change(&decl.name, &name, scan.flags, scan_flags, guard)
                    .await;
            }
        }

        guard.remove_permissions_owned_by(&name);
        for decision in &package.permission_decisions {
            match decision {
                PermissionDecision::Define(decl) => {
                    guard.define_permission(PermissionEntry {
                        name: decl.name.clone(),
                        owner: name.clone(),
                        protection: decl.protection,
                        group: decl.group.clone(),
                    });
                }
                PermissionDecision::Drop { permission, owner } => {
                    self.emit(AppEvent::Registry(RegistryEvent::PermissionDropped {
                        permission: permission.clone(),
                        owner: owner.clone(),
                        requester: name.clone(),
                    }));
                    self.emit_warning(format!(
                        "permission {permission} declared by {name} is already owned by \
                         {owner} under a different signature; the declaration is ignored"
                    ));
                }
            }
        }
        for decl in &scan.descriptor.permission_groups {
            guard.define_permission_group(PermissionGroupEntry {
                name: decl.name.clone(),
                owner: name.clone(),
            });
        }
        for action in &scan.descriptor.protected_broadcasts {
            guard.protect_broadcast(action.clone(), name.clone());
        }

        Ok(CommitOutcome {
            package: name,
            app_id: scan.setting.app_id,
            version_code: scan.setting.version_code,
            update: scan.update,
            replaced_version,
            replaced_code_path,
            previous_app_id: scan.previous_app_id,
            disabled_system: false,
            users: scan.setting.installed_users(),
            user: scan.user,
            flags: scan.flags,
        })
    }

    /// A library line changed incompatibly under its consumers: running
    /// dependents are stopped so they relink on next launch, unless the
    /// batch asked not to or nothing can be running yet.
    async fn propagate_library_change(
        &self,
        library: &str,
        provider: &str,
        flags: InstallFlags,
        scan_flags: ScanFlags,
        guard: &RegistryWriteGuard,
    ) {
        let dependents = guard.libraries().sdk_dependents(library);
        if dependents.is_empty() {
            return;
        }
        self.emit(AppEvent::Install(InstallEvent::DependentKillRequested {
            package: provider.to_string(),
            dependents: dependents.clone(),
        }));
        if flags.dont_kill || scan_flags.first_boot {
            return;
        }
        for dependent in &dependents {
            self.collaborators
                .processes
                .kill_package(dependent, "shared library changed")
                .await;
        }
    }
}

impl EventEmitter for Committer {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ProcessController;
    use crate::reconcile::Reconciler;
    use crate::request::InstallRequest;
    use crate::scan::Scanner;
    use async_trait::async_trait;
    use pkgd_errors::Error;
    use pkgd_registry::{MemorySnapshotStore, PackageRegistry, RegistrySnapshot};
    use pkgd_types::{
        Abi, InstallFlags, ParsedDescriptor, SdkLibraryDecl, SigningDetails, Version,
    };
    use std::sync::Mutex;

    fn descriptor(name: &str, version_code: i64) -> ParsedDescriptor {
        let mut d = ParsedDescriptor::new(name, version_code, Version::new(1, 0, 0));
        d.signing = SigningDetails::from_cert(b"k1");
        d.sdk.target = 30;
        d.code_path = std::path::PathBuf::from(format!("/data/staging/{name}-{version_code}"));
        d
    }

    async fn reconciled(
        registry: &PackageRegistry,
        requests: Vec<InstallRequest>,
    ) -> ReconciledBatch {
        let snapshot = registry.snapshot().await.unwrap();
        let scanner = Scanner::new(registry.clone(), vec![Abi::Arm64V8a]);
        let scans = requests
            .iter()
            .map(|request| {
                scanner
                    .scan(request, &snapshot, ScanFlags::default())
                    .expect("scan")
            })
            .collect();
        Reconciler::new()
            .reconcile(scans, &snapshot)
            .expect("reconcile")
    }

    fn committer(store: Arc<dyn SnapshotStore>, tx: Option<EventSender>) -> Committer {
        Committer::new(store, Collaborators::default(), tx)
    }

    #[tokio::test]
    async fn fresh_install_becomes_durable_in_one_write() {
        let (tx, mut rx) = pkgd_events::channel();
        let registry = PackageRegistry::new().with_events(tx.clone());
        let store = Arc::new(MemorySnapshotStore::new());
        let batch = reconciled(
            &registry,
            vec![InstallRequest::new(descriptor("com.example.app", 1))],
        )
        .await;

        let mut guard = registry.begin_write().await.unwrap();
        let outcomes = committer(store.clone(), Some(tx))
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect("commit");
        drop(guard);

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].update);
        assert_eq!(outcomes[0].users, vec![UserId::PRIMARY]);

        let persisted: RegistrySnapshot = store.read().await.unwrap().expect("persisted");
        assert!(persisted.package("com.example.app").is_some());

        // the commit announcement comes only after the snapshot is durable
        let mut persisted_seen = false;
        let mut committed_after_persist = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::Registry(RegistryEvent::SnapshotPersisted { .. }) => {
                    persisted_seen = true;
                }
                AppEvent::Install(InstallEvent::Committed { .. }) => {
                    committed_after_persist = persisted_seen;
                }
                _ => {}
            }
        }
        assert!(committed_after_persist);
    }

    #[tokio::test]
    async fn rename_migration_consumes_the_old_record() {
        let registry = PackageRegistry::new();
        let store = Arc::new(MemorySnapshotStore::new());

        // seed the record under its old name
        let batch = reconciled(
            &registry,
            vec![InstallRequest::new(descriptor("com.example.old", 1))],
        )
        .await;
        let mut guard = registry.begin_write().await.unwrap();
        committer(store.clone(), None)
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect("seed");
        drop(guard);

        let mut renamed = descriptor("com.example.renewed", 2);
        renamed.original_name = Some("com.example.old".to_string());
        let batch = reconciled(
            &registry,
            vec![InstallRequest::new(renamed).with_flags(InstallFlags::replace())],
        )
        .await;
        let mut guard = registry.begin_write().await.unwrap();
        let outcomes = committer(store, None)
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect("migrate");
        drop(guard);

        assert_eq!(outcomes[0].replaced_version, Some(1));
        let snapshot = registry.snapshot().await.unwrap();
        assert!(snapshot.package("com.example.old").is_none());
        assert!(snapshot.package("com.example.renewed").is_some());
        assert_eq!(
            snapshot.resolve_package("com.example.old").map(|s| s.name.as_str()),
            Some("com.example.renewed")
        );
    }

    #[tokio::test]
    async fn tie_break_archives_incoming_system_copy() {
        let registry = PackageRegistry::new();
        let store = Arc::new(MemorySnapshotStore::new());

        let batch = reconciled(
            &registry,
            vec![InstallRequest::new(descriptor("com.example.app", 7))],
        )
        .await;
        let mut guard = registry.begin_write().await.unwrap();
        committer(store.clone(), None)
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect("seed data copy");
        drop(guard);

        // system image carries version 5; the newer data copy wins
        let system_flags = ScanFlags {
            first_boot: true,
            from_system_image: true,
        };
        let snapshot = registry.snapshot().await.unwrap();
        let scanner = Scanner::new(registry.clone(), vec![Abi::Arm64V8a]);
        let scan = scanner
            .scan(
                &InstallRequest::new(descriptor("com.example.app", 5)),
                &snapshot,
                system_flags,
            )
            .expect("scan");
        let batch = Reconciler::new()
            .reconcile(vec![scan], &snapshot)
            .expect("reconcile");
        assert!(batch.packages[0].disable_incoming_system);

        let mut guard = registry.begin_write().await.unwrap();
        let outcomes = committer(store, None)
            .commit(&mut guard, batch, Uuid::new_v4(), &[UserId::PRIMARY], system_flags)
            .await
            .expect("commit");
        drop(guard);

        assert!(outcomes[0].disabled_system);
        let snapshot = registry.snapshot().await.unwrap();
        // the active record is still the data copy at version 7
        assert_eq!(snapshot.package("com.example.app").map(|s| s.version_code), Some(7));
        assert_eq!(
            snapshot
                .disabled_system_package("com.example.app")
                .map(|s| s.version_code),
            Some(5)
        );
    }

    struct RecordingController {
        killed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcessController for RecordingController {
        async fn kill_package(&self, package: &str, _reason: &str) {
            self.killed
                .lock()
                .expect("test lock")
                .push(package.to_string());
        }
    }

    #[tokio::test]
    async fn sdk_major_change_stops_dependents_unless_told_not_to() {
        let registry = PackageRegistry::new();
        let store = Arc::new(MemorySnapshotStore::new());

        // provider v1 plus a consumer of the line
        let mut provider = descriptor("com.example.provider", 1);
        provider.sdk_library = Some(SdkLibraryDecl {
            name: "com.example.sdk".to_string(),
            version_major: 1,
        });
        let batch = reconciled(&registry, vec![InstallRequest::new(provider)]).await;
        let mut guard = registry.begin_write().await.unwrap();
        committer(store.clone(), None)
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect("seed provider");
        guard.add_sdk_library_dependent("com.example.sdk", "com.example.consumer");
        guard.persist(store.as_ref()).await.expect("persist");
        drop(guard);

        // replacement bumps the major along with a target-SDK change
        let mut replacement = descriptor("com.example.provider", 2);
        replacement.sdk.target = 31;
        replacement.sdk_library = Some(SdkLibraryDecl {
            name: "com.example.sdk".to_string(),
            version_major: 2,
        });
        let batch = reconciled(
            &registry,
            vec![InstallRequest::new(replacement).with_flags(InstallFlags::replace())],
        )
        .await;

        let controller = Arc::new(RecordingController {
            killed: Mutex::new(Vec::new()),
        });
        let collaborators =
            Collaborators::default().with_processes(controller.clone() as Arc<dyn ProcessController>);
        let (tx, mut rx) = pkgd_events::channel();
        let mut guard = registry.begin_write().await.unwrap();
        Committer::new(store, collaborators, Some(tx))
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect("replace provider");
        drop(guard);

        assert_eq!(
            controller.killed.lock().expect("test lock").as_slice(),
            ["com.example.consumer".to_string()]
        );
        let mut kill_event = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(
                event,
                AppEvent::Install(InstallEvent::DependentKillRequested { .. })
            ) {
                kill_event = true;
            }
        }
        assert!(kill_event);
    }

    struct FailingStore;

    #[async_trait]
    impl SnapshotStore for FailingStore {
        async fn write(&self, _snapshot: &RegistrySnapshot) -> Result<u64, Error> {
            Err(Error::internal("disk full"))
        }

        async fn read(&self) -> Result<Option<RegistrySnapshot>, Error> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn persist_failure_poisons_the_registry() {
        let registry = PackageRegistry::new();
        let batch = reconciled(
            &registry,
            vec![InstallRequest::new(descriptor("com.example.app", 1))],
        )
        .await;

        let mut guard = registry.begin_write().await.unwrap();
        let err = committer(Arc::new(FailingStore), None)
            .commit(
                &mut guard,
                batch,
                Uuid::new_v4(),
                &[UserId::PRIMARY],
                ScanFlags::default(),
            )
            .await
            .expect_err("persist fails");
        drop(guard);

        assert!(matches!(err, CommitError::PersistFailed { .. }));
        assert!(registry.is_poisoned());
        assert!(registry.snapshot().await.is_err());
    }
}
