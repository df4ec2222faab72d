//! Transactional package registry
//!
//! The registry's in-memory tables are the only structure mutated under
//! the write lock, and the lock is the only way in: callers take a
//! [`RegistrySnapshot`] for side-effect-free phases or a
//! [`RegistryWriteGuard`] for the reconcile-and-commit span. Raw table
//! handles never escape.
//!
//! A commit failure poisons the registry: every later transactional call
//! fails with [`RegistryError::Poisoned`] until the process restarts and
//! reloads from the persistent store. The last persisted snapshot is
//! always consistent because persistence happens only after all
//! in-memory mutation succeeded.

use crate::allocator::{AppIdAllocator, AppIdReservation};
use crate::libraries::SharedLibraryTable;
use crate::models::{PackageSetting, PackageUserState, SharedUserSetting};
use crate::permissions::{PermissionEntry, PermissionGroupEntry, PermissionTable};
use crate::snapshot::RegistrySnapshot;
use crate::store::SnapshotStore;
use chrono::Utc;
use pkgd_errors::{Error, RegistryError};
use pkgd_events::{AppEvent, EventEmitter, EventSender, RegistryEvent};
use pkgd_types::{
    AppId, PermissionDecl, SigningDetails, UserId, Version, PLATFORM_PACKAGE_NAME,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Default)]
struct RegistryInner {
    packages: BTreeMap<String, PackageSetting>,
    disabled_system_packages: BTreeMap<String, PackageSetting>,
    renamed_packages: BTreeMap<String, String>,
    shared_users: BTreeMap<String, SharedUserSetting>,
    libraries: SharedLibraryTable,
    permissions: PermissionTable,
}

impl RegistryInner {
    fn to_snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            schema_version: crate::snapshot::SNAPSHOT_SCHEMA_VERSION,
            packages: self.packages.clone(),
            disabled_system_packages: self.disabled_system_packages.clone(),
            renamed_packages: self.renamed_packages.clone(),
            shared_users: self.shared_users.clone(),
            libraries: self.libraries.clone(),
            permissions: self.permissions.clone(),
        }
    }

    fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            packages: snapshot.packages,
            disabled_system_packages: snapshot.disabled_system_packages,
            renamed_packages: snapshot.renamed_packages,
            shared_users: snapshot.shared_users,
            libraries: snapshot.libraries,
            permissions: snapshot.permissions,
        }
    }
}

/// Shared handle to the installed-package universe
#[derive(Clone)]
pub struct PackageRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    allocator: AppIdAllocator,
    poisoned: Arc<AtomicBool>,
    tx: Option<EventSender>,
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageRegistry {
    /// Empty registry with no event wiring
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            allocator: AppIdAllocator::new(),
            poisoned: Arc::new(AtomicBool::new(false)),
            tx: None,
        }
    }

    /// Attach an event sender for registry mutation events
    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Replace this registry's contents with the last persisted snapshot
    /// and rebuild the identity allocator from it. Returns `false` when
    /// the store was empty.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry is poisoned or the store read
    /// fails.
    pub async fn load_from(&self, store: &dyn SnapshotStore) -> Result<bool, Error> {
        self.check_poisoned()?;
        let Some(snapshot) = store.read().await? else {
            return Ok(false);
        };
        let package_count = snapshot.package_count();

        let mut inner = self.inner.write().await;
        for setting in snapshot
            .packages
            .values()
            .chain(snapshot.disabled_system_packages.values())
        {
            self.allocator.mark_used(setting.app_id);
        }
        for shared_user in snapshot.shared_users.values() {
            self.allocator.mark_used(shared_user.app_id);
        }
        *inner = RegistryInner::from_snapshot(snapshot);
        drop(inner);

        self.emit(AppEvent::Registry(RegistryEvent::SnapshotLoaded {
            packages: package_count,
        }));
        Ok(true)
    }

    /// Deep copy of every durable table, for the side-effect-free phases
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::Poisoned`] after a commit failure.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, Error> {
        self.check_poisoned()?;
        let inner = self.inner.read().await;
        Ok(inner.to_snapshot())
    }

    /// Take the exclusive write lock for a reconcile-and-commit span
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::Poisoned`] after a commit failure.
    pub async fn begin_write(&self) -> Result<RegistryWriteGuard, Error> {
        self.check_poisoned()?;
        let guard = Arc::clone(&self.inner).write_owned().await;
        Ok(RegistryWriteGuard {
            inner: guard,
            allocator: self.allocator.clone(),
            poisoned: Arc::clone(&self.poisoned),
            tx: self.tx.clone(),
        })
    }

    /// Reserve the lowest free app identity. The reservation is visible
    /// to concurrent scans immediately and returns to the pool on drop.
    ///
    /// # Errors
    ///
    /// Fails when the application identity range is exhausted.
    pub fn reserve_app_id(&self) -> Result<AppIdReservation, RegistryError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(RegistryError::Poisoned);
        }
        self.allocator.reserve()
    }

    /// Mark the in-memory state untrustworthy. Every transactional call
    /// afterwards fails until a restart reloads from the store.
    pub fn poison(&self, reason: &str) {
        self.poisoned.store(true, Ordering::Release);
        self.emit(AppEvent::Registry(RegistryEvent::Poisoned {
            reason: reason.to_string(),
        }));
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Persist the current state outside a commit span, e.g. after
    /// seeding.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry is poisoned or the store write
    /// fails.
    pub async fn persist(&self, store: &dyn SnapshotStore) -> Result<u64, Error> {
        let snapshot = self.snapshot().await?;
        let bytes = store.write(&snapshot).await?;
        self.emit(AppEvent::Registry(RegistryEvent::SnapshotPersisted {
            packages: snapshot.package_count(),
            bytes,
        }));
        Ok(bytes)
    }

    /// Seed the reserved platform identity with its permission
    /// definitions and protected broadcasts. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::Poisoned`] after a commit failure.
    pub async fn seed_platform(
        &self,
        signing: SigningDetails,
        permissions: Vec<PermissionDecl>,
        protected_broadcasts: Vec<String>,
    ) -> Result<(), Error> {
        let mut guard = self.begin_write().await?;
        if guard.package(PLATFORM_PACKAGE_NAME).is_some() {
            return Ok(());
        }
        let now = Utc::now();
        let mut user_state = BTreeMap::new();
        user_state.insert(UserId::PRIMARY, PackageUserState::default());
        guard.insert_package(PackageSetting {
            name: PLATFORM_PACKAGE_NAME.to_string(),
            app_id: AppId::platform(),
            version_code: 1,
            version: Version::new(1, 0, 0),
            code_path: PathBuf::from("/system/framework"),
            signing,
            shared_user: None,
            install_source: pkgd_types::InstallSource::default(),
            uses_libraries: Vec::new(),
            static_library: None,
            sdk_library: None,
            system: true,
            debuggable: false,
            test_only: false,
            target_sdk: u32::MAX,
            selected_abi: None,
            user_state,
            first_install_time: now,
            last_update_time: now,
        });
        for decl in permissions {
            guard.define_permission(PermissionEntry {
                name: decl.name,
                owner: PLATFORM_PACKAGE_NAME.to_string(),
                protection: decl.protection,
                group: decl.group,
            });
        }
        for action in protected_broadcasts {
            guard.protect_broadcast(action, PLATFORM_PACKAGE_NAME);
        }
        Ok(())
    }

    /// Clone of one package record, following the rename table
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::Poisoned`] after a commit failure.
    pub async fn package_info(&self, name: &str) -> Result<Option<PackageSetting>, Error> {
        self.check_poisoned()?;
        let inner = self.inner.read().await;
        if let Some(setting) = inner.packages.get(name) {
            return Ok(Some(setting.clone()));
        }
        Ok(inner
            .renamed_packages
            .get(name)
            .and_then(|current| inner.packages.get(current))
            .cloned())
    }

    /// Packages installed for one user, sorted by name
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::Poisoned`] after a commit failure.
    pub async fn installed_packages(&self, user: UserId) -> Result<Vec<PackageSetting>, Error> {
        self.check_poisoned()?;
        let inner = self.inner.read().await;
        Ok(inner
            .packages
            .values()
            .filter(|setting| setting.user_state(user).installed)
            .cloned()
            .collect())
    }

    fn check_poisoned(&self) -> Result<(), Error> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(RegistryError::Poisoned.into());
        }
        Ok(())
    }
}

impl EventEmitter for PackageRegistry {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

/// Exclusive write access to the registry tables
///
/// Held for the whole reconcile-and-commit span of one batch. All
/// mutation flows through the typed methods here; each durable change
/// emits its registry event.
pub struct RegistryWriteGuard {
    inner: OwnedRwLockWriteGuard<RegistryInner>,
    allocator: AppIdAllocator,
    poisoned: Arc<AtomicBool>,
    tx: Option<EventSender>,
}

impl RegistryWriteGuard {
    /// Deep copy of the locked state, for reconciliation reads
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.to_snapshot()
    }

    #[must_use]
    pub fn package(&self, name: &str) -> Option<&PackageSetting> {
        self.inner.packages.get(name)
    }

    #[must_use]
    pub fn shared_user(&self, name: &str) -> Option<&SharedUserSetting> {
        self.inner.shared_users.get(name)
    }

    #[must_use]
    pub fn permission(&self, name: &str) -> Option<&PermissionEntry> {
        self.inner.permissions.permission(name)
    }

    #[must_use]
    pub fn libraries(&self) -> &SharedLibraryTable {
        &self.inner.libraries
    }

    /// Signing identity of an installed package, for permission-conflict
    /// decisions
    #[must_use]
    pub fn signing_of(&self, package: &str) -> Option<&SigningDetails> {
        self.inner.packages.get(package).map(|s| &s.signing)
    }

    /// Insert or replace a package record. Returns the replaced record
    /// so the caller can clean up its code path.
    pub fn insert_package(&mut self, setting: PackageSetting) -> Option<PackageSetting> {
        let package = setting.name.clone();
        let app_id = setting.app_id;
        self.allocator.mark_used(app_id);
        let replaced = self.inner.packages.insert(package.clone(), setting);
        self.emit(AppEvent::Registry(RegistryEvent::SettingWritten {
            package,
            app_id: app_id.0,
            update: replaced.is_some(),
        }));
        replaced
    }

    #[must_use]
    pub fn package_mut(&mut self, name: &str) -> Option<&mut PackageSetting> {
        self.inner.packages.get_mut(name)
    }

    /// Remove a record during a rename migration. Quiet: the migration
    /// emits through the insert of the successor record.
    pub fn remove_package(&mut self, name: &str) -> Option<PackageSetting> {
        self.inner.packages.remove(name)
    }

    /// Archive a shadowed system-image copy as a factory-reset fallback
    pub fn archive_disabled_system(&mut self, setting: PackageSetting) {
        let package = setting.name.clone();
        self.inner
            .disabled_system_packages
            .insert(package.clone(), setting);
        self.emit(AppEvent::Registry(RegistryEvent::SystemCopyDisabled {
            package,
        }));
    }

    #[must_use]
    pub fn disabled_system_package(&self, name: &str) -> Option<&PackageSetting> {
        self.inner.disabled_system_packages.get(name)
    }

    pub fn record_rename(&mut self, original: impl Into<String>, current: impl Into<String>) {
        self.inner
            .renamed_packages
            .insert(original.into(), current.into());
    }

    /// Add a member to a shared-user group, creating the group lazily
    /// with the given identity and signing details.
    pub fn add_shared_user_member(
        &mut self,
        group: &str,
        package: &str,
        app_id: AppId,
        signing: &SigningDetails,
    ) {
        let entry = self
            .inner
            .shared_users
            .entry(group.to_string())
            .or_insert_with(|| SharedUserSetting::new(group, app_id, signing.clone()));
        entry.members.insert(package.to_string());
    }

    pub fn remove_shared_user_member(&mut self, group: &str, package: &str) {
        if let Some(entry) = self.inner.shared_users.get_mut(group) {
            entry.members.remove(package);
        }
    }

    /// Replace the group's representative signing identity, as decided
    /// by reconciliation.
    pub fn update_shared_user_signing(&mut self, group: &str, signing: SigningDetails) {
        if let Some(entry) = self.inner.shared_users.get_mut(group) {
            entry.signing = signing;
            self.emit(AppEvent::Registry(RegistryEvent::SharedUserSigningUpdated {
                name: group.to_string(),
            }));
        }
    }

    /// Drop a group once its last member has migrated away, releasing
    /// the group identity. Returns whether a prune happened.
    pub fn prune_shared_user_if_empty(&mut self, group: &str) -> bool {
        let empty = self
            .inner
            .shared_users
            .get(group)
            .is_some_and(SharedUserSetting::is_empty);
        if !empty {
            return false;
        }
        if let Some(entry) = self.inner.shared_users.remove(group) {
            self.allocator.release(entry.app_id);
        }
        self.emit(AppEvent::Registry(RegistryEvent::SharedUserPruned {
            name: group.to_string(),
        }));
        true
    }

    pub fn register_static_library(&mut self, name: &str, version: i64, provider: String) {
        self.inner
            .libraries
            .register_static(name, version, provider.clone());
        self.emit(AppEvent::Registry(RegistryEvent::LibraryRegistered {
            name: name.to_string(),
            version,
            provider,
        }));
    }

    /// Register or replace an SDK library line, returning the previous
    /// major version when one existed.
    pub fn register_sdk_library(
        &mut self,
        name: &str,
        version_major: i64,
        provider: String,
    ) -> Option<i64> {
        let previous = self
            .inner
            .libraries
            .register_sdk(name, version_major, provider.clone());
        self.emit(AppEvent::Registry(RegistryEvent::LibraryRegistered {
            name: name.to_string(),
            version: version_major,
            provider,
        }));
        previous
    }

    pub fn add_static_library_dependent(&mut self, name: &str, version: i64, consumer: &str) {
        self.inner
            .libraries
            .add_static_dependent(name, version, consumer);
    }

    pub fn add_sdk_library_dependent(&mut self, name: &str, consumer: &str) {
        self.inner.libraries.add_sdk_dependent(name, consumer);
    }

    /// Drop permission definitions owned by a package ahead of
    /// re-registering its replacement's declarations
    pub fn remove_permissions_owned_by(&mut self, package: &str) -> usize {
        self.inner.permissions.remove_owned_by(package)
    }

    pub fn define_permission(&mut self, entry: PermissionEntry) {
        self.inner.permissions.define_permission(entry);
    }

    pub fn define_permission_group(&mut self, entry: PermissionGroupEntry) {
        self.inner.permissions.define_group(entry);
    }

    pub fn protect_broadcast(&mut self, action: impl Into<String>, owner: impl Into<String>) {
        self.inner.permissions.protect_broadcast(action, owner);
    }

    /// Persist everything, still under the lock. Called exactly once per
    /// committed batch, after all in-memory mutation.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the store write fails; the
    /// caller decides whether that poisons the registry.
    pub async fn persist(&self, store: &dyn SnapshotStore) -> Result<u64, Error> {
        let snapshot = self.inner.to_snapshot();
        let bytes = store.write(&snapshot).await?;
        self.emit(AppEvent::Registry(RegistryEvent::SnapshotPersisted {
            packages: snapshot.package_count(),
            bytes,
        }));
        Ok(bytes)
    }

    /// Mark the registry untrustworthy after a mid-commit failure
    pub fn poison(&self, reason: &str) {
        self.poisoned.store(true, Ordering::Release);
        self.emit(AppEvent::Registry(RegistryEvent::Poisoned {
            reason: reason.to_string(),
        }));
    }
}

impl EventEmitter for RegistryWriteGuard {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySnapshotStore;
    use pkgd_types::InstallSource;

    fn setting(name: &str, app_id: u32) -> PackageSetting {
        let now = Utc::now();
        let mut user_state = BTreeMap::new();
        user_state.insert(UserId::PRIMARY, PackageUserState::default());
        PackageSetting {
            name: name.to_string(),
            app_id: AppId(app_id),
            version_code: 1,
            version: Version::new(1, 0, 0),
            code_path: PathBuf::from(format!("/data/app/{name}")),
            signing: SigningDetails::from_cert(b"test-cert"),
            shared_user: None,
            install_source: InstallSource::default(),
            uses_libraries: Vec::new(),
            static_library: None,
            sdk_library: None,
            system: false,
            debuggable: false,
            test_only: false,
            target_sdk: 30,
            selected_abi: None,
            user_state,
            first_install_time: now,
            last_update_time: now,
        }
    }

    #[tokio::test]
    async fn poisoned_registry_refuses_everything() {
        let registry = PackageRegistry::new();
        registry.poison("test");
        assert!(registry.is_poisoned());
        assert!(registry.snapshot().await.is_err());
        assert!(registry.begin_write().await.is_err());
        assert!(registry.reserve_app_id().is_err());
    }

    #[tokio::test]
    async fn insert_emits_setting_written() {
        let (tx, mut rx) = pkgd_events::channel();
        let registry = PackageRegistry::new().with_events(tx);
        let mut guard = registry.begin_write().await.expect("write");
        guard.insert_package(setting("com.example.app", 10_000));
        drop(guard);

        match rx.try_recv().expect("event") {
            AppEvent::Registry(RegistryEvent::SettingWritten {
                package,
                app_id,
                update,
            }) => {
                assert_eq!(package, "com.example.app");
                assert_eq!(app_id, 10_000);
                assert!(!update);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn persist_and_reload_rebuilds_allocator() {
        let store = MemorySnapshotStore::new();
        let registry = PackageRegistry::new();
        {
            let mut guard = registry.begin_write().await.expect("write");
            guard.insert_package(setting("com.example.app", 10_000));
            guard.insert_package(setting("com.example.other", 10_001));
            guard.persist(&store).await.expect("persist");
        }

        let reloaded = PackageRegistry::new();
        assert!(reloaded.load_from(&store).await.expect("load"));
        // 10_000 and 10_001 are taken, so the next reservation is 10_002
        let reservation = reloaded.reserve_app_id().expect("reserve");
        assert_eq!(reservation.app_id(), AppId(10_002));
    }

    #[tokio::test]
    async fn shared_user_prune_releases_identity() {
        let registry = PackageRegistry::new();
        let reserved = registry.reserve_app_id().expect("reserve").commit();

        let mut guard = registry.begin_write().await.expect("write");
        let signing = SigningDetails::from_cert(b"group-cert");
        guard.add_shared_user_member("com.shared.group", "com.member", reserved, &signing);
        assert!(!guard.prune_shared_user_if_empty("com.shared.group"));

        guard.remove_shared_user_member("com.shared.group", "com.member");
        assert!(guard.prune_shared_user_if_empty("com.shared.group"));
        drop(guard);

        // identity is free again
        let next = registry.reserve_app_id().expect("reserve");
        assert_eq!(next.app_id(), reserved);
    }

    #[tokio::test]
    async fn seed_platform_is_idempotent() {
        let registry = PackageRegistry::new();
        let signing = SigningDetails::from_cert(b"platform-cert");
        registry
            .seed_platform(
                signing.clone(),
                vec![PermissionDecl {
                    name: "platform.INSTALL_PACKAGES".to_string(),
                    group: None,
                    protection: pkgd_types::ProtectionLevel::Signature,
                }],
                vec!["platform.BOOT_COMPLETED".to_string()],
            )
            .await
            .expect("seed");
        registry
            .seed_platform(signing, Vec::new(), Vec::new())
            .await
            .expect("second seed");

        let snapshot = registry.snapshot().await.expect("snapshot");
        assert!(snapshot.package(PLATFORM_PACKAGE_NAME).is_some());
        let entry = snapshot
            .permissions
            .permission("platform.INSTALL_PACKAGES")
            .expect("seeded permission");
        assert_eq!(entry.owner, PLATFORM_PACKAGE_NAME);
        assert_eq!(
            snapshot
                .permissions
                .protected_broadcast_owner("platform.BOOT_COMPLETED"),
            Some(PLATFORM_PACKAGE_NAME)
        );
    }

    #[tokio::test]
    async fn write_guard_serializes_batches() {
        let registry = PackageRegistry::new();
        let guard = registry.begin_write().await.expect("first");

        let second = registry.clone();
        let waiter = tokio::spawn(async move { second.begin_write().await.map(|_| ()) });
        // the second writer cannot proceed while the guard is held
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.expect("join").expect("second write");
    }
}
