//! Scan phase: derive a registry record for one package
//!
//! Scan runs per package, in parallel, against a snapshot taken after
//! the batch's names were frozen. It is read-only apart from optimistic
//! identity reservation, which the allocator serializes internally.
//! Nothing scanned here is visible to other batches until commit.

use crate::request::InstallRequest;
use chrono::Utc;
use pkgd_errors::{RegistryError, ScanError};
use pkgd_registry::{AppIdReservation, PackageRegistry, PackageSetting, RegistrySnapshot};
use pkgd_types::{
    Abi, AppId, Capabilities, InstallFlags, ParsedDescriptor, ScanFlags, SigningDetails, UserId,
    PLATFORM_PACKAGE_NAME,
};
use std::collections::BTreeMap;

/// Everything scan derived for one package, handed to reconcile
#[derive(Debug)]
pub struct ScanResult {
    pub descriptor: ParsedDescriptor,
    /// Derived record, not yet visible to anyone
    pub setting: PackageSetting,
    /// Held identity for a fresh install; committed or dropped with the
    /// batch
    pub reservation: Option<AppIdReservation>,
    /// Identity the package held before this install, when it changes
    pub previous_app_id: Option<AppId>,
    /// Installed record consumed by a rename migration, removed at commit
    pub replaces: Option<String>,
    /// The incoming system-image copy collides with an installed data
    /// copy; reconcile decides which side wins
    pub system_conflict: bool,
    pub update: bool,
    pub user: UserId,
    pub flags: InstallFlags,
}

impl ScanResult {
    #[must_use]
    pub fn package_name(&self) -> &str {
        &self.setting.name
    }
}

#[derive(Clone)]
pub struct Scanner {
    registry: PackageRegistry,
    supported_abis: Vec<Abi>,
}

impl Scanner {
    #[must_use]
    pub fn new(registry: PackageRegistry, supported_abis: Vec<Abi>) -> Self {
        Self {
            registry,
            supported_abis,
        }
    }

    /// Scan one request against the frozen snapshot.
    ///
    /// # Errors
    ///
    /// Any scan error fails the whole batch; reservations taken so far
    /// are released when the results are dropped.
    pub fn scan(
        &self,
        request: &InstallRequest,
        snapshot: &RegistrySnapshot,
        scan_flags: ScanFlags,
    ) -> Result<ScanResult, ScanError> {
        let descriptor = &request.descriptor;

        if descriptor.name == PLATFORM_PACKAGE_NAME {
            return Err(ScanError::ReservedName);
        }
        if !descriptor.signing.is_signed() {
            return Err(ScanError::NotSigned {
                package: descriptor.name.clone(),
            });
        }
        self.check_library_naming(descriptor, snapshot)?;
        let selected_abi = self.select_abi(descriptor)?;

        // Resolve which installed record, if any, this package replaces.
        let mut target_name = descriptor.name.clone();
        let mut replaces = None;
        let existing = if let Some(current) = snapshot.package(&descriptor.name) {
            Some(current)
        } else if let Some(old) = descriptor
            .original_name
            .as_deref()
            .and_then(|original| snapshot.package(original))
        {
            // Rename migration: the record moves to the new name and the
            // old record is removed at commit.
            replaces = Some(old.name.clone());
            Some(old)
        } else if let Some(current) = snapshot.resolve_package(&descriptor.name) {
            // Addressed by a pre-migration name; the update lands on the
            // record under its current name.
            target_name = current.name.clone();
            Some(current)
        } else {
            None
        };

        let system_conflict =
            scan_flags.from_system_image && existing.is_some_and(|old| !old.system);

        if let Some(old) = existing {
            let authorized = descriptor
                .signing
                .check_capability(&old.signing, Capabilities::INSTALLED_DATA)
                || old.signing.permits_rollback_to(&descriptor.signing);
            if !authorized {
                return Err(ScanError::UpdateIncompatible {
                    package: target_name,
                    installed_signer: signer_summary(&old.signing),
                    new_signer: signer_summary(&descriptor.signing),
                });
            }

            // Grouping is part of a package's identity. It may only change
            // through a rename migration, which is an explicit identity
            // handover.
            if descriptor.shared_user != old.shared_user && replaces.is_none() {
                return Err(ScanError::SharedUserChanged {
                    package: target_name,
                    installed: old.shared_user.clone(),
                    requested: descriptor.shared_user.clone(),
                });
            }
        }

        let mut reservation = None;
        let mut previous_app_id = None;
        let app_id = if let Some(group_name) = descriptor.shared_user.as_deref() {
            if let Some(group) = snapshot.shared_user(group_name) {
                let compatible = descriptor
                    .signing
                    .check_capability(&group.signing, Capabilities::SHARED_USER)
                    || group
                        .signing
                        .check_capability(&descriptor.signing, Capabilities::SHARED_USER);
                if !compatible {
                    return Err(ScanError::SharedUserIncompatible {
                        package: target_name,
                        shared_user: group_name.to_string(),
                    });
                }
                if let Some(old) = existing {
                    if old.app_id != group.app_id {
                        previous_app_id = Some(old.app_id);
                    }
                }
                group.app_id
            } else {
                // The group is born with this batch; commit creates it
                // under the reserved identity.
                let held = self.reserve(&target_name)?;
                if let Some(old) = existing {
                    previous_app_id = Some(old.app_id);
                }
                let app_id = held.app_id();
                reservation = Some(held);
                app_id
            }
        } else if let Some(old) = existing {
            if old.shared_user.is_some() {
                // Leaving the group via rename migration; the package gets
                // a fresh identity and its data is re-owned.
                let held = self.reserve(&target_name)?;
                previous_app_id = Some(old.app_id);
                let app_id = held.app_id();
                reservation = Some(held);
                app_id
            } else {
                old.app_id
            }
        } else {
            let held = self.reserve(&target_name)?;
            let app_id = held.app_id();
            reservation = Some(held);
            app_id
        };

        self.check_permission_groups(descriptor, &target_name, snapshot)?;
        self.check_sdk_library_major(descriptor, snapshot)?;

        let now = Utc::now();
        let setting = PackageSetting {
            name: target_name,
            app_id,
            version_code: descriptor.version_code,
            version: descriptor.version.clone(),
            code_path: descriptor.code_path.clone(),
            signing: descriptor.signing.clone(),
            shared_user: descriptor.shared_user.clone(),
            install_source: request.source.clone(),
            uses_libraries: descriptor.uses_libraries.clone(),
            static_library: descriptor.static_library.clone(),
            sdk_library: descriptor.sdk_library.clone(),
            // A system package updated from data stays a system package.
            system: scan_flags.from_system_image || existing.is_some_and(|old| old.system),
            debuggable: descriptor.debuggable,
            test_only: descriptor.test_only,
            target_sdk: descriptor.sdk.target,
            selected_abi,
            // Per-user state is filled in at commit for all known users.
            user_state: BTreeMap::new(),
            first_install_time: existing.map_or(now, |old| old.first_install_time),
            last_update_time: now,
        };

        Ok(ScanResult {
            descriptor: descriptor.clone(),
            setting,
            reservation,
            previous_app_id,
            replaces,
            system_conflict,
            update: existing.is_some(),
            user: request.user,
            flags: request.flags,
        })
    }

    fn reserve(&self, package: &str) -> Result<AppIdReservation, ScanError> {
        self.registry.reserve_app_id().map_err(|err| match err {
            RegistryError::AppIdExhausted => ScanError::AppIdExhausted,
            other => ScanError::Internal {
                message: format!("reserving identity for {package}: {other}"),
            },
        })
    }

    fn select_abi(&self, descriptor: &ParsedDescriptor) -> Result<Option<Abi>, ScanError> {
        if descriptor.native_abis.is_empty() {
            return Ok(None);
        }
        descriptor
            .native_abis
            .iter()
            .find(|abi| self.supported_abis.contains(abi))
            .copied()
            .map(Some)
            .ok_or_else(|| ScanError::UnsupportedAbi {
                package: descriptor.name.clone(),
                declared: descriptor
                    .native_abis
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn check_library_naming(
        &self,
        descriptor: &ParsedDescriptor,
        snapshot: &RegistrySnapshot,
    ) -> Result<(), ScanError> {
        if let Some(decl) = &descriptor.static_library {
            let expected = decl.synthetic_package_name();
            if descriptor.name != expected {
                return Err(ScanError::StaticLibraryNameMismatch {
                    package: descriptor.name.clone(),
                    expected,
                });
            }
            // The bare line name must stay free of ordinary packages.
            if let Some(owner) = snapshot.package(&decl.name) {
                return Err(ScanError::StaticLibraryNameCollision {
                    base: decl.name.clone(),
                    owner: owner.name.clone(),
                });
            }
        } else {
            let published = snapshot.libraries.static_versions(&descriptor.name);
            if let Some(version) = published.first() {
                return Err(ScanError::StaticLibraryNameCollision {
                    base: descriptor.name.clone(),
                    owner: format!("{}_{version}", descriptor.name),
                });
            }
        }
        Ok(())
    }

    fn check_permission_groups(
        &self,
        descriptor: &ParsedDescriptor,
        target_name: &str,
        snapshot: &RegistrySnapshot,
    ) -> Result<(), ScanError> {
        for decl in &descriptor.permission_groups {
            let Some(entry) = snapshot.permissions.group(&decl.name) else {
                continue;
            };
            if entry.owner == target_name {
                continue;
            }
            let owner_signing = snapshot.package(&entry.owner).map(|owner| &owner.signing);
            let compatible =
                owner_signing.is_some_and(|signing| descriptor.signing.signers_match(signing));
            if !compatible {
                return Err(ScanError::DuplicatePermissionGroup {
                    group: decl.name.clone(),
                    owner: entry.owner.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_sdk_library_major(
        &self,
        descriptor: &ParsedDescriptor,
        snapshot: &RegistrySnapshot,
    ) -> Result<(), ScanError> {
        let Some(decl) = &descriptor.sdk_library else {
            return Ok(());
        };
        let Some(line) = snapshot.libraries.sdk(&decl.name) else {
            return Ok(());
        };
        if line.version_major == decl.version_major {
            return Ok(());
        }
        // A major bump must ride an SDK-floor change of the provider.
        let provider_target = snapshot.package(&line.provider).map(|p| p.target_sdk);
        if provider_target == Some(descriptor.sdk.target) {
            return Err(ScanError::SdkLibraryMajorMismatch {
                package: descriptor.name.clone(),
                old_major: line.version_major,
                new_major: decl.version_major,
            });
        }
        Ok(())
    }
}

fn signer_summary(details: &SigningDetails) -> String {
    if details.signers.is_empty() {
        return "unsigned".to_string();
    }
    details
        .signers
        .iter()
        .map(|signer| signer.short())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgd_types::{SdkLibraryDecl, StaticLibraryDecl, Version};
    use std::path::PathBuf;

    fn descriptor(name: &str, version_code: i64) -> ParsedDescriptor {
        let mut d = ParsedDescriptor::new(name, version_code, Version::new(1, 0, 0));
        d.signing = SigningDetails::from_cert(b"k1");
        d.sdk.target = 30;
        d.code_path = PathBuf::from(format!("/data/staging/{name}"));
        d
    }

    fn scanner(registry: &PackageRegistry) -> Scanner {
        Scanner::new(registry.clone(), vec![Abi::Arm64V8a, Abi::X86_64])
    }

    async fn install_existing(registry: &PackageRegistry, descriptor: &ParsedDescriptor) {
        let scan = scanner(registry)
            .scan(
                &InstallRequest::new(descriptor.clone()),
                &registry.snapshot().await.unwrap(),
                ScanFlags::default(),
            )
            .expect("seed scan");
        let mut guard = registry.begin_write().await.unwrap();
        let mut setting = scan.setting;
        if let Some(reservation) = scan.reservation {
            setting.app_id = reservation.commit();
        }
        if let Some(group) = setting.shared_user.clone() {
            guard.add_shared_user_member(&group, &setting.name, setting.app_id, &setting.signing);
        }
        if let Some(decl) = setting.static_library.clone() {
            guard.register_static_library(&decl.name, decl.version, setting.name.clone());
        }
        if let Some(decl) = setting.sdk_library.clone() {
            guard.register_sdk_library(&decl.name, decl.version_major, setting.name.clone());
        }
        guard.insert_package(setting);
    }

    #[tokio::test]
    async fn fresh_install_reserves_dense_identity() {
        let registry = PackageRegistry::new();
        let snapshot = registry.snapshot().await.unwrap();
        let request = InstallRequest::new(descriptor("com.example.app", 1));

        let scan = scanner(&registry)
            .scan(&request, &snapshot, ScanFlags::default())
            .expect("scan");
        assert_eq!(scan.setting.app_id, AppId(10_000));
        assert!(scan.reservation.is_some());
        assert!(!scan.update);

        // dropping the result releases the identity
        drop(scan);
        let next = registry.reserve_app_id().expect("reserve");
        assert_eq!(next.app_id(), AppId(10_000));
    }

    #[tokio::test]
    async fn update_keeps_identity_and_first_install_time() {
        let registry = PackageRegistry::new();
        install_existing(&registry, &descriptor("com.example.app", 1)).await;
        let snapshot = registry.snapshot().await.unwrap();
        let installed = snapshot.package("com.example.app").unwrap().clone();

        let request = InstallRequest::new(descriptor("com.example.app", 2))
            .with_flags(InstallFlags::replace());
        let scan = scanner(&registry)
            .scan(&request, &snapshot, ScanFlags::default())
            .expect("scan");
        assert!(scan.update);
        assert!(scan.reservation.is_none());
        assert_eq!(scan.setting.app_id, installed.app_id);
        assert_eq!(scan.setting.first_install_time, installed.first_install_time);
    }

    #[tokio::test]
    async fn platform_name_is_reserved() {
        let registry = PackageRegistry::new();
        let snapshot = registry.snapshot().await.unwrap();
        let request = InstallRequest::new(descriptor(PLATFORM_PACKAGE_NAME, 1));
        assert!(matches!(
            scanner(&registry).scan(&request, &snapshot, ScanFlags::default()),
            Err(ScanError::ReservedName)
        ));
    }

    #[tokio::test]
    async fn unsigned_descriptor_is_rejected() {
        let registry = PackageRegistry::new();
        let snapshot = registry.snapshot().await.unwrap();
        let mut d = descriptor("com.example.app", 1);
        d.signing = SigningDetails::default();
        assert!(matches!(
            scanner(&registry).scan(&InstallRequest::new(d), &snapshot, ScanFlags::default()),
            Err(ScanError::NotSigned { .. })
        ));
    }

    #[tokio::test]
    async fn abi_selection_prefers_declaration_order() {
        let registry = PackageRegistry::new();
        let snapshot = registry.snapshot().await.unwrap();

        let mut d = descriptor("com.example.app", 1);
        d.native_abis = vec![Abi::RiscV64, Abi::X86_64, Abi::Arm64V8a];
        let scan = scanner(&registry)
            .scan(&InstallRequest::new(d), &snapshot, ScanFlags::default())
            .expect("scan");
        assert_eq!(scan.setting.selected_abi, Some(Abi::X86_64));

        let mut d = descriptor("com.example.neutral", 1);
        d.native_abis = Vec::new();
        let scan = scanner(&registry)
            .scan(&InstallRequest::new(d), &snapshot, ScanFlags::default())
            .expect("scan");
        assert_eq!(scan.setting.selected_abi, None);

        let mut d = descriptor("com.example.exotic", 1);
        d.native_abis = vec![Abi::RiscV64];
        assert!(matches!(
            scanner(&registry).scan(&InstallRequest::new(d), &snapshot, ScanFlags::default()),
            Err(ScanError::UnsupportedAbi { .. })
        ));
    }

    #[tokio::test]
    async fn unrelated_signer_cannot_update() {
        let registry = PackageRegistry::new();
        install_existing(&registry, &descriptor("com.example.app", 1)).await;
        let snapshot = registry.snapshot().await.unwrap();

        let mut d = descriptor("com.example.app", 2);
        d.signing = SigningDetails::from_cert(b"k3");
        let request = InstallRequest::new(d).with_flags(InstallFlags::replace());
        assert!(matches!(
            scanner(&registry).scan(&request, &snapshot, ScanFlags::default()),
            Err(ScanError::UpdateIncompatible { .. })
        ));
    }

    #[tokio::test]
    async fn rotated_signer_with_grant_can_update() {
        let registry = PackageRegistry::new();
        install_existing(&registry, &descriptor("com.example.app", 1)).await;
        let snapshot = registry.snapshot().await.unwrap();

        let mut d = descriptor("com.example.app", 2);
        d.signing = SigningDetails::from_cert(b"k1").rotated(b"k2", Capabilities::default_granted());
        let request = InstallRequest::new(d).with_flags(InstallFlags::replace());
        assert!(scanner(&registry)
            .scan(&request, &snapshot, ScanFlags::default())
            .is_ok());
    }

    #[tokio::test]
    async fn grouping_change_requires_rename_migration() {
        let registry = PackageRegistry::new();
        install_existing(&registry, &descriptor("com.example.app", 1)).await;
        let snapshot = registry.snapshot().await.unwrap();

        let mut d = descriptor("com.example.app", 2);
        d.shared_user = Some("com.example.shared".to_string());
        let request = InstallRequest::new(d).with_flags(InstallFlags::replace());
        assert!(matches!(
            scanner(&registry).scan(&request, &snapshot, ScanFlags::default()),
            Err(ScanError::SharedUserChanged { .. })
        ));
    }

    #[tokio::test]
    async fn rename_migration_out_of_group_gets_fresh_identity() {
        let registry = PackageRegistry::new();
        let mut old = descriptor("com.example.old", 1);
        old.shared_user = Some("com.example.shared".to_string());
        install_existing(&registry, &old).await;
        let snapshot = registry.snapshot().await.unwrap();
        let old_id = snapshot.package("com.example.old").unwrap().app_id;

        let mut d = descriptor("com.example.renewed", 2);
        d.original_name = Some("com.example.old".to_string());
        let request = InstallRequest::new(d).with_flags(InstallFlags::replace());
        let scan = scanner(&registry)
            .scan(&request, &snapshot, ScanFlags::default())
            .expect("scan");

        assert_eq!(scan.replaces.as_deref(), Some("com.example.old"));
        assert_eq!(scan.previous_app_id, Some(old_id));
        assert!(scan.reservation.is_some());
        assert_ne!(scan.setting.app_id, old_id);
    }

    #[tokio::test]
    async fn joining_existing_group_adopts_group_identity() {
        let registry = PackageRegistry::new();
        let mut first = descriptor("com.example.first", 1);
        first.shared_user = Some("com.example.shared".to_string());
        install_existing(&registry, &first).await;
        let snapshot = registry.snapshot().await.unwrap();
        let group_id = snapshot.shared_user("com.example.shared").unwrap().app_id;

        let mut joiner = descriptor("com.example.second", 1);
        joiner.shared_user = Some("com.example.shared".to_string());
        let scan = scanner(&registry)
            .scan(&InstallRequest::new(joiner), &snapshot, ScanFlags::default())
            .expect("scan");
        assert_eq!(scan.setting.app_id, group_id);
        assert!(scan.reservation.is_none());

        // a foreign key is turned away at the door
        let mut stranger = descriptor("com.example.stranger", 1);
        stranger.shared_user = Some("com.example.shared".to_string());
        stranger.signing = SigningDetails::from_cert(b"k9");
        assert!(matches!(
            scanner(&registry).scan(&InstallRequest::new(stranger), &snapshot, ScanFlags::default()),
            Err(ScanError::SharedUserIncompatible { .. })
        ));
    }

    #[tokio::test]
    async fn static_library_name_must_be_synthetic() {
        let registry = PackageRegistry::new();
        let snapshot = registry.snapshot().await.unwrap();

        let mut d = descriptor("com.example.lib", 12);
        d.static_library = Some(StaticLibraryDecl {
            name: "com.example.lib".to_string(),
            version: 12,
        });
        let err = scanner(&registry)
            .scan(&InstallRequest::new(d), &snapshot, ScanFlags::default())
            .expect_err("name mismatch");
        assert!(matches!(
            err,
            ScanError::StaticLibraryNameMismatch { ref expected, .. }
                if expected == "com.example.lib_12"
        ));
    }

    #[tokio::test]
    async fn static_library_base_name_collision() {
        let registry = PackageRegistry::new();
        install_existing(&registry, &descriptor("com.example.lib", 1)).await;
        let snapshot = registry.snapshot().await.unwrap();

        let mut d = descriptor("com.example.lib_5", 5);
        d.static_library = Some(StaticLibraryDecl {
            name: "com.example.lib".to_string(),
            version: 5,
        });
        assert!(matches!(
            scanner(&registry).scan(&InstallRequest::new(d), &snapshot, ScanFlags::default()),
            Err(ScanError::StaticLibraryNameCollision { .. })
        ));
    }

    #[tokio::test]
    async fn sdk_major_bump_needs_floor_change() {
        let registry = PackageRegistry::new();
        let mut provider = descriptor("com.example.sdk.provider", 1);
        provider.sdk_library = Some(SdkLibraryDecl {
            name: "com.example.sdk".to_string(),
            version_major: 1,
        });
        install_existing(&registry, &provider).await;
        let snapshot = registry.snapshot().await.unwrap();

        // same target SDK, bumped major: rejected
        let mut bump = descriptor("com.example.sdk.provider", 2);
        bump.sdk_library = Some(SdkLibraryDecl {
            name: "com.example.sdk".to_string(),
            version_major: 2,
        });
        let request = InstallRequest::new(bump.clone()).with_flags(InstallFlags::replace());
        assert!(matches!(
            scanner(&registry).scan(&request, &snapshot, ScanFlags::default()),
            Err(ScanError::SdkLibraryMajorMismatch { old_major: 1, new_major: 2, .. })
        ));

        // raised target SDK makes the bump legal
        bump.sdk.target = 31;
        let request = InstallRequest::new(bump).with_flags(InstallFlags::replace());
        assert!(scanner(&registry)
            .scan(&request, &snapshot, ScanFlags::default())
            .is_ok());
    }

    #[tokio::test]
    async fn system_rescan_of_data_package_flags_conflict() {
        let registry = PackageRegistry::new();
        install_existing(&registry, &descriptor("com.example.app", 5)).await;
        let snapshot = registry.snapshot().await.unwrap();

        let request = InstallRequest::new(descriptor("com.example.app", 4))
            .with_flags(InstallFlags::replace());
        let scan = scanner(&registry)
            .scan(
                &request,
                &snapshot,
                ScanFlags {
                    first_boot: false,
                    from_system_image: true,
                },
            )
            .expect("scan");
        assert!(scan.system_conflict);
        assert!(scan.setting.system);
    }
}
