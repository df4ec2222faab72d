//! Reconcile phase: cross-package validation under the write lock
//!
//! Reconcile sees the whole batch at once plus the locked registry state
//! and produces the commit plan. It still mutates nothing durable; the
//! only side effect is releasing surplus identity reservations when a
//! batch creates one shared-user group from several members.

use crate::scan::ScanResult;
use pkgd_errors::ReconcileError;
use pkgd_registry::RegistrySnapshot;
use pkgd_types::{Capabilities, PermissionDecl, SigningDetails, PLATFORM_PACKAGE_NAME};
use std::collections::{BTreeMap, BTreeSet};

/// A dependency edge commit must record once all packages are inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLibrary {
    Static { name: String, version: i64 },
    Sdk { name: String },
}

/// What commit does with one declared permission
#[derive(Debug, Clone)]
pub enum PermissionDecision {
    /// Define or redefine the permission under this package
    Define(PermissionDecl),
    /// Skip the definition: another package owns it under an
    /// incompatible signature. Surfaced loudly, never fatal.
    Drop { permission: String, owner: String },
}

/// One package with its commit plan attached
#[derive(Debug)]
pub struct ReconciledPackage {
    pub scan: ScanResult,
    pub resolved_libraries: Vec<ResolvedLibrary>,
    pub permission_decisions: Vec<PermissionDecision>,
    /// Tie-break verdict: archive the incoming system copy and keep the
    /// installed data copy active
    pub disable_incoming_system: bool,
}

/// The whole validated batch, ready for commit
#[derive(Debug)]
pub struct ReconciledBatch {
    pub packages: Vec<ReconciledPackage>,
    /// Representative signing to apply per touched shared-user group,
    /// after membership changes land
    pub shared_user_updates: BTreeMap<String, SigningDetails>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate the batch as a whole and build the commit plan.
    ///
    /// # Errors
    ///
    /// Any reconcile error fails the whole batch.
    pub fn reconcile(
        &self,
        mut scans: Vec<ScanResult>,
        snapshot: &RegistrySnapshot,
    ) -> Result<ReconciledBatch, ReconcileError> {
        check_duplicates(&scans)?;
        check_static_ordering(&scans, snapshot)?;
        let shared_user_updates = reconcile_shared_users(&mut scans, snapshot)?;

        let mut resolved = Vec::with_capacity(scans.len());
        let mut decisions = Vec::with_capacity(scans.len());
        let mut disable = Vec::with_capacity(scans.len());
        for scan in &scans {
            resolved.push(resolve_libraries(scan, &scans, snapshot)?);
            decisions.push(decide_permissions(scan, snapshot)?);
            disable.push(scan.system_conflict && data_copy_wins(scan, snapshot));
        }

        let packages = scans
            .into_iter()
            .zip(resolved)
            .zip(decisions)
            .zip(disable)
            .map(
                |(((scan, resolved_libraries), permission_decisions), disable_incoming_system)| {
                    ReconciledPackage {
                        scan,
                        resolved_libraries,
                        permission_decisions,
                        disable_incoming_system,
                    }
                },
            )
            .collect();

        Ok(ReconciledBatch {
            packages,
            shared_user_updates,
        })
    }
}

fn check_duplicates(scans: &[ScanResult]) -> Result<(), ReconcileError> {
    let mut seen = BTreeSet::new();
    for scan in scans {
        if !seen.insert(scan.setting.name.clone()) {
            return Err(ReconcileError::DuplicatePackage {
                package: scan.setting.name.clone(),
            });
        }
    }
    Ok(())
}

/// Every static library the batch publishes must extend its line, never
/// wedge between two published versions. Checked against a working copy
/// so sibling providers within the batch constrain each other too.
fn check_static_ordering(
    scans: &[ScanResult],
    snapshot: &RegistrySnapshot,
) -> Result<(), ReconcileError> {
    let mut working = snapshot.libraries.clone();
    for scan in scans {
        let Some(decl) = &scan.descriptor.static_library else {
            continue;
        };
        working
            .check_static_order(&decl.name, decl.version)
            .map_err(|violation| ReconcileError::StaticLibraryOrder {
                library: decl.name.clone(),
                version: decl.version,
                below: violation.below,
                above: violation.above,
            })?;
        working.register_static(&decl.name, decl.version, scan.setting.name.clone());
    }
    Ok(())
}

/// Resolve every declared dependency against the batch's siblings and
/// the registry. Optional dependencies that resolve nowhere are skipped
/// silently.
fn resolve_libraries(
    scan: &ScanResult,
    siblings: &[ScanResult],
    snapshot: &RegistrySnapshot,
) -> Result<Vec<ResolvedLibrary>, ReconcileError> {
    let mut resolved = Vec::new();
    for dep in &scan.descriptor.uses_libraries {
        let static_in_batch = siblings.iter().any(|other| {
            other
                .descriptor
                .static_library
                .as_ref()
                .is_some_and(|decl| decl.name == dep.name && decl.version == dep.version)
        });
        if static_in_batch || snapshot.libraries.has_static_version(&dep.name, dep.version) {
            resolved.push(ResolvedLibrary::Static {
                name: dep.name.clone(),
                version: dep.version,
            });
            continue;
        }

        let sdk_in_batch = siblings.iter().any(|other| {
            other
                .descriptor
                .sdk_library
                .as_ref()
                .is_some_and(|decl| decl.name == dep.name && decl.version_major >= dep.version)
        });
        if sdk_in_batch
            || snapshot
                .libraries
                .sdk(&dep.name)
                .is_some_and(|line| line.version_major >= dep.version)
        {
            resolved.push(ResolvedLibrary::Sdk {
                name: dep.name.clone(),
            });
            continue;
        }

        if dep.optional {
            continue;
        }
        return Err(ReconcileError::MissingSharedLibrary {
            package: scan.setting.name.clone(),
            library: dep.name.clone(),
            version: dep.version,
        });
    }
    Ok(resolved)
}

/// Settle each touched shared-user group: unify identities when the
/// batch creates the group from several members, and elect the final
/// representative signing identity.
fn reconcile_shared_users(
    scans: &mut [ScanResult],
    snapshot: &RegistrySnapshot,
) -> Result<BTreeMap<String, SigningDetails>, ReconcileError> {
    let mut by_group: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, scan) in scans.iter().enumerate() {
        if let Some(group) = &scan.setting.shared_user {
            by_group.entry(group.clone()).or_default().push(index);
        }
    }

    let mut updates = BTreeMap::new();
    for (group_name, members) in by_group {
        let existing = snapshot.shared_user(&group_name);

        // A group born from several batch members shares the first
        // member's reserved identity; the surplus reservations return to
        // the pool.
        if existing.is_none() && members.len() > 1 {
            let lead_id = scans[members[0]].setting.app_id;
            for &index in &members[1..] {
                scans[index].reservation = None;
                scans[index].setting.app_id = lead_id;
            }
        }

        let initial = existing.map_or_else(
            || scans[members[0]].setting.signing.clone(),
            |group| group.signing.clone(),
        );
        let mut candidate = initial.clone();
        for &index in &members {
            let signing = &scans[index].setting.signing;
            if signing.signers_match(&candidate) {
                continue;
            }
            if signing.check_capability(&candidate, Capabilities::SHARED_USER) {
                // this member rotated past the representative; its
                // identity now speaks for the group
                candidate = signing.clone();
            } else if candidate.check_capability(signing, Capabilities::SHARED_USER) {
                // representative already descends from this member's key
            } else {
                return Err(ReconcileError::SharedUserSigningConflict {
                    shared_user: group_name.clone(),
                    package: scans[index].setting.name.clone(),
                });
            }
        }
        if !candidate.signers_match(&initial) {
            updates.insert(group_name, candidate);
        }
    }
    Ok(updates)
}

/// Tie-break for a system-image copy colliding with installed data: the
/// data copy stays active when it is newer or grouped differently.
fn data_copy_wins(scan: &ScanResult, snapshot: &RegistrySnapshot) -> bool {
    snapshot.package(&scan.setting.name).is_some_and(|data| {
        data.version_code > scan.setting.version_code
            || data.shared_user != scan.setting.shared_user
    })
}

fn decide_permissions(
    scan: &ScanResult,
    snapshot: &RegistrySnapshot,
) -> Result<Vec<PermissionDecision>, ReconcileError> {
    let mut decisions = Vec::with_capacity(scan.descriptor.permissions.len());
    for decl in &scan.descriptor.permissions {
        match snapshot.permissions.permission(&decl.name) {
            Some(entry) if entry.owner != scan.setting.name => {
                if entry.owner == PLATFORM_PACKAGE_NAME {
                    return Err(ReconcileError::PermissionOwnedByPlatform {
                        permission: decl.name.clone(),
                        package: scan.setting.name.clone(),
                    });
                }
                let owner_signing = snapshot.package(&entry.owner).map(|owner| &owner.signing);
                let compatible = owner_signing
                    .is_some_and(|signing| scan.setting.signing.signers_match(signing));
                if compatible {
                    decisions.push(PermissionDecision::Define(decl.clone()));
                } else {
                    decisions.push(PermissionDecision::Drop {
                        permission: decl.name.clone(),
                        owner: entry.owner.clone(),
                    });
                }
            }
            _ => decisions.push(PermissionDecision::Define(decl.clone())),
        }
    }
    Ok(decisions)
}
