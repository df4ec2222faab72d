//! Preparation phase: per-request policy checks
//!
//! Prepare runs before any freeze or reservation, against a plain
//! snapshot. Everything here is caller error; nothing mutates shared
//! state, so a failure aborts the batch with no cleanup beyond staged
//! files.

use crate::request::InstallRequest;
use pkgd_errors::PrepareError;
use pkgd_registry::RegistrySnapshot;
use pkgd_types::{is_valid_package_name, ScanFlags};

/// Target SDK a package must reach before it may install as instant
const INSTANT_MIN_TARGET_SDK: u32 = 26;

pub struct Preparer {
    target_sdk_floor: u32,
}

impl Preparer {
    #[must_use]
    pub fn new(target_sdk_floor: u32) -> Self {
        Self { target_sdk_floor }
    }

    /// Validate one request against install policy.
    ///
    /// # Errors
    ///
    /// Returns the policy violation; any one fails the whole batch.
    pub fn prepare(
        &self,
        request: &InstallRequest,
        snapshot: &RegistrySnapshot,
        scan_flags: ScanFlags,
    ) -> Result<(), PrepareError> {
        let descriptor = &request.descriptor;
        let flags = request.flags;

        if !is_valid_package_name(&descriptor.name) {
            return Err(PrepareError::BadPackageName {
                name: descriptor.name.clone(),
            });
        }

        // Follows the rename table, so an update addressed by a package's
        // pre-migration name still finds the installed record. System-image
        // rescans replace by design and version under the reconcile
        // tie-break, not under caller downgrade policy.
        if let Some(installed) = snapshot.resolve_package(&descriptor.name) {
            if !flags.replace_existing && !scan_flags.from_system_image {
                return Err(PrepareError::AlreadyExists {
                    package: descriptor.name.clone(),
                });
            }
            if !scan_flags.from_system_image && descriptor.version_code < installed.version_code {
                let permitted = flags.downgrade_requested()
                    && (installed.debuggable || flags.rollback_eligible);
                if !permitted {
                    return Err(PrepareError::VersionDowngrade {
                        package: descriptor.name.clone(),
                        requested: descriptor.version_code,
                        installed: installed.version_code,
                    });
                }
            }
        }

        if descriptor.sdk.target < self.target_sdk_floor {
            return Err(PrepareError::TargetSdkTooLow {
                package: descriptor.name.clone(),
                target: descriptor.sdk.target,
                floor: self.target_sdk_floor,
            });
        }

        if descriptor.test_only && !flags.allow_test_only {
            return Err(PrepareError::TestOnly {
                package: descriptor.name.clone(),
            });
        }

        if flags.instant {
            if descriptor.sdk.target < INSTANT_MIN_TARGET_SDK {
                return Err(PrepareError::InstantIneligible {
                    package: descriptor.name.clone(),
                    reason: format!(
                        "target SDK {} is below {INSTANT_MIN_TARGET_SDK}",
                        descriptor.sdk.target
                    ),
                });
            }
            if descriptor.shared_user.is_some() {
                return Err(PrepareError::InstantIneligible {
                    package: descriptor.name.clone(),
                    reason: "instant packages cannot join a shared user".to_string(),
                });
            }
        }

        Ok(())
    }
}
