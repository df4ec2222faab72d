//! Stable numeric status codes
//!
//! Every terminal outcome of an install request maps to exactly one code.
//! Codes are part of the external contract: callers match on the number,
//! not the message, so variants are never renumbered.

/// Terminal status of one install request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum InstallCode {
    Success = 1,

    // Batch-level validation
    DuplicatePackageInBatch = -1,
    BatchAborted = -2,

    // Per-request preparation
    AlreadyExists = -10,
    VersionDowngrade = -11,
    TargetSdkTooLow = -12,
    TestOnly = -13,
    InstantIneligible = -14,
    BadPackageName = -15,
    InvalidRequest = -16,

    // Scan
    NotSigned = -20,
    UpdateIncompatible = -21,
    SharedUserIncompatible = -22,
    UnsupportedAbi = -23,
    ReservedPlatformName = -24,
    DuplicatePermissionGroup = -25,
    SdkLibraryMajorMismatch = -26,
    StaticLibraryNameCollision = -27,
    AppIdExhausted = -28,

    // Reconcile
    MissingSharedLibrary = -40,
    StaticLibraryOrder = -41,
    SharedUserSigningConflict = -42,
    PermissionOwnedByPlatform = -43,

    // Internal / fatal
    Internal = -110,
    RegistryPoisoned = -111,
    WatchdogExpired = -112,
    PersistFailed = -113,
}

impl InstallCode {
    /// The numeric value carried over the wire
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Internal invariant violations, as opposed to caller mistakes.
    /// Logged at higher severity and never attributed to the request.
    #[must_use]
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            Self::Internal | Self::RegistryPoisoned | Self::WatchdogExpired | Self::PersistFailed
        )
    }

    /// Fatal codes escalate to a process restart because in-memory
    /// registry state can no longer be trusted.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::RegistryPoisoned | Self::WatchdogExpired | Self::PersistFailed
        )
    }
}

impl std::fmt::Display for InstallCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(InstallCode::Success.as_i32(), 1);
        assert_eq!(InstallCode::VersionDowngrade.as_i32(), -11);
        assert_eq!(InstallCode::StaticLibraryOrder.as_i32(), -41);
        assert_eq!(InstallCode::WatchdogExpired.as_i32(), -112);
    }

    #[test]
    fn classification() {
        assert!(InstallCode::WatchdogExpired.is_fatal());
        assert!(InstallCode::WatchdogExpired.is_internal());
        assert!(InstallCode::Internal.is_internal());
        assert!(!InstallCode::Internal.is_fatal());
        assert!(!InstallCode::VersionDowngrade.is_internal());
    }
}
