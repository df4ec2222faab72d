//! Install and scan flag sets

use serde::{Deserialize, Serialize};

/// Caller-supplied flags on one install request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFlags {
    /// Replace an already-installed package
    #[serde(default)]
    pub replace_existing: bool,
    /// Permit a lower version code than the installed one (still gated on
    /// the installed build being debuggable, or rollback eligibility)
    #[serde(default)]
    pub allow_downgrade: bool,
    /// Install as an instant (ephemeral) app
    #[serde(default)]
    pub instant: bool,
    /// The batch is a rollback of a previous update
    #[serde(default)]
    pub rollback_eligible: bool,
    /// Do not kill dependent processes on shared-library major change and
    /// defer removal of the replaced code path until the app exits
    #[serde(default)]
    pub dont_kill: bool,
    /// Permit packages marked test-only
    #[serde(default)]
    pub allow_test_only: bool,
}

impl InstallFlags {
    /// Flags for a plain replace
    #[must_use]
    pub fn replace() -> Self {
        Self {
            replace_existing: true,
            ..Self::default()
        }
    }

    /// Downgrades are acceptable when explicitly allowed or when the batch
    /// is a rollback.
    #[must_use]
    pub fn downgrade_requested(self) -> bool {
        self.allow_downgrade || self.rollback_eligible
    }
}

/// Context flags for a whole scan pass rather than one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFlags {
    /// First boot: nothing is running yet, so the kill rule is moot
    #[serde(default)]
    pub first_boot: bool,
    /// The artifact comes from the read-only system image
    #[serde(default)]
    pub from_system_image: bool,
}
