//! Registry mutation and persistence events

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    /// A snapshot was written to the persistent store
    SnapshotPersisted { packages: usize, bytes: u64 },

    /// A snapshot was loaded at startup
    SnapshotLoaded { packages: usize },

    /// A package setting was created or replaced
    SettingWritten {
        package: String,
        app_id: u32,
        update: bool,
    },

    /// A system-image copy was disabled in favor of the data copy
    SystemCopyDisabled { package: String },

    /// An empty shared-user group was pruned
    SharedUserPruned { name: String },

    /// A shared-user group's signing identity was replaced
    SharedUserSigningUpdated { name: String },

    /// A shared library version was published
    LibraryRegistered {
        name: String,
        version: i64,
        provider: String,
    },

    /// A newly declared permission lost a conflict against an existing,
    /// incompatibly-signed owner and was dropped (install continues)
    PermissionDropped {
        permission: String,
        owner: String,
        requester: String,
    },

    /// The registry was poisoned by a commit failure
    Poisoned { reason: String },
}
