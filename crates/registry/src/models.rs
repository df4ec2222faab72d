//! Durable registry records
//!
//! These records are the unit of persistence: a snapshot of the registry
//! is a deep copy of these tables. Everything here is plain data; all
//! mutation goes through the registry's transactional guard.

use chrono::{DateTime, Utc};
use pkgd_types::{
    Abi, AppId, InstallSource, LibraryDependency, SdkLibraryDecl, SigningDetails,
    StaticLibraryDecl, UserId, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Per-user visibility of one installed package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUserState {
    pub installed: bool,
    pub enabled: bool,
    pub hidden: bool,
    pub instant: bool,
}

impl Default for PackageUserState {
    fn default() -> Self {
        Self {
            installed: true,
            enabled: true,
            hidden: false,
            instant: false,
        }
    }
}

impl PackageUserState {
    /// State for an instant (ephemeral) install
    #[must_use]
    pub fn instant() -> Self {
        Self {
            instant: true,
            ..Self::default()
        }
    }
}

/// Durable record of one installed package
///
/// Created on the first successful commit; updated in place on every
/// later replace. System-image packages are archived rather than removed
/// when a data copy shadows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSetting {
    pub name: String,
    /// Stable for the life of the record once committed
    pub app_id: AppId,
    pub version_code: i64,
    pub version: Version,
    pub code_path: PathBuf,
    pub signing: SigningDetails,
    #[serde(default)]
    pub shared_user: Option<String>,
    #[serde(default)]
    pub install_source: InstallSource,
    #[serde(default)]
    pub uses_libraries: Vec<LibraryDependency>,
    #[serde(default)]
    pub static_library: Option<StaticLibraryDecl>,
    #[serde(default)]
    pub sdk_library: Option<SdkLibraryDecl>,
    /// Came from the read-only system image
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub debuggable: bool,
    #[serde(default)]
    pub test_only: bool,
    pub target_sdk: u32,
    #[serde(default)]
    pub selected_abi: Option<Abi>,
    #[serde(default)]
    pub user_state: BTreeMap<UserId, PackageUserState>,
    pub first_install_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl PackageSetting {
    /// Per-user state, defaulting to not-installed for unknown users
    #[must_use]
    pub fn user_state(&self, user: UserId) -> PackageUserState {
        self.user_state.get(&user).copied().unwrap_or(PackageUserState {
            installed: false,
            ..PackageUserState::default()
        })
    }

    pub fn set_user_state(&mut self, user: UserId, state: PackageUserState) {
        self.user_state.insert(user, state);
    }

    /// Whether any user has this package installed
    #[must_use]
    pub fn installed_for_any_user(&self) -> bool {
        self.user_state.values().any(|s| s.installed)
    }

    /// Users this package is installed for
    #[must_use]
    pub fn installed_users(&self) -> Vec<UserId> {
        self.user_state
            .iter()
            .filter(|(_, s)| s.installed)
            .map(|(u, _)| *u)
            .collect()
    }

    /// Whether this record declares a library line of either kind
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.static_library.is_some() || self.sdk_library.is_some()
    }
}

/// Group of packages sharing one app identity and one signing envelope
///
/// Created lazily when the first member declares the group name; pruned
/// when the last member migrates away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedUserSetting {
    pub name: String,
    pub app_id: AppId,
    pub members: BTreeSet<String>,
    /// Representative signing identity for the whole group. Replaced when
    /// a reconciled batch decides a member's identity now represents it.
    pub signing: SigningDetails,
}

impl SharedUserSetting {
    #[must_use]
    pub fn new(name: impl Into<String>, app_id: AppId, signing: SigningDetails) -> Self {
        Self {
            name: name.into(),
            app_id,
            members: BTreeSet::new(),
            signing,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
