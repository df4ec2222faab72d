//! Point-in-time copy of the registry
//!
//! A snapshot is what the persistent store serializes and what the
//! side-effect-free pipeline phases read. It never aliases live registry
//! state, so holding one across an await point is always safe.

use crate::libraries::SharedLibraryTable;
use crate::models::{PackageSetting, SharedUserSetting};
use crate::permissions::PermissionTable;
use pkgd_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written into every persisted snapshot. Bumped on any
/// incompatible model change; the store refuses newer versions.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

/// Deep copy of every durable registry table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub packages: BTreeMap<String, PackageSetting>,
    /// Archived system-image copies shadowed by a data copy, kept as a
    /// factory-reset fallback
    #[serde(default)]
    pub disabled_system_packages: BTreeMap<String, PackageSetting>,
    /// Original name -> current name for rename-migrated packages
    #[serde(default)]
    pub renamed_packages: BTreeMap<String, String>,
    #[serde(default)]
    pub shared_users: BTreeMap<String, SharedUserSetting>,
    #[serde(default)]
    pub libraries: SharedLibraryTable,
    #[serde(default)]
    pub permissions: PermissionTable,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            packages: BTreeMap::new(),
            disabled_system_packages: BTreeMap::new(),
            renamed_packages: BTreeMap::new(),
            shared_users: BTreeMap::new(),
            libraries: SharedLibraryTable::new(),
            permissions: PermissionTable::new(),
        }
    }
}

impl RegistrySnapshot {
    #[must_use]
    pub fn package(&self, name: &str) -> Option<&PackageSetting> {
        self.packages.get(name)
    }

    /// Look a package up by current name, falling back through the
    /// rename table so callers holding a pre-migration name still find
    /// the record.
    #[must_use]
    pub fn resolve_package(&self, name: &str) -> Option<&PackageSetting> {
        if let Some(setting) = self.packages.get(name) {
            return Some(setting);
        }
        self.renamed_packages
            .get(name)
            .and_then(|current| self.packages.get(current))
    }

    #[must_use]
    pub fn shared_user(&self, name: &str) -> Option<&SharedUserSetting> {
        self.shared_users.get(name)
    }

    #[must_use]
    pub fn disabled_system_package(&self, name: &str) -> Option<&PackageSetting> {
        self.disabled_system_packages.get(name)
    }

    /// Whether the package record exists and is installed for `user`
    #[must_use]
    pub fn is_installed(&self, name: &str, user: UserId) -> bool {
        self.packages
            .get(name)
            .is_some_and(|setting| setting.user_state(user).installed)
    }

    /// Packages installed for one user, sorted by name
    #[must_use]
    pub fn installed_for_user(&self, user: UserId) -> Vec<&PackageSetting> {
        self.packages
            .values()
            .filter(|setting| setting.user_state(user).installed)
            .collect()
    }

    #[must_use]
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pkgd_types::{AppId, InstallSource, SigningDetails, Version};
    use std::path::PathBuf;

    fn setting(name: &str, app_id: u32) -> PackageSetting {
        let mut user_state = BTreeMap::new();
        user_state.insert(UserId::PRIMARY, crate::models::PackageUserState::default());
        PackageSetting {
            name: name.to_string(),
            app_id: AppId(app_id),
            version_code: 1,
            version: Version::new(1, 0, 0),
            code_path: PathBuf::from(format!("/data/app/{name}")),
            signing: SigningDetails::default(),
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
            first_install_time: Utc::now(),
            last_update_time: Utc::now(),
        }
    }

    #[test]
    fn resolve_follows_rename_table() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot
            .packages
            .insert("com.new.name".to_string(), setting("com.new.name", 10_000));
        snapshot
            .renamed_packages
            .insert("com.old.name".to_string(), "com.new.name".to_string());

        assert!(snapshot.resolve_package("com.new.name").is_some());
        assert_eq!(
            snapshot.resolve_package("com.old.name").map(|s| s.name.as_str()),
            Some("com.new.name")
        );
        assert!(snapshot.resolve_package("com.absent").is_none());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot
            .packages
            .insert("com.example.app".to_string(), setting("com.example.app", 10_000));
        snapshot.libraries.register_static("com.lib", 8, "com.lib_8".to_string());

        let bytes = serde_json::to_vec(&snapshot).expect("serialize");
        let restored: RegistrySnapshot = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(snapshot, restored);
    }
}
