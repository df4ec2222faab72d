//! Exported permission, permission-group and protected-broadcast tables

use pkgd_types::ProtectionLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A permission definition exported by an installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub name: String,
    pub owner: String,
    pub protection: ProtectionLevel,
    #[serde(default)]
    pub group: Option<String>,
}

/// A permission group and the package that declared it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupEntry {
    pub name: String,
    pub owner: String,
}

/// Registry table of declared permissions, groups and protected
/// broadcast actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTable {
    #[serde(default)]
    permissions: BTreeMap<String, PermissionEntry>,
    #[serde(default)]
    groups: BTreeMap<String, PermissionGroupEntry>,
    /// Broadcast action -> first package to protect it. Re-declaration is
    /// a no-op; the first owner wins.
    #[serde(default)]
    protected_broadcasts: BTreeMap<String, String>,
}

impl PermissionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn permission(&self, name: &str) -> Option<&PermissionEntry> {
        self.permissions.get(name)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&PermissionGroupEntry> {
        self.groups.get(name)
    }

    #[must_use]
    pub fn protected_broadcast_owner(&self, action: &str) -> Option<&str> {
        self.protected_broadcasts.get(action).map(String::as_str)
    }

    pub fn define_permission(&mut self, entry: PermissionEntry) {
        self.permissions.insert(entry.name.clone(), entry);
    }

    pub fn define_group(&mut self, entry: PermissionGroupEntry) {
        self.groups.insert(entry.name.clone(), entry);
    }

    pub fn protect_broadcast(&mut self, action: impl Into<String>, owner: impl Into<String>) {
        self.protected_broadcasts
            .entry(action.into())
            .or_insert_with(|| owner.into());
    }

    /// Drop every definition owned by `package`, ahead of re-registering
    /// the replacement's declarations. Protected broadcasts stay; they
    /// are additive for the life of the registry.
    pub fn remove_owned_by(&mut self, package: &str) -> usize {
        let before = self.permissions.len() + self.groups.len();
        self.permissions.retain(|_, entry| entry.owner != package);
        self.groups.retain(|_, entry| entry.owner != package);
        before - (self.permissions.len() + self.groups.len())
    }

    pub fn permissions(&self) -> impl Iterator<Item = &PermissionEntry> {
        self.permissions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_broadcast_owner_wins() {
        let mut table = PermissionTable::new();
        table.protect_broadcast("com.example.ACTION", "com.first");
        table.protect_broadcast("com.example.ACTION", "com.second");
        assert_eq!(
            table.protected_broadcast_owner("com.example.ACTION"),
            Some("com.first")
        );
    }

    #[test]
    fn remove_owned_by_spares_other_owners() {
        let mut table = PermissionTable::new();
        table.define_permission(PermissionEntry {
            name: "com.a.PERM".to_string(),
            owner: "com.a".to_string(),
            protection: ProtectionLevel::Normal,
            group: None,
        });
        table.define_permission(PermissionEntry {
            name: "com.b.PERM".to_string(),
            owner: "com.b".to_string(),
            protection: ProtectionLevel::Signature,
            group: None,
        });
        table.define_group(PermissionGroupEntry {
            name: "com.a.GROUP".to_string(),
            owner: "com.a".to_string(),
        });

        assert_eq!(table.remove_owned_by("com.a"), 2);
        assert!(table.permission("com.a.PERM").is_none());
        assert!(table.permission("com.b.PERM").is_some());
        assert!(table.group("com.a.GROUP").is_none());
    }
}
