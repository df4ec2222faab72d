//! Shared library version tables
//!
//! Static shared libraries publish one table row per version; every
//! version is a distinct package under a synthetic name, and the version
//! codes of a line must stay totally ordered against publish history.
//! SDK libraries keep one row per line with a major version that may
//! only move together with an SDK-floor change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// One published version of a static shared library line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticLibraryInfo {
    /// Synthetic package name providing this version
    pub provider: String,
    /// Packages consuming exactly this version
    #[serde(default)]
    pub dependents: BTreeSet<String>,
}

/// One SDK library line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkLibraryInfo {
    pub provider: String,
    pub version_major: i64,
    #[serde(default)]
    pub dependents: BTreeSet<String>,
}

/// A rejected insert position: the new version code would fall strictly
/// between two already-published versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticOrderViolation {
    pub below: i64,
    pub above: i64,
}

/// Registry table of shared library lines keyed by base name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLibraryTable {
    #[serde(default)]
    static_libraries: BTreeMap<String, BTreeMap<i64, StaticLibraryInfo>>,
    #[serde(default)]
    sdk_libraries: BTreeMap<String, SdkLibraryInfo>,
}

impl SharedLibraryTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a new version of a static line keeps publish history
    /// totally ordered. Re-publishing an existing version is a replace of
    /// the same synthetic package and passes here.
    ///
    /// # Errors
    ///
    /// Returns the bracketing versions when `version` falls strictly
    /// between two published version codes.
    pub fn check_static_order(
        &self,
        name: &str,
        version: i64,
    ) -> Result<(), StaticOrderViolation> {
        let Some(versions) = self.static_libraries.get(name) else {
            return Ok(());
        };
        if versions.contains_key(&version) {
            return Ok(());
        }
        let below = versions.range(..version).next_back().map(|(v, _)| *v);
        let above = versions
            .range((Bound::Excluded(version), Bound::Unbounded))
            .next()
            .map(|(v, _)| *v);
        match (below, above) {
            (Some(below), Some(above)) => Err(StaticOrderViolation { below, above }),
            _ => Ok(()),
        }
    }

    pub fn register_static(&mut self, name: impl Into<String>, version: i64, provider: String) {
        self.static_libraries
            .entry(name.into())
            .or_default()
            .entry(version)
            .or_default()
            .provider = provider;
    }

    /// Register or replace an SDK library line, returning the previous
    /// major version when the line already existed.
    pub fn register_sdk(
        &mut self,
        name: impl Into<String>,
        version_major: i64,
        provider: String,
    ) -> Option<i64> {
        let name = name.into();
        match self.sdk_libraries.get_mut(&name) {
            Some(info) => {
                let previous = info.version_major;
                info.provider = provider;
                info.version_major = version_major;
                Some(previous)
            }
            None => {
                self.sdk_libraries.insert(
                    name,
                    SdkLibraryInfo {
                        provider,
                        version_major,
                        dependents: BTreeSet::new(),
                    },
                );
                None
            }
        }
    }

    #[must_use]
    pub fn has_static_version(&self, name: &str, version: i64) -> bool {
        self.static_libraries
            .get(name)
            .is_some_and(|versions| versions.contains_key(&version))
    }

    #[must_use]
    pub fn static_versions(&self, name: &str) -> Vec<i64> {
        self.static_libraries
            .get(name)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn sdk(&self, name: &str) -> Option<&SdkLibraryInfo> {
        self.sdk_libraries.get(name)
    }

    pub fn add_static_dependent(&mut self, name: &str, version: i64, consumer: impl Into<String>) {
        if let Some(info) = self
            .static_libraries
            .get_mut(name)
            .and_then(|versions| versions.get_mut(&version))
        {
            info.dependents.insert(consumer.into());
        }
    }

    pub fn add_sdk_dependent(&mut self, name: &str, consumer: impl Into<String>) {
        if let Some(info) = self.sdk_libraries.get_mut(name) {
            info.dependents.insert(consumer.into());
        }
    }

    /// Consumers of an SDK line, for the dependent-kill rule on a major
    /// version change
    #[must_use]
    pub fn sdk_dependents(&self, name: &str) -> Vec<String> {
        self.sdk_libraries
            .get(name)
            .map(|info| info.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Iterate all static lines with their published versions
    pub fn static_lines(&self) -> impl Iterator<Item = (&String, Vec<i64>)> {
        self.static_libraries
            .iter()
            .map(|(name, versions)| (name, versions.keys().copied().collect()))
    }

    /// Iterate all SDK lines
    pub fn sdk_lines(&self) -> impl Iterator<Item = (&String, &SdkLibraryInfo)> {
        self.sdk_libraries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn table_with(versions: &[i64]) -> SharedLibraryTable {
        let mut table = SharedLibraryTable::new();
        for v in versions {
            table.register_static("com.lib", *v, format!("com.lib_{v}"));
        }
        table
    }

    #[test]
    fn version_between_published_is_rejected() {
        let table = table_with(&[8, 12]);
        let violation = table.check_static_order("com.lib", 10).expect_err("between");
        assert_eq!(violation.below, 8);
        assert_eq!(violation.above, 12);
    }

    #[test]
    fn version_above_or_below_is_accepted() {
        let table = table_with(&[8, 12]);
        assert!(table.check_static_order("com.lib", 13).is_ok());
        assert!(table.check_static_order("com.lib", 5).is_ok());
        // same version is a replace of the same synthetic package
        assert!(table.check_static_order("com.lib", 12).is_ok());
        // unknown line has no ordering constraint yet
        assert!(table.check_static_order("com.other", 1).is_ok());
    }

    #[test]
    fn sdk_replacement_reports_previous_major() {
        let mut table = SharedLibraryTable::new();
        assert_eq!(table.register_sdk("com.sdk", 1, "com.sdk.provider".into()), None);
        table.add_sdk_dependent("com.sdk", "com.consumer");
        assert_eq!(
            table.register_sdk("com.sdk", 2, "com.sdk.provider".into()),
            Some(1)
        );
        assert_eq!(table.sdk_dependents("com.sdk"), vec!["com.consumer".to_string()]);
    }

    #[test]
    fn dependents_attach_to_exact_static_version() {
        let mut table = table_with(&[8, 12]);
        table.add_static_dependent("com.lib", 8, "com.consumer");
        table.add_static_dependent("com.lib", 99, "com.ghost");
        let (_, versions) = table.static_lines().next().expect("one line");
        assert_eq!(versions, vec![8, 12]);
    }

    proptest! {
        /// Accepting every insert the order check allows can never create
        /// a state where an already-published version sits strictly
        /// between two others that were published after it.
        #[test]
        fn accepted_inserts_keep_extending_the_line(versions in prop::collection::vec(0i64..100, 1..30)) {
            let mut table = SharedLibraryTable::new();
            let mut accepted: Vec<i64> = Vec::new();
            for v in versions {
                if table.check_static_order("com.lib", v).is_ok() {
                    table.register_static("com.lib", v, format!("com.lib_{v}"));
                    if !accepted.contains(&v) {
                        accepted.push(v);
                    }
                }
            }
            // every accepted version extends the range seen so far
            let mut min = accepted[0];
            let mut max = accepted[0];
            for v in &accepted[1..] {
                prop_assert!(*v > max || *v < min);
                min = min.min(*v);
                max = max.max(*v);
            }
        }
    }
}
