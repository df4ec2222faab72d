//! Parsed package descriptor
//!
//! The descriptor is the output of the external parser collaborator:
//! everything the pipeline needs to know about one artifact, fully parsed
//! and self-contained. Parsing is deterministic and side-effect-free; the
//! pipeline never re-reads the artifact.

use crate::signing::SigningDetails;
use crate::Abi;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum and target SDK levels a package declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkVersions {
    pub min: u32,
    pub target: u32,
}

impl Default for SdkVersions {
    fn default() -> Self {
        Self { min: 1, target: 1 }
    }
}

/// Protection level of a declared permission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    #[default]
    Normal,
    Dangerous,
    Signature,
}

/// A permission definition exported by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecl {
    pub name: String,
    /// Group this permission belongs to, if any
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub protection: ProtectionLevel,
}

/// A permission-group definition exported by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupDecl {
    pub name: String,
}

/// A versioned library this package consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDependency {
    /// Base name of the library line
    pub name: String,
    /// Exact version for static libraries, minimum for others
    pub version: i64,
    /// Optional dependencies resolve when present and are skipped silently
    /// when absent
    #[serde(default)]
    pub optional: bool,
}

/// Declaration that this package *is* a static shared library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticLibraryDecl {
    /// Library line name; the package name must be the synthetic
    /// `<name>_<version>` form
    pub name: String,
    pub version: i64,
}

impl StaticLibraryDecl {
    /// The synthetic package name encoding the version
    #[must_use]
    pub fn synthetic_package_name(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}

/// Declaration that this package is an SDK library line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkLibraryDecl {
    pub name: String,
    /// Major version; bumping it without an SDK-floor change fails scan
    pub version_major: i64,
}

/// Fully parsed view of one package artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDescriptor {
    /// Package name, reverse-DNS
    pub name: String,
    /// Monotonic numeric version used for every ordering decision
    pub version_code: i64,
    /// Human-readable version, display only
    pub version: Version,
    #[serde(default)]
    pub sdk: SdkVersions,
    /// Signing identity of the artifact
    pub signing: SigningDetails,
    /// Shared-user group this package wants to join
    #[serde(default)]
    pub shared_user: Option<String>,
    /// Previous name, for rename migration of an installed package
    #[serde(default)]
    pub original_name: Option<String>,
    /// ABIs the artifact carries native code for, in preference order.
    /// Empty means the package is ABI-neutral.
    #[serde(default)]
    pub native_abis: Vec<Abi>,
    #[serde(default)]
    pub permissions: Vec<PermissionDecl>,
    #[serde(default)]
    pub permission_groups: Vec<PermissionGroupDecl>,
    /// Broadcast actions only this package may send once installed
    #[serde(default)]
    pub protected_broadcasts: Vec<String>,
    #[serde(default)]
    pub static_library: Option<StaticLibraryDecl>,
    #[serde(default)]
    pub sdk_library: Option<SdkLibraryDecl>,
    /// Libraries this package consumes
    #[serde(default)]
    pub uses_libraries: Vec<LibraryDependency>,
    #[serde(default)]
    pub debuggable: bool,
    #[serde(default)]
    pub test_only: bool,
    /// Path of the staged artifact directory
    pub code_path: PathBuf,
}

impl ParsedDescriptor {
    /// Minimal descriptor for a plain application artifact
    #[must_use]
    pub fn new(name: impl Into<String>, version_code: i64, version: Version) -> Self {
        Self {
            name: name.into(),
            version_code,
            version,
            sdk: SdkVersions::default(),
            signing: SigningDetails::default(),
            shared_user: None,
            original_name: None,
            native_abis: Vec::new(),
            permissions: Vec::new(),
            permission_groups: Vec::new(),
            protected_broadcasts: Vec::new(),
            static_library: None,
            sdk_library: None,
            uses_libraries: Vec::new(),
            debuggable: false,
            test_only: false,
            code_path: PathBuf::new(),
        }
    }

    /// Whether this artifact declares itself a library of either kind
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.static_library.is_some() || self.sdk_library.is_some()
    }
}
