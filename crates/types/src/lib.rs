#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the pkgd installation engine
//!
//! This crate provides the fundamental types shared across the system:
//! package and user identifiers, install flags, ABI selection inputs,
//! signing details with rotation lineage, and the parsed package
//! descriptor consumed by the install pipeline.

pub mod descriptor;
pub mod flags;
pub mod ids;
pub mod signing;

pub use descriptor::{
    LibraryDependency, ParsedDescriptor, PermissionDecl, PermissionGroupDecl, ProtectionLevel,
    SdkLibraryDecl, SdkVersions, StaticLibraryDecl,
};
pub use flags::{InstallFlags, ScanFlags};
pub use ids::{AppId, UserId, FIRST_APPLICATION_APP_ID, LAST_APPLICATION_APP_ID, PLATFORM_APP_ID};
pub use semver::Version;
pub use signing::{Capabilities, LineageNode, SignerId, SigningDetails};

use serde::{Deserialize, Serialize};

/// Reserved name of the platform package. Only the registry seed may own it;
/// a descriptor re-declaring it fails scan.
pub const PLATFORM_PACKAGE_NAME: &str = "platform";

/// Native ABIs a package may carry code for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Abi {
    #[serde(rename = "arm64-v8a")]
    Arm64V8a,
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "riscv64")]
    RiscV64,
}

impl Abi {
    /// All ABIs in default preference order
    #[must_use]
    pub fn all() -> &'static [Abi] {
        &[Abi::Arm64V8a, Abi::X86_64, Abi::RiscV64]
    }
}

impl std::fmt::Display for Abi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arm64V8a => write!(f, "arm64-v8a"),
            Self::X86_64 => write!(f, "x86_64"),
            Self::RiscV64 => write!(f, "riscv64"),
        }
    }
}

/// Where an install request originated, recorded on the durable setting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSource {
    /// Package that initiated the session (e.g. a storefront)
    pub initiating_package: Option<String>,
    /// Package on whose behalf the install runs, if different
    pub originating_package: Option<String>,
    /// Package that may silently update this one later
    pub update_owner: Option<String>,
}

impl InstallSource {
    /// Source with only an initiating package set
    #[must_use]
    pub fn initiated_by(package: impl Into<String>) -> Self {
        Self {
            initiating_package: Some(package.into()),
            originating_package: None,
            update_owner: None,
        }
    }
}

/// Validate a package name: reverse-DNS style, at least two dot-separated
/// segments, each starting with a letter.
#[must_use]
pub fn is_valid_package_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let mut segments = 0;
    for segment in name.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return false,
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return false;
        }
        segments += 1;
    }
    segments >= 2 || name == PLATFORM_PACKAGE_NAME
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn package_name_validation() {
        assert!(is_valid_package_name("com.example.app"));
        assert!(is_valid_package_name("com.example"));
        assert!(is_valid_package_name("a.b_c.d2"));
        assert!(is_valid_package_name(PLATFORM_PACKAGE_NAME));
        assert!(!is_valid_package_name(""));
        assert!(!is_valid_package_name("single"));
        assert!(!is_valid_package_name("com..double"));
        assert!(!is_valid_package_name("com.1digit"));
        assert!(!is_valid_package_name("com.has space"));
    }

    #[test]
    fn abi_display_round_trip() {
        for abi in Abi::all() {
            let text = abi.to_string();
            let parsed: Abi = serde_json::from_str(&format!("\"{text}\"")).expect("parse abi");
            assert_eq!(parsed, *abi);
        }
    }

    proptest! {
        #[test]
        fn validator_never_panics(name in ".*") {
            let _ = is_valid_package_name(&name);
        }

        #[test]
        fn generated_reverse_dns_names_validate(
            segments in proptest::collection::vec("[a-z][a-z0-9_]{0,8}", 2..6)
        ) {
            prop_assert!(is_valid_package_name(&segments.join(".")));
        }

        #[test]
        fn single_segment_names_fail(segment in "[a-z][a-z0-9_]{0,16}") {
            prop_assume!(segment != PLATFORM_PACKAGE_NAME);
            prop_assert!(!is_valid_package_name(&segment));
        }
    }
}
