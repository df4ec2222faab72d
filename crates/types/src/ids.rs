//! Numeric identities for packages and users

use serde::{Deserialize, Serialize};

/// First identity available to installed applications
pub const FIRST_APPLICATION_APP_ID: u32 = 10_000;

/// Last identity available to installed applications (inclusive)
pub const LAST_APPLICATION_APP_ID: u32 = 19_999;

/// Identity reserved for the platform package itself
pub const PLATFORM_APP_ID: u32 = 1_000;

/// Numeric identity allocated to a package, shared by every package that
/// declares the same shared-user group. Stable for the life of the record
/// once committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u32);

impl AppId {
    /// Whether this identity falls inside the application range
    #[must_use]
    pub fn is_application(self) -> bool {
        (FIRST_APPLICATION_APP_ID..=LAST_APPLICATION_APP_ID).contains(&self.0)
    }

    /// The reserved platform identity
    #[must_use]
    pub fn platform() -> Self {
        Self(PLATFORM_APP_ID)
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user profile on the device. User 0 is the primary user.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl UserId {
    /// The primary user
    pub const PRIMARY: UserId = UserId(0);
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "u{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_ranges() {
        assert!(AppId(FIRST_APPLICATION_APP_ID).is_application());
        assert!(AppId(LAST_APPLICATION_APP_ID).is_application());
        assert!(!AppId::platform().is_application());
        assert!(!AppId(LAST_APPLICATION_APP_ID + 1).is_application());
    }

    #[test]
    fn user_display() {
        assert_eq!(UserId::PRIMARY.to_string(), "u0");
        assert_eq!(UserId(10).to_string(), "u10");
    }
}
