//! Installed/removed notifications
//!
//! Fire-and-forget dispatch to external observers. No return value is
//! ever consumed; delivery mechanics live outside the engine.

use pkgd_types::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    /// A package became available for the listed users
    Installed {
        package: String,
        users: Vec<UserId>,
        /// True when this replaced an existing install
        update: bool,
    },

    /// A package was removed for the listed users
    Removed {
        package: String,
        users: Vec<UserId>,
    },
}
