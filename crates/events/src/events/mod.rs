//! Domain-grouped event definitions

use serde::{Deserialize, Serialize};

pub mod broadcast;
pub mod general;
pub mod install;
pub mod registry;

pub use broadcast::BroadcastEvent;
pub use general::GeneralEvent;
pub use install::{InstallEvent, PipelinePhase};
pub use registry::RegistryEvent;

/// Top-level application event aggregating all domains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Warnings, errors, generic operations
    General(GeneralEvent),

    /// Install pipeline lifecycle
    Install(InstallEvent),

    /// Registry mutations and persistence
    Registry(RegistryEvent),

    /// Installed/removed notifications for external observers
    Broadcast(BroadcastEvent),
}
