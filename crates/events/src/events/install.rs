//! Install pipeline lifecycle events

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Phases of the batch install state machine. `Failed` is terminal and
/// reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Created,
    Preparing,
    Scanned,
    Reconciled,
    Compiling,
    Committed,
    PostInstall,
    Done,
    Failed,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Preparing => "preparing",
            Self::Scanned => "scanned",
            Self::Reconciled => "reconciled",
            Self::Compiling => "compiling",
            Self::Committed => "committed",
            Self::PostInstall => "post-install",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Install pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InstallEvent {
    /// A batch entered the pipeline
    BatchStarted {
        batch: Uuid,
        packages: Vec<String>,
    },

    /// A batch moved past a phase
    PhaseCompleted {
        batch: Uuid,
        phase: PipelinePhase,
        duration: Duration,
    },

    /// Scan finished for one package
    ScanCompleted {
        batch: Uuid,
        package: String,
        app_id: u32,
        replace: bool,
    },

    /// The package freezer was acquired
    FreezeAcquired { package: String },

    /// The package freezer was released
    FreezeReleased { package: String },

    /// Ahead-of-time compilation was queued for a package
    CompileQueued { batch: Uuid, package: String },

    /// Compilation finished before commit
    CompileCompleted { batch: Uuid, package: String },

    /// Compilation failed or timed out; the package will compile later
    CompileDeferred {
        batch: Uuid,
        package: String,
        error: String,
    },

    /// One package was committed to the registry
    Committed {
        batch: Uuid,
        package: String,
        version_code: i64,
        app_id: u32,
        update: bool,
    },

    /// Post-install is waiting on a restore completion token
    RestorePending {
        package: String,
        token: Uuid,
    },

    /// Restore finished and post-install may proceed
    RestoreCompleted {
        package: String,
        token: Uuid,
    },

    /// Dependent processes must be killed after a library major change
    DependentKillRequested {
        package: String,
        dependents: Vec<String>,
    },

    /// Removal of a replaced code path was deferred until app exit
    CleanupDeferred {
        package: String,
        path: PathBuf,
    },

    /// Post-install finished for one package
    PostInstallCompleted { batch: Uuid, package: String },

    /// The whole batch finished successfully
    BatchCompleted {
        batch: Uuid,
        duration: Duration,
        packages: usize,
    },

    /// The whole batch failed; nothing was committed
    BatchFailed {
        batch: Uuid,
        code: i32,
        message: String,
    },
}
