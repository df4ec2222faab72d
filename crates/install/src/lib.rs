#![warn(clippy::pedantic)]
#![deny(clippy::all)]

//! Atomic package installation pipeline for pkgd
//!
//! This crate drives install batches through prepare, scan, reconcile,
//! commit and post-install with all-or-nothing semantics: a batch either
//! commits every package in one registry write or commits none of them.
//! Hosts wire real services in through [`Collaborators`]; everything else
//! runs against the package registry alone.

#[macro_use]
mod macros;
mod collaborators;
mod commit;
mod freezer;
mod hold;
mod installer;
mod prepare;
mod reconcile;
mod request;
mod result;
mod scan;
mod service;

pub use collaborators::{
    BackupService, Collaborators, CompileService, DataDirHelper, DescriptorParser,
    NoopBackupService, NoopCompileService, NoopDataDirHelper, NoopProcessController,
    NoopRollbackService, ProcessController, RestoreDecision, RollbackService,
};
pub use commit::{CommitOutcome, Committer};
pub use freezer::{FreezeGuard, PackageFreezer};
pub use hold::{InstallHold, InstallHoldController};
pub use installer::{Installer, PipelineConfig};
pub use prepare::Preparer;
pub use reconcile::{
    PermissionDecision, ReconciledBatch, ReconciledPackage, Reconciler, ResolvedLibrary,
};
pub use request::{InstallContext, InstallRequest, RequestStatus};
pub use result::{BatchResult, RequestOutcome};
pub use scan::{ScanResult, Scanner};
pub use service::InstallService;

// Re-export event plumbing for hosts and the context macros
pub use pkgd_events::{AppEvent, EventSender};
