//! Event handling and user feedback

use console::style;
use pkgd_events::{AppEvent, BroadcastEvent, GeneralEvent, InstallEvent, RegistryEvent};

/// Event handler for console feedback
pub struct EventHandler {
    /// Whether styled output is enabled
    colors_enabled: bool,
    /// Show debug-level events on the console
    debug: bool,
}

impl EventHandler {
    /// Create new event handler
    pub fn new(colors_enabled: bool, debug: bool) -> Self {
        Self {
            colors_enabled,
            debug,
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, event: AppEvent) {
        crate::logging::log_event_with_tracing(&event);

        match event {
            AppEvent::General(general) => self.handle_general(general),
            AppEvent::Install(install) => self.handle_install(install),
            AppEvent::Registry(registry) => self.handle_registry(registry),
            AppEvent::Broadcast(broadcast) => self.handle_broadcast(broadcast),
        }
    }

    fn handle_general(&mut self, event: GeneralEvent) {
        match event {
            GeneralEvent::Warning { message, context } => {
                if let Some(context) = context {
                    self.show_warning(&format!("{message} ({context})"));
                } else {
                    self.show_warning(&message);
                }
            }
            GeneralEvent::Error { message, details } => {
                if let Some(details) = details {
                    self.show_error(&format!("{message}: {details}"));
                } else {
                    self.show_error(&message);
                }
            }
            GeneralEvent::DebugLog { message } => {
                self.show_debug(&message);
            }
            GeneralEvent::OperationStarted { operation } => {
                self.show_debug(&format!("{operation}..."));
            }
            GeneralEvent::OperationCompleted { operation, success } => {
                if success {
                    self.show_debug(&format!("{operation} done"));
                } else {
                    self.show_warning(&format!("{operation} did not complete"));
                }
            }
            GeneralEvent::OperationFailed { operation, error } => {
                self.show_error(&format!("{operation} failed: {error}"));
            }
        }
    }

    fn handle_install(&mut self, event: InstallEvent) {
        match event {
            InstallEvent::BatchStarted { packages, .. } => {
                if packages.len() == 1 {
                    self.show_status(&format!("Installing {}", packages[0]));
                } else {
                    self.show_status(&format!("Installing {} packages", packages.len()));
                }
            }
            InstallEvent::PhaseCompleted { phase, .. } => {
                self.show_debug(&format!("phase {phase} completed"));
            }
            InstallEvent::ScanCompleted {
                package, replace, ..
            } => {
                if replace {
                    self.show_debug(&format!("scanned {package} (replacing)"));
                } else {
                    self.show_debug(&format!("scanned {package}"));
                }
            }
            InstallEvent::FreezeAcquired { package } => {
                self.show_debug(&format!("frozen {package}"));
            }
            InstallEvent::FreezeReleased { package } => {
                self.show_debug(&format!("unfrozen {package}"));
            }
            InstallEvent::CompileQueued { package, .. } => {
                self.show_debug(&format!("compiling {package}"));
            }
            InstallEvent::CompileCompleted { package, .. } => {
                self.show_debug(&format!("compiled {package}"));
            }
            InstallEvent::CompileDeferred { package, error, .. } => {
                self.show_warning(&format!(
                    "compilation of {package} deferred to first launch: {error}"
                ));
            }
            InstallEvent::Committed {
                package,
                version_code,
                update,
                ..
            } => {
                if update {
                    self.show_status(&format!("Updated {package} to {version_code}"));
                } else {
                    self.show_status(&format!("Installed {package} ({version_code})"));
                }
            }
            InstallEvent::RestorePending { package, .. } => {
                self.show_status(&format!("Waiting for restore of {package}"));
            }
            InstallEvent::RestoreCompleted { package, .. } => {
                self.show_status(&format!("Restored {package}"));
            }
            InstallEvent::DependentKillRequested { package, dependents } => {
                self.show_warning(&format!(
                    "{package} changed a shared library; {} dependent(s) will restart",
                    dependents.len()
                ));
            }
            InstallEvent::CleanupDeferred { package, path } => {
                self.show_status(&format!(
                    "Old code of {package} kept until exit: {}",
                    path.display()
                ));
            }
            InstallEvent::PostInstallCompleted { package, .. } => {
                self.show_debug(&format!("post-install finished for {package}"));
            }
            InstallEvent::BatchCompleted {
                duration, packages, ..
            } => {
                self.show_status(&format!(
                    "Batch of {packages} package(s) committed in {:.1}s",
                    duration.as_secs_f64()
                ));
            }
            InstallEvent::BatchFailed { code, message, .. } => {
                self.show_error(&format!("Batch failed ({code}): {message}"));
            }
        }
    }

    fn handle_registry(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::SnapshotPersisted { packages, bytes } => {
                self.show_debug(&format!("persisted {packages} package(s), {bytes} bytes"));
            }
            RegistryEvent::SnapshotLoaded { packages } => {
                self.show_debug(&format!("loaded {packages} package(s)"));
            }
            RegistryEvent::SettingWritten { package, .. } => {
                self.show_debug(&format!("wrote setting for {package}"));
            }
            RegistryEvent::SystemCopyDisabled { package } => {
                self.show_status(&format!("Data copy of {package} shadows the system image"));
            }
            RegistryEvent::SharedUserPruned { name } => {
                self.show_debug(&format!("pruned empty shared user {name}"));
            }
            RegistryEvent::SharedUserSigningUpdated { name } => {
                self.show_status(&format!("Shared user {name} rotated its signing identity"));
            }
            RegistryEvent::LibraryRegistered { name, version, .. } => {
                self.show_debug(&format!("registered library {name} v{version}"));
            }
            RegistryEvent::PermissionDropped {
                permission,
                owner,
                requester,
            } => {
                self.show_warning(&format!(
                    "{requester} declares {permission} already owned by {owner}; dropped"
                ));
            }
            RegistryEvent::Poisoned { reason } => {
                self.show_error(&format!("Registry poisoned: {reason}"));
            }
        }
    }

    fn handle_broadcast(&mut self, event: BroadcastEvent) {
        match event {
            BroadcastEvent::Installed {
                package, update, ..
            } => {
                if update {
                    self.show_debug(&format!("broadcast: {package} updated"));
                } else {
                    self.show_debug(&format!("broadcast: {package} installed"));
                }
            }
            BroadcastEvent::Removed { package, .. } => {
                self.show_debug(&format!("broadcast: {package} removed"));
            }
        }
    }

    // All streaming feedback goes to stderr; stdout carries only the
    // rendered result.
    fn show_status(&self, message: &str) {
        if self.colors_enabled {
            eprintln!("{}", style(message).green());
        } else {
            eprintln!("{message}");
        }
    }

    fn show_warning(&self, message: &str) {
        if self.colors_enabled {
            eprintln!("{} {message}", style("warning:").yellow().bold());
        } else {
            eprintln!("warning: {message}");
        }
    }

    fn show_error(&self, message: &str) {
        if self.colors_enabled {
            eprintln!("{} {message}", style("error:").red().bold());
        } else {
            eprintln!("error: {message}");
        }
    }

    fn show_debug(&self, message: &str) {
        if !self.debug {
            return;
        }
        if self.colors_enabled {
            eprintln!("{}", style(message).dim());
        } else {
            eprintln!("{message}");
        }
    }
}
