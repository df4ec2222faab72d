//! Structured logging integration for events
//!
//! Converts domain events into tracing records with structured fields so
//! the same stream that drives the console display also lands in logs.

use pkgd_events::{AppEvent, BroadcastEvent, GeneralEvent, InstallEvent, RegistryEvent};
use tracing::{debug, error, info, warn};

/// Log an `AppEvent` at the appropriate level with structured fields
pub fn log_event_with_tracing(event: &AppEvent) {
    match event {
        AppEvent::General(general) => log_general_event(general),
        AppEvent::Install(install) => log_install_event(install),
        AppEvent::Registry(registry) => log_registry_event(registry),
        AppEvent::Broadcast(broadcast) => log_broadcast_event(broadcast),
    }
}

fn log_general_event(event: &GeneralEvent) {
    match event {
        GeneralEvent::Warning { message, context } => {
            warn!(context = ?context, "{message}");
        }
        GeneralEvent::Error { message, details } => {
            error!(details = ?details, "{message}");
        }
        GeneralEvent::DebugLog { message } => {
            debug!("{message}");
        }
        GeneralEvent::OperationStarted { operation } => {
            info!(operation = %operation, "Operation started");
        }
        GeneralEvent::OperationCompleted { operation, success } => {
            info!(operation = %operation, success = success, "Operation completed");
        }
        GeneralEvent::OperationFailed { operation, error } => {
            error!(operation = %operation, error = %error, "Operation failed");
        }
    }
}

fn log_install_event(event: &InstallEvent) {
    match event {
        InstallEvent::BatchStarted { batch, packages } => {
            info!(
                batch = %batch,
                packages = packages.len(),
                "Install batch started"
            );
        }
        InstallEvent::PhaseCompleted {
            batch,
            phase,
            duration,
        } => {
            debug!(
                batch = %batch,
                phase = %phase,
                duration_ms = duration.as_millis() as u64,
                "Pipeline phase completed"
            );
        }
        InstallEvent::ScanCompleted {
            batch,
            package,
            app_id,
            replace,
        } => {
            debug!(
                batch = %batch,
                package = %package,
                app_id = app_id,
                replace = replace,
                "Package scanned"
            );
        }
        InstallEvent::FreezeAcquired { package } => {
            debug!(package = %package, "Package frozen");
        }
        InstallEvent::FreezeReleased { package } => {
            debug!(package = %package, "Package unfrozen");
        }
        InstallEvent::CompileQueued { batch, package } => {
            debug!(batch = %batch, package = %package, "Compilation queued");
        }
        InstallEvent::CompileCompleted { batch, package } => {
            debug!(batch = %batch, package = %package, "Compilation completed");
        }
        InstallEvent::CompileDeferred {
            batch,
            package,
            error,
        } => {
            warn!(
                batch = %batch,
                package = %package,
                error = %error,
                "Compilation deferred to first launch"
            );
        }
        InstallEvent::Committed {
            batch,
            package,
            version_code,
            app_id,
            update,
        } => {
            info!(
                batch = %batch,
                package = %package,
                version_code = version_code,
                app_id = app_id,
                update = update,
                "Package committed"
            );
        }
        InstallEvent::RestorePending { package, token } => {
            info!(package = %package, token = %token, "Waiting for restore");
        }
        InstallEvent::RestoreCompleted { package, token } => {
            info!(package = %package, token = %token, "Restore completed");
        }
        InstallEvent::DependentKillRequested { package, dependents } => {
            warn!(
                package = %package,
                dependents = dependents.len(),
                "Library change requires dependent restart"
            );
        }
        InstallEvent::CleanupDeferred { package, path } => {
            info!(
                package = %package,
                path = %path.display(),
                "Old code path removal deferred"
            );
        }
        InstallEvent::PostInstallCompleted { batch, package } => {
            debug!(batch = %batch, package = %package, "Post-install completed");
        }
        InstallEvent::BatchCompleted {
            batch,
            duration,
            packages,
        } => {
            info!(
                batch = %batch,
                duration_ms = duration.as_millis() as u64,
                packages = packages,
                "Install batch completed"
            );
        }
        InstallEvent::BatchFailed {
            batch,
            code,
            message,
        } => {
            error!(
                batch = %batch,
                code = code,
                message = %message,
                "Install batch failed"
            );
        }
    }
}

fn log_registry_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::SnapshotPersisted { packages, bytes } => {
            info!(packages = packages, bytes = bytes, "Registry snapshot persisted");
        }
        RegistryEvent::SnapshotLoaded { packages } => {
            info!(packages = packages, "Registry snapshot loaded");
        }
        RegistryEvent::SettingWritten {
            package,
            app_id,
            update,
        } => {
            debug!(
                package = %package,
                app_id = app_id,
                update = update,
                "Package setting written"
            );
        }
        RegistryEvent::SystemCopyDisabled { package } => {
            info!(package = %package, "System copy disabled in favor of data copy");
        }
        RegistryEvent::SharedUserPruned { name } => {
            debug!(shared_user = %name, "Empty shared-user group pruned");
        }
        RegistryEvent::SharedUserSigningUpdated { name } => {
            info!(shared_user = %name, "Shared-user signing identity updated");
        }
        RegistryEvent::LibraryRegistered {
            name,
            version,
            provider,
        } => {
            debug!(
                library = %name,
                version = version,
                provider = %provider,
                "Shared library registered"
            );
        }
        RegistryEvent::PermissionDropped {
            permission,
            owner,
            requester,
        } => {
            warn!(
                permission = %permission,
                owner = %owner,
                requester = %requester,
                "Permission declaration dropped"
            );
        }
        RegistryEvent::Poisoned { reason } => {
            error!(reason = %reason, "Registry poisoned; restart required");
        }
    }
}

fn log_broadcast_event(event: &BroadcastEvent) {
    match event {
        BroadcastEvent::Installed {
            package,
            users,
            update,
        } => {
            info!(
                package = %package,
                users = users.len(),
                update = update,
                "Broadcast: package installed"
            );
        }
        BroadcastEvent::Removed { package, users } => {
            info!(
                package = %package,
                users = users.len(),
                "Broadcast: package removed"
            );
        }
    }
}
