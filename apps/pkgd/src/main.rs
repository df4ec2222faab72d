//! pkgd - Atomic package installation daemon and CLI
//!
//! The binary wires the install pipeline, the package registry and the
//! snapshot store together, then drives one command while rendering the
//! event stream.

mod cli;
mod display;
mod error;
mod events;
mod logging;
mod setup;

use crate::cli::{Cli, ColorMode, Commands};
use crate::display::{OperationResult, OutputRenderer, RegistryStatus};
use crate::error::CliError;
use crate::events::EventHandler;
use crate::setup::SystemSetup;
use clap::Parser;
use pkgd_config::Config;
use pkgd_events::{EventReceiver, EventSender};
use pkgd_install::{InstallContext, InstallRequest};
use pkgd_types::{InstallFlags, InstallSource, ScanFlags, UserId};
use std::path::PathBuf;
use std::process;
use tokio::select;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments first to check for JSON mode
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.debug);

    // Run the application and handle errors
    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting pkgd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with proper precedence:
    // 1. Start with file config (or defaults)
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;

    // 2. Merge environment variables (highest precedence)
    config.merge_env()?;

    // Create event channel
    let (event_sender, event_receiver) = pkgd_events::channel();

    // Initialize system setup
    let mut setup = SystemSetup::new(config);
    setup.initialize(event_sender.clone()).await?;

    // Create output renderer and event handler
    let colors_enabled = match cli.global.color.unwrap_or(ColorMode::Auto) {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => console::Term::stdout().features().colors_supported(),
    };
    let renderer = OutputRenderer::new(cli.global.json, colors_enabled);
    let mut event_handler = EventHandler::new(colors_enabled, cli.global.debug);

    // Execute command with event handling
    let result = execute_command_with_events(
        cli.command,
        &setup,
        event_sender,
        event_receiver,
        &mut event_handler,
    )
    .await?;

    // Render final result
    renderer.render_result(&result)?;

    if let OperationResult::Batch(batch) = &result {
        if !batch.succeeded() {
            let code = batch
                .outcomes
                .iter()
                .find(|outcome| !outcome.is_success())
                .map_or(0, |outcome| outcome.code);
            return Err(CliError::BatchFailed(code));
        }
    }

    info!("Command completed successfully");
    Ok(())
}

/// Execute command with concurrent event handling
async fn execute_command_with_events(
    command: Commands,
    setup: &SystemSetup,
    event_sender: EventSender,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<OperationResult, CliError> {
    let mut command_future = Box::pin(execute_command(command, setup, event_sender));

    // Handle events concurrently with command execution
    loop {
        select! {
            // Command completed
            result = &mut command_future => {
                // Drain any remaining events
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(event);
                }
                return result;
            }

            // Event received
            event = event_receiver.recv() => {
                match event {
                    Some(event) => event_handler.handle_event(event),
                    None => { /* Channel closed: keep waiting for command to finish */ }
                }
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(
    command: Commands,
    setup: &SystemSetup,
    event_sender: EventSender,
) -> Result<OperationResult, CliError> {
    match command {
        Commands::Install {
            descriptors,
            user,
            known_users,
            replace,
            allow_downgrade,
            instant,
            rollback,
            dont_kill,
            allow_test_only,
            first_boot,
            from_system_image,
            initiator,
        } => {
            if descriptors.is_empty() {
                return Err(CliError::InvalidArguments(
                    "at least one descriptor path is required".to_string(),
                ));
            }

            let flags = InstallFlags {
                replace_existing: replace,
                allow_downgrade,
                instant,
                rollback_eligible: rollback,
                dont_kill,
                allow_test_only,
            };
            let scan_flags = ScanFlags {
                first_boot,
                from_system_image,
            };
            let source = initiator
                .map(InstallSource::initiated_by)
                .unwrap_or_default();

            let context = build_install_context(
                setup,
                &descriptors,
                flags,
                scan_flags,
                UserId(user),
                known_users.into_iter().map(UserId).collect(),
                source,
                event_sender,
            )
            .await?;

            let result = setup.service().submit(context).await;
            if let Some(fatal) = result.fatal_code() {
                error!(code = %fatal, "Fatal install failure; the daemon must restart");
            }
            Ok(OperationResult::Batch(result))
        }

        Commands::List { user } => {
            let packages = setup.registry().installed_packages(UserId(user)).await?;
            Ok(OperationResult::PackageList(packages))
        }

        Commands::Info { package } => {
            let info = setup.registry().package_info(&package).await?;
            match info {
                Some(setting) => Ok(OperationResult::PackageInfo(Box::new(setting))),
                None => Err(CliError::InvalidArguments(format!(
                    "package {package} is not installed"
                ))),
            }
        }

        Commands::Status => {
            let registry = setup.registry();
            let snapshot = registry.snapshot().await?;
            Ok(OperationResult::Status(RegistryStatus {
                packages: snapshot.packages.len(),
                disabled_system_packages: snapshot.disabled_system_packages.len(),
                shared_users: snapshot.shared_users.len(),
                schema_version: snapshot.schema_version,
                poisoned: registry.is_poisoned(),
                root: setup
                    .config()
                    .registry
                    .root
                    .as_ref()
                    .map(|root| root.display().to_string()),
            }))
        }
    }
}

/// Parse the staged descriptors and assemble the batch context
#[allow(clippy::too_many_arguments)]
async fn build_install_context(
    setup: &SystemSetup,
    descriptors: &[PathBuf],
    flags: InstallFlags,
    scan_flags: ScanFlags,
    user: UserId,
    known_users: Vec<UserId>,
    source: InstallSource,
    event_sender: EventSender,
) -> Result<InstallContext, CliError> {
    let parser = setup.parser();
    let mut context = InstallContext::new()
        .with_scan_flags(scan_flags)
        .with_known_users(known_users)
        .with_event_sender(event_sender);

    for path in descriptors {
        let descriptor = parser.parse(path).await?;
        info!(
            package = %descriptor.name,
            version_code = descriptor.version_code,
            "Parsed descriptor {}",
            path.display()
        );
        context = context.add_request(
            InstallRequest::new(descriptor)
                .with_flags(flags)
                .with_user(user)
                .with_source(source.clone()),
        );
    }
    Ok(context)
}

fn init_tracing(json_mode: bool, debug_enabled_flag: bool) {
    // Check if debug logging is enabled
    let debug_enabled = std::env::var("RUST_LOG").is_ok() || debug_enabled_flag;

    if json_mode {
        // JSON mode: structured logs on stderr keep stdout machine-readable
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .init();
    } else if debug_enabled {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,pkgd=debug")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .init();
    }

    if debug_enabled {
        warn!("Debug logging enabled");
    }
}
