//! Command line interface definition

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// pkgd - Atomic package installation daemon and CLI
#[derive(Parser)]
#[command(name = "pkgd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Atomic package installation daemon and CLI")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Color output control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorMode>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// When to emit colored output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Install a batch of staged packages atomically
    #[command(alias = "i")]
    Install {
        /// Paths to staged package descriptors (JSON)
        descriptors: Vec<PathBuf>,

        /// User requesting the install
        #[arg(long, short = 'u', default_value_t = 0)]
        user: u32,

        /// All users the commit initializes state for
        #[arg(long, value_delimiter = ',', value_name = "IDS")]
        known_users: Vec<u32>,

        /// Replace already-installed packages
        #[arg(long, short = 'r')]
        replace: bool,

        /// Permit a lower version code than the installed one
        #[arg(long)]
        allow_downgrade: bool,

        /// Install as instant (ephemeral) apps
        #[arg(long)]
        instant: bool,

        /// Treat the batch as a rollback of a previous update
        #[arg(long)]
        rollback: bool,

        /// Do not kill dependents and defer old code-path removal
        #[arg(long)]
        dont_kill: bool,

        /// Permit packages marked test-only
        #[arg(long)]
        allow_test_only: bool,

        /// First-boot scan: skip compilation and restore waits
        #[arg(long)]
        first_boot: bool,

        /// The descriptors come from the system image
        #[arg(long)]
        from_system_image: bool,

        /// Package name recorded as the install initiator
        #[arg(long, value_name = "PACKAGE")]
        initiator: Option<String>,
    },

    /// List installed packages
    #[command(alias = "ls")]
    List {
        /// List packages installed for this user
        #[arg(long, short = 'u', default_value_t = 0)]
        user: u32,
    },

    /// Show information about a package
    Info {
        /// Package name
        package: String,
    },

    /// Show registry status
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn install_flags_parse() {
        let cli = Cli::parse_from([
            "pkgd",
            "install",
            "--replace",
            "--allow-downgrade",
            "--known-users",
            "0,10",
            "a.json",
            "b.json",
        ]);
        match cli.command {
            Commands::Install {
                descriptors,
                replace,
                allow_downgrade,
                known_users,
                ..
            } => {
                assert_eq!(descriptors.len(), 2);
                assert!(replace);
                assert!(allow_downgrade);
                assert_eq!(known_users, vec![0, 10]);
            }
            _ => panic!("expected install command"),
        }
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::parse_from(["pkgd", "status", "--json", "--debug"]);
        assert!(cli.global.json);
        assert!(cli.global.debug);
        assert!(matches!(cli.command, Commands::Status));
    }
}
