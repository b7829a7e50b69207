//! microsuite-setup - provisions build dependencies and builds a MicroSuite service.
//!
//! Installs gRPC, Protobuf, OpenSSL and MKL, then builds the configured
//! service (HDSearch by default). Re-running skips anything already installed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use microsuite_setup::commands::{self, install::InstallOptions, show::ShowTarget};
use microsuite_setup::config::Config;

#[derive(Parser)]
#[command(name = "microsuite-setup")]
#[command(about = "Install native build dependencies and build a MicroSuite service")]
#[command(after_help = concat!(
    "QUICK START:\n",
    "  microsuite-setup preflight        Check host tools\n",
    "  microsuite-setup                  Install everything\n",
    "  microsuite-setup install --dry-run Show what would run",
))]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install all dependencies and build the service (default)
    Install(InstallArgs),

    /// Run preflight checks (verify host tools before installing)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowWhat,
    },
}

#[derive(clap::Args, Default)]
struct InstallArgs {
    /// Run only this unit (e.g. protobuf, or the service name)
    #[arg(long, value_name = "UNIT")]
    only: Option<String>,

    /// Run units even if they are already installed
    #[arg(long)]
    skip_satisfied_check: bool,

    /// Print planned steps without executing them
    #[arg(long)]
    dry_run: bool,

    /// Echo build output live
    #[arg(long)]
    stream: bool,

    /// Build the service areas concurrently
    #[arg(long)]
    parallel_areas: bool,

    /// Don't re-run OpenSSL and MKL after the service build
    #[arg(long)]
    no_repeat: bool,

    /// Write the run summary as JSON
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ShowWhat {
    /// Show current configuration
    Config,
    /// Show every unit and step in execution order
    Plan,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "microsuite_setup=debug"
    } else {
        "microsuite_setup=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);
    let config = Config::load()?;

    match cli.command.unwrap_or_else(|| Commands::Install(InstallArgs::default())) {
        Commands::Install(args) => {
            let opts = InstallOptions {
                only: args.only,
                skip_satisfied_check: args.skip_satisfied_check,
                dry_run: args.dry_run,
                stream: args.stream || cli.verbose,
                parallel_areas: args.parallel_areas,
                no_repeat: args.no_repeat,
                summary_json: args.summary_json,
            };
            commands::cmd_install(&config, &opts)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowWhat::Config => ShowTarget::Config,
                ShowWhat::Plan => ShowTarget::Plan,
            };
            commands::cmd_show(target, &config)?;
        }
    }

    Ok(())
}
