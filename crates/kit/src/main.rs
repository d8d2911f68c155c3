//! CodeVerse Virtualization Kit (cvk) - test compositor builds inside a QEMU VM

use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

mod accel;
mod artifact;
mod command_run;
mod common_opts;
mod deploy;
mod distro;
mod fetch;
mod qemu;
mod run;
mod utils;

/// A toolkit for exercising CodeVerse compositor builds in a virtual machine.
///
/// cvk keeps the compositor binary fresh, acquires a guest boot image from an
/// ordered mirror list, launches a GL-capable QEMU instance with a forwarded
/// SSH port, and copies the binary into a running guest - all without
/// touching the host session the compositor would otherwise replace.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available cvk commands for provisioning and deployment.
#[derive(Subcommand)]
enum Commands {
    /// Provision the test VM and run an interactive session
    Run(run::RunOpts),

    /// Copy the compositor binary into a running guest over SSH
    Deploy(deploy::DeployOpts),

    /// List the supported guest distributions
    Distros {
        /// Output as structured JSON instead of table format
        #[clap(long)]
        json: bool,
    },
}

/// Install and configure the tracing/logging system.
///
/// Sets up structured logging with environment-based filtering,
/// error layer integration, and console output formatting.
/// Logs are filtered by RUST_LOG environment variable, defaulting to 'info'.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let format = fmt::format().without_time().with_target(false).compact();

    let fmt_layer = fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

/// Main entry point for the cvk CLI application.
///
/// Fatal conditions (failed rebuild, exhausted image sources, missing
/// transfer tooling) propagate as errors and exit non-zero; degraded
/// conditions (no KVM, unreachable guest) are reported as warnings and
/// exit zero.
fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(opts) => run::run(opts)?,
        Commands::Deploy(opts) => deploy::run(opts)?,
        Commands::Distros { json } => distro::list(json)?,
    }
    tracing::debug!("exiting");
    Ok(())
}
