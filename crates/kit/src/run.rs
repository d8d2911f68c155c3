//! The provision-and-test session pipeline.
//!
//! Stages run strictly in sequence: freshness check (with synchronous
//! rebuild), acceleration probe, boot-image fetch, shared-directory mirror,
//! disk creation, foreground QEMU session, and an optional chained deploy
//! once the session ends. Fatal stage failures abort the pipeline
//! immediately; degraded conditions are collected and re-surfaced together
//! before a zero exit.

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{info, warn};

use crate::common_opts::MemoryOpts;
use crate::deploy::{self, DeployOutcome, DeployTarget};
use crate::distro::{self, Distro};
use crate::fetch::{self, FetchError, TransferTool};
use crate::{accel, artifact, qemu, utils};

/// Options for provisioning and running a test session
#[derive(Debug, Parser)]
pub struct RunOpts {
    /// Guest distribution (prompted interactively when omitted)
    #[clap(long)]
    pub distro: Option<Distro>,

    #[clap(flatten)]
    pub memory: MemoryOpts,

    /// Number of vCPUs (defaults to host parallelism)
    #[clap(long)]
    pub vcpus: Option<u32>,

    /// Working directory for boot images, guest disks and the shared
    /// directory (defaults to the cvk data directory)
    #[clap(long)]
    pub workdir: Option<Utf8PathBuf>,

    /// Build manifest used for the freshness check
    #[clap(long, default_value = "Cargo.toml")]
    pub manifest: Utf8PathBuf,

    /// Compositor binary under test
    #[clap(long, default_value = "target/release/codeverse-compositor")]
    pub artifact: Utf8PathBuf,

    /// Skip the freshness check and rebuild
    #[clap(long)]
    pub no_build: bool,

    /// Deploy the compositor binary over SSH after the session ends
    #[clap(long)]
    pub deploy: bool,
}

/// Execute the run command.
pub fn run(opts: RunOpts) -> Result<()> {
    let mut warnings: Vec<String> = Vec::new();

    // A failed rebuild is fatal: nothing below runs.
    if !opts.no_build {
        artifact::ensure_built(&opts.manifest, &opts.artifact)?;
    }

    let distro = match opts.distro {
        Some(d) => d,
        None => distro::choose_interactive()?,
    };
    println!("Guest distribution: {distro} {}", distro.version());

    let workdir = opts.workdir.clone().unwrap_or_else(utils::default_workdir);
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("Creating working directory {workdir}"))?;

    let accel = accel::detect();
    if !accel.is_available() {
        warn!(
            "No KVM device at {}; the guest will run under software emulation and be slow",
            accel::KVM_DEVICE
        );
        warnings.push("hardware acceleration unavailable; ran under software emulation".into());
    }

    let iso = workdir.join(distro.iso_file_name());
    let tool = TransferTool::detect().ok_or(FetchError::NoTransferTool)?;
    fetch::fetch(&distro.sources(), &iso, &tool).with_context(|| {
        format!("Could not acquire the boot image; place it manually at {iso} and re-run")
    })?;

    // Mirror the binary into the shared directory so it is reachable inside
    // the guest even without the SSH channel.
    let shared_dir = workdir.join("shared");
    std::fs::create_dir_all(&shared_dir)
        .with_context(|| format!("Creating shared directory {shared_dir}"))?;
    if let Some(file_name) = opts.artifact.file_name().filter(|_| opts.artifact.exists()) {
        std::fs::copy(&opts.artifact, shared_dir.join(file_name))
            .with_context(|| format!("Mirroring {} into {shared_dir}", opts.artifact))?;
        info!("Mirrored {} into {shared_dir}", opts.artifact);
    }

    let disk = workdir.join(format!("{distro}-disk.qcow2"));
    qemu::ensure_disk(&disk)?;

    let config = qemu::LaunchConfig {
        memory_mb: utils::parse_memory_to_mb(&opts.memory.memory)?,
        vcpus: opts.vcpus.unwrap_or_else(qemu::default_vcpus),
        accel,
        iso,
        disk,
        shared_dir,
        ssh_port: qemu::SSH_FORWARD_PORT,
    };
    println!(
        "Starting virtual machine ({} MiB, {} vCPUs, ssh forwarded on localhost:{})",
        config.memory_mb, config.vcpus, config.ssh_port
    );

    // The exit status is surfaced but not acted upon: shutting the guest
    // down from inside is the normal way to end a session.
    let status = qemu::launch(&config).context("Virtualization launch failed")?;
    if !status.success() {
        info!("Guest session ended with {status}");
    }

    if opts.deploy {
        match deploy::deploy(&DeployTarget::default(), &opts.artifact)? {
            DeployOutcome::Complete => {}
            DeployOutcome::Partial => {
                warnings.push(
                    "deploy partially succeeded: binary copied but not marked executable".into(),
                );
            }
            DeployOutcome::Unreachable => {
                warnings.push("deploy failed: guest unreachable over the forwarded channel".into());
            }
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }
    Ok(())
}
