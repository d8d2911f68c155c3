//! QEMU launch composition.
//!
//! The launch profile is assembled deterministically from the probe result
//! and the user's selections, then handed to `qemu-system-x86_64` in the
//! foreground. The orchestrator blocks for the whole interactive session;
//! the guest's exit status is surfaced to the caller but a non-zero exit is
//! not an orchestrator failure, since the guest is usually powered off from
//! inside.
//!
//! Composition choices:
//!
//! - CPU: `-accel kvm -cpu host` when the probe found `/dev/kvm`, otherwise
//!   `-accel tcg` (software emulation).
//! - Graphics: `virtio-vga-gl` with a `gtk,gl=on` display so the compositor
//!   gets an OpenGL-capable output inside the guest.
//! - Network: one user-mode device with a single fixed forward of host port
//!   2222 to the guest's SSH port. Deploy and any manual client testing
//!   depend on this exact mapping staying stable for the session.
//! - Storage: a qcow2 disk created once at a fixed size and reused across
//!   sessions, plus the boot ISO.
//! - Sharing: the working directory's `shared/` subtree is exported as a
//!   virtfs mount tagged `shared` for manual retrieval inside the guest.

use std::process::{Command, ExitStatus};

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing::{debug, info};

use crate::accel::Accel;
use crate::command_run::CommandRun;

/// Host side of the forwarded SSH channel; the guest's sshd listens on 22.
pub const SSH_FORWARD_PORT: u16 = 2222;

/// Persistent guest disk size. Created sparse, so this is an upper bound.
const DISK_SIZE: &str = "20G";

/// Get default vCPU count (number of available processors, or 2 as fallback)
pub fn default_vcpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(2)
}

/// Full parameter set for one virtualization session. Immutable once the
/// QEMU process is spawned.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub memory_mb: u32,
    pub vcpus: u32,
    pub accel: Accel,
    pub iso: Utf8PathBuf,
    pub disk: Utf8PathBuf,
    pub shared_dir: Utf8PathBuf,
    pub ssh_port: u16,
}

impl LaunchConfig {
    /// Assemble the qemu-system argument vector. Deterministic for a given
    /// config.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-m".into(), self.memory_mb.to_string()];
        args.push("-smp".into());
        args.push(self.vcpus.to_string());

        match self.accel {
            Accel::Available => {
                args.extend(["-accel", "kvm", "-cpu", "host"].map(String::from));
            }
            Accel::Unavailable => {
                args.extend(["-accel", "tcg"].map(String::from));
            }
        }

        args.extend(["-device", "virtio-vga-gl", "-display", "gtk,gl=on"].map(String::from));

        args.push("-netdev".into());
        args.push(format!("user,id=net0,hostfwd=tcp::{}-:22", self.ssh_port));
        args.push("-device".into());
        args.push("virtio-net-pci,netdev=net0".into());

        args.push("-drive".into());
        args.push(format!("file={},format=qcow2,if=virtio", self.disk));
        args.push("-cdrom".into());
        args.push(self.iso.to_string());
        args.push("-boot".into());
        args.push("menu=on".into());

        args.push("-virtfs".into());
        args.push(format!(
            "local,path={},mount_tag=shared,security_model=mapped-xattr,id=shared",
            self.shared_dir
        ));

        args
    }
}

/// Create the persistent guest disk if it does not exist yet. Existing
/// disks are reused unmodified.
pub fn ensure_disk(disk: &Utf8Path) -> Result<()> {
    if disk.exists() {
        debug!("Reusing existing disk image at {disk}");
        return Ok(());
    }

    info!("Creating {DISK_SIZE} guest disk at {disk}");
    Command::new("qemu-img")
        .args(["create", "-f", "qcow2", disk.as_str(), DISK_SIZE])
        .run()
        .with_context(|| format!("Failed to create disk image {disk}"))
}

/// Spawn QEMU in the foreground and block until the session ends.
pub fn launch(config: &LaunchConfig) -> Result<ExitStatus> {
    let mut cmd = Command::new("qemu-system-x86_64");
    cmd.args(config.to_args());
    debug!("exec: {cmd:?}");

    let status = cmd
        .status()
        .context("Failed to launch qemu-system-x86_64. Is QEMU installed?")?;
    info!("Virtual machine exited with status {status}");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(accel: Accel) -> LaunchConfig {
        LaunchConfig {
            memory_mb: 4096,
            vcpus: 4,
            accel,
            iso: "/work/arch.iso".into(),
            disk: "/work/arch-disk.qcow2".into(),
            shared_dir: "/work/shared".into(),
            ssh_port: SSH_FORWARD_PORT,
        }
    }

    #[test]
    fn test_args_with_kvm() {
        let args = config(Accel::Available).to_args();
        let accel_pos = args.iter().position(|a| a == "-accel").unwrap();
        assert_eq!(args[accel_pos + 1], "kvm");
        assert!(args.contains(&"host".to_string()));
        assert!(!args.contains(&"tcg".to_string()));
    }

    #[test]
    fn test_args_without_kvm() {
        let args = config(Accel::Unavailable).to_args();
        assert!(args.contains(&"tcg".to_string()));
        assert!(!args.contains(&"kvm".to_string()));
        assert!(!args.contains(&"host".to_string()));
    }

    #[test]
    fn test_args_forwarded_port_rule() {
        let args = config(Accel::Available).to_args();
        assert!(args
            .iter()
            .any(|a| a == "user,id=net0,hostfwd=tcp::2222-:22"));
        assert!(args.contains(&"virtio-net-pci,netdev=net0".to_string()));
    }

    #[test]
    fn test_args_gl_display_and_storage() {
        let args = config(Accel::Available).to_args();
        assert!(args.contains(&"virtio-vga-gl".to_string()));
        assert!(args.contains(&"gtk,gl=on".to_string()));
        assert!(args.contains(&"file=/work/arch-disk.qcow2,format=qcow2,if=virtio".to_string()));
        assert!(args.contains(&"/work/arch.iso".to_string()));
        assert!(args
            .iter()
            .any(|a| a.starts_with("local,path=/work/shared,mount_tag=shared")));
    }

    #[test]
    fn test_args_deterministic() {
        let cfg = config(Accel::Available);
        assert_eq!(cfg.to_args(), cfg.to_args());
    }

    #[test]
    fn test_ensure_disk_reuses_existing() {
        let td = tempfile::tempdir().unwrap();
        let disk = Utf8PathBuf::try_from(td.path().join("disk.qcow2")).unwrap();
        std::fs::write(&disk, "existing").unwrap();

        // Must not shell out to qemu-img for an existing disk
        ensure_disk(&disk).unwrap();
        assert_eq!(std::fs::read_to_string(&disk).unwrap(), "existing");
    }
}
