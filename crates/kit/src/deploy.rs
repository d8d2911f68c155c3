//! Deploy compositor builds into a running guest over the forwarded SSH
//! channel.
//!
//! Two independent network operations, each allowed to fail on its own: an
//! scp transfer of the binary, then an ssh chmod marking it executable. A
//! failed transfer skips the chmod and produces remediation text; a failed
//! chmod after a successful transfer is a partial success. Neither is
//! retried, and neither is fatal to the process.

use std::process::Command;

use camino::Utf8Path;
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use indoc::formatdoc;
use tracing::warn;

use crate::artifact;
use crate::command_run::CommandRun;
use crate::qemu::SSH_FORWARD_PORT;

/// Options for deploying into a running guest
#[derive(Debug, Parser)]
pub struct DeployOpts {
    /// Guest address on the host side of the forwarded channel
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Forwarded SSH port on the host side
    #[clap(long, default_value_t = SSH_FORWARD_PORT)]
    pub port: u16,

    /// Remote user
    #[clap(long, default_value = "root")]
    pub user: String,

    /// Remote destination directory
    #[clap(long, default_value = "/root")]
    pub dest: String,

    /// Build manifest used for the freshness check
    #[clap(long, default_value = "Cargo.toml")]
    pub manifest: camino::Utf8PathBuf,

    /// Compositor binary to deploy
    #[clap(long, default_value = "target/release/codeverse-compositor")]
    pub artifact: camino::Utf8PathBuf,

    /// Skip the freshness check and rebuild
    #[clap(long)]
    pub no_build: bool,
}

/// Connection coordinates for a running guest. Not validated before use;
/// failures surface at transfer time.
#[derive(Debug, Clone)]
pub struct DeployTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub dest: String,
}

impl Default for DeployTarget {
    fn default() -> Self {
        DeployTarget {
            host: "127.0.0.1".into(),
            port: SSH_FORWARD_PORT,
            user: "root".into(),
            dest: "/root".into(),
        }
    }
}

/// What the deployment attempt amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Transferred and marked executable
    Complete,
    /// Transferred, but the chmod failed; the file may not be executable
    Partial,
    /// Transfer failed; nothing changed remotely
    Unreachable,
}

/// Execute the deploy command.
pub fn run(opts: DeployOpts) -> Result<()> {
    if !opts.no_build {
        artifact::ensure_built(&opts.manifest, &opts.artifact)?;
    }

    let target = DeployTarget {
        host: opts.host,
        port: opts.port,
        user: opts.user,
        dest: opts.dest,
    };
    deploy(&target, &opts.artifact)?;
    Ok(())
}

/// Copy the artifact to the target and mark it executable.
pub fn deploy(target: &DeployTarget, artifact: &Utf8Path) -> Result<DeployOutcome> {
    deploy_with_programs(target, artifact, "scp", "ssh")
}

fn deploy_with_programs(
    target: &DeployTarget,
    artifact: &Utf8Path,
    scp_program: &str,
    ssh_program: &str,
) -> Result<DeployOutcome> {
    let port = target.port.to_string();
    let remote_dir = format!("{}@{}:{}/", target.user, target.host, target.dest);

    println!("Copying {artifact} to {remote_dir}");
    let transfer = Command::new(scp_program)
        .args(["-P", &port])
        .args(["-o", "StrictHostKeyChecking=no"])
        .args(["-o", "UserKnownHostsFile=/dev/null"])
        .arg(artifact.as_str())
        .arg(&remote_dir)
        .run();

    if let Err(e) = transfer {
        warn!("Transfer failed: {e:#}");
        println!("{}", unreachable_help(target));
        return Ok(DeployOutcome::Unreachable);
    }

    let file_name = artifact
        .file_name()
        .ok_or_else(|| eyre!("Artifact path has no file name: {artifact}"))?;
    let remote_path = format!("{}/{}", target.dest, file_name);
    let quoted_path = shlex::try_quote(&remote_path)
        .map_err(|e| eyre!("Failed to quote remote path '{remote_path}': {e}"))?;

    let chmod = Command::new(ssh_program)
        .args(["-p", &port])
        .args(["-o", "StrictHostKeyChecking=no"])
        .args(["-o", "UserKnownHostsFile=/dev/null"])
        .arg(format!("{}@{}", target.user, target.host))
        .arg(format!("chmod +x {quoted_path}"))
        .run();

    if let Err(e) = chmod {
        warn!("Could not mark {remote_path} executable: {e:#}");
        println!(
            "Partial success: the binary was copied but may not be executable.\n\
             Run `chmod +x {remote_path}` inside the guest."
        );
        return Ok(DeployOutcome::Partial);
    }

    println!("Deployment complete: {remote_path}");
    Ok(DeployOutcome::Complete)
}

fn unreachable_help(target: &DeployTarget) -> String {
    formatdoc! {"
        Could not reach the guest at {host}:{port}. Likely causes:
          - the virtual machine is not running (start it with `cvk run`)
          - sshd is not installed or not started inside the guest
          - the session was launched without the {port} -> 22 port forward
          - another process is holding host port {port}

        Manual fallback: the compositor binary is mirrored into the shared
        directory; inside the guest, mount the 'shared' virtfs tag and copy
        it from there.",
        host = target.host,
        port = target.port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::os::unix::fs::PermissionsExt;

    fn stub(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
        let program = dir.join(name);
        std::fs::write(&program, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        program
    }

    fn setup() -> (tempfile::TempDir, Utf8PathBuf, Utf8PathBuf) {
        let td = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::try_from(td.path().to_path_buf()).unwrap();
        let binary = dir.join("codeverse-compositor");
        std::fs::write(&binary, "elf").unwrap();
        (td, dir, binary)
    }

    #[test]
    fn test_deploy_complete() {
        let (_td, dir, binary) = setup();
        let chmod_log = dir.join("chmod.log");
        let scp = stub(&dir, "scp", "exit 0");
        let ssh = stub(&dir, "ssh", &format!("echo \"$@\" >> {chmod_log}\nexit 0"));

        let outcome =
            deploy_with_programs(&DeployTarget::default(), &binary, scp.as_str(), ssh.as_str())
                .unwrap();
        assert_eq!(outcome, DeployOutcome::Complete);

        let logged = std::fs::read_to_string(&chmod_log).unwrap();
        assert!(logged.contains("chmod +x /root/codeverse-compositor"));
    }

    #[test]
    fn test_deploy_unreachable_skips_chmod() {
        let (_td, dir, binary) = setup();
        let chmod_log = dir.join("chmod.log");
        let scp = stub(&dir, "scp", "exit 255");
        let ssh = stub(&dir, "ssh", &format!("echo ran >> {chmod_log}\nexit 0"));

        let outcome =
            deploy_with_programs(&DeployTarget::default(), &binary, scp.as_str(), ssh.as_str())
                .unwrap();
        assert_eq!(outcome, DeployOutcome::Unreachable);
        assert!(!chmod_log.exists(), "permission step must never run");
    }

    #[test]
    fn test_deploy_partial_on_chmod_failure() {
        let (_td, dir, binary) = setup();
        let scp = stub(&dir, "scp", "exit 0");
        let ssh = stub(&dir, "ssh", "exit 1");

        let outcome =
            deploy_with_programs(&DeployTarget::default(), &binary, scp.as_str(), ssh.as_str())
                .unwrap();
        assert_eq!(outcome, DeployOutcome::Partial);
    }

    #[test]
    fn test_unreachable_help_mentions_remediation() {
        let help = unreachable_help(&DeployTarget::default());
        assert!(help.contains("cvk run"));
        assert!(help.contains("2222"));
        assert!(help.contains("shared"));
    }
}
