//! Compositor build freshness checking and rebuild.
//!
//! The compositor binary is an opaque artifact produced by `cargo build
//! --release` in the compositor workspace. Staleness is decided purely by
//! comparing the build manifest's modification time against the binary's;
//! content is never hashed or diffed.

use std::process::Command;
use std::time::SystemTime;

use camino::Utf8Path;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use tracing::{debug, info};

/// Result of comparing the build manifest against the built binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Binary is at least as new as the manifest
    Fresh,
    /// Manifest changed after the binary was built
    Stale,
    /// No binary exists at the artifact path
    Missing,
}

/// Pure timestamp comparison. A missing artifact is distinguished from a
/// stale one only for messaging; both trigger a rebuild.
pub fn classify(manifest_mtime: SystemTime, artifact_mtime: Option<SystemTime>) -> Freshness {
    match artifact_mtime {
        None => Freshness::Missing,
        Some(t) if t >= manifest_mtime => Freshness::Fresh,
        Some(_) => Freshness::Stale,
    }
}

/// Compare the on-disk manifest and artifact timestamps.
pub fn check(manifest: &Utf8Path, artifact: &Utf8Path) -> Result<Freshness> {
    let manifest_mtime = std::fs::metadata(manifest)
        .with_context(|| format!("Reading build manifest {manifest}"))?
        .modified()?;

    let artifact_mtime = match std::fs::metadata(artifact) {
        Ok(meta) => Some(meta.modified()?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Reading artifact {artifact}")),
    };

    let freshness = classify(manifest_mtime, artifact_mtime);
    debug!("Artifact {artifact} is {freshness:?} relative to {manifest}");
    Ok(freshness)
}

/// Ensure a fresh compositor binary exists, rebuilding synchronously when
/// needed. A failed build is fatal; no later stage should run.
pub fn ensure_built(manifest: &Utf8Path, artifact: &Utf8Path) -> Result<()> {
    match check(manifest, artifact)? {
        Freshness::Fresh => {
            info!("Compositor binary is up to date");
            Ok(())
        }
        Freshness::Missing => {
            println!("No compositor binary at {artifact}, building...");
            rebuild_with("cargo", manifest)
        }
        Freshness::Stale => {
            println!("Build manifest is newer than the compositor binary, rebuilding...");
            rebuild_with("cargo", manifest)
        }
    }
}

/// Run the build tool in the manifest's directory, streaming its output.
fn rebuild_with(program: &str, manifest: &Utf8Path) -> Result<()> {
    let project_dir = manifest
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));

    let status = Command::new(program)
        .args(["build", "--release"])
        .current_dir(project_dir)
        .status()
        .with_context(|| format!("Failed to execute {program}"))?;

    if !status.success() {
        return Err(eyre!("Compositor build failed: {status}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(n: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(n)
    }

    #[test]
    fn test_classify_missing_artifact() {
        assert_eq!(classify(secs(100), None), Freshness::Missing);
    }

    #[test]
    fn test_classify_manifest_newer() {
        // manifest touched at 10:05, binary built at 10:00
        assert_eq!(classify(secs(605), Some(secs(600))), Freshness::Stale);
    }

    #[test]
    fn test_classify_artifact_newer_or_equal() {
        assert_eq!(classify(secs(600), Some(secs(605))), Freshness::Fresh);
        assert_eq!(classify(secs(600), Some(secs(600))), Freshness::Fresh);
    }

    #[test]
    fn test_check_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = camino::Utf8Path::from_path(dir.path()).unwrap();
        let manifest = dir_path.join("Cargo.toml");
        let artifact = dir_path.join("compositor");

        std::fs::write(&manifest, "[package]").unwrap();
        assert_eq!(check(&manifest, &artifact).unwrap(), Freshness::Missing);

        std::fs::write(&artifact, "binary").unwrap();
        let f = std::fs::File::options().write(true).open(&artifact).unwrap();
        f.set_modified(secs(1_000_000)).unwrap();
        let f = std::fs::File::options().write(true).open(&manifest).unwrap();
        f.set_modified(secs(2_000_000)).unwrap();
        assert_eq!(check(&manifest, &artifact).unwrap(), Freshness::Stale);

        let f = std::fs::File::options().write(true).open(&artifact).unwrap();
        f.set_modified(secs(3_000_000)).unwrap();
        assert_eq!(check(&manifest, &artifact).unwrap(), Freshness::Fresh);
    }

    #[test]
    fn test_rebuild_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = camino::Utf8Path::from_path(dir.path()).unwrap();
        let manifest = dir_path.join("Cargo.toml");
        std::fs::write(&manifest, "[package]").unwrap();

        // `false` ignores its arguments and exits 1, standing in for a
        // failing build tool
        let result = rebuild_with("false", &manifest);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("build failed"));
    }

    #[test]
    fn test_rebuild_success() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = camino::Utf8Path::from_path(dir.path()).unwrap();
        let manifest = dir_path.join("Cargo.toml");
        std::fs::write(&manifest, "[package]").unwrap();

        assert!(rebuild_with("true", &manifest).is_ok());
    }
}
