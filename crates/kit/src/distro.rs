//! Guest distribution catalog.
//!
//! Each distribution pins one installer image release with a versioned file
//! name and an ordered mirror list, primary first. The mirror order is the
//! failover order used by the fetcher.

use std::io::{IsTerminal, Write};
use std::str::FromStr;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use strum::IntoEnumIterator;

/// Guest distributions the test VM can boot.
///
/// The first variant is the default, used when no selection is made
/// non-interactively.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[non_exhaustive]
pub enum Distro {
    /// Arch Linux monthly installer snapshot
    #[strum(serialize = "arch")]
    Arch,
    /// Alpine Linux standard release
    #[strum(serialize = "alpine")]
    Alpine,
    /// Fedora Workstation live image
    #[strum(serialize = "fedora")]
    Fedora,
}

impl Default for Distro {
    fn default() -> Self {
        Distro::Arch
    }
}

impl Distro {
    /// Pinned release version for this distribution.
    pub const fn version(self) -> &'static str {
        match self {
            Self::Arch => "2025.08.01",
            Self::Alpine => "3.22.0",
            Self::Fedora => "42",
        }
    }

    /// Versioned installer image file name; also the cache key in the
    /// working directory.
    pub fn iso_file_name(self) -> String {
        match self {
            Self::Arch => format!("archlinux-{}-x86_64.iso", self.version()),
            Self::Alpine => format!("alpine-standard-{}-x86_64.iso", self.version()),
            Self::Fedora => format!("Fedora-Workstation-Live-x86_64-{}-1.1.iso", self.version()),
        }
    }

    /// Ordered candidate URLs for the installer image, primary first.
    pub fn sources(self) -> Vec<String> {
        let iso = self.iso_file_name();
        let mirrors: &[&str] = match self {
            Self::Arch => &[
                "https://geo.mirror.pkgbuild.com/iso/2025.08.01",
                "https://mirror.rackspace.com/archlinux/iso/2025.08.01",
                "https://mirrors.kernel.org/archlinux/iso/2025.08.01",
            ],
            Self::Alpine => &[
                "https://dl-cdn.alpinelinux.org/alpine/v3.22/releases/x86_64",
                "https://mirrors.edge.kernel.org/alpine/v3.22/releases/x86_64",
                "https://mirror.leaseweb.com/alpine/v3.22/releases/x86_64",
            ],
            Self::Fedora => &[
                "https://download.fedoraproject.org/pub/fedora/linux/releases/42/Workstation/x86_64/iso",
                "https://mirrors.kernel.org/fedora/releases/42/Workstation/x86_64/iso",
                "https://ftp.fau.de/fedora/releases/42/Workstation/x86_64/iso",
            ],
        };
        mirrors.iter().map(|m| format!("{m}/{iso}")).collect()
    }

    /// Approximate installer image size, for display only.
    pub const fn nominal_size(self) -> u64 {
        match self {
            Self::Arch => 1_264_000_000,
            Self::Alpine => 234_000_000,
            Self::Fedora => 2_666_000_000,
        }
    }
}

/// Select a distribution interactively on a TTY, defaulting to the first
/// enumerated option. Non-interactive invocations (piped stdin, CI) get the
/// default silently so automated runs stay deterministic.
pub fn choose_interactive() -> Result<Distro> {
    if !std::io::stdin().is_terminal() {
        return Ok(Distro::default());
    }

    println!("Select a guest distribution:");
    for (idx, d) in Distro::iter().enumerate() {
        println!("  {}) {} {}", idx + 1, d, d.version());
    }
    print!("Choice [1]: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        return Ok(Distro::default());
    }

    if let Some(d) = line
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| Distro::iter().nth(i))
    {
        return Ok(d);
    }

    Distro::from_str(line).map_err(|_| eyre!("Unknown distribution: {line}"))
}

/// One row of the `distros` listing.
#[derive(Debug, Serialize)]
struct DistroEntry {
    name: String,
    version: &'static str,
    boot_image: String,
    mirrors: Vec<String>,
    nominal_size: u64,
}

/// Print the distribution catalog as a table or JSON.
pub fn list(json: bool) -> Result<()> {
    let entries: Vec<DistroEntry> = Distro::iter()
        .map(|d| DistroEntry {
            name: d.to_string(),
            version: d.version(),
            boot_image: d.iso_file_name(),
            mirrors: d.sources(),
            nominal_size: d.nominal_size(),
        })
        .collect();

    if json {
        let json_output = serde_json::to_string_pretty(&entries)?;
        println!("{}", json_output);
    } else {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["NAME", "VERSION", "BOOT IMAGE", "MIRRORS", "SIZE"]);

        for entry in entries {
            let size = indicatif::BinaryBytes(entry.nominal_size).to_string();
            table.add_row(vec![
                entry.name,
                entry.version.to_string(),
                entry.boot_image,
                entry.mirrors.len().to_string(),
                size,
            ]);
        }

        println!("{}", table);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for variant in Distro::iter() {
            let s = variant.to_string();
            let parsed = Distro::from_str(&s).unwrap();
            assert_eq!(parsed, variant);
        }
    }

    #[test]
    fn test_parse_invalid_distro() {
        assert!(Distro::from_str("beos").is_err());
    }

    #[test]
    fn test_default_is_first_enumerated() {
        assert_eq!(Distro::default(), Distro::iter().next().unwrap());
    }

    #[test]
    fn test_iso_file_name_is_versioned() {
        for variant in Distro::iter() {
            assert!(variant.iso_file_name().contains(variant.version()));
            assert!(variant.iso_file_name().ends_with(".iso"));
        }
    }

    #[test]
    fn test_sources_ordered_and_nonempty() {
        for variant in Distro::iter() {
            let sources = variant.sources();
            assert!(sources.len() >= 2, "need at least one fallback mirror");
            for url in &sources {
                assert!(url.starts_with("https://"));
                assert!(url.ends_with(&variant.iso_file_name()));
            }
        }
    }
}
