//! Host hardware-acceleration probe.

use camino::Utf8Path;
use tracing::debug;

/// Device node exposed by the kernel when KVM is usable.
pub const KVM_DEVICE: &str = "/dev/kvm";

/// Whether the host can hand the guest hardware-assisted virtualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accel {
    Available,
    Unavailable,
}

impl Accel {
    pub fn is_available(self) -> bool {
        matches!(self, Accel::Available)
    }
}

/// Probe the host for KVM support.
///
/// A single synchronous check; absence is never an error, the launch
/// composer just falls back to software emulation.
pub fn detect() -> Accel {
    detect_at(Utf8Path::new(KVM_DEVICE))
}

fn detect_at(device: &Utf8Path) -> Accel {
    if device.exists() {
        debug!("KVM device found at {device}");
        Accel::Available
    } else {
        debug!("No KVM device at {device}");
        Accel::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("kvm");
        let missing = Utf8Path::from_path(&missing).unwrap();
        assert_eq!(detect_at(missing), Accel::Unavailable);
    }

    #[test]
    fn test_detect_present_device() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("kvm");
        std::fs::write(&dev, b"").unwrap();
        let dev = Utf8Path::from_path(&dev).unwrap();
        assert_eq!(detect_at(dev), Accel::Available);
    }
}
