//! Static device node creation for the freshly mounted /dev tmpfs.

use nix::sys::stat::{makedev, mknod, umask, Mode, SFlag};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use tracing::{debug, warn};

/// Kind of entry under /dev.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    Char,
    Block,
}

/// One static /dev entry.
#[derive(Debug, Clone, Copy)]
pub struct DevNode {
    pub name: &'static str,
    pub kind: NodeKind,
    pub perms: u32,
    pub major: u64,
    pub minor: u64,
}

const fn dir(name: &'static str, perms: u32) -> DevNode {
    DevNode {
        name,
        kind: NodeKind::Dir,
        perms,
        major: 0,
        minor: 0,
    }
}

const fn chr(name: &'static str, perms: u32, major: u64, minor: u64) -> DevNode {
    DevNode {
        name,
        kind: NodeKind::Char,
        perms,
        major,
        minor,
    }
}

const fn blk(name: &'static str, perms: u32, major: u64, minor: u64) -> DevNode {
    DevNode {
        name,
        kind: NodeKind::Block,
        perms,
        major,
        minor,
    }
}

/// Nodes needed before udev takes over.
pub const DEVNODES: &[DevNode] = &[
    dir("pts", 0o755),
    dir("shm", 0o1777),
    dir("mapper", 0o755),
    dir("input", 0o755),
    chr("console", 0o600, 5, 1),
    chr("tty", 0o666, 5, 0),
    chr("ptmx", 0o666, 5, 2),
    chr("tty0", 0o660, 4, 0),
    chr("tty1", 0o660, 4, 1),
    chr("tty2", 0o660, 4, 2),
    chr("tty3", 0o660, 4, 3),
    chr("tty4", 0o660, 4, 4),
    chr("tty5", 0o660, 4, 5),
    chr("tty6", 0o660, 4, 6),
    chr("ttyS0", 0o660, 4, 64),
    chr("ttyS1", 0o660, 4, 65),
    chr("ttyS2", 0o660, 4, 66),
    chr("ttyS3", 0o660, 4, 67),
    chr("hvc0", 0o660, 229, 0),
    chr("null", 0o666, 1, 3),
    chr("zero", 0o666, 1, 5),
    chr("full", 0o666, 1, 7),
    chr("mem", 0o640, 1, 1),
    chr("kmsg", 0o644, 1, 11),
    chr("random", 0o644, 1, 8),
    chr("urandom", 0o644, 1, 9),
    chr("mapper/control", 0o600, 10, 236),
    chr("fb0", 0o600, 29, 0),
    blk("loop0", 0o640, 7, 0),
    blk("loop1", 0o640, 7, 1),
    blk("loop2", 0o640, 7, 2),
    blk("ram0", 0o640, 1, 0),
];

/// Marker that keeps udev's md incremental rules away from RAID sets while
/// the installer is starting.
pub const SYSINIT_MARKER: &str = ".in_sysinit";

/// Outcome of populating /dev.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReport {
    pub created: usize,
    pub failed: usize,
}

/// Create the static nodes under `dev`. Individual failures are reported
/// and skipped.
pub fn create_devices(dev: &Path) -> DeviceReport {
    // Node permissions come from the table, not the inherited umask
    let previous = umask(Mode::empty());
    let mut report = DeviceReport::default();

    for node in DEVNODES {
        match create_node(dev, node) {
            Ok(()) => report.created += 1,
            Err(e) => {
                warn!(node = node.name, error = %e, "Unable to create device");
                report.failed += 1;
            }
        }
    }

    let marker = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(dev.join(SYSINIT_MARKER));
    if let Err(e) = marker {
        warn!(error = %e, "Unable to create sysinit marker");
    }

    umask(previous);
    debug!(created = report.created, failed = report.failed, "Populated /dev");
    report
}

fn create_node(dev: &Path, node: &DevNode) -> crate::error::Result<()> {
    let path = dev.join(node.name);

    let kind = match node.kind {
        NodeKind::Dir => {
            fs::DirBuilder::new().mode(node.perms).create(&path)?;
            return Ok(());
        }
        NodeKind::Char => SFlag::S_IFCHR,
        NodeKind::Block => SFlag::S_IFBLK,
    };

    mknod(
        path.as_path(),
        kind,
        Mode::from_bits_truncate(node.perms),
        makedev(node.major, node.minor),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_devices_reports_every_node() {
        let dev = TempDir::new().unwrap();

        let report = create_devices(dev.path());

        assert_eq!(report.created + report.failed, DEVNODES.len());
        assert!(dev.path().join("pts").is_dir());
        assert!(dev.path().join("mapper").is_dir());
        assert!(dev.path().join(SYSINIT_MARKER).exists());
    }

    #[test]
    fn test_directories_precede_their_nodes() {
        let mapper_dir = DEVNODES.iter().position(|n| n.name == "mapper");
        let control = DEVNODES.iter().position(|n| n.name == "mapper/control");
        assert!(mapper_dir < control);
    }

    #[test]
    fn test_existing_directory_is_a_failure_not_a_panic() {
        let dev = TempDir::new().unwrap();
        fs::create_dir(dev.path().join("pts")).unwrap();

        let report = create_devices(dev.path());
        assert!(report.failed >= 1);
    }
}
