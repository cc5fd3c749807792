//! Filesystem preparation: pseudo-filesystems, root remount and /tmp.
//!
//! The pseudo-filesystems are mounted with unbounded retries. They usually
//! fail only while a driver is still initializing, and boot cannot continue
//! without them, so the init blocks with a diagnostic per attempt instead of
//! giving up.

use crate::error::{Error, Result};
use crate::memory::TmpfsSize;
use nix::mount::{mount, MsFlags};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Pause between failed pseudo-filesystem mount attempts.
pub const MOUNT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// A filesystem to mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Source device or pseudo name
    pub source: &'static str,
    /// Mount point
    pub target: PathBuf,
    /// Filesystem type
    pub fstype: &'static str,
    /// Mount flags
    pub flags: MsFlags,
    /// Filesystem specific options
    pub data: Option<String>,
}

impl MountSpec {
    /// Create a mount with no flags and no options.
    pub fn new(source: &'static str, target: impl Into<PathBuf>, fstype: &'static str) -> Self {
        Self {
            source,
            target: target.into(),
            fstype,
            flags: MsFlags::empty(),
            data: None,
        }
    }

    /// Set mount flags.
    pub fn with_flags(mut self, flags: MsFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set filesystem options.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Something that can mount filesystems.
pub trait Mounter {
    /// Perform a single mount attempt.
    fn mount(&self, spec: &MountSpec) -> Result<()>;
}

/// Something that can pause the boot sequence.
pub trait Sleeper {
    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Mounts through mount(2).
#[derive(Debug, Default, Clone, Copy)]
pub struct SysMounter;

impl Mounter for SysMounter {
    fn mount(&self, spec: &MountSpec) -> Result<()> {
        if !spec.target.exists() {
            fs::create_dir_all(&spec.target)?;
        }

        mount(
            Some(spec.source),
            spec.target.as_path(),
            Some(spec.fstype),
            spec.flags,
            spec.data.as_deref(),
        )
        .map_err(|e| Error::MountError {
            source_path: spec.source.to_string(),
            target: spec.target.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            source = spec.source,
            mountpoint = %spec.target.display(),
            fstype = spec.fstype,
            "Mounted filesystem"
        );
        Ok(())
    }
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The pseudo-filesystems, in mount order.
///
/// Later entries may rely on earlier ones: `/dev/pts` lives inside the
/// tmpfs mounted on `/dev`.
pub fn pseudo_filesystems() -> Vec<MountSpec> {
    vec![
        MountSpec::new("/dev", "/dev", "tmpfs"),
        MountSpec::new("/proc", "/proc", "proc"),
        MountSpec::new("/dev/pts", "/dev/pts", "devpts"),
        MountSpec::new("/sys", "/sys", "sysfs"),
    ]
}

/// Mount `spec`, retrying forever until it succeeds.
///
/// Returns the number of attempts made.
pub fn ensure_mounted(mounter: &dyn Mounter, sleeper: &dyn Sleeper, spec: &MountSpec) -> u32 {
    let mut attempts = 0;

    loop {
        attempts += 1;
        info!(
            mountpoint = %spec.target.display(),
            fstype = spec.fstype,
            "Mounting filesystem"
        );

        match mounter.mount(spec) {
            Ok(()) => {
                info!(mountpoint = %spec.target.display(), "done");
                return attempts;
            }
            Err(e) => {
                warn!(
                    mountpoint = %spec.target.display(),
                    attempt = attempts,
                    error = %e,
                    "Failed to mount filesystem, retrying"
                );
                sleeper.sleep(MOUNT_RETRY_INTERVAL);
            }
        }
    }
}

/// Mount every pseudo-filesystem in order.
pub fn mount_pseudo_filesystems(mounter: &dyn Mounter, sleeper: &dyn Sleeper) {
    for spec in pseudo_filesystems() {
        ensure_mounted(mounter, sleeper, &spec);
    }
}

/// Remount / read-write. There is no retry: nothing works without it.
pub fn remount_root(mounter: &dyn Mounter) -> Result<()> {
    info!("Trying to remount root filesystem read/write");

    let spec = MountSpec::new("/", "/", "ext2").with_flags(MsFlags::MS_REMOUNT);
    mounter
        .mount(&spec)
        .map_err(|e| Error::Fatal(format!("remount of / failed: {}", e)))?;

    info!("done");
    Ok(())
}

/// Outcome of copying the old /tmp into the new one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    /// Entries copied
    pub copied: usize,
    /// Entries that failed and were skipped
    pub failed: usize,
}

/// Move `<root>/tmp` onto a tmpfs, keeping whatever was in it.
///
/// People hack files such as a kickstart into the initrd's /tmp, so the old
/// contents are copied over after the tmpfs is mounted.
pub fn relocate_tmp(mounter: &dyn Mounter, root: &Path, size: TmpfsSize) -> Result<CopyReport> {
    let tmp = root.join("tmp");
    let oldtmp = root.join("oldtmp");

    let had_tmp = tmp.exists();
    if had_tmp {
        fs::rename(&tmp, &oldtmp)?;
    }
    fs::DirBuilder::new().mode(0o755).create(&tmp)?;

    info!(size = size.mount_option(), "Mounting /tmp as tmpfs");
    let spec = MountSpec::new("none", &tmp, "tmpfs").with_data(size.mount_option());
    mounter
        .mount(&spec)
        .map_err(|e| Error::Fatal(format!("tmpfs mount on {} failed: {}", tmp.display(), e)))?;
    info!("done");

    if !had_tmp {
        return Ok(CopyReport::default());
    }

    let report = copy_tree(&oldtmp, &tmp);
    if let Err(e) = fs::remove_dir_all(&oldtmp) {
        warn!(path = %oldtmp.display(), error = %e, "Failed to remove old /tmp");
    }

    Ok(report)
}

/// Recursively copy `from` into `to`, reporting but skipping failures.
pub fn copy_tree(from: &Path, to: &Path) -> CopyReport {
    let mut report = CopyReport::default();

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry");
                report.failed += 1;
                continue;
            }
        };

        let relative = match entry.path().strip_prefix(from) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let dest = to.join(relative);

        match copy_entry(&entry, &dest) {
            Ok(()) => report.copied += 1,
            Err(e) => {
                warn!(
                    source = %entry.path().display(),
                    dest = %dest.display(),
                    error = %e,
                    "Failed to copy"
                );
                report.failed += 1;
            }
        }
    }

    report
}

fn copy_entry(entry: &walkdir::DirEntry, dest: &Path) -> std::io::Result<()> {
    let file_type = entry.file_type();

    if file_type.is_dir() {
        fs::create_dir_all(dest)?;
        let mode = entry.metadata().map_err(std::io::Error::from)?.permissions().mode();
        fs::set_permissions(dest, fs::Permissions::from_mode(mode))?;
    } else if file_type.is_symlink() {
        let link = fs::read_link(entry.path())?;
        std::os::unix::fs::symlink(link, dest)?;
    } else {
        fs::copy(entry.path(), dest)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyMounter {
        failures: u32,
        calls: Cell<u32>,
        mounted: RefCell<Vec<MountSpec>>,
    }

    impl FlakyMounter {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: Cell::new(0),
                mounted: RefCell::new(Vec::new()),
            }
        }
    }

    impl Mounter for FlakyMounter {
        fn mount(&self, spec: &MountSpec) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() <= self.failures {
                return Err(Error::MountError {
                    source_path: spec.source.to_string(),
                    target: spec.target.display().to_string(),
                    reason: "ENODEV".to_string(),
                });
            }
            self.mounted.borrow_mut().push(spec.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        sleeps: RefCell<Vec<Duration>>,
    }

    impl Sleeper for CountingSleeper {
        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }
    }

    #[test]
    fn test_ensure_mounted_retries_until_success() {
        for failures in [0, 1, 5] {
            let mounter = FlakyMounter::new(failures);
            let sleeper = CountingSleeper::default();
            let spec = MountSpec::new("/proc", "/proc", "proc");

            let attempts = ensure_mounted(&mounter, &sleeper, &spec);

            assert_eq!(attempts, failures + 1);
            assert_eq!(mounter.calls.get(), failures + 1);
            assert_eq!(sleeper.sleeps.borrow().len() as u32, failures);
            assert!(sleeper
                .sleeps
                .borrow()
                .iter()
                .all(|d| *d == MOUNT_RETRY_INTERVAL));
        }
    }

    #[test]
    fn test_pseudo_filesystem_order() {
        let mounter = FlakyMounter::new(0);
        let sleeper = CountingSleeper::default();

        mount_pseudo_filesystems(&mounter, &sleeper);

        let targets: Vec<_> = mounter
            .mounted
            .borrow()
            .iter()
            .map(|m| m.target.clone())
            .collect();
        assert_eq!(
            targets,
            vec![
                PathBuf::from("/dev"),
                PathBuf::from("/proc"),
                PathBuf::from("/dev/pts"),
                PathBuf::from("/sys"),
            ]
        );
    }

    #[test]
    fn test_remount_root_is_fatal_without_retry() {
        let mounter = FlakyMounter::new(1);

        let err = remount_root(&mounter).unwrap_err();

        assert!(matches!(err, Error::Fatal(_)));
        assert_eq!(mounter.calls.get(), 1);
    }

    #[test]
    fn test_remount_root_flags() {
        let mounter = FlakyMounter::new(0);
        remount_root(&mounter).unwrap();

        let mounted = mounter.mounted.borrow();
        assert_eq!(mounted[0].flags, MsFlags::MS_REMOUNT);
        assert_eq!(mounted[0].target, PathBuf::from("/"));
    }

    #[test]
    fn test_relocate_tmp_preserves_contents() {
        let root = TempDir::new().unwrap();
        let tmp = root.path().join("tmp");
        fs::create_dir_all(tmp.join("updates")).unwrap();
        fs::write(tmp.join("ks.cfg"), "install\n").unwrap();
        fs::write(tmp.join("updates/patch.py"), "pass\n").unwrap();
        std::os::unix::fs::symlink("ks.cfg", tmp.join("ks-link")).unwrap();

        let mounter = FlakyMounter::new(0);
        let report = relocate_tmp(&mounter, root.path(), TmpfsSize::Floor).unwrap();

        assert_eq!(report, CopyReport { copied: 4, failed: 0 });
        assert_eq!(fs::read_to_string(tmp.join("ks.cfg")).unwrap(), "install\n");
        assert_eq!(
            fs::read_to_string(tmp.join("updates/patch.py")).unwrap(),
            "pass\n"
        );
        assert!(fs::symlink_metadata(tmp.join("ks-link"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert!(!root.path().join("oldtmp").exists());

        let mounted = mounter.mounted.borrow();
        assert_eq!(mounted[0].fstype, "tmpfs");
        assert_eq!(mounted[0].data.as_deref(), Some("size=250m"));
    }

    #[test]
    fn test_relocate_tmp_without_old_tmp() {
        let root = TempDir::new().unwrap();
        let mounter = FlakyMounter::new(0);

        let report = relocate_tmp(&mounter, root.path(), TmpfsSize::HalfOfRam).unwrap();

        assert_eq!(report, CopyReport::default());
        assert!(root.path().join("tmp").is_dir());
    }

    #[test]
    fn test_relocate_tmp_mount_failure_is_fatal() {
        let root = TempDir::new().unwrap();
        let mounter = FlakyMounter::new(1);

        let err = relocate_tmp(&mounter, root.path(), TmpfsSize::Floor).unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }
}
