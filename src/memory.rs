//! Total memory detection for sizing /tmp.

use std::path::Path;
use tracing::{debug, error};

/// Default location of the kernel memory report.
pub const DEFAULT_MEMINFO_PATH: &str = "/proc/meminfo";

/// Below this much RAM (in kB) /tmp gets a fixed size instead of half of
/// memory, so there is always room for install.img and the logs.
pub const MIN_TMPFS_RAM_KB: u64 = 512_000;

/// Size option for the /tmp tmpfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmpfsSize {
    /// Half of physical memory
    HalfOfRam,
    /// Fixed 250 MiB floor
    Floor,
}

impl TmpfsSize {
    /// Pick the sizing policy for a machine with `total_kb` of memory.
    pub fn for_memory(total_kb: u64) -> Self {
        if total_kb < MIN_TMPFS_RAM_KB {
            TmpfsSize::Floor
        } else {
            TmpfsSize::HalfOfRam
        }
    }

    /// Mount data string for tmpfs.
    pub fn mount_option(self) -> &'static str {
        match self {
            TmpfsSize::HalfOfRam => "size=50%",
            TmpfsSize::Floor => "size=250m",
        }
    }
}

/// Total system memory in kB, or 0 if it cannot be determined.
pub fn total_memory(meminfo: &Path) -> u64 {
    match std::fs::read_to_string(meminfo) {
        Ok(contents) => parse_mem_total(&contents).unwrap_or_else(|| {
            error!(path = %meminfo.display(), "Unknown format for MemTotal line");
            0
        }),
        Err(e) => {
            error!(path = %meminfo.display(), error = %e, "Error reading memory info");
            0
        }
    }
}

/// Extract `MemTotal` (kB) from the contents of /proc/meminfo.
pub fn parse_mem_total(contents: &str) -> Option<u64> {
    let line = contents.lines().find(|l| l.starts_with("MemTotal:"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();

    // "MemTotal:", value, unit
    if fields.len() < 3 {
        return None;
    }

    let total = fields.get(fields.len() - 2)?.parse().ok()?;
    debug!(total_kb = total, "Detected total memory");
    Some(total)
}
