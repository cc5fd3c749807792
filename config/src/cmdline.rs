//! Kernel boot parameter parsing.
//!
//! Only a fixed set of whole-word tokens is recognized. Everything else on
//! the command line (`root=`, `console=`, ...) belongs to the kernel or the
//! installer and is ignored here.

use regex::Regex;
use tracing::{info, warn};

/// Default location of the kernel command line.
pub const DEFAULT_CMDLINE_PATH: &str = "/proc/cmdline";

/// Longest syslog address we accept before truncating.
const MAX_SYSLOG_ADDR: usize = 127;

/// Letters, digits, dots, colons, slashes, dashes and square brackets: enough
/// for hostnames and IPv4/IPv6 addresses with an optional port.
const SYSLOG_ADDR_PATTERN: &str = r"^[\w.:/\-\[\]]*$";

/// Boot parameters recognized by the installer init.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootParams {
    /// `devel`: development mode, adds `--devel` and a debug shell on failure
    pub devel: bool,
    /// `nokill`: skip killing remaining processes on shutdown
    pub nokill: bool,
    /// `utf8`: use a UTF-8 capable terminal type
    pub utf8: bool,
    /// `serial`: force a serial console
    pub serial: bool,
    /// `rescue`: leave Ctrl-C / Ctrl-Z enabled on the console
    pub rescue: bool,
    /// `syslog=<address>`: remote log target, validated
    pub syslog: Option<String>,
}

impl BootParams {
    /// Parse a whitespace separated command line.
    pub fn parse(cmdline: &str) -> Self {
        let mut params = Self::default();
        let mut syslog_seen = false;

        for token in cmdline.split_whitespace() {
            match token.strip_prefix("syslog=") {
                // Only the first syslog= counts, even when it is malformed
                Some(addr) if !syslog_seen => {
                    syslog_seen = true;
                    params.syslog = validate_syslog_addr(addr);
                }
                Some(_) => {}
                None => params.apply(token),
            }
        }

        params
    }

    /// Merge positional arguments given to the init binary itself.
    ///
    /// These exist for running the init by hand; only `serial` and `rescue`
    /// are meaningful there.
    pub fn merge_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            match arg.as_ref() {
                "serial" => self.serial = true,
                "rescue" => self.rescue = true,
                _ => {}
            }
        }
    }

    /// Whether remaining processes are forcefully killed at shutdown.
    pub fn force_kill(&self) -> bool {
        !self.nokill
    }

    /// Whether Ctrl-C, Ctrl-Z and BREAK are disabled on the console.
    pub fn disable_keys(&self) -> bool {
        !self.rescue
    }

    fn apply(&mut self, token: &str) {
        match token {
            "devel" => {
                info!("Enabling development mode, cores will be dumped");
                self.devel = true;
            }
            "nokill" => self.nokill = true,
            "utf8" => self.utf8 = true,
            "serial" => self.serial = true,
            "rescue" => self.rescue = true,
            _ => {}
        }
    }
}

/// Validate a remote syslog address, returning `None` if it must be ignored.
pub fn validate_syslog_addr(addr: &str) -> Option<String> {
    let addr: String = addr.chars().take(MAX_SYSLOG_ADDR).collect();
    if addr.is_empty() {
        return None;
    }

    let valid = Regex::new(SYSLOG_ADDR_PATTERN)
        .map(|re| re.is_match(&addr))
        .unwrap_or(false);

    if !valid {
        warn!(
            address = %addr,
            "The syslog= boot parameter is malformed and will be ignored"
        );
        return None;
    }

    Some(addr)
}
