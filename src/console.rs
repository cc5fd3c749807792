//! Console election and setup.
//!
//! Hypervisor consoles (xvc, hvc, hvsi) look like ordinary terminals, so the
//! only reliable way to tell which one the kernel is using as `/dev/console`
//! is to compare live terminal modes. The console is first switched to a
//! distinctive no-echo mode, every candidate is probed, and the first one
//! whose mode matches is the console.

use crate::error::{Error, Result};
use crate::tty::{self, SavedTermios, TermMode};
use config::{BootParams, PlatformProfile};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The kernel console.
pub const SYSTEM_CONSOLE: &str = "/dev/console";

/// Devices tried for an explicitly requested serial console.
const SERIAL_DEVICES: &[&str] = &["/dev/ttyS0", "/dev/tts/0"];

/// Devices tried for the plain virtual terminal.
const VT_DEVICES: &[&str] = &["/dev/tty1", "/dev/vc/1"];

/// Hardware Management Console on POWER.
const HMC_CONSOLE: &str = "/dev/hvc0";

/// How the elected console was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleClass {
    /// A hypervisor console whose mode matched the kernel console
    Virtual,
    /// A serial line
    Serial,
    /// The first virtual terminal
    Vt,
}

/// Result of console election: the class and the devices to try opening,
/// in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSelection {
    pub class: ConsoleClass,
    pub devices: Vec<String>,
}

/// Live terminal state used during election.
pub trait TerminalProbe {
    /// Current mode of `device`, or `None` if it cannot be opened or is not
    /// a terminal.
    fn mode_of(&self, device: &str) -> Option<TermMode>;

    /// Whether standard input is a kernel graphics console.
    fn graphics_console(&self) -> bool;

    /// Whether standard input is a serial line.
    fn serial_line(&self) -> bool;
}

/// Elect a console.
///
/// A hypervisor console match always takes priority over the serial probes.
/// Without a match, a kernel graphics console means "not serial" unless a
/// serial console was explicitly requested; otherwise a serial line on
/// stdin means the kernel console itself is serial.
pub fn select_console(
    candidates: &[&str],
    reference: &TermMode,
    compare_speed: bool,
    force_serial: bool,
    probe: &dyn TerminalProbe,
) -> ConsoleSelection {
    for candidate in candidates {
        let matched = probe
            .mode_of(candidate)
            .is_some_and(|mode| mode.matches(reference, compare_speed));

        if matched {
            return ConsoleSelection {
                class: ConsoleClass::Virtual,
                devices: vec![candidate.to_string()],
            };
        }
    }

    let (class, devices) = if !probe.graphics_console() {
        if probe.serial_line() {
            (ConsoleClass::Serial, &[SYSTEM_CONSOLE][..])
        } else {
            (ConsoleClass::Vt, VT_DEVICES)
        }
    } else if force_serial {
        (ConsoleClass::Serial, SERIAL_DEVICES)
    } else {
        (ConsoleClass::Vt, VT_DEVICES)
    };

    ConsoleSelection {
        class,
        devices: devices.iter().map(|d| d.to_string()).collect(),
    }
}

/// `TERM` value for the elected console.
pub fn terminal_type(device: &str, class: ConsoleClass, utf8: bool) -> &'static str {
    match class {
        ConsoleClass::Vt => config::environment::DEFAULT_TERM,
        _ if device == HMC_CONSOLE => "vt320",
        _ if utf8 => "vt100",
        _ => "vt100-nav",
    }
}

/// Probes real devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtyProbe;

impl TerminalProbe for TtyProbe {
    fn mode_of(&self, device: &str) -> Option<TermMode> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .ok()?;
        tty::get_attr(file.as_raw_fd()).ok().map(|t| t.mode())
    }

    fn graphics_console(&self) -> bool {
        tty::is_graphics_console(libc::STDIN_FILENO)
    }

    fn serial_line(&self) -> bool {
        tty::is_serial_line(libc::STDIN_FILENO)
    }
}

/// The configured console.
#[derive(Debug, Clone)]
pub struct Console {
    /// Elected device
    pub device: PathBuf,
    /// How it was elected
    pub class: ConsoleClass,
    /// `TERM` for the installer
    pub term: &'static str,
    /// Attributes of stdin right after it was pointed at the console
    pub saved: Option<SavedTermios>,
    /// Original `/dev/console` mode and file flags
    pub system_console: Option<(SavedTermios, libc::c_int)>,
}

impl Console {
    /// Whether the installer should be told about a hypervisor console.
    pub fn is_virtual(&self) -> bool {
        self.class == ConsoleClass::Virtual
    }

    /// Put `/dev/console` back the way the kernel handed it over.
    pub fn restore_system_console(&self) -> Result<()> {
        let Some((attrs, flags)) = &self.system_console else {
            return Ok(());
        };

        let file = open_console(libc::O_RDONLY)?;
        let fd = file.as_raw_fd();
        tty::set_attr(fd, attrs).map_err(|e| Error::terminal(SYSTEM_CONSOLE, e))?;
        tty::set_flags(fd, *flags).map_err(|e| Error::terminal(SYSTEM_CONSOLE, e))?;
        Ok(())
    }
}

fn open_console(access: libc::c_int) -> Result<File> {
    let mut options = OpenOptions::new();
    match access {
        libc::O_WRONLY => options.write(true),
        _ => options.read(true),
    };
    options
        .open(SYSTEM_CONSOLE)
        .map_err(|_| Error::ConsoleUnavailable(SYSTEM_CONSOLE.to_string()))
}

fn open_first(devices: &[String]) -> Result<(File, PathBuf)> {
    for device in devices {
        match OpenOptions::new().read(true).write(true).open(device) {
            Ok(file) => return Ok((file, PathBuf::from(device))),
            Err(e) => warn!(device = %device, error = %e, "Failed to open console device"),
        }
    }

    Err(Error::ConsoleUnavailable(devices.join(", ")))
}

/// Force 80x24. Fatal on failure: the installer UI is unusable without a
/// known geometry.
pub fn setup_terminal(fd: RawFd, device: &Path) -> Result<()> {
    tty::force_window_size(fd, tty::CONSOLE_ROWS, tty::CONSOLE_COLS)
        .map_err(|e| Error::terminal(device.display().to_string(), format!("winsize: {}", e)))
}

/// Elect and configure the console, leaving it on stdin/stdout/stderr.
pub fn configure_console(profile: &PlatformProfile, params: &BootParams) -> Result<Console> {
    if !profile.manages_console {
        return configure_inherited_console(params);
    }

    let original = {
        let console = open_console(libc::O_RDONLY)?;
        let fd = console.as_raw_fd();
        let attrs = tty::get_attr(fd).map_err(|e| Error::terminal(SYSTEM_CONSOLE, e))?;
        let flags = tty::get_flags(fd).map_err(|e| Error::terminal(SYSTEM_CONSOLE, e))?;
        (attrs, flags)
    };
    let reference = original.0.without_echo();

    // Keep the probes from echoing onto the operator's screen
    set_system_console(&reference)?;
    let selection = select_console(
        profile.console_candidates,
        &reference.mode(),
        profile.compare_speed,
        params.serial,
        &TtyProbe,
    );
    set_system_console(&original.0)?;

    let (file, device) = open_first(&selection.devices)?;
    let fd = file.as_raw_fd();

    match selection.class {
        ConsoleClass::Virtual => info!(device = %device.display(), "Using hypervisor console"),
        ConsoleClass::Serial => info!(device = %device.display(), "Using a serial console"),
        ConsoleClass::Vt => info!(device = %device.display(), "Using virtual terminal"),
    }

    if selection.class != ConsoleClass::Vt {
        setup_terminal(fd, &device)?;
    }

    if let Err(e) = nix::unistd::setsid() {
        warn!(error = %e, "setsid failed");
    }
    tty::dup_onto_stdio(fd).map_err(|e| Error::terminal(device.display().to_string(), e))?;
    if let Err(e) = tty::set_controlling_tty(libc::STDIN_FILENO) {
        warn!(error = %e, "Could not set new controlling TTY");
    }
    if fd <= libc::STDERR_FILENO {
        // The console landed on a standard stream; keep it open
        let _ = file.into_raw_fd();
    }

    let term = terminal_type(&device.to_string_lossy(), selection.class, params.utf8);
    let saved = disable_keys(params)?;

    Ok(Console {
        device,
        class: selection.class,
        term,
        saved,
        system_console: Some(original),
    })
}

/// Platforms where the kernel console is already on stdin (s390).
fn configure_inherited_console(params: &BootParams) -> Result<Console> {
    for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: stdin is open; dup2 replaces target.
        if unsafe { libc::dup2(libc::STDIN_FILENO, target) } < 0 {
            return Err(Error::terminal("stdin", std::io::Error::last_os_error()));
        }
    }

    let saved = disable_keys(params)?;
    Ok(Console {
        device: PathBuf::from(SYSTEM_CONSOLE),
        class: ConsoleClass::Serial,
        term: config::environment::DEFAULT_TERM,
        saved,
        system_console: None,
    })
}

/// Save stdin's attributes and, outside rescue mode, disable the job
/// control and interrupt keys.
fn disable_keys(params: &BootParams) -> Result<Option<SavedTermios>> {
    let saved = match tty::get_attr(libc::STDIN_FILENO) {
        Ok(saved) => saved,
        Err(e) => {
            warn!(error = %e, "stdin is not a terminal, leaving keys alone");
            return Ok(None);
        }
    };

    if params.disable_keys() {
        tty::set_attr(libc::STDIN_FILENO, &saved.with_keys_disabled())
            .map_err(|e| Error::terminal("stdin", e))?;
    }

    Ok(Some(saved))
}

fn set_system_console(attrs: &SavedTermios) -> Result<()> {
    let console = open_console(libc::O_WRONLY)?;
    tty::set_attr(console.as_raw_fd(), attrs).map_err(|e| Error::terminal(SYSTEM_CONSOLE, e))
}
