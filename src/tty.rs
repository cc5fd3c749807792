//! Thin wrappers over the terminal ioctls the init needs.
//!
//! Everything here works on raw descriptors because the init juggles the
//! standard streams directly (it dups the elected console onto 0, 1 and 2).

use std::io;
use std::os::unix::io::RawFd;

/// Switch to a given virtual terminal.
const VT_ACTIVATE: u64 = 0x5606;

/// `TIOCLINUX` subcode asking for the kernel message console; only a real
/// graphics console answers it.
const TIOCLINUX_GET_KMSG_REDIRECT: u8 = 12;

/// Shift in, default colors, move down 100 lines.
pub const RESET_SEQUENCE: &str = "\x0f\x1b[0m\x1b[100E\n";

/// Turn off console blanking and powerdown.
pub const UNBLANK_SEQUENCE: &str = "\x1b[9;0]\x1b[8]";

/// Geometry forced onto serial and hypervisor consoles.
pub const CONSOLE_ROWS: u16 = 24;
pub const CONSOLE_COLS: u16 = 80;

/// Comparable snapshot of a terminal's mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMode {
    pub iflag: libc::tcflag_t,
    pub oflag: libc::tcflag_t,
    pub cflag: libc::tcflag_t,
    pub lflag: libc::tcflag_t,
    pub cc: Vec<libc::cc_t>,
    pub ispeed: libc::speed_t,
    pub ospeed: libc::speed_t,
}

impl TermMode {
    /// Snapshot a raw termios.
    pub fn from_termios(t: &libc::termios) -> Self {
        // SAFETY: t points to a valid termios for the duration of the calls.
        let (ispeed, ospeed) = unsafe { (libc::cfgetispeed(t), libc::cfgetospeed(t)) };
        Self {
            iflag: t.c_iflag,
            oflag: t.c_oflag,
            cflag: t.c_cflag,
            lflag: t.c_lflag,
            cc: t.c_cc.to_vec(),
            ispeed,
            ospeed,
        }
    }

    /// Whether two modes are identical, optionally ignoring baud rates.
    pub fn matches(&self, other: &TermMode, compare_speed: bool) -> bool {
        let flags_equal = self.iflag == other.iflag
            && self.oflag == other.oflag
            && self.cflag == other.cflag
            && self.lflag == other.lflag
            && self.cc == other.cc;

        if compare_speed {
            flags_equal && self.ispeed == other.ispeed && self.ospeed == other.ospeed
        } else {
            flags_equal
        }
    }
}

/// Raw terminal attributes kept around for restoring later.
#[derive(Clone, Copy)]
pub struct SavedTermios(pub libc::termios);

impl SavedTermios {
    /// Comparable view of the saved attributes.
    pub fn mode(&self) -> TermMode {
        TermMode::from_termios(&self.0)
    }

    /// Copy with local echo turned off.
    pub fn without_echo(&self) -> Self {
        let mut t = self.0;
        t.c_lflag &= !libc::ECHO;
        SavedTermios(t)
    }

    /// Copy with BREAK ignored and job control/interrupt keys disabled.
    pub fn with_keys_disabled(&self) -> Self {
        let mut t = self.0;
        t.c_iflag &= !libc::BRKINT;
        t.c_iflag |= libc::IGNBRK;
        t.c_lflag &= !libc::ISIG;
        SavedTermios(t)
    }
}

impl std::fmt::Debug for SavedTermios {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SavedTermios").field(&self.mode()).finish()
    }
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// tcgetattr(3).
pub fn get_attr(fd: RawFd) -> io::Result<SavedTermios> {
    // SAFETY: zeroed termios is a valid out-parameter.
    let mut t: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: t is a valid, writable termios.
    check(unsafe { libc::tcgetattr(fd, &mut t) })?;
    Ok(SavedTermios(t))
}

/// tcsetattr(3) with `TCSANOW`.
pub fn set_attr(fd: RawFd, attrs: &SavedTermios) -> io::Result<()> {
    // SAFETY: attrs holds a termios previously filled by tcgetattr.
    check(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &attrs.0) })
}

/// File status flags (`F_GETFL`).
pub fn get_flags(fd: RawFd) -> io::Result<libc::c_int> {
    // SAFETY: F_GETFL takes no argument.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    check(flags)?;
    Ok(flags)
}

/// Restore file status flags (`F_SETFL`).
pub fn set_flags(fd: RawFd, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: F_SETFL takes an int argument.
    check(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })
}

/// Force the window size, failing if the terminal does not report one.
pub fn force_window_size(fd: RawFd, rows: u16, cols: u16) -> io::Result<()> {
    // SAFETY: zeroed winsize is a valid out-parameter.
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    // SAFETY: TIOCGWINSZ writes a winsize.
    check(unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) })?;

    ws.ws_row = rows;
    ws.ws_col = cols;

    // SAFETY: TIOCSWINSZ reads a winsize.
    check(unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) })
}

/// Switch the active virtual terminal.
pub fn activate_vt(fd: RawFd, vt: libc::c_int) -> io::Result<()> {
    // SAFETY: VT_ACTIVATE takes the VT number by value.
    check(unsafe { libc::ioctl(fd, VT_ACTIVATE as _, vt) })
}

/// Whether `fd` is a kernel graphics/text console (answers `TIOCLINUX`).
pub fn is_graphics_console(fd: RawFd) -> bool {
    let mut subcode = TIOCLINUX_GET_KMSG_REDIRECT;
    // SAFETY: TIOCLINUX reads and may overwrite the subcode byte.
    unsafe { libc::ioctl(fd, libc::TIOCLINUX, &mut subcode) >= 0 }
}

/// Whether `fd` is a serial line (answers `TIOCGSERIAL`).
pub fn is_serial_line(fd: RawFd) -> bool {
    // Larger than struct serial_struct on every architecture.
    let mut buf = [0u64; 16];
    // SAFETY: TIOCGSERIAL writes a serial_struct, which fits in buf.
    unsafe { libc::ioctl(fd, libc::TIOCGSERIAL, buf.as_mut_ptr()) >= 0 }
}

/// Make `fd` the controlling terminal of the calling session.
pub fn set_controlling_tty(fd: RawFd) -> io::Result<()> {
    // SAFETY: TIOCSCTTY takes an int "steal" argument.
    check(unsafe { libc::ioctl(fd, libc::TIOCSCTTY, 0) })
}

/// Point stdin, stdout and stderr at `fd`.
pub fn dup_onto_stdio(fd: RawFd) -> io::Result<()> {
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if fd == target {
            continue;
        }
        // SAFETY: both descriptors are valid; dup2 closes target first.
        check(unsafe { libc::dup2(fd, target) })?;
    }
    Ok(())
}
