//! The init PID file and the `poweroff`/`halt`/`reboot` invocation modes.
//!
//! The same binary is installed under several names. Started as `halt`,
//! `poweroff` or `reboot`, it does not boot anything: it looks up the
//! running init in the PID file and signals it.

use crate::error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::info;

/// Default PID file location.
pub const DEFAULT_PID_FILE: &str = "/var/run/init.pid";

/// Auxiliary invocation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AuxCommand {
    /// Power the machine off
    Poweroff,
    /// Halt the machine
    Halt,
    /// Reboot the machine
    Reboot,
}

impl AuxCommand {
    /// Signal telling the running init to perform this command.
    pub fn signal(self) -> Signal {
        match self {
            AuxCommand::Poweroff => Signal::SIGUSR2,
            AuxCommand::Halt => Signal::SIGUSR1,
            AuxCommand::Reboot => Signal::SIGINT,
        }
    }

    /// Mode selected by the name the binary was invoked as.
    pub fn from_program_name(argv0: &str) -> Option<Self> {
        let name = Path::new(argv0).file_name()?.to_str()?;
        match name {
            "poweroff" => Some(AuxCommand::Poweroff),
            "halt" => Some(AuxCommand::Halt),
            "reboot" => Some(AuxCommand::Reboot),
            _ => None,
        }
    }

    /// Name of the command.
    pub fn name(self) -> &'static str {
        match self {
            AuxCommand::Poweroff => "poweroff",
            AuxCommand::Halt => "halt",
            AuxCommand::Reboot => "reboot",
        }
    }
}

/// Sends signals to processes.
pub trait SignalSender {
    /// Deliver `signal` to `pid`.
    fn send(&self, pid: Pid, signal: Signal) -> Result<()>;
}

/// kill(2).
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSender;

impl SignalSender for KillSender {
    fn send(&self, pid: Pid, signal: Signal) -> Result<()> {
        kill(pid, signal)?;
        Ok(())
    }
}

/// Record `pid` in the PID file, mode 0644.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| Error::PidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    write!(file, "{}", pid)?;
    Ok(())
}

/// Read the init PID back.
pub fn read_pid_file(path: &Path) -> Result<Pid> {
    let pid_file_error = |reason: String| Error::PidFile {
        path: path.to_path_buf(),
        reason,
    };

    let contents = fs::read_to_string(path).map_err(|e| pid_file_error(e.to_string()))?;
    let pid: i32 = contents
        .trim()
        .parse()
        .map_err(|_| pid_file_error(format!("invalid PID {:?}", contents.trim())))?;

    if pid <= 0 {
        return Err(pid_file_error(format!("invalid PID {}", pid)));
    }

    Ok(Pid::from_raw(pid))
}

/// Signal the running init to perform `command`. Returns the PID signalled.
pub fn signal_supervisor(path: &Path, command: AuxCommand, sender: &dyn SignalSender) -> Result<Pid> {
    info!("Running {}...", command.name());

    let pid = read_pid_file(path)?;
    sender.send(pid, command.signal())?;
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(AuxCommand::Poweroff.signal(), Signal::SIGUSR2);
        assert_eq!(AuxCommand::Halt.signal(), Signal::SIGUSR1);
        assert_eq!(AuxCommand::Reboot.signal(), Signal::SIGINT);
    }

    #[test]
    fn test_program_name_dispatch() {
        assert_eq!(AuxCommand::from_program_name("/sbin/halt"), Some(AuxCommand::Halt));
        assert_eq!(AuxCommand::from_program_name("poweroff"), Some(AuxCommand::Poweroff));
        assert_eq!(AuxCommand::from_program_name("./reboot"), Some(AuxCommand::Reboot));
        assert_eq!(AuxCommand::from_program_name("/sbin/init"), None);
        assert_eq!(AuxCommand::from_program_name("rebooter"), None);
    }

    #[test]
    fn test_pid_file_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");

        write_pid_file(&path, 1).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o600, 0o600);
        assert_eq!(mode & 0o022, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }

    #[test]
    fn test_rewrite_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");

        write_pid_file(&path, 123456).unwrap();
        write_pid_file(&path, 7).unwrap();

        assert_eq!(read_pid_file(&path).unwrap(), Pid::from_raw(7));
    }

    #[test]
    fn test_read_invalid_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.pid");

        assert!(matches!(read_pid_file(&path), Err(Error::PidFile { .. })));

        fs::write(&path, "garbage").unwrap();
        assert!(matches!(read_pid_file(&path), Err(Error::PidFile { .. })));

        fs::write(&path, "0").unwrap();
        assert!(matches!(read_pid_file(&path), Err(Error::PidFile { .. })));

        fs::write(&path, "42\n").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Pid::from_raw(42));
    }
}
