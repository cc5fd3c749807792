//! Helper daemon launching.

use crate::error::{Error, Result};
use crate::process::{ChildHandle, ProcessSupervisor, Reaper, WaitResult};
use config::{DaemonSpec, DaemonStage};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{error, info, warn};

/// Default rsyslog configuration file.
pub const DEFAULT_RSYSLOG_CONF: &str = "/etc/rsyslog.conf";

/// Build the command line for a daemon.
pub fn daemon_command(spec: &DaemonSpec) -> Command {
    let mut cmd = Command::new(spec.path);
    cmd.args(spec.args);
    cmd
}

/// Start one daemon.
///
/// For daemons that must finish before boot continues (udevd forks and
/// exits once it is listening), this blocks until the child is gone.
pub fn launch<R: Reaper>(
    supervisor: &mut ProcessSupervisor<R>,
    spec: &DaemonSpec,
) -> Result<ChildHandle> {
    let handle = supervisor.spawn(spec.name, daemon_command(spec))?;

    if spec.wait {
        match supervisor.wait_for(&handle)? {
            Some(WaitResult::Exited(0)) | None => {}
            Some(result) => {
                warn!(daemon = spec.name, result = ?result, "Daemon exited with failure")
            }
        }
    }

    Ok(handle)
}

/// Start every daemon in `stage`, in order.
///
/// A daemon that cannot be started is reported and skipped; a missing
/// helper must not keep the installer from running.
pub fn start_stage<R: Reaper>(supervisor: &mut ProcessSupervisor<R>, stage: DaemonStage) -> Vec<ChildHandle> {
    start_daemons(supervisor, stage.daemons())
}

pub(crate) fn start_daemons<'a, R: Reaper>(
    supervisor: &mut ProcessSupervisor<R>,
    daemons: impl Iterator<Item = &'a DaemonSpec>,
) -> Vec<ChildHandle> {
    let mut started = Vec::new();

    for spec in daemons {
        info!(daemon = spec.name, "Starting {}", spec.name);
        match launch(supervisor, spec) {
            Ok(handle) => started.push(handle),
            Err(e) => error!(daemon = spec.name, error = %e, "Exec of {} failed", spec.path),
        }
    }

    started
}

/// Append a TCP forwarding rule for `addr` to the rsyslog configuration.
pub fn configure_syslog_forwarding(conf: &Path, addr: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(conf)?;
    writeln!(file, "*.* @@{}", addr)?;
    info!(target_addr = addr, "Enabled remote syslog forwarding");
    Ok(())
}

/// Stop the kernel from printing to the console; the logger takes over.
pub fn disable_console_logging() -> Result<()> {
    // SAFETY: action 8 (SYSLOG_ACTION_CONSOLE_LEVEL) ignores the buffer.
    let ret = unsafe { libc::klogctl(8, std::ptr::null_mut(), 1) };
    if ret < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Prepare logging and start the logger.
///
/// A failed forwarding setup only disables forwarding.
pub fn start_logging<R: Reaper>(
    supervisor: &mut ProcessSupervisor<R>,
    conf: &Path,
    syslog: Option<&str>,
) -> Vec<ChildHandle> {
    if let Some(addr) = syslog {
        if let Err(e) = configure_syslog_forwarding(conf, addr) {
            warn!(path = %conf.display(), error = %e, "syslog forwarding will not be enabled");
        }
    }

    if let Err(e) = disable_console_logging() {
        warn!(error = %e, "Failed to disable kernel console logging");
    }

    start_stage(supervisor, DaemonStage::Logging)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::ScriptedReaper;
    use nix::sys::wait::WaitStatus;
    use nix::unistd::Pid;
    use tempfile::TempDir;

    const TRUE_WAITING: DaemonSpec = DaemonSpec {
        name: "true",
        path: "/bin/true",
        args: &[],
        wait: true,
        stage: DaemonStage::DeviceEvents,
    };

    const MISSING: DaemonSpec = DaemonSpec {
        name: "missing",
        path: "/nonexistent/sbin/daemon",
        args: &["--daemon"],
        wait: false,
        stage: DaemonStage::DeviceEvents,
    };

    #[test]
    fn test_daemon_command_args() {
        let spec = config::DAEMONS[1];
        let cmd = daemon_command(&spec);

        assert_eq!(cmd.get_program(), "/sbin/udevadm");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, vec!["control", "--env=ANACONDA=1"]);
    }

    #[test]
    fn test_launch_waits_when_required() {
        let mut supervisor = ProcessSupervisor::new();

        let handle = launch(&mut supervisor, &TRUE_WAITING).unwrap();

        assert!(!supervisor.is_tracked(handle.pid));
    }

    #[test]
    fn test_failed_daemon_does_not_stop_the_stage() {
        let reaper = ScriptedReaper::new(vec![Ok(WaitStatus::Exited(Pid::from_raw(1), 0))]);
        let mut supervisor = ProcessSupervisor::with_reaper(reaper);
        let specs = [MISSING, TRUE_WAITING];

        let started = start_daemons(&mut supervisor, specs.iter());

        assert_eq!(started.len(), 1);
        assert_eq!(started[0].name, "true");
    }

    #[test]
    fn test_syslog_forwarding_appends() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("rsyslog.conf");
        std::fs::write(&conf, "*.* /tmp/syslog\n").unwrap();

        configure_syslog_forwarding(&conf, "10.0.0.1:514").unwrap();

        let contents = std::fs::read_to_string(&conf).unwrap();
        assert_eq!(contents, "*.* /tmp/syslog\n*.* @@10.0.0.1:514\n");
    }

    #[test]
    fn test_syslog_forwarding_needs_existing_config() {
        let dir = TempDir::new().unwrap();
        assert!(configure_syslog_forwarding(&dir.path().join("missing.conf"), "host").is_err());
    }
}
