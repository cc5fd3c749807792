//! Installer launch and supervision.
//!
//! Every orphan in the system is reparented to the init, so a reaped child
//! is not necessarily the installer. The supervision loop only ends the
//! session when the PID it collected is the installer's own.

use crate::error::Result;
use crate::process::{ChildHandle, ProcessSupervisor, Reaper, WaitResult};
use crate::shutdown::{ShutdownLatch, ShutdownRequest};
use crate::signals::{Event, EventSource};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Default installer binary.
pub const DEFAULT_INSTALLER: &str = "/sbin/loader";

/// How the installer is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerCommand {
    /// Installer binary
    pub program: PathBuf,
    /// Hypervisor console to hand over, if one was elected
    pub virtual_console: Option<PathBuf>,
    /// Development mode
    pub devel: bool,
    /// Full environment; nothing is inherited
    pub env: Vec<(&'static str, String)>,
}

impl InstallerCommand {
    /// Arguments after argv[0].
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(console) = &self.virtual_console {
            args.push("--virtpconsole".to_string());
            args.push(console.display().to_string());
        }

        if self.devel {
            args.push("--devel".to_string());
        }

        args
    }

    /// The command to spawn.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args()).env_clear().envs(self.env.iter().map(|(k, v)| (*k, v)));
        cmd
    }
}

/// Spawn the installer.
pub fn spawn_installer<R: Reaper>(
    supervisor: &mut ProcessSupervisor<R>,
    installer: &InstallerCommand,
) -> Result<ChildHandle> {
    info!(program = %installer.program.display(), "Running {}", installer.program.display());
    supervisor.spawn(&program_name(&installer.program), installer.command())
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

/// Why the install session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The installer exited
    InstallerExited(WaitResult),
    /// A shutdown signal arrived first
    Requested(ShutdownRequest),
}

/// Wait for the installer to exit or a shutdown request, whichever comes
/// first, recording the outcome in `latch`.
///
/// Children other than the installer are reaped and discarded.
pub async fn supervise<R: Reaper>(
    supervisor: &mut ProcessSupervisor<R>,
    installer: &ChildHandle,
    events: &mut dyn EventSource,
    latch: &ShutdownLatch,
) -> SessionEnd {
    loop {
        // Drain before waiting: the installer may already be gone
        for reaped in supervisor.reap_others() {
            if reaped.pid == installer.pid {
                latch.request(ShutdownRequest::from_exit(reaped.result));
                return SessionEnd::InstallerExited(reaped.result);
            }
            debug!(pid = reaped.pid.as_raw(), program = ?reaped.name, "Discarding non-installer child");
        }

        match events.next_event().await {
            Some(Event::ChildExited) => continue,
            Some(Event::Request(request)) => {
                if latch.request(request) {
                    return SessionEnd::Requested(request);
                }
            }
            None => {
                warn!("Signal delivery stopped, blocking on the installer");
                return wait_blocking(supervisor, installer, latch);
            }
        }
    }
}

fn wait_blocking<R: Reaper>(
    supervisor: &mut ProcessSupervisor<R>,
    installer: &ChildHandle,
    latch: &ShutdownLatch,
) -> SessionEnd {
    // An unknown exit status is treated as a failed install
    let result = match supervisor.wait_for(installer) {
        Ok(Some(result)) => result,
        Ok(None) => {
            warn!(pid = installer.pid.as_raw(), "Installer was reaped elsewhere, exit status unknown");
            WaitResult::Exited(1)
        }
        Err(e) => {
            warn!(error = %e, "Lost track of the installer");
            WaitResult::Exited(1)
        }
    };

    latch.request(ShutdownRequest::from_exit(result));
    SessionEnd::InstallerExited(result)
}
