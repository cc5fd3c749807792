//! Shutdown state machine and the final power action.
//!
//! Four things can end a session: the installer exiting, Ctrl-Alt-Del
//! (SIGINT), `halt` (SIGUSR1) and `poweroff` (SIGUSR2). Whichever is
//! observed first is recorded in a [`ShutdownLatch`] and every later one is
//! ignored. The teardown itself runs on the main control flow, never inside
//! a signal handler.

use crate::error::Result;
use crate::process::{ProcessSupervisor, Reaper, WaitResult};
use crate::signals::{Event, EventSource};
use crate::tty::{self, SavedTermios};
use nix::sys::reboot::{reboot, RebootMode};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Final action for the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownRequest {
    /// Reboot immediately
    Reboot = 1,
    /// Halt
    Halt = 2,
    /// Power off
    Poweroff = 3,
    /// Wait for Ctrl-Alt-Del, then reboot
    DelayedReboot = 4,
}

impl ShutdownRequest {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ShutdownRequest::Reboot),
            2 => Some(ShutdownRequest::Halt),
            3 => Some(ShutdownRequest::Poweroff),
            4 => Some(ShutdownRequest::DelayedReboot),
            _ => None,
        }
    }

    /// Map an installer exit to the action it asks for.
    pub fn from_exit(result: WaitResult) -> Self {
        if result.success() {
            ShutdownRequest::Reboot
        } else {
            ShutdownRequest::DelayedReboot
        }
    }

    /// reboot(2) mode performing this action.
    pub fn reboot_mode(self) -> RebootMode {
        match self {
            ShutdownRequest::Reboot | ShutdownRequest::DelayedReboot => RebootMode::RB_AUTOBOOT,
            ShutdownRequest::Halt => RebootMode::RB_HALT_SYSTEM,
            ShutdownRequest::Poweroff => RebootMode::RB_POWER_OFF,
        }
    }
}

impl std::fmt::Display for ShutdownRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShutdownRequest::Reboot => "reboot",
            ShutdownRequest::Halt => "halt",
            ShutdownRequest::Poweroff => "poweroff",
            ShutdownRequest::DelayedReboot => "delayed reboot",
        };
        f.write_str(name)
    }
}

/// Write-once holder for the shutdown decision.
#[derive(Debug, Default)]
pub struct ShutdownLatch(AtomicU8);

impl ShutdownLatch {
    /// An unset latch.
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Record `request` unless something was recorded already.
    ///
    /// Returns whether this call won.
    pub fn request(&self, request: ShutdownRequest) -> bool {
        let won = self
            .0
            .compare_exchange(0, request as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            info!(action = %request, "Shutdown requested");
        } else {
            info!(action = %request, "Shutdown already in progress, ignoring request");
        }
        won
    }

    /// The recorded decision, if any.
    pub fn get(&self) -> Option<ShutdownRequest> {
        ShutdownRequest::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Whether a decision has been recorded.
    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

/// Switch to the first VT, restore the console mode and reset the screen.
///
/// Runs on every shutdown path. Failures are logged; the machine is going
/// down regardless.
pub fn reset_terminal(saved: Option<&SavedTermios>) {
    if let Err(e) = tty::activate_vt(libc::STDIN_FILENO, 1) {
        debug!(error = %e, "VT switch failed");
    }

    if let Some(saved) = saved {
        if let Err(e) = tty::set_attr(libc::STDIN_FILENO, saved) {
            warn!(error = %e, "Failed to restore terminal attributes");
        }
    }

    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(tty::RESET_SEQUENCE.as_bytes());
    let _ = stdout.flush();
}

/// Describe an abnormal installer exit the way operators expect to read it.
pub fn abnormal_exit_message(result: WaitResult) -> String {
    match result {
        WaitResult::Exited(code) => format!("Install exited abnormally [1/{}]", code),
        WaitResult::Signaled(sig) => {
            format!("Install exited abnormally [0/0] -- received signal {}", sig as i32)
        }
        WaitResult::StillRunning => "Install exited abnormally".to_string(),
    }
}

/// Run a shell on the console and wait for it.
pub fn run_debug_shell<R: Reaper>(supervisor: &mut ProcessSupervisor<R>, shell: &Path) {
    info!("Development mode requested spawning shell...");

    match supervisor.spawn("shell", Command::new(shell)) {
        Ok(handle) => {
            if let Err(e) = supervisor.wait_for(&handle) {
                warn!(error = %e, "Waiting for debug shell failed");
            }
        }
        Err(e) => error!(error = %e, "Execution of debug shell failed"),
    }
}

/// Power management operations used by the final shutdown.
pub trait PowerControl {
    /// Flush filesystem buffers.
    fn sync(&self);

    /// Send `signal` to every process except the caller.
    fn signal_all(&self, signal: Signal) -> Result<()>;

    /// Wait for processes to react.
    fn pause(&self, duration: Duration);

    /// Perform the power action. Only returns on failure.
    fn reboot(&self, mode: RebootMode) -> Result<()>;
}

/// The real power primitives.
///
/// When not running as PID 1 the destructive calls are logged and skipped.
#[derive(Debug, Clone, Copy)]
pub struct SystemPower {
    armed: bool,
}

impl SystemPower {
    /// Create the primitive; `armed` enables the destructive calls.
    pub fn new(armed: bool) -> Self {
        Self { armed }
    }
}

impl PowerControl for SystemPower {
    fn sync(&self) {
        // SAFETY: sync(2) has no preconditions.
        unsafe {
            libc::sync();
        }
    }

    fn signal_all(&self, signal: Signal) -> Result<()> {
        if !self.armed {
            info!(signal = ?signal, "Not PID 1, skipping signal to all processes");
            return Ok(());
        }
        kill(Pid::from_raw(-1), signal)?;
        Ok(())
    }

    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn reboot(&self, mode: RebootMode) -> Result<()> {
        if !self.armed {
            info!(mode = ?mode, "Not PID 1, skipping reboot");
            return Ok(());
        }
        reboot(mode)?;
        Ok(())
    }
}

/// Take the system down.
///
/// With `force_kill`, every remaining process is sent SIGTERM and then
/// SIGKILL first. A delayed reboot waits for Ctrl-Alt-Del before
/// rebooting.
pub async fn perform_shutdown(
    power: &dyn PowerControl,
    events: &mut dyn EventSource,
    force_kill: bool,
    action: ShutdownRequest,
) -> Result<()> {
    power.sync();

    if force_kill {
        info!("Sending termination signals...");
        if let Err(e) = power.signal_all(Signal::SIGTERM) {
            warn!(error = %e, "Failed to send SIGTERM");
        }
        power.pause(KILL_GRACE_PERIOD);

        info!("Sending kill signals...");
        if let Err(e) = power.signal_all(Signal::SIGKILL) {
            warn!(error = %e, "Failed to send SIGKILL");
        }
        power.pause(KILL_GRACE_PERIOD / 2);
    }

    power.sync();

    if action == ShutdownRequest::DelayedReboot {
        println!("The system will be rebooted when you press Ctrl-C or Ctrl-Alt-Delete.");
        wait_for_ctrl_alt_del(events).await;
    }

    info!(action = %action, "Performing shutdown");
    power.reboot(action.reboot_mode())
}

async fn wait_for_ctrl_alt_del(events: &mut dyn EventSource) {
    while let Some(event) = events.next_event().await {
        if event == Event::Request(ShutdownRequest::Reboot) {
            return;
        }
    }
    warn!("Signal delivery stopped, rebooting now");
}
