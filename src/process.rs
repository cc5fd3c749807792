//! Process management for the installer init.
//!
//! This module handles spawning and reaping children. The init is PID 1, so
//! every orphan in the system ends up as its child; the supervisor keeps a
//! table of the children it started so reaped PIDs can be attributed.

use crate::error::{Error, Result};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Command;
use tracing::{debug, error, info};

/// A child started by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildHandle {
    /// Process ID
    pub pid: Pid,
    /// Program name, for diagnostics
    pub name: String,
}

/// Typed result of waiting on a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Exited with a status code
    Exited(i32),
    /// Terminated by a signal
    Signaled(Signal),
    /// Has not exited yet
    StillRunning,
}

impl WaitResult {
    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        matches!(self, WaitResult::Exited(0))
    }
}

/// A child collected by [`ProcessSupervisor::reap_others`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaped {
    /// Process ID
    pub pid: Pid,
    /// Name, if the child was started by the supervisor
    pub name: Option<String>,
    /// How it ended
    pub result: WaitResult,
}

/// The wait(2) family, behind a seam so tests can script exits.
pub trait Reaper {
    /// waitpid(2).
    fn waitpid(&mut self, pid: Pid, flags: Option<WaitPidFlag>) -> nix::Result<WaitStatus>;
}

/// Reaps real children.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysReaper;

impl Reaper for SysReaper {
    fn waitpid(&mut self, pid: Pid, flags: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
        waitpid(pid, flags)
    }
}

/// Process supervisor that owns the table of started children.
pub struct ProcessSupervisor<R: Reaper = SysReaper> {
    reaper: R,
    children: HashMap<Pid, String>,
}

impl ProcessSupervisor<SysReaper> {
    /// Create a supervisor for real children.
    pub fn new() -> Self {
        Self::with_reaper(SysReaper)
    }
}

impl Default for ProcessSupervisor<SysReaper> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Reaper> ProcessSupervisor<R> {
    /// Create a supervisor with a custom reaper.
    pub fn with_reaper(reaper: R) -> Self {
        Self {
            reaper,
            children: HashMap::new(),
        }
    }

    /// Spawn `cmd` without waiting for it.
    ///
    /// An exec failure surfaces here as an error; the parent keeps going.
    pub fn spawn(&mut self, name: &str, mut cmd: Command) -> Result<ChildHandle> {
        let child = cmd.spawn().map_err(|e| Error::ProcessSpawnFailed {
            program: name.to_string(),
            reason: e.to_string(),
        })?;

        // Dropping the std handle neither kills nor waits; reaping is ours
        let pid = Pid::from_raw(child.id() as i32);
        info!(program = name, pid = pid.as_raw(), "Spawned process");

        Ok(self.track(pid, name))
    }

    /// Start tracking an already running child.
    pub fn track(&mut self, pid: Pid, name: &str) -> ChildHandle {
        self.children.insert(pid, name.to_string());
        ChildHandle {
            pid,
            name: name.to_string(),
        }
    }

    /// Whether `pid` is a child the supervisor started and has not reaped.
    pub fn is_tracked(&self, pid: Pid) -> bool {
        self.children.contains_key(&pid)
    }

    /// Block until `handle` exits.
    ///
    /// Interrupted waits are retried. `None` means the child was already
    /// collected by another wait, which is a lost race rather than an error.
    pub fn wait_for(&mut self, handle: &ChildHandle) -> Result<Option<WaitResult>> {
        loop {
            match self.reaper.waitpid(handle.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.children.remove(&handle.pid);
                    return Ok(Some(WaitResult::Exited(code)));
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    self.children.remove(&handle.pid);
                    return Ok(Some(WaitResult::Signaled(sig)));
                }
                Ok(_) => continue,
                Err(nix::Error::EINTR) => continue,
                Err(nix::Error::ECHILD) => {
                    debug!(program = %handle.name, pid = handle.pid.as_raw(), "Child already reaped");
                    self.children.remove(&handle.pid);
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::WaitFailed {
                        pid: handle.pid.as_raw(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Check on `handle` without blocking.
    pub fn try_wait(&mut self, handle: &ChildHandle) -> Result<Option<WaitResult>> {
        match self.reaper.waitpid(handle.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(Some(WaitResult::StillRunning)),
            Ok(WaitStatus::Exited(_, code)) => {
                self.children.remove(&handle.pid);
                Ok(Some(WaitResult::Exited(code)))
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                self.children.remove(&handle.pid);
                Ok(Some(WaitResult::Signaled(sig)))
            }
            Ok(_) => Ok(Some(WaitResult::StillRunning)),
            Err(nix::Error::ECHILD) => {
                self.children.remove(&handle.pid);
                Ok(None)
            }
            Err(e) => Err(Error::WaitFailed {
                pid: handle.pid.as_raw(),
                reason: e.to_string(),
            }),
        }
    }

    /// Collect every child that has exited so far, without blocking.
    pub fn reap_others(&mut self) -> Vec<Reaped> {
        let mut reaped = Vec::new();

        loop {
            let (pid, result) = match self.reaper.waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => (pid, WaitResult::Exited(code)),
                Ok(WaitStatus::Signaled(pid, sig, _)) => (pid, WaitResult::Signaled(sig)),
                Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => break,
                Ok(_) | Err(nix::Error::EINTR) => continue,
                Err(e) => {
                    error!(error = %e, "Error reaping children");
                    break;
                }
            };

            let name = self.children.remove(&pid);
            debug!(pid = pid.as_raw(), program = ?name, result = ?result, "Reaped process");
            reaped.push(Reaped { pid, name, result });
        }

        reaped
    }
}
