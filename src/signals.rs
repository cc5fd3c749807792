//! Signal delivery as events.
//!
//! Signals never run teardown code directly. Each one is turned into an
//! [`Event`] that the main control flow picks up, records in the shutdown
//! latch and acts on.

use crate::context::FinalizedContext;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownRequest;
use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::fs;
use std::path::Path;
use tokio::signal::unix::{signal, Signal as SignalStream, SignalKind};
use tracing::{debug, info, warn};

/// Something the supervisor has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A child changed state; time to reap
    ChildExited,
    /// An operator or auxiliary invocation asked for a shutdown
    Request(ShutdownRequest),
}

impl Event {
    /// Event raised by `signal`, if the init listens for it.
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGINT => Some(Event::Request(ShutdownRequest::Reboot)),
            Signal::SIGUSR1 => Some(Event::Request(ShutdownRequest::Halt)),
            Signal::SIGUSR2 => Some(Event::Request(ShutdownRequest::Poweroff)),
            Signal::SIGCHLD => Some(Event::ChildExited),
            _ => None,
        }
    }
}

/// Source of supervisor events.
#[async_trait]
pub trait EventSource {
    /// Wait for the next event. `None` once no more can arrive.
    async fn next_event(&mut self) -> Option<Event>;
}

/// Events backed by real signal streams.
pub struct SignalEvents {
    interrupt: SignalStream,
    halt: SignalStream,
    poweroff: SignalStream,
    child: SignalStream,
}

impl SignalEvents {
    /// Start listening for SIGINT, SIGUSR1, SIGUSR2 and SIGCHLD.
    ///
    /// Takes the finalized context so that nothing can subscribe before the
    /// state the shutdown path reads has been published.
    pub fn install(context: &FinalizedContext) -> Result<Self> {
        let stream = |kind: SignalKind| {
            signal(kind).map_err(|e| Error::SignalError(format!("failed to register handler: {}", e)))
        };

        let events = Self {
            interrupt: stream(SignalKind::interrupt())?,
            halt: stream(SignalKind::user_defined1())?,
            poweroff: stream(SignalKind::user_defined2())?,
            child: stream(SignalKind::child())?,
        };

        debug!(console = %context.console().device.display(), "Signal handlers installed");
        Ok(events)
    }
}

#[async_trait]
impl EventSource for SignalEvents {
    async fn next_event(&mut self) -> Option<Event> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Event::from_signal(Signal::SIGINT),
            Some(()) = self.halt.recv() => Event::from_signal(Signal::SIGUSR1),
            Some(()) = self.poweroff.recv() => Event::from_signal(Signal::SIGUSR2),
            Some(()) = self.child.recv() => Event::from_signal(Signal::SIGCHLD),
            else => None,
        }
    }
}

/// Have the kernel send Ctrl-Alt-Del to `pid` as SIGINT instead of
/// rebooting on the spot.
///
/// `kernel` is the `/proc/sys/kernel` directory. The hard reboot is only
/// turned off once the PID was accepted.
pub fn route_ctrl_alt_del(kernel: &Path, pid: u32) -> Result<()> {
    fs::write(kernel.join("cad_pid"), pid.to_string())?;
    fs::write(kernel.join("ctrl-alt-del"), "0")?;
    info!(pid, "Ctrl-Alt-Delete routed to init");
    Ok(())
}

/// Like [`route_ctrl_alt_del`], but only warns on failure.
pub fn try_route_ctrl_alt_del(kernel: &Path, pid: u32) {
    if let Err(e) = route_ctrl_alt_del(kernel, pid) {
        warn!(error = %e, "Unable to route Ctrl-Alt-Delete, the kernel will reboot directly");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Replays a fixed list of events, then reports the source closed.
    pub(crate) struct ScriptedEvents {
        events: VecDeque<Event>,
    }

    impl ScriptedEvents {
        pub(crate) fn new(events: Vec<Event>) -> Self {
            Self {
                events: events.into(),
            }
        }

        pub(crate) fn remaining(&self) -> usize {
            self.events.len()
        }
    }

    #[async_trait]
    impl EventSource for ScriptedEvents {
        async fn next_event(&mut self) -> Option<Event> {
            self.events.pop_front()
        }
    }

    #[test]
    fn test_signal_mapping() {
        assert_eq!(
            Event::from_signal(Signal::SIGINT),
            Some(Event::Request(ShutdownRequest::Reboot))
        );
        assert_eq!(
            Event::from_signal(Signal::SIGUSR1),
            Some(Event::Request(ShutdownRequest::Halt))
        );
        assert_eq!(
            Event::from_signal(Signal::SIGUSR2),
            Some(Event::Request(ShutdownRequest::Poweroff))
        );
        assert_eq!(Event::from_signal(Signal::SIGCHLD), Some(Event::ChildExited));
        assert_eq!(Event::from_signal(Signal::SIGHUP), None);
    }

    #[test]
    fn test_route_ctrl_alt_del() {
        let kernel = TempDir::new().unwrap();

        route_ctrl_alt_del(kernel.path(), 1).unwrap();

        assert_eq!(fs::read_to_string(kernel.path().join("cad_pid")).unwrap(), "1");
        assert_eq!(fs::read_to_string(kernel.path().join("ctrl-alt-del")).unwrap(), "0");
    }

    #[test]
    fn test_route_ctrl_alt_del_keeps_hard_reboot_on_failure() {
        let kernel = TempDir::new().unwrap();
        let missing = kernel.path().join("missing");

        assert!(route_ctrl_alt_del(&missing, 1).is_err());
        assert!(!missing.join("ctrl-alt-del").exists());
    }
}
