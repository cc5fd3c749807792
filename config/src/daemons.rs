//! Helper daemons started before the installer.

/// Point in the boot sequence at which a daemon is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStage {
    /// Device event manager, right after the pseudo-filesystems
    DeviceEvents,
    /// System logger, once /tmp is writable
    Logging,
    /// Message bus, after the PID file is written
    MessageBus,
}

/// A daemon to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonSpec {
    /// Short name for logging
    pub name: &'static str,
    /// Executable path
    pub path: &'static str,
    /// Arguments, not including argv[0]
    pub args: &'static [&'static str],
    /// Block until this child exits before continuing
    pub wait: bool,
    /// When to start it
    pub stage: DaemonStage,
}

/// Every helper daemon, in start order.
pub const DAEMONS: &[DaemonSpec] = &[
    DaemonSpec {
        name: "udevd",
        path: "/sbin/udevd",
        args: &["--daemon"],
        wait: true,
        stage: DaemonStage::DeviceEvents,
    },
    DaemonSpec {
        name: "udevadm",
        path: "/sbin/udevadm",
        args: &["control", "--env=ANACONDA=1"],
        wait: false,
        stage: DaemonStage::DeviceEvents,
    },
    DaemonSpec {
        name: "rsyslogd",
        path: "/sbin/rsyslogd",
        args: &[],
        wait: false,
        stage: DaemonStage::Logging,
    },
    DaemonSpec {
        name: "dbus-uuidgen",
        path: "/sbin/dbus-uuidgen",
        args: &["--ensure"],
        wait: false,
        stage: DaemonStage::MessageBus,
    },
    DaemonSpec {
        name: "dbus-daemon",
        path: "/sbin/dbus-daemon",
        args: &["--system"],
        wait: false,
        stage: DaemonStage::MessageBus,
    },
];

impl DaemonStage {
    /// Daemons belonging to this stage, in start order.
    pub fn daemons(self) -> impl Iterator<Item = &'static DaemonSpec> {
        DAEMONS.iter().filter(move |d| d.stage == self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_events_waits_for_udevd_first() {
        let stage: Vec<_> = DaemonStage::DeviceEvents.daemons().collect();
        assert_eq!(stage.len(), 2);
        assert_eq!(stage[0].name, "udevd");
        assert!(stage[0].wait);
        assert!(!stage[1].wait);
    }

    #[test]
    fn test_only_udevd_blocks() {
        let waiting: Vec<_> = DAEMONS.iter().filter(|d| d.wait).map(|d| d.name).collect();
        assert_eq!(waiting, vec!["udevd"]);
    }

    #[test]
    fn test_message_bus_order() {
        let names: Vec<_> = DaemonStage::MessageBus.daemons().map(|d| d.name).collect();
        assert_eq!(names, vec!["dbus-uuidgen", "dbus-daemon"]);
    }
}
