use loader_init::pidfile::{read_pid_file, write_pid_file};
use loader_init::{signal_supervisor, AuxCommand, Error, KillSender, Result, SignalSender};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::cell::RefCell;
use std::process::Command;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSender {
    sent: RefCell<Vec<(Pid, Signal)>>,
}

impl SignalSender for RecordingSender {
    fn send(&self, pid: Pid, signal: Signal) -> Result<()> {
        self.sent.borrow_mut().push((pid, signal));
        Ok(())
    }
}

#[test]
fn test_round_trip_sends_matching_signal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("init.pid");
    write_pid_file(&path, 4321).unwrap();

    for (command, expected) in [
        (AuxCommand::Halt, Signal::SIGUSR1),
        (AuxCommand::Poweroff, Signal::SIGUSR2),
        (AuxCommand::Reboot, Signal::SIGINT),
    ] {
        let sender = RecordingSender::default();

        let pid = signal_supervisor(&path, command, &sender).unwrap();

        assert_eq!(pid, Pid::from_raw(4321));
        assert_eq!(*sender.sent.borrow(), vec![(Pid::from_raw(4321), expected)]);
    }
}

#[test]
fn test_missing_pid_file_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let sender = RecordingSender::default();

    let result = signal_supervisor(&dir.path().join("init.pid"), AuxCommand::Halt, &sender);

    assert!(matches!(result, Err(Error::PidFile { .. })));
    assert!(sender.sent.borrow().is_empty());
}

#[test]
fn test_signal_reaches_recorded_process() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("init.pid");
    let child = Command::new("sleep").arg("30").spawn().unwrap();
    write_pid_file(&path, child.id()).unwrap();

    let pid = signal_supervisor(&path, AuxCommand::Poweroff, &KillSender).unwrap();

    assert_eq!(read_pid_file(&path).unwrap(), pid);
    assert_eq!(
        waitpid(pid, None).unwrap(),
        WaitStatus::Signaled(pid, Signal::SIGUSR2, false)
    );
}
