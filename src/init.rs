//! Init system core - boot sequence and PID 1 duties.

use crate::console::{self, Console};
use crate::context::{BootContext, FinalizedContext};
use crate::daemons::{self, DEFAULT_RSYSLOG_CONF};
use crate::devices;
use crate::error::{Error, Result};
use crate::install::{self, InstallerCommand, SessionEnd, DEFAULT_INSTALLER};
use crate::memory::{self, TmpfsSize, DEFAULT_MEMINFO_PATH};
use crate::mount::{self, SysMounter, ThreadSleeper};
use crate::pidfile::{self, DEFAULT_PID_FILE};
use crate::process::{ChildHandle, ProcessSupervisor};
use crate::shutdown::{self, ShutdownLatch, ShutdownRequest, SystemPower};
use crate::signals::{self, EventSource, SignalEvents};
use crate::tty;
use config::cmdline::DEFAULT_CMDLINE_PATH;
use config::{BootParams, DaemonStage, Platform, PlatformProfile};
use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};
use nix::sys::stat::{umask, Mode};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause after starting the message bus so it is listening before the
/// installer looks for it.
const MESSAGE_BUS_SETTLE: Duration = Duration::from_secs(2);

/// Pause after a failed PID file write, so the message stays on screen.
const PID_FILE_FAILURE_PAUSE: Duration = Duration::from_secs(2);

/// Init system configuration.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Kernel command line
    pub cmdline_path: PathBuf,
    /// Kernel memory report
    pub meminfo_path: PathBuf,
    /// Where the init records its PID
    pub pid_file: PathBuf,
    /// rsyslog configuration receiving the forwarding rule
    pub rsyslog_conf: PathBuf,
    /// `/proc/sys/kernel`, for Ctrl-Alt-Del routing
    pub kernel_sysctl: PathBuf,
    /// Root of the filesystem holding `/tmp`
    pub root: PathBuf,
    /// Installer binary
    pub installer: PathBuf,
    /// Shell for development mode
    pub shell: PathBuf,
    /// Platform profile
    pub platform: Platform,
    /// Extra positional arguments (`serial`, `rescue`)
    pub args: Vec<String>,
    /// Whether to mount virtual filesystems
    pub mount_filesystems: bool,
    /// Whether to enforce PID 1 requirement
    pub require_pid1: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            cmdline_path: PathBuf::from(DEFAULT_CMDLINE_PATH),
            meminfo_path: PathBuf::from(DEFAULT_MEMINFO_PATH),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            rsyslog_conf: PathBuf::from(DEFAULT_RSYSLOG_CONF),
            kernel_sysctl: PathBuf::from("/proc/sys/kernel"),
            root: PathBuf::from("/"),
            installer: PathBuf::from(DEFAULT_INSTALLER),
            shell: PathBuf::from("/sbin/bash"),
            platform: Platform::current(),
            args: Vec::new(),
            mount_filesystems: true,
            require_pid1: true,
        }
    }
}

/// The installer init.
pub struct Init {
    /// Configuration
    config: InitConfig,
    /// Platform behaviour, resolved once
    profile: PlatformProfile,
    /// Child processes
    supervisor: ProcessSupervisor,
    /// Final shutdown decision
    latch: ShutdownLatch,
}

impl Init {
    /// Create a new init system.
    pub fn new(config: InitConfig) -> Result<Self> {
        // Check if we're PID 1
        let pid = std::process::id();
        if config.require_pid1 && pid != 1 {
            return Err(Error::NotPid1(pid));
        }

        let profile = config.platform.profile();

        Ok(Self {
            config,
            profile,
            supervisor: ProcessSupervisor::new(),
            latch: ShutdownLatch::new(),
        })
    }

    /// Run the init system. Only returns when not running as PID 1 or on
    /// platforms that do not spin on fatal errors.
    pub async fn run(&mut self) -> Result<()> {
        let context = match self.boot() {
            Ok(context) => context,
            Err(e) => return self.fatal(e).await,
        };

        let mut events = SignalEvents::install(&context)?;
        signals::try_route_ctrl_alt_del(&self.config.kernel_sysctl, std::process::id());

        let force_kill = match self.start_installer(&context) {
            Ok(installer) => {
                let end = install::supervise(&mut self.supervisor, &installer, &mut events, &self.latch).await;
                let mut teardown = SystemTeardown {
                    context: &context,
                    supervisor: &mut self.supervisor,
                    shell: &self.config.shell,
                };
                finish_session(end, context.devel(), &mut teardown);
                context.force_kill()
            }
            Err(e) => {
                error!(error = %e, "Unable to run the installer");
                self.latch.request(ShutdownRequest::Halt);
                shutdown::reset_terminal(context.saved_termios());
                true
            }
        };

        self.shutdown(&mut events, force_kill).await
    }

    /// Everything up to the point where the installer can start.
    fn boot(&mut self) -> Result<FinalizedContext> {
        print_raw(tty::UNBLANK_SEQUENCE);
        umask(Mode::from_bits_truncate(0o022));

        info!("Installer init version {} starting", env!("CARGO_PKG_VERSION"));

        if self.config.mount_filesystems {
            self.prepare_filesystems();
        }

        let params = self.boot_params();
        let mut context = BootContext::new(params);

        // Make a coredump if the installer dies suddenly
        if let Err(e) = setrlimit(Resource::RLIMIT_CORE, RLIM_INFINITY, RLIM_INFINITY) {
            warn!(error = %e, "setrlimit() failed. No coredumps will be available.");
        }

        info!("Starting udev...");
        daemons::start_stage(&mut self.supervisor, DaemonStage::DeviceEvents);
        info!("done");

        let console = self.setup_console(context.params())?;
        context.set_console(console);

        set_host_identity();

        if self.config.mount_filesystems {
            mount::remount_root(&SysMounter)?;
            let size = TmpfsSize::for_memory(memory::total_memory(&self.config.meminfo_path));
            let report = mount::relocate_tmp(&SysMounter, &self.config.root, size)?;
            if report.failed > 0 {
                warn!(failed = report.failed, "Some files could not be copied to the new /tmp");
            }
        }

        daemons::start_logging(
            &mut self.supervisor,
            &self.config.rsyslog_conf,
            context.params().syslog.as_deref(),
        );

        if let Err(e) = pidfile::write_pid_file(&self.config.pid_file, std::process::id()) {
            error!(error = %e, "Unable to write init.pid");
            std::thread::sleep(PID_FILE_FAILURE_PAUSE);
        }

        daemons::start_stage(&mut self.supervisor, DaemonStage::MessageBus);
        std::thread::sleep(MESSAGE_BUS_SETTLE);

        context.finalize()
    }

    fn prepare_filesystems(&self) {
        info!("Mounting virtual filesystems");
        mount::mount_pseudo_filesystems(&SysMounter, &ThreadSleeper);

        info!("Creating devices in /dev...");
        let report = devices::create_devices(Path::new("/dev"));
        info!(created = report.created, failed = report.failed, "done");
    }

    fn boot_params(&self) -> BootParams {
        let mut params = match std::fs::read_to_string(&self.config.cmdline_path) {
            Ok(cmdline) => BootParams::parse(&cmdline),
            Err(e) => {
                warn!(path = %self.config.cmdline_path.display(), error = %e, "Unable to read boot parameters");
                BootParams::default()
            }
        };
        params.merge_args(&self.config.args);
        params
    }

    fn setup_console(&self, params: &BootParams) -> Result<Console> {
        if !self.config.require_pid1 {
            // A test run keeps the terminal it was started from
            return Ok(inherited_console());
        }

        let console = console::configure_console(&self.profile, params)?;
        info!(device = %console.device.display(), term = console.term, "Console ready");
        Ok(console)
    }

    fn start_installer(&mut self, context: &FinalizedContext) -> Result<ChildHandle> {
        let console = context.console();
        let installer = InstallerCommand {
            program: self.config.installer.clone(),
            virtual_console: console.is_virtual().then(|| console.device.clone()),
            devel: context.devel(),
            env: config::installer_environment(self.profile.lib64, console.term),
        };

        info!("Running install...");
        install::spawn_installer(&mut self.supervisor, &installer)
    }

    async fn shutdown(&self, events: &mut dyn EventSource, force_kill: bool) -> Result<()> {
        let action = self.latch.get().unwrap_or(ShutdownRequest::Reboot);
        let power = SystemPower::new(self.config.require_pid1);
        shutdown::perform_shutdown(&power, events, force_kill, action).await
    }

    /// Report a boot failure and, where the platform wants it, stay up so
    /// the message remains visible.
    async fn fatal(&self, e: Error) -> Result<()> {
        for line in fatal_report(&e) {
            error!("{}", line);
        }

        if !(self.profile.spins_on_fatal && self.config.require_pid1) {
            return Err(e);
        }

        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

/// Console and shell effects at the end of the install session.
trait SessionTeardown {
    /// Back to VT 1 with the saved terminal attributes
    fn reset_terminal(&mut self);
    /// Put `/dev/console` back the way the kernel left it
    fn restore_system_console(&mut self);
    /// Development-mode shell, returns when it exits
    fn debug_shell(&mut self);
}

struct SystemTeardown<'a> {
    context: &'a FinalizedContext,
    supervisor: &'a mut ProcessSupervisor,
    shell: &'a Path,
}

impl SessionTeardown for SystemTeardown<'_> {
    fn reset_terminal(&mut self) {
        shutdown::reset_terminal(self.context.saved_termios());
    }

    fn restore_system_console(&mut self) {
        if let Err(e) = self.context.console().restore_system_console() {
            error!(error = %e, "Failed to restore /dev/console");
        }
    }

    fn debug_shell(&mut self) {
        shutdown::run_debug_shell(self.supervisor, self.shell);
    }
}

/// Reset the terminal as soon as the session ends, then report an abnormal
/// installer exit.
fn finish_session(end: SessionEnd, devel: bool, teardown: &mut dyn SessionTeardown) {
    teardown.reset_terminal();

    let result = match end {
        SessionEnd::InstallerExited(result) if !result.success() => result,
        SessionEnd::InstallerExited(_) => return,
        SessionEnd::Requested(request) => {
            info!(action = %request, "Shutdown requested while the installer was running");
            return;
        }
    };

    teardown.restore_system_console();
    error!("{}", shutdown::abnormal_exit_message(result));

    if devel {
        teardown.debug_shell();
    }
}

/// Lines logged for an error the boot cannot continue past.
fn fatal_report(e: &Error) -> [String; 2] {
    [format!("failed: {}", e), "I can't recover from this.".to_string()]
}

/// The terminal the init was started from, used when not PID 1.
fn inherited_console() -> Console {
    Console {
        device: PathBuf::from(console::SYSTEM_CONSOLE),
        class: console::ConsoleClass::Vt,
        term: config::environment::DEFAULT_TERM,
        saved: tty::get_attr(libc::STDIN_FILENO).ok(),
        system_console: None,
    }
}

/// `localhost.localdomain`, empty domain name.
fn set_host_identity() {
    if let Err(e) = nix::unistd::sethostname("localhost.localdomain") {
        warn!(error = %e, "Failed to set hostname");
    }

    // SAFETY: a zero-length name never dereferences the pointer.
    if unsafe { libc::setdomainname(b"\0".as_ptr().cast(), 0) } < 0 {
        warn!(error = %std::io::Error::last_os_error(), "Failed to set domain name");
    }
}

fn print_raw(sequence: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(sequence.as_bytes());
    let _ = stdout.flush();
}

/// Create an init for running outside PID 1: nothing is mounted and the
/// power primitives only log.
pub fn create_test_init(installer: PathBuf) -> Result<Init> {
    let config = InitConfig {
        installer,
        mount_filesystems: false,
        require_pid1: false,
        ..InitConfig::default()
    };
    Init::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::WaitResult;
    use nix::sys::signal::Signal;

    #[test]
    fn test_default_paths() {
        let config = InitConfig::default();
        assert_eq!(config.pid_file, PathBuf::from("/var/run/init.pid"));
        assert_eq!(config.installer, PathBuf::from("/sbin/loader"));
        assert_eq!(config.rsyslog_conf, PathBuf::from("/etc/rsyslog.conf"));
        assert!(config.require_pid1);
    }

    #[test]
    fn test_new_requires_pid1() {
        let result = Init::new(InitConfig::default());
        // The test harness is never PID 1
        assert!(matches!(result, Err(Error::NotPid1(_))));
    }

    #[test]
    fn test_boot_params_merge_args() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmdline = dir.path().join("cmdline");
        std::fs::write(&cmdline, "root=/dev/sda1 utf8 devel\n").unwrap();

        let mut init = create_test_init(PathBuf::from("/bin/true")).unwrap();
        init.config.cmdline_path = cmdline;
        init.config.args = vec!["rescue".to_string()];

        let params = init.boot_params();
        assert!(params.utf8);
        assert!(params.devel);
        assert!(params.rescue);
        assert!(!params.serial);
    }

    #[test]
    fn test_missing_cmdline_uses_defaults() {
        let mut init = create_test_init(PathBuf::from("/bin/true")).unwrap();
        init.config.cmdline_path = PathBuf::from("/nonexistent/cmdline");

        assert_eq!(init.boot_params(), BootParams::default());
    }

    #[test]
    fn test_missing_installer_fails_to_spawn() {
        let mut init = create_test_init(PathBuf::from("/nonexistent/loader")).unwrap();
        let mut context = BootContext::new(BootParams::default());
        context.set_console(inherited_console());
        let context = context.finalize().unwrap();

        assert!(init.start_installer(&context).is_err());
    }

    #[derive(Default)]
    struct RecordingTeardown {
        steps: Vec<&'static str>,
    }

    impl SessionTeardown for RecordingTeardown {
        fn reset_terminal(&mut self) {
            self.steps.push("reset");
        }

        fn restore_system_console(&mut self) {
            self.steps.push("restore");
        }

        fn debug_shell(&mut self) {
            self.steps.push("shell");
        }
    }

    #[test]
    fn test_terminal_reset_before_debug_shell() {
        let mut teardown = RecordingTeardown::default();
        finish_session(SessionEnd::InstallerExited(WaitResult::Exited(1)), true, &mut teardown);
        assert_eq!(teardown.steps, vec!["reset", "restore", "shell"]);

        let mut teardown = RecordingTeardown::default();
        finish_session(SessionEnd::InstallerExited(WaitResult::Signaled(Signal::SIGSEGV)), false, &mut teardown);
        assert_eq!(teardown.steps, vec!["reset", "restore"]);
    }

    #[test]
    fn test_clean_session_end_only_resets() {
        for end in [
            SessionEnd::InstallerExited(WaitResult::Exited(0)),
            SessionEnd::Requested(ShutdownRequest::Halt),
        ] {
            let mut teardown = RecordingTeardown::default();
            finish_session(end, true, &mut teardown);
            assert_eq!(teardown.steps, vec!["reset"]);
        }
    }

    #[tokio::test]
    async fn test_fatal_reports_unrecoverable() {
        let init = create_test_init(PathBuf::from("/bin/true")).unwrap();
        let error = Error::NotPid1(42);

        let report = fatal_report(&error);
        assert_eq!(report[1], "I can't recover from this.");
        assert!(report[0].starts_with("failed"));

        // Outside PID 1 the error is handed back instead of spinning
        assert!(matches!(init.fatal(error).await, Err(Error::NotPid1(42))));
    }
}
