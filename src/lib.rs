//! Loader init - PID 1 for the installation environment.
//!
//! This crate brings an installer environment from kernel boot to a running
//! installation session and back down again. It handles:
//!
//! - Pseudo-filesystem mounting with unbounded retries
//! - Static device nodes and a memory-sized `/tmp`
//! - Console election among serial, hypervisor and virtual terminals
//! - Helper daemons (udev, rsyslog, D-Bus)
//! - Installer supervision and zombie reaping
//! - Ctrl-Alt-Del, halt and poweroff routed into a single shutdown path
//!
//! # Architecture
//!
//! - **Init**: Runs the boot sequence and owns the shutdown decision
//! - **ProcessSupervisor**: Spawns and reaps children
//! - **ShutdownLatch**: Records the first shutdown request, ignores the rest
//! - **SignalEvents**: Turns signals into events for the main control flow
//!
//! # Example
//!
//! ```no_run
//! use loader_init::{Init, InitConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut init = Init::new(InitConfig::default())?;
//!     init.run().await?;
//!     Ok(())
//! }
//! ```

pub mod console;
pub mod context;
pub mod daemons;
pub mod devices;
pub mod error;
pub mod init;
pub mod install;
pub mod memory;
pub mod mount;
pub mod pidfile;
pub mod process;
pub mod shutdown;
pub mod signals;
pub mod tty;

// Re-export main types
pub use context::{BootContext, FinalizedContext};
pub use error::{Error, Result};
pub use init::{create_test_init, Init, InitConfig};
pub use pidfile::{signal_supervisor, AuxCommand, KillSender, SignalSender};
pub use process::{ChildHandle, ProcessSupervisor, WaitResult};
pub use shutdown::{ShutdownLatch, ShutdownRequest};
