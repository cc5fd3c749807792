//! Loader-init static configuration
//!
//! This crate holds the fixed tables the installer init consults while it
//! brings the installation environment up:
//!
//! - [`cmdline`]: Kernel boot parameters (`/proc/cmdline`)
//! - [`platform`]: Per-architecture console and library profiles
//! - [`environment`]: Environment handed to the installer
//! - [`daemons`]: The helper daemons started before the installer
//!
//! # Quick Start
//!
//! ```rust
//! use loader_init_config::{BootParams, Platform};
//!
//! let params = BootParams::parse("root=/dev/sda1 utf8 nokill");
//! assert!(params.utf8);
//! assert!(!params.force_kill());
//!
//! let profile = Platform::current().profile();
//! println!("console candidates: {:?}", profile.console_candidates);
//! ```

pub mod cmdline;
pub mod daemons;
pub mod environment;
pub mod platform;

pub use cmdline::BootParams;
pub use daemons::{DaemonSpec, DaemonStage, DAEMONS};
pub use environment::installer_environment;
pub use platform::{Platform, PlatformProfile};
