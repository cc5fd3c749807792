//! Error types for the installer init.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for init operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while booting or shutting down.
#[derive(Error, Debug)]
pub enum Error {
    /// Mount error
    #[error("Mount error: {source_path} -> {target}: {reason}")]
    MountError {
        source_path: String,
        target: String,
        reason: String,
    },

    /// Process spawn error
    #[error("Failed to spawn {program}: {reason}")]
    ProcessSpawnFailed { program: String, reason: String },

    /// Wait error other than the benign races
    #[error("Error waiting on PID {pid}: {reason}")]
    WaitFailed { pid: i32, reason: String },

    /// Terminal setup error
    #[error("Terminal error on {device}: {reason}")]
    TerminalError { device: String, reason: String },

    /// Console could not be opened
    #[error("Failed to open console {0}")]
    ConsoleUnavailable(String),

    /// PID file missing or unreadable
    #[error("Unable to find pid of init in {path}: {reason}")]
    PidFile { path: PathBuf, reason: String },

    /// Signal error
    #[error("Signal error: {0}")]
    SignalError(String),

    /// Not running as PID 1
    #[error("Not running as PID 1 (current PID: {0})")]
    NotPid1(u32),

    /// Boot cannot continue
    #[error("Fatal: {0}")]
    Fatal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Shorthand for a [`Error::TerminalError`].
    pub fn terminal(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::TerminalError {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}
