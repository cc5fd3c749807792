//! Boot state shared with the shutdown path.
//!
//! [`BootContext`] is filled in step by step while the system comes up.
//! Once everything the shutdown path needs is known it is turned into a
//! [`FinalizedContext`], which is immutable; signal handling can only be
//! installed from one of those.

use crate::console::{Console, ConsoleClass};
use crate::error::{Error, Result};
use crate::tty::SavedTermios;
use config::BootParams;

/// Boot state under construction.
#[derive(Debug, Default)]
pub struct BootContext {
    params: BootParams,
    console: Option<Console>,
}

impl BootContext {
    /// Start from the parsed boot parameters.
    pub fn new(params: BootParams) -> Self {
        Self {
            params,
            console: None,
        }
    }

    /// Boot parameters.
    pub fn params(&self) -> &BootParams {
        &self.params
    }

    /// Record the elected console.
    pub fn set_console(&mut self, console: Console) {
        self.console = Some(console);
    }

    /// Freeze the context. Fails if no console was recorded.
    pub fn finalize(self) -> Result<FinalizedContext> {
        let console = self
            .console
            .ok_or_else(|| Error::Fatal("boot context finalized without a console".to_string()))?;

        Ok(FinalizedContext {
            params: self.params,
            console,
        })
    }
}

/// Boot state after publication.
#[derive(Debug)]
pub struct FinalizedContext {
    params: BootParams,
    console: Console,
}

impl FinalizedContext {
    /// Boot parameters.
    pub fn params(&self) -> &BootParams {
        &self.params
    }

    /// Elected console.
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Whether the console is a serial line or hypervisor console.
    pub fn is_serial(&self) -> bool {
        self.console.class != ConsoleClass::Vt
    }

    /// Terminal attributes to put back on shutdown.
    pub fn saved_termios(&self) -> Option<&SavedTermios> {
        self.console.saved.as_ref()
    }

    /// Whether development mode is on.
    pub fn devel(&self) -> bool {
        self.params.devel
    }

    /// Whether remaining processes are killed before the power action.
    pub fn force_kill(&self) -> bool {
        self.params.force_kill()
    }
}
