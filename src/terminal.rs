//! Local terminal mode handling.
//!
//! Raw mode is a process-wide setting on the controlling terminal. The exec
//! bridge takes it through [`RawModeGuard`], which puts back whatever mode was
//! active before, on every exit path including early returns and aborts.

use std::io::{self, IsTerminal};
use std::sync::Arc;

/// Access to the controlling terminal's input mode.
pub trait TerminalMode: Send + Sync {
    /// Whether raw mode is currently enabled.
    fn is_raw(&self) -> io::Result<bool>;

    /// Enable or disable raw mode.
    fn set_raw(&self, raw: bool) -> io::Result<()>;

    /// Terminal size as `(columns, rows)`, if there is a terminal.
    fn size(&self) -> Option<(u16, u16)>;
}

/// The real controlling terminal, via crossterm.
///
/// When stdin is not a terminal (pipes, CI) every mode change is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct CrosstermTerminal {
    interactive: bool,
}

impl CrosstermTerminal {
    pub fn detect() -> Self {
        Self {
            interactive: io::stdin().is_terminal(),
        }
    }
}

impl TerminalMode for CrosstermTerminal {
    fn is_raw(&self) -> io::Result<bool> {
        if !self.interactive {
            return Ok(false);
        }
        crossterm::terminal::is_raw_mode_enabled()
    }

    fn set_raw(&self, raw: bool) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }
        if raw {
            crossterm::terminal::enable_raw_mode()
        } else {
            crossterm::terminal::disable_raw_mode()
        }
    }

    fn size(&self) -> Option<(u16, u16)> {
        if !self.interactive {
            return None;
        }
        crossterm::terminal::size().ok()
    }
}

/// Scoped raw mode. Restores the prior mode when dropped.
pub struct RawModeGuard {
    terminal: Arc<dyn TerminalMode>,
    was_raw: bool,
}

impl RawModeGuard {
    /// Record the current mode and switch to raw.
    pub fn acquire(terminal: Arc<dyn TerminalMode>) -> io::Result<Self> {
        let was_raw = terminal.is_raw()?;
        if !was_raw {
            terminal.set_raw(true)?;
        }
        tracing::debug!(was_raw, "Raw mode acquired");
        Ok(Self { terminal, was_raw })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.was_raw {
            return;
        }
        if let Err(e) = self.terminal.set_raw(false) {
            tracing::warn!("Failed to restore terminal mode: {}", e);
        } else {
            tracing::debug!("Terminal mode restored");
        }
    }
}

/// In-memory terminal for tests: records every mode change.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingTerminal {
        raw: Mutex<bool>,
        pub transitions: Mutex<Vec<bool>>,
    }

    impl RecordingTerminal {
        pub fn starting_raw(raw: bool) -> Self {
            Self {
                raw: Mutex::new(raw),
                transitions: Mutex::new(Vec::new()),
            }
        }

        pub fn raw_now(&self) -> bool {
            *self.raw.lock().unwrap()
        }
    }

    impl TerminalMode for RecordingTerminal {
        fn is_raw(&self) -> io::Result<bool> {
            Ok(self.raw_now())
        }

        fn set_raw(&self, raw: bool) -> io::Result<()> {
            *self.raw.lock().unwrap() = raw;
            self.transitions.lock().unwrap().push(raw);
            Ok(())
        }

        fn size(&self) -> Option<(u16, u16)> {
            Some((120, 40))
        }
    }
}
