//! Process exit control and console lockdown.
//!
//! Student programs must call [`exit`] instead of `std::process::exit`. While
//! exiting is disabled the call unwinds with a [`StudentExit`] payload, which the
//! runner turns into a reported failure rather than letting the program under
//! test terminate the grading process.

use std::sync::atomic::{AtomicBool, Ordering};

static EXIT_ENABLED: AtomicBool = AtomicBool::new(true);
static CONSOLE_CLEAR_ENABLED: AtomicBool = AtomicBool::new(true);
static ECHO_INPUT: AtomicBool = AtomicBool::new(false);

/// Panic payload raised by [`exit`] while exiting is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudentExit {
    pub status: i32,
}

impl StudentExit {
    /// The message recorded when a student program tries to exit.
    pub fn message(&self) -> String {
        format!(
            "Student tried to call exit({}) to exit their program. \
             They should not use this function; main should end through normal \
             program control flow. Edit their code to remove calls to exit() and \
             run again.",
            self.status
        )
    }
}

/// Terminate the process, or unwind with [`StudentExit`] if exiting is disabled.
pub fn exit(status: i32) -> ! {
    if is_exit_enabled() {
        std::process::exit(status);
    }
    tracing::warn!(status, "intercepted exit call from student code");
    std::panic::panic_any(StudentExit { status })
}

pub fn is_exit_enabled() -> bool {
    EXIT_ENABLED.load(Ordering::SeqCst)
}

/// Set the exit switch, returning its previous value.
pub fn set_exit_enabled(enabled: bool) -> bool {
    EXIT_ENABLED.swap(enabled, Ordering::SeqCst)
}

pub fn is_console_clear_enabled() -> bool {
    CONSOLE_CLEAR_ENABLED.load(Ordering::SeqCst)
}

/// Whether consoles created now copy the input lines they read into their output.
pub fn is_echo_input() -> bool {
    ECHO_INPUT.load(Ordering::SeqCst)
}

/// Clear the terminal for a student program, unless clearing is locked out.
///
/// Returns whether the console was cleared.
pub fn clear_console(out: &mut dyn std::io::Write) -> std::io::Result<bool> {
    if !is_console_clear_enabled() {
        return Ok(false);
    }
    out.write_all(b"\x1b[2J\x1b[H")?;
    out.flush()?;
    Ok(true)
}

/// Disables exiting until dropped, then restores the previous setting.
#[derive(Debug)]
pub struct ExitGuard {
    previous: bool,
}

impl ExitGuard {
    pub fn disable() -> Self {
        Self {
            previous: set_exit_enabled(false),
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        set_exit_enabled(self.previous);
    }
}

/// Locks down destructive console operations for an automated run.
///
/// While held, consoles echo the input they read so transcripts show it, and
/// console clearing and exiting are disabled. Everything is restored on drop.
#[derive(Debug)]
pub struct Lockdown {
    _exit: ExitGuard,
    clear: bool,
    echo: bool,
}

impl Lockdown {
    pub fn engage() -> Self {
        tracing::debug!("engaging console lockdown");
        Self {
            _exit: ExitGuard::disable(),
            clear: CONSOLE_CLEAR_ENABLED.swap(false, Ordering::SeqCst),
            echo: ECHO_INPUT.swap(true, Ordering::SeqCst),
        }
    }
}

impl Drop for Lockdown {
    fn drop(&mut self) {
        CONSOLE_CLEAR_ENABLED.store(self.clear, Ordering::SeqCst);
        ECHO_INPUT.store(self.echo, Ordering::SeqCst);
        tracing::debug!("released console lockdown");
    }
}
