//! Host collaborator: cancellation check plus a sink for console lines.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub trait Feedback {
    fn is_cancelled(&self) -> bool;

    /// Receives every subprocess output line, in order, plus the runner's
    /// own notices (command lines, skips, parse problems).
    fn push_info(&self, line: &str);
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Routes SIGINT into a flag instead of terminating, so the running child
/// gets killed and its output drained before we exit.
#[cfg(unix)]
pub fn install_interrupt_handler() {
    extern "C" fn on_sigint(_: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    let previous = unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        )
    };
    if previous == libc::SIG_ERR {
        tracing::warn!("could not install SIGINT handler; Ctrl-C will not cancel cleanly");
    }
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() {}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Terminal implementation: output lines go to stderr (stdout carries the
/// JSON report), cancellation comes from Ctrl-C or an optional deadline.
pub struct ConsoleFeedback {
    deadline: Option<Instant>,
    quiet: bool,
    timed_out: AtomicBool,
}

impl ConsoleFeedback {
    pub fn new(timeout: Option<Duration>, quiet: bool) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            quiet,
            timed_out: AtomicBool::new(false),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

impl Feedback for ConsoleFeedback {
    fn is_cancelled(&self) -> bool {
        if interrupted() {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                if !self.timed_out.swap(true, Ordering::SeqCst) {
                    tracing::warn!("timeout reached, cancelling");
                }
                true
            }
            _ => false,
        }
    }

    fn push_info(&self, line: &str) {
        if self.quiet {
            return;
        }
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{line}");
    }
}
