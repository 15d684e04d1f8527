//! Supervision loop: launch, forward output, honour cancellation, classify
//! the exit.

use crate::command::CommandLine;
use crate::drain::{LinePoll, StreamDrainer};
use crate::error::{PdalError, PdalResult};
use crate::feedback::Feedback;
use crate::process::{ChildProcess, ExitState, Launcher};
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(i32),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub command: CommandLine,
    pub log: String,
    pub outcome: Outcome,
}

pub struct ProcessRunner {
    launcher: Arc<dyn Launcher>,
    poll_interval: Duration,
}

impl ProcessRunner {
    pub fn new(launcher: Arc<dyn Launcher>, poll_interval: Duration) -> Self {
        Self {
            launcher,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Like [`ProcessRunner::supervise`], but a nonzero exit becomes
    /// `ToolFailure` and a cancelled run becomes `Cancelled`. Both keep the
    /// output collected so far.
    pub fn run(&self, command: &CommandLine, feedback: &dyn Feedback) -> PdalResult<Execution> {
        let execution = self.supervise(command, feedback)?;
        match execution.outcome {
            Outcome::Succeeded => Ok(execution),
            Outcome::Cancelled => Err(PdalError::Cancelled {
                command: execution.command,
                log: execution.log,
            }),
            Outcome::Failed(code) => Err(PdalError::ToolFailure {
                code,
                command: execution.command,
                log: execution.log,
            }),
        }
    }

    /// Runs `command` to completion. Errors only when the process cannot be
    /// started or polled; every exit, including a cancelled one, yields an
    /// [`Execution`].
    pub fn supervise(
        &self,
        command: &CommandLine,
        feedback: &dyn Feedback,
    ) -> PdalResult<Execution> {
        feedback.push_info(&command.to_string());

        let mut child = self.launcher.launch(command)?;
        let pid = child.id();
        let drainer = match child.take_output() {
            Some(output) => StreamDrainer::spawn(output),
            None => Err(io::Error::other("child process has no output stream")),
        };
        let drainer = match drainer {
            Ok(drainer) => drainer,
            Err(err) => {
                let _ = child.kill();
                return Err(PdalError::Io(err));
            }
        };

        let mut session = Session {
            child,
            feedback,
            log: String::new(),
            kill_sent: false,
            pid,
        };
        let (state, stream_closed) = session.wait_for_exit(&drainer, self.poll_interval)?;
        let stream_closed = stream_closed || session.drain_remaining(&drainer, self.poll_interval);

        if stream_closed {
            drainer.finish();
        } else {
            tracing::debug!(pid, "output still open after exit, leaving reader detached");
        }

        let outcome = if session.kill_sent {
            Outcome::Cancelled
        } else if state.success() {
            Outcome::Succeeded
        } else {
            Outcome::Failed(state.code())
        };
        match outcome {
            Outcome::Succeeded => tracing::debug!(pid, "{command} succeeded"),
            Outcome::Cancelled => tracing::info!(pid, "{command} cancelled"),
            Outcome::Failed(code) => tracing::warn!(pid, code, "{command} failed"),
        }

        Ok(Execution {
            command: command.clone(),
            log: session.log,
            outcome,
        })
    }
}

struct Session<'a> {
    child: Box<dyn ChildProcess>,
    feedback: &'a dyn Feedback,
    log: String,
    kill_sent: bool,
    pid: u32,
}

impl Session<'_> {
    fn check_cancel(&mut self) {
        if self.kill_sent || !self.feedback.is_cancelled() {
            return;
        }
        tracing::info!(pid = self.pid, "cancellation requested, killing process");
        if let Err(err) = self.child.kill() {
            tracing::warn!(pid = self.pid, "kill failed: {err}");
        }
        self.kill_sent = true;
    }

    fn forward(&mut self, line: String) {
        self.feedback.push_info(&line);
        self.log.push_str(&line);
        self.log.push('\n');
    }

    /// Polls until the process exits. Returns the exit state and whether the
    /// output stream already reached end-of-file.
    fn wait_for_exit(
        &mut self,
        drainer: &StreamDrainer,
        poll: Duration,
    ) -> PdalResult<(ExitState, bool)> {
        loop {
            self.check_cancel();
            match drainer.take_line(poll) {
                LinePoll::Line(line) => self.forward(line),
                LinePoll::Pending => {}
                LinePoll::Closed => break,
            }
            if let Some(state) = self.child.try_exit()? {
                return Ok((state, false));
            }
        }

        // Output is done but the process has not exited yet.
        loop {
            self.check_cancel();
            if let Some(state) = self.child.wait_exit(poll)? {
                return Ok((state, true));
            }
        }
    }

    /// Output can lag the exit, so keep reading until the queue stays empty
    /// for a whole poll interval or the stream ends. Returns true when the
    /// stream ended.
    fn drain_remaining(&mut self, drainer: &StreamDrainer, poll: Duration) -> bool {
        loop {
            match drainer.take_line(poll) {
                LinePoll::Line(line) => self.forward(line),
                LinePoll::Pending => return false,
                LinePoll::Closed => return true,
            }
        }
    }
}
