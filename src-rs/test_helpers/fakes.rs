use crate::command::CommandLine;
use crate::error::{PdalError, PdalResult};
use crate::feedback::Feedback;
use crate::process::{ChildProcess, ExitState, Launcher};
use std::collections::VecDeque;
use std::io::{self, Cursor, PipeWriter, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A fake child driven by the runner's own polling: every `try_exit` call
/// is one tick of its clock.
pub struct ScriptedChild {
    output: Option<Box<dyn Read + Send>>,
    writer: Option<PipeWriter>,
    pending: VecDeque<String>,
    exit_after_polls: usize,
    exit_code: i32,
    ignore_kill_polls: usize,
    kill_exit: ExitState,
    killed: bool,
    kills: Arc<AtomicUsize>,
    polls: usize,
    exited: Option<ExitState>,
}

impl ScriptedChild {
    /// All output is already buffered and the process exits on the first
    /// poll.
    pub fn finished(output: &str, exit_code: i32) -> Self {
        Self::base(
            Box::new(Cursor::new(output.as_bytes().to_vec())),
            None,
            &[],
            1,
            exit_code,
        )
    }

    /// Writes one line per poll and exits with `exit_code` after
    /// `exit_after_polls` polls unless killed first.
    pub fn live(lines: &[&str], exit_after_polls: usize, exit_code: i32) -> Self {
        let (reader, writer) = io::pipe().expect("Failed to create pipe");
        Self::base(
            Box::new(reader),
            Some(writer),
            lines,
            exit_after_polls,
            exit_code,
        )
    }

    fn base(
        output: Box<dyn Read + Send>,
        writer: Option<PipeWriter>,
        lines: &[&str],
        exit_after_polls: usize,
        exit_code: i32,
    ) -> Self {
        Self {
            output: Some(output),
            writer,
            pending: lines.iter().map(|l| l.to_string()).collect(),
            exit_after_polls,
            exit_code,
            ignore_kill_polls: 0,
            kill_exit: ExitState::Signal(9),
            killed: false,
            kills: Arc::new(AtomicUsize::new(0)),
            polls: 0,
            exited: None,
        }
    }

    /// Keep running for `polls` more polls after being killed.
    pub fn ignore_kill_for(mut self, polls: usize) -> Self {
        self.ignore_kill_polls = polls;
        self
    }

    /// Exit state reported once the kill takes effect.
    pub fn kill_exit(mut self, state: ExitState) -> Self {
        self.kill_exit = state;
        self
    }

    pub fn kill_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.kills)
    }

    fn tick(&mut self) -> io::Result<Option<ExitState>> {
        if let Some(state) = self.exited {
            return Ok(Some(state));
        }
        self.polls += 1;

        if let Some(writer) = self.writer.as_mut() {
            if let Some(line) = self.pending.pop_front() {
                writeln!(writer, "{line}")?;
            }
        }

        let state = if self.killed {
            if self.ignore_kill_polls == 0 {
                Some(self.kill_exit)
            } else {
                self.ignore_kill_polls -= 1;
                None
            }
        } else if self.polls >= self.exit_after_polls {
            Some(ExitState::Code(self.exit_code))
        } else {
            None
        };

        if let Some(state) = state {
            // closes the pipe, like a real process dying
            self.writer = None;
            self.exited = Some(state);
        }
        Ok(state)
    }
}

impl ChildProcess for ScriptedChild {
    fn id(&self) -> u32 {
        4242
    }

    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.output.take()
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitState>> {
        self.tick()
    }

    fn wait_exit(&mut self, timeout: Duration) -> io::Result<Option<ExitState>> {
        let state = self.tick()?;
        if state.is_none() {
            thread::sleep(timeout.min(Duration::from_millis(10)));
        }
        Ok(state)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.killed = true;
        Ok(())
    }
}

/// Hands out scripted children in order and records every command.
pub struct ScriptedLauncher {
    children: Mutex<VecDeque<ScriptedChild>>,
    launched: Mutex<Vec<CommandLine>>,
}

impl ScriptedLauncher {
    pub fn with(children: Vec<ScriptedChild>) -> Arc<Self> {
        Arc::new(Self {
            children: Mutex::new(children.into()),
            launched: Mutex::new(Vec::new()),
        })
    }

    pub fn launched(&self) -> Vec<CommandLine> {
        self.launched.lock().unwrap().clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, command: &CommandLine) -> PdalResult<Box<dyn ChildProcess>> {
        self.launched.lock().unwrap().push(command.clone());
        match self.children.lock().unwrap().pop_front() {
            Some(child) => Ok(Box::new(child)),
            None => Err(PdalError::Launch {
                program: command.program().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no scripted child left"),
            }),
        }
    }
}

/// Records pushed lines; can report cancellation after a number of them.
#[derive(Default)]
pub struct RecordingFeedback {
    lines: Mutex<Vec<String>>,
    cancel_after: Option<usize>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled once `count` lines (command lines included) were pushed.
    pub fn cancel_after_lines(count: usize) -> Self {
        Self {
            cancel_after: Some(count),
            ..Self::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Feedback for RecordingFeedback {
    fn is_cancelled(&self) -> bool {
        self.cancel_after
            .is_some_and(|n| self.lines.lock().unwrap().len() >= n)
    }

    fn push_info(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
