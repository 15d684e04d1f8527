//! Child-process seam: launching and the handle the runner supervises.

use crate::command::CommandLine;
use crate::error::{PdalError, PdalResult};
use std::io::{self, PipeReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

#[cfg(test)]
use mockall::automock;

/// How a child ended. `Signal` only occurs on unix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Code(i32),
    Signal(i32),
}

impl ExitState {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitState::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitState::Signal(signal);
            }
        }
        ExitState::Code(-1)
    }

    /// Exit code with signals reported as their negated number.
    pub fn code(self) -> i32 {
        match self {
            ExitState::Code(code) => code,
            ExitState::Signal(signal) => -signal,
        }
    }

    pub fn success(self) -> bool {
        self == ExitState::Code(0)
    }
}

/// One running external process as seen by the runner.
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    /// Combined stdout/stderr. Returns `None` once taken.
    fn take_output(&mut self) -> Option<Box<dyn Read + Send>>;

    fn try_exit(&mut self) -> io::Result<Option<ExitState>>;

    /// Waits at most `timeout` for the process to end.
    fn wait_exit(&mut self, timeout: Duration) -> io::Result<Option<ExitState>>;

    fn kill(&mut self) -> io::Result<()>;
}

#[cfg_attr(test, automock)]
pub trait Launcher: Send + Sync {
    fn launch(&self, command: &CommandLine) -> PdalResult<Box<dyn ChildProcess>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run through `sh -c 'exec ...'` instead of executing the program
    /// directly. `exec` keeps the kill aimed at the tool, not the shell.
    pub use_shell: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            use_shell: cfg!(target_os = "macos"),
        }
    }
}

/// Spawns real processes with stdin closed and stdout/stderr sharing one
/// pipe.
#[derive(Debug, Default, Clone)]
pub struct SystemLauncher {
    pub options: LaunchOptions,
}

impl SystemLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    fn base_command(&self, command: &CommandLine) -> Command {
        if self.options.use_shell {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(format!("exec {}", command.to_shell_string()));
            cmd
        } else {
            let mut cmd = Command::new(command.program());
            cmd.args(command.args());
            cmd
        }
    }
}

impl Launcher for SystemLauncher {
    fn launch(&self, command: &CommandLine) -> PdalResult<Box<dyn ChildProcess>> {
        let launch_err = |source: io::Error| PdalError::Launch {
            program: command.program().to_string(),
            source,
        };

        let (output, writer) = io::pipe().map_err(launch_err)?;
        // The Command holds the parent's copies of the write end; it has to
        // be dropped right after spawning or the reader never sees EOF.
        let child = {
            let mut cmd = self.base_command(command);
            cmd.stdin(Stdio::null())
                .stdout(writer.try_clone().map_err(launch_err)?)
                .stderr(writer);
            hide_console(&mut cmd);
            cmd.spawn().map_err(launch_err)?
        };

        tracing::debug!(pid = child.id(), "spawned {command}");
        Ok(Box::new(SystemChild {
            child,
            output: Some(output),
        }))
    }
}

#[cfg(windows)]
fn hide_console(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console(_cmd: &mut Command) {}

struct SystemChild {
    child: Child,
    output: Option<PipeReader>,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.output
            .take()
            .map(|reader| Box::new(reader) as Box<dyn Read + Send>)
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitState>> {
        Ok(self.child.try_wait()?.map(ExitState::from_status))
    }

    fn wait_exit(&mut self, timeout: Duration) -> io::Result<Option<ExitState>> {
        Ok(self
            .child
            .wait_timeout(timeout)?
            .map(ExitState::from_status))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}
