//! Error taxonomy shared by the command builder, the runner and the executor.

use crate::command::CommandLine;
use thiserror::Error;

pub type PdalResult<T> = Result<T, PdalError>;

#[derive(Debug, Error)]
pub enum PdalError {
    /// A required parameter is missing, points nowhere, or the input
    /// combination makes no sense.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The external program could not be started at all.
    #[error("failed to launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited with a nonzero status.
    #[error("failed execution of command {command} with return code: {code}")]
    ToolFailure {
        code: i32,
        command: CommandLine,
        log: String,
    },

    /// Terminated because the host asked for it.
    #[error("command {command} has been cancelled")]
    Cancelled { command: CommandLine, log: String },

    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PdalError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PdalError::Cancelled { .. })
    }

    /// Short machine-readable tag used in JSON reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PdalError::InvalidInput(_) => "invalid_input",
            PdalError::Launch { .. } => "launch_error",
            PdalError::ToolFailure { .. } => "tool_failure",
            PdalError::Cancelled { .. } => "cancelled",
            PdalError::MetadataUnavailable(_) => "metadata_unavailable",
            PdalError::MalformedMetadata(_) => "malformed_metadata",
            PdalError::Io(_) => "io",
        }
    }
}
