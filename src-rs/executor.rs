//! The pipeline-executor algorithm: skip check, validation run, real run.

use crate::command::{CommandBuilder, CommandLine, Phase, PipelineRequest};
use crate::error::{PdalError, PdalResult};
use crate::feedback::Feedback;
use crate::metadata::{InfoQuery, MemoizedMetadata};
use crate::runner::ProcessRunner;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Parameters as the host form collects them.
#[derive(Debug, Clone, Default)]
pub struct ExecutorParams {
    pub input1: Option<PathBuf>,
    pub input2: Option<PathBuf>,
    /// Raw text from the form; may carry drag-and-drop debris.
    pub pipeline: String,
    pub skip_if_exists: bool,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Skipped,
    Cancelled,
    Planned,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub output: Option<PathBuf>,
    pub status: RunStatus,
    pub commands: Vec<CommandLine>,
}

pub struct PipelineExecutor {
    builder: CommandBuilder,
    runner: ProcessRunner,
}

impl PipelineExecutor {
    pub fn new(builder: CommandBuilder, runner: ProcessRunner) -> Self {
        Self { builder, runner }
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn execute(
        &self,
        params: &ExecutorParams,
        feedback: &dyn Feedback,
        dry_run: bool,
    ) -> PdalResult<PipelineRun> {
        if params.skip_if_exists {
            if let Some(output) = params.output.as_deref().filter(|o| o.is_file()) {
                feedback.push_info(&format!(
                    "Skipped step because output file already exists: {}",
                    output.display()
                ));
                return Ok(PipelineRun {
                    output: Some(output.to_path_buf()),
                    status: RunStatus::Skipped,
                    commands: Vec::new(),
                });
            }
        }

        let mut commands = Vec::new();
        let status = match self.run_phases(params, feedback, dry_run, &mut commands) {
            Ok(status) => status,
            Err(err) if err.is_cancelled() => {
                feedback.push_info(&err.to_string());
                RunStatus::Cancelled
            }
            Err(err) => return Err(err),
        };

        Ok(PipelineRun {
            output: params.output.clone(),
            status,
            commands,
        })
    }

    fn run_phases(
        &self,
        params: &ExecutorParams,
        feedback: &dyn Feedback,
        dry_run: bool,
        commands: &mut Vec<CommandLine>,
    ) -> PdalResult<RunStatus> {
        let request = PipelineRequest {
            input1: params.input1.clone(),
            input2: params.input2.clone(),
            pipeline: normalize_pipeline_path(&params.pipeline)?,
            output: params.output.clone(),
        };
        let metadata = MemoizedMetadata::new(InfoQuery {
            builder: &self.builder,
            runner: &self.runner,
            feedback,
        });

        let validate = self.builder.pipeline(Phase::Validate, &request, &metadata)?;
        let execute = self.builder.pipeline(Phase::Execute, &request, &metadata)?;
        commands.push(validate.clone());
        commands.push(execute.clone());

        if dry_run {
            return Ok(RunStatus::Planned);
        }

        tracing::info!("validating pipeline {}", request.pipeline.display());
        self.runner.run(&validate, feedback)?;

        if feedback.is_cancelled() {
            return Err(PdalError::Cancelled {
                command: execute,
                log: String::new(),
            });
        }

        tracing::info!("executing pipeline {}", request.pipeline.display());
        self.runner.run(&execute, feedback)?;
        Ok(RunStatus::Completed)
    }
}

/// Trims whitespace and line endings and strips a `file://` prefix, as left
/// behind by drag and drop.
pub fn normalize_pipeline_path(raw: &str) -> PdalResult<PathBuf> {
    let trimmed = raw.trim().trim_end_matches(['\r', '\n']);
    let trimmed = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(PdalError::InvalidInput(
            "a pipeline definition file is required".to_string(),
        ));
    }
    Ok(Path::new(trimmed).to_path_buf())
}
