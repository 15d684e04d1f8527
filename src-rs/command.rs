//! Command-line assembly for `pdal pipeline` and `pdal info`.

use crate::driver::{detect_writer_kind, WriterKind};
use crate::error::{PdalError, PdalResult};
use crate::metadata::{first_reader_filename, MetadataProvider};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Reader stage targeted when a single input overrides the pipeline.
const SINGLE_READER_STAGE: &str = "las";

/// An immutable argv: program first, then arguments in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Single string for `sh -c`, every word single-quoted.
    pub fn to_shell_string(&self) -> String {
        self.argv()
            .into_iter()
            .map(quote_sh)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

fn quote_sh(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", word.replace('\'', "'\"'\"'"))
}

/// Which of the two pipeline invocations is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Execute,
}

impl Phase {
    pub fn option(self) -> &'static str {
        match self {
            Phase::Validate => "--validate",
            Phase::Execute => "--verbose=8",
        }
    }
}

/// Inputs of one pipeline-executor invocation.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub input1: Option<PathBuf>,
    pub input2: Option<PathBuf>,
    pub pipeline: PathBuf,
    pub output: Option<PathBuf>,
}

pub struct CommandBuilder {
    program: String,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn info_metadata(&self, file: &Path) -> CommandLine {
        CommandLine::new(
            self.program.clone(),
            [
                "info".to_string(),
                "--metadata".to_string(),
                file.display().to_string(),
            ],
        )
    }

    pub fn pipeline(
        &self,
        phase: Phase,
        request: &PipelineRequest,
        metadata: &dyn MetadataProvider,
    ) -> PdalResult<CommandLine> {
        ensure_pipeline_file(&request.pipeline)?;

        let mut args = vec![
            "pipeline".to_string(),
            phase.option().to_string(),
            "-i".to_string(),
            request.pipeline.display().to_string(),
        ];
        args.extend(input_overrides(
            request.input1.as_deref(),
            request.input2.as_deref(),
        )?);

        if let Some(output) = request.output.as_deref() {
            let writer = detect_writer_kind(output)?;
            args.push(format!(
                "--writers.{}.filename={}",
                writer.stage_name(),
                output.display()
            ));

            // The gdal writer is not streamable in every PDAL release and
            // needs explicit bounds.
            if writer == WriterKind::Gdal {
                let source = bounds_source(request)?;
                let bounds = metadata.bounds(&source)?;
                args.push(format!(
                    "--writers.{}.bounds={}",
                    writer.stage_name(),
                    bounds.to_option_value()
                ));
            }
        }

        Ok(CommandLine::new(self.program.clone(), args))
    }
}

fn ensure_pipeline_file(pipeline: &Path) -> PdalResult<()> {
    if pipeline.as_os_str().is_empty() {
        return Err(PdalError::InvalidInput(
            "a pipeline definition file is required".to_string(),
        ));
    }
    if !pipeline.is_file() {
        return Err(PdalError::InvalidInput(format!(
            "pipeline definition is not an existing file: {}",
            pipeline.display()
        )));
    }
    Ok(())
}

fn input_overrides(input1: Option<&Path>, input2: Option<&Path>) -> PdalResult<Vec<String>> {
    match (input1, input2) {
        (Some(first), Some(second)) => Ok(vec![
            format!("--stage.input1.filename={}", first.display()),
            format!("--stage.input2.filename={}", second.display()),
        ]),
        (Some(first), None) => Ok(vec![format!(
            "--readers.{SINGLE_READER_STAGE}.filename={}",
            first.display()
        )]),
        (None, None) => Ok(Vec::new()),
        (None, Some(_)) => Err(PdalError::InvalidInput(
            "no point cloud input given, or the first input has to be set".to_string(),
        )),
    }
}

fn bounds_source(request: &PipelineRequest) -> PdalResult<PathBuf> {
    if let Some(first) = &request.input1 {
        return Ok(first.clone());
    }
    first_reader_filename(&request.pipeline)
}

/// Treat an empty string as "not given".
pub fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Bounds, MockMetadataProvider};
    use crate::test_helpers::TestContext;

    const PIPELINE: &str = r#"{"pipeline": ["in.las", {"type": "writers.las"}]}"#;

    fn no_metadata() -> MockMetadataProvider {
        let mut provider = MockMetadataProvider::new();
        provider.expect_bounds().never();
        provider
    }

    fn request(ctx: &TestContext) -> PipelineRequest {
        PipelineRequest {
            pipeline: ctx.create_file("pipe.json", PIPELINE),
            ..Default::default()
        }
    }

    fn count_prefix(cmd: &CommandLine, prefix: &str) -> usize {
        cmd.args().iter().filter(|a| a.starts_with(prefix)).count()
    }

    #[test]
    fn validate_command_starts_with_phase_and_pipeline() {
        let ctx = TestContext::new();
        let req = request(&ctx);
        let cmd = CommandBuilder::new("pdal")
            .pipeline(Phase::Validate, &req, &no_metadata())
            .unwrap();
        assert_eq!(cmd.program(), "pdal");
        assert_eq!(
            &cmd.args()[..4],
            &[
                "pipeline".to_string(),
                "--validate".to_string(),
                "-i".to_string(),
                req.pipeline.display().to_string()
            ]
        );
        assert_eq!(cmd.args().len(), 4);
    }

    #[test]
    fn two_inputs_use_indexed_stage_overrides_only() {
        let ctx = TestContext::new();
        let mut req = request(&ctx);
        req.input1 = Some(PathBuf::from("/data/a.las"));
        req.input2 = Some(PathBuf::from("/data/b.las"));
        let cmd = CommandBuilder::new("pdal")
            .pipeline(Phase::Execute, &req, &no_metadata())
            .unwrap();
        assert!(cmd
            .args()
            .contains(&"--stage.input1.filename=/data/a.las".to_string()));
        assert!(cmd
            .args()
            .contains(&"--stage.input2.filename=/data/b.las".to_string()));
        assert_eq!(count_prefix(&cmd, "--readers."), 0);
        assert_eq!(cmd.args()[1], "--verbose=8");
    }

    #[test]
    fn single_or_no_input_never_mixes_override_styles() {
        let ctx = TestContext::new();
        for input1 in [None, Some(PathBuf::from("/data/a.laz"))] {
            let mut req = request(&ctx);
            req.input1 = input1.clone();
            let cmd = CommandBuilder::new("pdal")
                .pipeline(Phase::Execute, &req, &no_metadata())
                .unwrap();
            let stage = count_prefix(&cmd, "--stage.");
            let reader = count_prefix(&cmd, "--readers.");
            assert!(!(stage > 0 && reader > 0));
            assert_eq!(reader, usize::from(input1.is_some()));
        }
    }

    #[test]
    fn second_input_without_first_is_invalid() {
        let ctx = TestContext::new();
        let mut req = request(&ctx);
        req.input2 = Some(PathBuf::from("/data/b.las"));
        let err = CommandBuilder::new("pdal")
            .pipeline(Phase::Validate, &req, &no_metadata())
            .unwrap_err();
        assert!(matches!(err, PdalError::InvalidInput(_)));
    }

    #[test]
    fn missing_or_directory_pipeline_is_invalid() {
        let ctx = TestContext::new();
        for pipeline in [PathBuf::new(), ctx.path("nope.json"), ctx.create_dir("dir")] {
            let req = PipelineRequest {
                pipeline,
                ..Default::default()
            };
            let err = CommandBuilder::new("pdal")
                .pipeline(Phase::Validate, &req, &no_metadata())
                .unwrap_err();
            assert!(matches!(err, PdalError::InvalidInput(_)), "{err}");
        }
    }

    #[test]
    fn point_cloud_output_gets_las_writer_without_bounds() {
        let ctx = TestContext::new();
        let mut req = request(&ctx);
        req.output = Some(ctx.path("out.laz"));
        let cmd = CommandBuilder::new("pdal")
            .pipeline(Phase::Execute, &req, &no_metadata())
            .unwrap();
        let last = cmd.args().last().unwrap();
        assert_eq!(
            last,
            &format!("--writers.las.filename={}", ctx.path("out.laz").display())
        );
        assert_eq!(count_prefix(&cmd, "--writers.las.bounds"), 0);
    }

    #[test]
    fn raster_output_appends_bounds_from_first_input() {
        let ctx = TestContext::new();
        let mut req = request(&ctx);
        req.input1 = Some(PathBuf::from("/data/a.las"));
        req.output = Some(ctx.path("dem.tif"));

        let mut provider = MockMetadataProvider::new();
        provider
            .expect_bounds()
            .withf(|p| p == Path::new("/data/a.las"))
            .times(1)
            .returning(|_| Ok(Bounds::from_json_numbers(0, 10, 5, 15)));

        let cmd = CommandBuilder::new("pdal")
            .pipeline(Phase::Execute, &req, &provider)
            .unwrap();
        assert_eq!(
            cmd.args().last().unwrap(),
            "--writers.gdal.bounds=([0, 10], [5, 15])"
        );
        assert!(cmd.args().contains(&format!(
            "--writers.gdal.filename={}",
            ctx.path("dem.tif").display()
        )));
    }

    #[test]
    fn raster_output_without_inputs_reads_first_pipeline_reader() {
        let ctx = TestContext::new();
        let pipeline = ctx.create_file(
            "commented.json",
            "// generated\n{\n  \"pipeline\": [\n    {\"type\": \"readers.las\", \"filename\": \"/data/from_pipe.las\"},\n    \"out.tif\"\n  ]\n}\n",
        );
        let req = PipelineRequest {
            pipeline,
            output: Some(ctx.path("dem.tif")),
            ..Default::default()
        };

        let mut provider = MockMetadataProvider::new();
        provider
            .expect_bounds()
            .withf(|p| p == Path::new("/data/from_pipe.las"))
            .times(1)
            .returning(|_| Ok(Bounds::from_json_numbers(1, 2, 3, 4)));

        let cmd = CommandBuilder::new("pdal")
            .pipeline(Phase::Validate, &req, &provider)
            .unwrap();
        assert_eq!(
            cmd.args().last().unwrap(),
            "--writers.gdal.bounds=([1, 2], [3, 4])"
        );
    }

    #[test]
    fn metadata_failure_aborts_the_build() {
        let ctx = TestContext::new();
        let mut req = request(&ctx);
        req.input1 = Some(PathBuf::from("/data/a.las"));
        req.output = Some(ctx.path("dem.tif"));

        let mut provider = MockMetadataProvider::new();
        provider
            .expect_bounds()
            .returning(|_| Err(PdalError::MetadataUnavailable("no bbox".into())));

        let err = CommandBuilder::new("pdal")
            .pipeline(Phase::Execute, &req, &provider)
            .unwrap_err();
        assert!(matches!(err, PdalError::MetadataUnavailable(_)));
    }

    #[test]
    fn info_command_shape() {
        let cmd = CommandBuilder::new("/opt/pdal/bin/pdal").info_metadata(Path::new("a.las"));
        assert_eq!(cmd.to_string(), "/opt/pdal/bin/pdal info --metadata a.las");
    }

    #[test]
    fn shell_string_quotes_every_word() {
        let cmd = CommandLine::new("pdal", ["info", "my file's.las", ""]);
        assert_eq!(
            cmd.to_shell_string(),
            "'pdal' 'info' 'my file'\"'\"'s.las' ''"
        );
    }
}
