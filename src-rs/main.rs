mod command;
mod config;
mod drain;
mod driver;
mod error;
mod executor;
mod feedback;
mod metadata;
mod process;
mod runner;

#[cfg(test)]
mod test_helpers;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use command::non_empty_path;
use config::Settings;
use driver::detect_writer_kind;
use error::PdalError;
use executor::{ExecutorParams, PipelineRun, RunStatus};
use feedback::{install_interrupt_handler, ConsoleFeedback};
use metadata::{bounds_from_report, InfoQuery};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

const PLUGIN_ROOT: &str = env!("CARGO_MANIFEST_DIR");

const EXIT_OK: i32 = 0;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "pdal-tools",
    version,
    about = "Run PDAL pipelines with validation, skip-if-exists and cancellation"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// PDAL executable (default: `pdal` on PATH)
    #[arg(long, env = "PDAL_BIN", global = true)]
    pdal_bin: Option<String>,
    /// How long each supervision step waits for output, in milliseconds
    #[arg(long, env = "PDAL_TOOLS_POLL_MS", global = true)]
    poll_ms: Option<u64>,
    /// Cancel the running tool after this many seconds
    #[arg(long, env = "PDAL_TOOLS_TIMEOUT_SECS", global = true)]
    timeout_secs: Option<u64>,
    /// Run PDAL through `sh -c` (default on macOS)
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    shell: Option<bool>,
    /// Do not echo tool output to stderr
    #[arg(long, short, global = true, action = ArgAction::SetTrue)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print provider manifest JSON
    Manifest,
    /// Validate, then execute a PDAL pipeline definition
    Pipeline(PipelineArgs),
    /// Query point cloud metadata and print its bounding box
    Info(InfoArgs),
    /// Print which PDAL writer an output path maps to
    Driver(DriverArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Point cloud replacing the first reader (`input1` stage when two are given)
    #[arg(long)]
    input1: Option<PathBuf>,
    /// Point cloud for the `input2` stage; requires --input1
    #[arg(long)]
    input2: Option<PathBuf>,
    /// PDAL pipeline definition file (JSON)
    #[arg(long)]
    pipeline: String,
    /// Output file; its format picks the PDAL writer
    #[arg(long)]
    output: Option<PathBuf>,
    /// Skip the run when the output file already exists
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    skip_if_exists: bool,
    /// Build and print both command lines without running the pipeline
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
    /// Print the run report JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Also write the run report JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Point cloud file
    input: PathBuf,
}

#[derive(Args, Debug)]
struct DriverArgs {
    /// Output file path
    output: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            let cancelled = err
                .downcast_ref::<PdalError>()
                .is_some_and(PdalError::is_cancelled);
            std::process::exit(if cancelled { EXIT_CANCELLED } else { 1 });
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Commands => print_commands().map(|_| EXIT_OK),
        Commands::Manifest => print_manifest().map(|_| EXIT_OK),
        Commands::Pipeline(args) => command_pipeline(&cli.global, args),
        Commands::Info(args) => command_info(&cli.global, args),
        Commands::Driver(args) => command_driver(args),
    }
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(fmt_layer)
        .init();
}

fn settings(global: &GlobalArgs) -> Settings {
    Settings::resolve(
        global.pdal_bin.as_deref(),
        global.poll_ms,
        global.timeout_secs,
        global.shell,
    )
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "pipeline",
            "description": "Validate and execute a PDAL pipeline, skipping when the output exists.",
            "runner": "pdal"
        }),
        json!({
            "name": "info",
            "description": "Read point cloud metadata and format the gdal writer bounds.",
            "runner": "pdal"
        }),
        json!({
            "name": "driver",
            "description": "Classify an output path as a raster (gdal) or point cloud (las) writer.",
            "runner": "rust"
        }),
        json!({
            "name": "manifest",
            "description": "Print the provider manifest.",
            "runner": "rust"
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn print_manifest() -> Result<()> {
    let manifest_path = Path::new(PLUGIN_ROOT).join("manifest.json");
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("manifest not found: {}", manifest_path.display()))?;
    let payload: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest JSON: {}", manifest_path.display()))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_pipeline(global: &GlobalArgs, args: PipelineArgs) -> Result<i32> {
    install_interrupt_handler();
    let settings = settings(global);
    let executor = settings.executor();
    let feedback = ConsoleFeedback::new(settings.timeout, global.quiet);

    let params = ExecutorParams {
        input1: non_empty_path(args.input1),
        input2: non_empty_path(args.input2),
        pipeline: args.pipeline,
        skip_if_exists: args.skip_if_exists,
        output: non_empty_path(args.output),
    };

    tracing::debug!(
        pdal = executor.builder().program(),
        poll = ?executor.runner().poll_interval(),
        timeout = ?settings.timeout,
        "resolved settings"
    );

    let started_at = timestamp_iso();
    let run = match executor.execute(&params, &feedback, args.dry_run) {
        Ok(run) => run,
        Err(err) => {
            if let Some(path) = args.report.as_deref() {
                write_json_pretty(path, &failure_report(&err, &started_at, &timestamp_iso()))?;
            }
            return Err(err.into());
        }
    };
    let report = run_report(&run, &started_at, &timestamp_iso(), feedback.timed_out())?;

    if let Some(path) = args.report.as_deref() {
        write_json_pretty(path, &report)?;
    }
    if args.json || args.dry_run {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if matches!(run.status, RunStatus::Completed | RunStatus::Skipped) {
        if let Some(output) = run.output.as_deref() {
            println!("{}", output.display());
        }
    }

    Ok(match run.status {
        RunStatus::Cancelled => EXIT_CANCELLED,
        RunStatus::Completed | RunStatus::Skipped | RunStatus::Planned => EXIT_OK,
    })
}

fn run_report(
    run: &PipelineRun,
    started_at: &str,
    finished_at: &str,
    timed_out: bool,
) -> Result<Value> {
    let mut report = serde_json::to_value(run)?;
    if let Some(map) = report.as_object_mut() {
        map.insert(
            "commands".to_string(),
            json!(run
                .commands
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()),
        );
        map.insert("started_at".to_string(), json!(started_at));
        map.insert("finished_at".to_string(), json!(finished_at));
        if timed_out {
            map.insert("timed_out".to_string(), json!(true));
        }
    }
    Ok(report)
}

fn failure_report(err: &PdalError, started_at: &str, finished_at: &str) -> Value {
    let mut error = json!({
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let PdalError::ToolFailure { code, command, .. } = err {
        error["code"] = json!(code);
        error["command"] = json!(command.to_string());
    }
    json!({
        "status": "failed",
        "error": error,
        "started_at": started_at,
        "finished_at": finished_at,
    })
}

fn command_info(global: &GlobalArgs, args: InfoArgs) -> Result<i32> {
    install_interrupt_handler();
    let settings = settings(global);
    let builder = settings.builder();
    let runner = settings.runner();
    let feedback = ConsoleFeedback::new(settings.timeout, global.quiet);
    let query = InfoQuery {
        builder: &builder,
        runner: &runner,
        feedback: &feedback,
    };

    let report = query.report(&args.input)?;
    let bounds = bounds_from_report(&report)?;
    let payload = json!({
        "file": args.input,
        "bounds": bounds,
        "gdal_bounds": bounds.to_option_value(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(EXIT_OK)
}

fn command_driver(args: DriverArgs) -> Result<i32> {
    let kind = detect_writer_kind(&args.output)?;
    let payload = json!({
        "path": args.output,
        "driver": kind.stage_name(),
        "writer": format!("writers.{}", kind.stage_name()),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(EXIT_OK)
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
