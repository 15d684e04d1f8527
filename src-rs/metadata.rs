//! `pdal info --metadata` parsing and pipeline-definition inspection.

use crate::command::CommandBuilder;
use crate::error::{PdalError, PdalResult};
use crate::feedback::Feedback;
use crate::runner::ProcessRunner;
use serde::Serialize;
use serde_json::{Number, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

/// Printed ahead of the JSON by some PDAL builds.
pub const PCS_CSV_WARNING: &str = "Warning 1: Cannot find pcs.csv";

/// XY extent of a point cloud. Values keep the textual form the tool
/// printed them in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bounds {
    pub minx: Number,
    pub maxx: Number,
    pub miny: Number,
    pub maxy: Number,
}

impl Bounds {
    /// `([minX, maxX], [minY, maxY])`, the form `writers.gdal.bounds` expects.
    pub fn to_option_value(&self) -> String {
        format!(
            "([{}, {}], [{}, {}])",
            self.minx, self.maxx, self.miny, self.maxy
        )
    }

    #[cfg(test)]
    pub fn from_json_numbers(minx: i64, maxx: i64, miny: i64, maxy: i64) -> Self {
        Self {
            minx: minx.into(),
            maxx: maxx.into(),
            miny: miny.into(),
            maxy: maxy.into(),
        }
    }
}

/// Source of bounding boxes for the raster-writer bounds option.
#[cfg_attr(test, automock)]
pub trait MetadataProvider {
    fn bounds(&self, source: &Path) -> PdalResult<Bounds>;
}

/// Runs `pdal info --metadata` through the same runner and feedback as the
/// pipeline itself, so cancellation reaches the nested query too.
pub struct InfoQuery<'a> {
    pub builder: &'a CommandBuilder,
    pub runner: &'a ProcessRunner,
    pub feedback: &'a dyn Feedback,
}

impl InfoQuery<'_> {
    pub fn report(&self, source: &Path) -> PdalResult<Value> {
        let command = self.builder.info_metadata(source);
        let execution = self.runner.run(&command, self.feedback)?;
        parse_info_output(&execution.log).inspect_err(|err| {
            self.feedback.push_info(&err.to_string());
        })
    }
}

impl MetadataProvider for InfoQuery<'_> {
    fn bounds(&self, source: &Path) -> PdalResult<Bounds> {
        let report = self.report(source)?;
        bounds_from_report(&report)
    }
}

/// Remembers bounds per source so the validation and execution commands
/// share one metadata query.
pub struct MemoizedMetadata<P> {
    inner: P,
    cache: RefCell<HashMap<PathBuf, Bounds>>,
}

impl<P: MetadataProvider> MemoizedMetadata<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl<P: MetadataProvider> MetadataProvider for MemoizedMetadata<P> {
    fn bounds(&self, source: &Path) -> PdalResult<Bounds> {
        if let Some(bounds) = self.cache.borrow().get(source) {
            return Ok(bounds.clone());
        }
        let bounds = self.inner.bounds(source)?;
        self.cache
            .borrow_mut()
            .insert(source.to_path_buf(), bounds.clone());
        Ok(bounds)
    }
}

/// Drops the leading `Warning N: ...` lines GDAL writes to the same stream,
/// then decodes the rest as JSON.
pub fn parse_info_output(raw: &str) -> PdalResult<Value> {
    let cleaned = strip_warning_lines(raw);
    serde_json::from_str(cleaned).map_err(|err| {
        PdalError::MalformedMetadata(format!("pdal info output is not valid JSON: {err}"))
    })
}

pub fn strip_warning_lines(raw: &str) -> &str {
    let mut rest = raw;
    loop {
        let (line, tail) = match rest.split_once('\n') {
            Some(split) => split,
            None => (rest, ""),
        };
        if !is_warning_line(line) {
            return rest;
        }
        rest = tail;
    }
}

fn is_warning_line(line: &str) -> bool {
    let line = line.trim();
    if line.contains(PCS_CSV_WARNING) {
        return true;
    }
    match line.strip_prefix("Warning ") {
        Some(tail) => tail
            .split_once(':')
            .is_some_and(|(num, _)| !num.is_empty() && num.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

pub fn bounds_from_report(report: &Value) -> PdalResult<Bounds> {
    let metadata = report.get("metadata").ok_or_else(|| {
        PdalError::MetadataUnavailable("pdal info output has no 'metadata' object".to_string())
    })?;
    let field = |name: &str| -> PdalResult<Number> {
        match metadata.get(name) {
            Some(Value::Number(n)) => Ok(n.clone()),
            Some(other) => Err(PdalError::MalformedMetadata(format!(
                "metadata field '{name}' is not a number: {other}"
            ))),
            None => Err(PdalError::MetadataUnavailable(format!(
                "metadata has no '{name}' field"
            ))),
        }
    };
    Ok(Bounds {
        minx: field("minx")?,
        maxx: field("maxx")?,
        miny: field("miny")?,
        maxy: field("maxy")?,
    })
}

/// Filename of the first stage of a pipeline definition. Comment lines
/// (starting with `/` or `*`) are ignored.
pub fn first_reader_filename(pipeline: &Path) -> PdalResult<PathBuf> {
    let raw = fs::read_to_string(pipeline)?;
    let cleaned: String = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('/') && !line.starts_with('*'))
        .collect();
    let definition: Value = serde_json::from_str(&cleaned).map_err(|err| {
        PdalError::MetadataUnavailable(format!(
            "cannot parse pipeline {}: {err}",
            pipeline.display()
        ))
    })?;

    let first = definition
        .get("pipeline")
        .and_then(Value::as_array)
        .and_then(|stages| stages.first());
    let filename = match first {
        Some(Value::String(name)) => Some(name.as_str()),
        Some(stage) => stage.get("filename").and_then(Value::as_str),
        None => None,
    };
    match filename.map(str::trim).filter(|f| !f.is_empty()) {
        Some(name) => Ok(PathBuf::from(name)),
        None => Err(PdalError::MetadataUnavailable(
            "cannot determine a point cloud to get the bounding box for the gdal writer"
                .to_string(),
        )),
    }
}
