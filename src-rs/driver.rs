//! Output writer classification: raster (`writers.gdal`) or point cloud
//! (`writers.las`).

use crate::error::{PdalError, PdalResult};
use image::{ImageFormat, ImageReader};
use std::path::Path;

/// Raster extensions handled by GDAL drivers that the `image` crate has no
/// format entry for.
const GDAL_RASTER_EXTENSIONS: &[&str] = &[
    "tif", "tiff", "gtiff", "img", "vrt", "asc", "grd", "nc", "hdf", "h5", "jp2", "ecw", "sid",
    "dem", "dt0", "dt1", "dt2", "bil", "bip", "bsq", "rst", "sdat", "kea", "mbtiles", "xyz",
];

const POINT_CLOUD_EXTENSIONS: &[&str] = &["las", "laz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    Gdal,
    Las,
}

impl WriterKind {
    pub fn stage_name(self) -> &'static str {
        match self {
            WriterKind::Gdal => "gdal",
            WriterKind::Las => "las",
        }
    }
}

pub fn detect_writer_kind(path: &Path) -> PdalResult<WriterKind> {
    if path.as_os_str().is_empty() {
        return Err(PdalError::InvalidInput("empty output path".to_string()));
    }

    if path.is_file() && opens_as_raster(path) {
        return Ok(WriterKind::Gdal);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            PdalError::InvalidInput(format!(
                "cannot state file type by extension for {}",
                path.display()
            ))
        })?
        .to_ascii_lowercase();

    if is_raster_extension(&extension) {
        return Ok(WriterKind::Gdal);
    }
    if !POINT_CLOUD_EXTENSIONS.contains(&extension.as_str()) {
        tracing::debug!(
            "unknown output extension .{extension}, defaulting to writers.las for {}",
            path.display()
        );
    }
    Ok(WriterKind::Las)
}

fn opens_as_raster(path: &Path) -> bool {
    let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(_) => return false,
    };
    if reader.format().is_none() {
        return false;
    }
    reader.into_dimensions().is_ok()
}

fn is_raster_extension(extension: &str) -> bool {
    GDAL_RASTER_EXTENSIONS.contains(&extension) || ImageFormat::from_extension(extension).is_some()
}
