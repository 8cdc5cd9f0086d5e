//! Raster I/O interface used by the mosaicker and the band stacker.
//!
//! Pixels travel as `f64` in a `(band, row, col)` array; the on-disk pixel
//! type is carried alongside so writers can restore it.
use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis, concatenate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Corrupt raster {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),

    #[error("Reprojection of {path:?} failed: {reason}")]
    Reprojection { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RasterError {
    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        RasterError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// On-disk sample type of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    pub fn is_unsigned(self) -> bool {
        matches!(self, PixelType::U8 | PixelType::U16 | PixelType::U32)
    }

    /// Whether `value` survives a write/read cycle in this type.
    pub fn can_represent(self, value: f64) -> bool {
        let (min, max) = match self {
            PixelType::U8 => (u8::MIN as f64, u8::MAX as f64),
            PixelType::U16 => (u16::MIN as f64, u16::MAX as f64),
            PixelType::I16 => (i16::MIN as f64, i16::MAX as f64),
            PixelType::U32 => (u32::MIN as f64, u32::MAX as f64),
            PixelType::I32 => (i32::MIN as f64, i32::MAX as f64),
            PixelType::F32 | PixelType::F64 => return value.is_finite(),
        };
        value.fract() == 0.0 && value >= min && value <= max
    }

    /// The configured sentinel when this type can hold it, zero otherwise.
    pub fn nodata_for(self, sentinel: f64) -> f64 {
        if self.can_represent(sentinel) {
            sentinel
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PixelType::U8 => "uint8",
            PixelType::U16 => "uint16",
            PixelType::I16 => "int16",
            PixelType::U32 => "uint32",
            PixelType::I32 => "int32",
            PixelType::F32 => "float32",
            PixelType::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Header-only view of a raster: what validation needs before any pixel is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterHeader {
    pub band_count: usize,
    /// `EPSG:<code>` when the CRS has an EPSG authority, raw definition otherwise
    pub crs: String,
    pub dtype: PixelType,
    pub width: usize,
    pub height: usize,
}

/// A fully loaded raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterData {
    pub crs: String,
    pub dtype: PixelType,
    /// GDAL-ordered affine transform; north-up grids only
    pub geotransform: [f64; 6],
    pub nodata: Option<f64>,
    /// `(band, row, col)`
    pub pixels: Array3<f64>,
}

impl RasterData {
    pub fn header(&self) -> RasterHeader {
        let (bands, rows, cols) = self.pixels.dim();
        RasterHeader {
            band_count: bands,
            crs: self.crs.clone(),
            dtype: self.dtype,
            width: cols,
            height: rows,
        }
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().2
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn band_count(&self) -> usize {
        self.pixels.dim().0
    }

    /// `(min_x, min_y, max_x, max_y)` in CRS units.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geotransform;
        let x0 = gt[0];
        let x1 = gt[0] + gt[1] * self.width() as f64;
        let y0 = gt[3];
        let y1 = gt[3] + gt[5] * self.height() as f64;
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Pixel containing CRS coordinate `(x, y)`, if inside the grid.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let gt = &self.geotransform;
        if gt[1] == 0.0 || gt[5] == 0.0 {
            return None;
        }
        let col = ((x - gt[0]) / gt[1]).floor();
        let row = ((y - gt[3]) / gt[5]).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        (col < self.width() && row < self.height()).then_some((row, col))
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nd| nd == value)
    }
}

/// Compare two CRS identifiers, ignoring case and surrounding whitespace.
pub fn same_crs(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Raster operations the pipeline needs. `read_header` must not read pixels.
pub trait RasterIo: Send + Sync {
    fn read_header(&self, path: &Path) -> Result<RasterHeader, RasterError>;

    fn read(&self, path: &Path) -> Result<RasterData, RasterError>;

    /// Warp `path` into `target_crs`, writing `<stem>_reprojected.tif` next to
    /// it with `nodata` as destination no-data. Returns the new path.
    fn reproject(&self, path: &Path, target_crs: &str, nodata: f64)
    -> Result<PathBuf, RasterError>;

    fn write(&self, path: &Path, raster: &RasterData) -> Result<(), RasterError>;

    /// Concatenate single- or multi-band rasters of identical grid into one
    /// file, in input order. Georeferencing comes from the first input.
    fn stack_bands(&self, inputs: &[PathBuf], output: &Path) -> Result<RasterHeader, RasterError> {
        let Some((first_path, rest)) = inputs.split_first() else {
            return Err(RasterError::Unsupported("no bands to stack".into()));
        };
        let first = self.read(first_path)?;
        let mut arrays = vec![first.pixels.clone()];
        for path in rest {
            let next = self.read(path)?;
            if next.width() != first.width() || next.height() != first.height() {
                return Err(RasterError::DimensionMismatch(
                    first.width(),
                    first.height(),
                    next.width(),
                    next.height(),
                ));
            }
            arrays.push(next.pixels);
        }
        let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
        let pixels = concatenate(Axis(0), &views)
            .map_err(|e| RasterError::Unsupported(format!("band stack: {}", e)))?;

        let stacked = RasterData { pixels, ..first };
        self.write(output, &stacked)?;
        debug!(
            "Stacked {} inputs into {:?} ({} bands)",
            inputs.len(),
            output,
            stacked.band_count()
        );
        Ok(stacked.header())
    }
}

impl<T: RasterIo + ?Sized> RasterIo for std::sync::Arc<T> {
    fn read_header(&self, path: &Path) -> Result<RasterHeader, RasterError> {
        (**self).read_header(path)
    }

    fn read(&self, path: &Path) -> Result<RasterData, RasterError> {
        (**self).read(path)
    }

    fn reproject(
        &self,
        path: &Path,
        target_crs: &str,
        nodata: f64,
    ) -> Result<PathBuf, RasterError> {
        (**self).reproject(path, target_crs, nodata)
    }

    fn write(&self, path: &Path, raster: &RasterData) -> Result<(), RasterError> {
        (**self).write(path, raster)
    }

    fn stack_bands(&self, inputs: &[PathBuf], output: &Path) -> Result<RasterHeader, RasterError> {
        (**self).stack_bands(inputs, output)
    }
}

/// `<dir>/<stem>_reprojected.tif`
pub fn reprojected_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "raster".to_string());
    path.with_file_name(format!("{}_reprojected.tif", stem))
}
