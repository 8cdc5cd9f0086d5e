use std::path::{Path, PathBuf};
use std::process::Command;

use gdal::Dataset;
use gdal::raster::GdalDataType;
use ndarray::Array3;
use tracing::{debug, warn};

use super::raster::{PixelType, RasterData, RasterError, RasterHeader, RasterIo, reprojected_path};
use super::writers::tiff::write_geotiff;

/// [`RasterIo`] backed by the GDAL library, with `gdalwarp` for reprojection.
#[derive(Debug, Clone, Default)]
pub struct GdalRasterIo {
    /// Executable used for reprojection
    warp_command: Option<PathBuf>,
}

// Helper to extract EPSG code from WKT authority tag
pub fn parse_epsg(wkt: &str) -> Option<String> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    const KEY_WKT2: &str = "ID[\"EPSG\",";
    if let Some(idx) = wkt.rfind(KEY) {
        let start = idx + KEY.len();
        if let Some(end) = wkt[start..].find('"') {
            let code = &wkt[start..start + end];
            return Some(format!("EPSG:{}", code));
        }
    }
    if let Some(idx) = wkt.rfind(KEY_WKT2) {
        let start = idx + KEY_WKT2.len();
        let code: String = wkt[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
        if !code.is_empty() {
            return Some(format!("EPSG:{}", code));
        }
    }
    None
}

/// `EPSG:<code>` if the projection names one, otherwise the projection as given.
pub fn normalize_crs(projection: &str) -> String {
    let trimmed = projection.trim();
    if trimmed.to_ascii_uppercase().starts_with("EPSG:") {
        trimmed.to_ascii_uppercase()
    } else {
        parse_epsg(trimmed).unwrap_or_else(|| trimmed.to_string())
    }
}

fn pixel_type(data_type: GdalDataType) -> PixelType {
    match data_type {
        GdalDataType::UInt8 => PixelType::U8,
        GdalDataType::UInt16 => PixelType::U16,
        GdalDataType::Int16 => PixelType::I16,
        GdalDataType::UInt32 => PixelType::U32,
        GdalDataType::Int32 => PixelType::I32,
        GdalDataType::Float32 => PixelType::F32,
        _ => PixelType::F64,
    }
}

impl GdalRasterIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `gdalwarp` binary instead of the one on `PATH`.
    pub fn with_warp_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.warp_command = Some(command.into());
        self
    }

    fn open(&self, path: &Path) -> Result<Dataset, RasterError> {
        let dataset =
            Dataset::open(path).map_err(|e| RasterError::corrupt(path, e.to_string()))?;
        if dataset.raster_count() == 0 {
            return Err(RasterError::corrupt(path, "No raster bands found"));
        }
        Ok(dataset)
    }

    fn header_of(&self, dataset: &Dataset) -> Result<RasterHeader, RasterError> {
        let (size_x, size_y) = dataset.raster_size();
        let band = dataset.rasterband(1)?;
        Ok(RasterHeader {
            band_count: dataset.raster_count() as usize,
            crs: normalize_crs(&dataset.projection()),
            dtype: pixel_type(band.band_type()),
            width: size_x as usize,
            height: size_y as usize,
        })
    }
}

impl RasterIo for GdalRasterIo {
    fn read_header(&self, path: &Path) -> Result<RasterHeader, RasterError> {
        let dataset = self.open(path)?;
        self.header_of(&dataset)
    }

    fn read(&self, path: &Path) -> Result<RasterData, RasterError> {
        let dataset = self.open(path)?;
        let header = self.header_of(&dataset)?;
        let geotransform = dataset
            .geo_transform()
            .map_err(|_| RasterError::corrupt(path, "missing geotransform"))?;

        let window = (header.width, header.height);
        let mut samples = Vec::with_capacity(header.band_count * header.width * header.height);
        let mut nodata = None;
        for index in 1..=header.band_count {
            let band = dataset.rasterband(index)?;
            if index == 1 {
                nodata = band.no_data_value();
            }
            let buf = band.read_as::<f64>((0, 0), window, window, None)?;
            samples.extend_from_slice(buf.data());
        }
        let pixels = Array3::from_shape_vec((header.band_count, header.height, header.width), samples)
            .map_err(|_| {
                RasterError::DimensionMismatch(header.width, header.height, header.width, header.height)
            })?;

        Ok(RasterData {
            crs: header.crs,
            dtype: header.dtype,
            geotransform,
            nodata,
            pixels,
        })
    }

    fn reproject(
        &self,
        path: &Path,
        target_crs: &str,
        nodata: f64,
    ) -> Result<PathBuf, RasterError> {
        let output = reprojected_path(path);
        let program = self
            .warp_command
            .clone()
            .unwrap_or_else(|| PathBuf::from("gdalwarp"));
        let nodata_arg = nodata.to_string();
        let args: Vec<&std::ffi::OsStr> = vec![
            "-of".as_ref(),
            "GTiff".as_ref(),
            "-overwrite".as_ref(),
            "-t_srs".as_ref(),
            target_crs.as_ref(),
            "-dstnodata".as_ref(),
            nodata_arg.as_ref(),
            path.as_os_str(),
            output.as_os_str(),
        ];
        debug!("Running {:?} {:?}", program, args);
        let result = Command::new(&program).args(&args).output().map_err(|e| {
            RasterError::Reprojection {
                path: path.to_path_buf(),
                reason: format!("{:?} exec error: {}", program, e),
            }
        })?;
        if !result.status.success() {
            let _ = std::fs::remove_file(&output);
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!("gdalwarp failed for {:?}: {}", path, stderr.trim());
            return Err(RasterError::Reprojection {
                path: path.to_path_buf(),
                reason: format!("gdalwarp exited with {}: {}", result.status, stderr.trim()),
            });
        }
        Ok(output)
    }

    fn write(&self, path: &Path, raster: &RasterData) -> Result<(), RasterError> {
        write_geotiff(path, raster)
    }
}
