//! Merge per-tile rasters into one georeferenced mosaic.
//!
//! Inputs are validated from their headers first: unreadable files and files
//! whose band count differs from the first valid input are excluded (and
//! deleted when configured), inputs whose pixel type differs from it are left
//! out but kept on disk, inputs in a foreign CRS are warped to the target
//! CRS. The survivors are merged onto the union grid with a
//! first-valid-pixel-wins policy over inputs sorted by path, so the output
//! does not depend on the order the caller listed them in.
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::io::raster::{PixelType, RasterData, RasterHeader, RasterIo, same_crs};

/// Tolerance when converting an extent into a whole number of pixels.
const GRID_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicConfig {
    /// No-data sentinel for warping and for output pixels no input covers.
    /// When the output pixel type cannot hold it (e.g. a negative sentinel
    /// over `u8`/`u16` inputs), unfilled pixels are written as 0 instead.
    pub nodata: f64,
    /// Delete inputs that are unreadable or have the wrong band count
    pub delete_invalid: bool,
    pub keep_reprojected: bool,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            nodata: -32768.0,
            delete_invalid: true,
            keep_reprojected: false,
        }
    }
}

/// An input left out of the merge, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedInput {
    pub path: PathBuf,
    pub reason: String,
    /// The file was removed from disk
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MosaicResult {
    Success {
        output_path: PathBuf,
        /// Original paths of the merged inputs, in merge order
        merged: Vec<PathBuf>,
        excluded: Vec<ExcludedInput>,
    },
    Failure {
        reason: String,
        excluded: Vec<ExcludedInput>,
    },
}

impl MosaicResult {
    pub fn output_path(&self) -> Option<&Path> {
        match self {
            MosaicResult::Success { output_path, .. } => Some(output_path),
            MosaicResult::Failure { .. } => None,
        }
    }

    pub fn excluded(&self) -> &[ExcludedInput] {
        match self {
            MosaicResult::Success { excluded, .. } | MosaicResult::Failure { excluded, .. } => {
                excluded
            }
        }
    }
}

/// A validated input: original path, the path actually read (which may be a
/// reprojected sibling) and its header.
#[derive(Debug, Clone)]
struct MosaicInput {
    source: PathBuf,
    path: PathBuf,
    header: RasterHeader,
}

/// Output grid: north-up, resolution of the first input, union extent.
#[derive(Debug, Clone, Copy)]
struct Grid {
    min_x: f64,
    max_y: f64,
    res_x: f64,
    res_y: f64,
    width: usize,
    height: usize,
}

impl Grid {
    fn union_of(rasters: &[RasterData]) -> Option<Grid> {
        let first = rasters.first()?;
        let res_x = first.geotransform[1].abs();
        let res_y = first.geotransform[5].abs();
        if res_x == 0.0 || res_y == 0.0 {
            return None;
        }
        let (mut min_x, mut min_y, mut max_x, mut max_y) = first.extent();
        for r in &rasters[1..] {
            let (x0, y0, x1, y1) = r.extent();
            min_x = min_x.min(x0);
            min_y = min_y.min(y0);
            max_x = max_x.max(x1);
            max_y = max_y.max(y1);
        }
        let width = ((max_x - min_x) / res_x - GRID_EPSILON).ceil().max(1.0) as usize;
        let height = ((max_y - min_y) / res_y - GRID_EPSILON).ceil().max(1.0) as usize;
        Some(Grid {
            min_x,
            max_y,
            res_x,
            res_y,
            width,
            height,
        })
    }

    fn geotransform(&self) -> [f64; 6] {
        [self.min_x, self.res_x, 0.0, self.max_y, 0.0, -self.res_y]
    }

    /// CRS coordinate of the center of output pixel `(row, col)`.
    fn center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.min_x + (col as f64 + 0.5) * self.res_x,
            self.max_y - (row as f64 + 0.5) * self.res_y,
        )
    }

    /// Output row/col window overlapped by `raster`, clamped to the grid.
    fn window(&self, raster: &RasterData) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let (x0, y0, x1, y1) = raster.extent();
        let clamp = |v: f64, max: usize| (v.max(0.0) as usize).min(max);
        let c0 = clamp(((x0 - self.min_x) / self.res_x).floor(), self.width);
        let c1 = clamp(((x1 - self.min_x) / self.res_x).ceil(), self.width);
        let r0 = clamp(((self.max_y - y1) / self.res_y).floor(), self.height);
        let r1 = clamp(((self.max_y - y0) / self.res_y).ceil(), self.height);
        (r0..r1, c0..c1)
    }
}

pub struct RasterMosaicker<R> {
    io: R,
    config: MosaicConfig,
}

impl<R: RasterIo> RasterMosaicker<R> {
    pub fn new(io: R, config: MosaicConfig) -> Self {
        Self { io, config }
    }

    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    pub fn io(&self) -> &R {
        &self.io
    }

    /// Merge `inputs` into `output` in `target_crs`. Never creates `output`
    /// when no input survives validation.
    pub fn mosaic(&self, inputs: &[PathBuf], output: &Path, target_crs: &str) -> MosaicResult {
        let mut sorted: Vec<PathBuf> = inputs.to_vec();
        sorted.sort();
        sorted.dedup();
        info!(
            "Mosaicking {} inputs into {:?} ({})",
            sorted.len(),
            output,
            target_crs
        );

        let mut excluded = Vec::new();
        let mut reprojected = Vec::new();
        let valid = self.validate(&sorted, target_crs, &mut excluded, &mut reprojected);

        let result = self.merge(valid, output, excluded);
        if !self.config.keep_reprojected {
            for path in &reprojected {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!("Removed reprojected sibling {:?}", path),
                    Err(e) => warn!("Could not remove {:?}: {}", path, e),
                }
            }
        }
        result
    }

    fn validate(
        &self,
        sorted: &[PathBuf],
        target_crs: &str,
        excluded: &mut Vec<ExcludedInput>,
        reprojected: &mut Vec<PathBuf>,
    ) -> Vec<MosaicInput> {
        let mut valid: Vec<MosaicInput> = Vec::new();
        let mut expected_bands: Option<usize> = None;
        let mut expected_dtype: Option<PixelType> = None;

        for path in sorted {
            let header = match self.io.read_header(path) {
                Ok(h) if h.band_count > 0 => h,
                Ok(_) => {
                    excluded.push(self.discard(path, "raster has no bands".to_string()));
                    continue;
                }
                Err(e) => {
                    excluded.push(self.discard(path, format!("unreadable raster: {}", e)));
                    continue;
                }
            };

            match expected_bands {
                None => expected_bands = Some(header.band_count),
                Some(expected) if expected != header.band_count => {
                    excluded.push(self.discard(
                        path,
                        format!(
                            "band count {} differs from expected {}",
                            header.band_count, expected
                        ),
                    ));
                    continue;
                }
                Some(_) => {}
            }

            match expected_dtype {
                None => expected_dtype = Some(header.dtype),
                Some(expected) if expected != header.dtype => {
                    warn!(
                        "Excluding {:?}: pixel type {} differs from {}",
                        path, header.dtype, expected
                    );
                    excluded.push(ExcludedInput {
                        path: path.clone(),
                        reason: format!(
                            "pixel type {} differs from expected {}",
                            header.dtype, expected
                        ),
                        deleted: false,
                    });
                    continue;
                }
                Some(_) => {}
            }

            if same_crs(&header.crs, target_crs) {
                valid.push(MosaicInput {
                    source: path.clone(),
                    path: path.clone(),
                    header,
                });
                continue;
            }

            info!(
                "Reprojecting {:?} from {} to {}",
                path, header.crs, target_crs
            );
            let warped = self
                .io
                .reproject(path, target_crs, self.config.nodata)
                .and_then(|p| self.io.read_header(&p).map(|h| (p, h)));
            match warped {
                Ok((warped_path, warped_header)) => {
                    reprojected.push(warped_path.clone());
                    valid.push(MosaicInput {
                        source: path.clone(),
                        path: warped_path,
                        header: warped_header,
                    });
                }
                Err(e) => {
                    warn!("Excluding {:?}: {}", path, e);
                    excluded.push(ExcludedInput {
                        path: path.clone(),
                        reason: e.to_string(),
                        deleted: false,
                    });
                }
            }
        }
        valid
    }

    fn merge(
        &self,
        valid: Vec<MosaicInput>,
        output: &Path,
        mut excluded: Vec<ExcludedInput>,
    ) -> MosaicResult {
        let mut merged = Vec::with_capacity(valid.len());
        let mut rasters = Vec::with_capacity(valid.len());
        for input in valid {
            match self.io.read(&input.path) {
                Ok(raster) => {
                    debug!(
                        "Loaded {:?}: {} bands {}x{} {}",
                        input.path,
                        input.header.band_count,
                        input.header.width,
                        input.header.height,
                        input.header.dtype
                    );
                    merged.push(input.source);
                    rasters.push(raster);
                }
                Err(e) => {
                    let entry = if input.path == input.source {
                        self.discard(&input.source, format!("unreadable raster: {}", e))
                    } else {
                        warn!("Excluding {:?}: {}", input.source, e);
                        ExcludedInput {
                            path: input.source,
                            reason: e.to_string(),
                            deleted: false,
                        }
                    };
                    excluded.push(entry);
                }
            }
        }

        let Some(grid) = Grid::union_of(&rasters) else {
            let reason = if rasters.is_empty() {
                "no valid input files".to_string()
            } else {
                "first input has a zero pixel size".to_string()
            };
            warn!("Mosaic {:?} not created: {}", output, reason);
            return MosaicResult::Failure { reason, excluded };
        };

        let first = &rasters[0];
        let bands = first.band_count();
        let dtype = first.dtype;
        let nodata = dtype.nodata_for(self.config.nodata);
        let mut pixels = Array3::from_elem((bands, grid.height, grid.width), nodata);
        let mut filled = Array2::from_elem((grid.height, grid.width), false);

        for raster in &rasters {
            let (rows, cols) = grid.window(raster);
            for row in rows {
                for col in cols.clone() {
                    if filled[[row, col]] {
                        continue;
                    }
                    let (x, y) = grid.center(row, col);
                    let Some((sr, sc)) = raster.pixel_at(x, y) else {
                        continue;
                    };
                    let has_data = (0..bands).any(|b| !raster.is_nodata(raster.pixels[[b, sr, sc]]));
                    if !has_data {
                        continue;
                    }
                    for b in 0..bands {
                        let v = raster.pixels[[b, sr, sc]];
                        pixels[[b, row, col]] = if raster.is_nodata(v) { nodata } else { v };
                    }
                    filled[[row, col]] = true;
                }
            }
        }

        let mosaic = RasterData {
            crs: first.crs.clone(),
            dtype,
            geotransform: grid.geotransform(),
            nodata: Some(nodata),
            pixels,
        };
        if let Err(e) = self.io.write(output, &mosaic) {
            let _ = std::fs::remove_file(output);
            warn!("Writing mosaic {:?} failed: {}", output, e);
            return MosaicResult::Failure {
                reason: format!("failed to write mosaic: {}", e),
                excluded,
            };
        }

        let coverage = filled.iter().filter(|&&f| f).count() as f64 / filled.len() as f64;
        info!(
            "Mosaic {:?}: {} inputs merged, {} excluded, {}x{} px, {:.1}% filled",
            output,
            merged.len(),
            excluded.len(),
            grid.width,
            grid.height,
            coverage * 100.0
        );
        MosaicResult::Success {
            output_path: output.to_path_buf(),
            merged,
            excluded,
        }
    }

    /// Log, optionally delete, and describe an input that cannot be merged.
    fn discard(&self, path: &Path, reason: String) -> ExcludedInput {
        warn!("Excluding {:?}: {}", path, reason);
        let deleted = self.config.delete_invalid
            && match std::fs::remove_file(path) {
                Ok(()) => {
                    info!("Deleted invalid input {:?}", path);
                    true
                }
                Err(e) => {
                    warn!("Could not delete {:?}: {}", path, e);
                    false
                }
            };
        ExcludedInput {
            path: path.to_path_buf(),
            reason,
            deleted,
        }
    }
}
