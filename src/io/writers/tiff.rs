use std::path::Path;

use gdal::DriverManager;
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use tracing::debug;

use crate::io::raster::{PixelType, RasterData, RasterError};

/// Narrowing conversion from the in-memory `f64` samples.
trait FromSample: GdalType + Copy {
    fn from_sample(v: f64) -> Self;
}

macro_rules! impl_from_sample {
    ($($t:ty),*) => {
        $(impl FromSample for $t {
            fn from_sample(v: f64) -> Self {
                // `as` saturates at the type bounds and maps NaN to zero
                v as $t
            }
        })*
    };
}

impl_from_sample!(u8, u16, i16, u32, i32, f32, f64);

/// Write `raster` as a GeoTIFF in its own pixel type, with georeferencing,
/// CRS and per-band no-data set explicitly.
pub fn write_geotiff(output: &Path, raster: &RasterData) -> Result<(), RasterError> {
    match raster.dtype {
        PixelType::U8 => write_typed::<u8>(output, raster),
        PixelType::U16 => write_typed::<u16>(output, raster),
        PixelType::I16 => write_typed::<i16>(output, raster),
        PixelType::U32 => write_typed::<u32>(output, raster),
        PixelType::I32 => write_typed::<i32>(output, raster),
        PixelType::F32 => write_typed::<f32>(output, raster),
        PixelType::F64 => write_typed::<f64>(output, raster),
    }
}

fn write_typed<T: FromSample>(output: &Path, raster: &RasterData) -> Result<(), RasterError> {
    let (bands, rows, cols) = raster.pixels.dim();
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver.create_with_band_type::<T, _>(output, cols, rows, bands)?;
    ds.set_geo_transform(&raster.geotransform)?;
    if !raster.crs.is_empty() {
        let wkt = SpatialRef::from_definition(&raster.crs)
            .and_then(|srs| srs.to_wkt())
            .unwrap_or_else(|_| raster.crs.clone());
        ds.set_projection(&wkt)?;
    }

    for b in 0..bands {
        let mut band = ds.rasterband(b + 1)?;
        if let Some(nodata) = raster.nodata {
            band.set_no_data_value(Some(nodata))?;
        }
        let data: Vec<T> = raster
            .pixels
            .index_axis(ndarray::Axis(0), b)
            .iter()
            .map(|&v| T::from_sample(v))
            .collect();
        let mut buf = Buffer::new((cols, rows), data);
        band.write((0, 0), (cols, rows), &mut buf)?;
    }
    debug!(
        "Wrote {}x{}x{} {} GeoTIFF {:?}",
        bands, rows, cols, raster.dtype, output
    );
    Ok(())
}
