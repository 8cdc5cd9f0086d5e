//! I/O layer for georeferenced rasters.
//! Provides the `raster` interface, the `gdal` adapter, and `writers`
//! for GeoTIFF outputs and manifest sidecars.
pub mod raster;
pub use raster::{PixelType, RasterData, RasterError, RasterHeader, RasterIo};

pub mod gdal;
pub use self::gdal::GdalRasterIo;

pub mod writers;
