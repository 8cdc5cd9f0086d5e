//! Output writers: typed GeoTIFF rasters and JSON run manifests.
pub mod manifest;
pub mod tiff;
