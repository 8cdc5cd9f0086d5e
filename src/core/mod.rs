//! Core building blocks: degree/km geometry, region partitioning, pipeline
//! configuration and raster mosaicking. These are the primitives consumed by
//! the high-level `api` module.
pub mod geo;
pub mod mosaic;
pub mod params;
pub mod partition;
