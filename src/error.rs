//! Crate-level error type and `Result` alias.
//! Only configuration problems and a mosaic with zero usable inputs are hard
//! failures of a pipeline run; per-tile problems travel as `FetchOutcome` data.
use thiserror::Error;

use crate::api::manifest::{BatchManifest, Manifest};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Raster error: {0}")]
    Raster(#[from] crate::io::RasterError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::source::ProviderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {arg}={value}")]
    Configuration { arg: &'static str, value: String },

    #[error("Degenerate bounding box: west={west} south={south} east={east} north={north}")]
    DegenerateBox {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },

    #[error("Mosaic failed: {reason}")]
    Mosaic {
        reason: String,
        /// Tile outcomes collected before the mosaic step gave up.
        manifest: Box<Manifest>,
    },

    #[error("Union mosaic failed: {reason}")]
    BatchMosaic {
        reason: String,
        manifest: Box<BatchManifest>,
    },
}

impl Error {
    pub fn config<V: std::fmt::Display>(arg: &'static str, value: V) -> Self {
        Error::Configuration {
            arg,
            value: value.to_string(),
        }
    }

    /// True for errors caused by caller input rather than by a provider or the disk.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. } | Error::DegenerateBox { .. })
    }
}
