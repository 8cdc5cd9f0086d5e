//! Imagery source abstraction.
//!
//! An [`ImageSource`] answers "which scenes cover this box" and resolves a
//! chosen scene into per-band [`FetchDescriptor`]s. Catalog protocols (STAC,
//! Earth Engine, M2M) live behind this trait; the pipeline only reads the
//! cloud-cover score, the optional footprint and the descriptors.
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::geo::BoundingBox;
use crate::types::{QualityFilter, TimeRange};

pub mod catalog;

pub use catalog::{CatalogScene, StaticCatalog};

/// Errors reported by catalogs and raw transfers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by provider: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ProviderError {
    /// Waiting can fix these; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Timeout(_)
        )
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Io(e.to_string())
    }
}

/// Something retrievable: one band asset of one scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchDescriptor {
    /// Band name (e.g. `B04`); `None` for single-asset scenes.
    pub band: Option<String>,
    pub url: String,
}

/// A discovered scene or composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageHandle {
    pub id: String,
    /// Cloud cover percentage; lower is better.
    pub cloud_cover: f64,
    pub acquired: Option<NaiveDate>,
    pub platform: Option<String>,
    pub footprint: Option<BoundingBox>,
    pub assets: Vec<FetchDescriptor>,
}

pub trait ImageSource: Send + Sync {
    fn name(&self) -> &str;

    /// Candidate scenes intersecting `bbox` within `time_range`, in catalog order.
    fn search(
        &self,
        bbox: &BoundingBox,
        time_range: &TimeRange,
        filter: &QualityFilter,
    ) -> Result<Vec<ImageHandle>, ProviderError>;

    /// Resolve a handle into downloadable descriptors, one per band asset.
    /// Adapters that need URL signing override this.
    fn fetch_descriptors(
        &self,
        handle: &ImageHandle,
    ) -> Result<Vec<FetchDescriptor>, ProviderError> {
        Ok(handle.assets.clone())
    }
}

/// Pick the best candidate for `tile`: drop scenes outside the cloud-cover
/// bounds or whose footprint covers too little of the tile, then take the
/// lowest cloud cover. Ties keep the first-seen scene.
pub fn select_best<'a>(
    candidates: &'a [ImageHandle],
    tile: &BoundingBox,
    filter: &QualityFilter,
) -> Option<&'a ImageHandle> {
    let mut best: Option<&ImageHandle> = None;
    for handle in candidates {
        if !handle.cloud_cover.is_finite() || !filter.accepts_cloud_cover(handle.cloud_cover) {
            debug!(
                "Scene {} rejected: cloud cover {}",
                handle.id, handle.cloud_cover
            );
            continue;
        }
        if let Some(footprint) = handle.footprint {
            let coverage = tile.coverage_by(&footprint);
            if coverage < filter.min_footprint_coverage {
                debug!(
                    "Scene {} rejected: covers {:.0}% of tile",
                    handle.id,
                    coverage * 100.0
                );
                continue;
            }
        }
        match best {
            Some(current) if current.cloud_cover <= handle.cloud_cover => {}
            _ => best = Some(handle),
        }
    }
    best
}

/// Keep only the requested bands, in the requested order. An empty request keeps all.
pub fn filter_bands(
    descriptors: Vec<FetchDescriptor>,
    bands: &[String],
) -> Result<Vec<FetchDescriptor>, ProviderError> {
    if bands.is_empty() {
        return Ok(descriptors);
    }
    bands
        .iter()
        .map(|band| {
            descriptors
                .iter()
                .find(|d| d.band.as_deref() == Some(band.as_str()))
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("band asset {}", band)))
        })
        .collect()
}
