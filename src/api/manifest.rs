//! Run records returned by the orchestrator.
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::geo::BoundingBox;
use crate::core::mosaic::ExcludedInput;
use crate::core::partition::TileIndex;
use crate::download::FetchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Whole region fetched as one tile, no mosaicking
    Direct,
    Tiled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub index: TileIndex,
    pub bbox: BoundingBox,
    /// Scene chosen for the tile, if any
    pub scene_id: Option<String>,
    pub outcome: FetchOutcome,
    /// Summed worker time of the tile's band downloads
    pub elapsed_ms: u64,
}

/// Result of one [`run`](crate::api::PipelineOrchestrator::run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub region: BoundingBox,
    pub mode: RunMode,
    /// One record per tile, row-major
    pub tiles: Vec<TileRecord>,
    pub elapsed_ms: u64,
    pub mosaic_path: Option<PathBuf>,
    /// Inputs the mosaicker left out
    #[serde(default)]
    pub excluded: Vec<ExcludedInput>,
}

impl Manifest {
    pub fn successes(&self) -> impl Iterator<Item = &TileRecord> {
        self.tiles.iter().filter(|t| t.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TileRecord> {
        self.tiles.iter().filter(|t| !t.outcome.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Mean fetch duration over tiles that were actually attempted.
    pub fn mean_tile_duration(&self) -> Option<Duration> {
        let timed: Vec<u64> = self
            .tiles
            .iter()
            .filter(|t| t.elapsed_ms > 0)
            .map(|t| t.elapsed_ms)
            .collect();
        if timed.is_empty() {
            return None;
        }
        Some(Duration::from_millis(timed.iter().sum::<u64>() / timed.len() as u64))
    }

    /// Mean tile duration times the tile count: a sequential-cost estimate for the grid.
    pub fn estimated_total(&self) -> Option<Duration> {
        self.mean_tile_duration()
            .map(|mean| mean * self.tiles.len() as u32)
    }
}

/// Outcome of one named region inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub name: String,
    pub manifest: Option<Manifest>,
    /// Hard error of that region's run, if it had one
    pub error: Option<String>,
}

impl RegionReport {
    pub fn mosaic_path(&self) -> Option<&PathBuf> {
        self.manifest.as_ref().and_then(|m| m.mosaic_path.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub regions: Vec<RegionReport>,
    /// Mosaic of all regional mosaics
    pub union_mosaic: Option<PathBuf>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub excluded: Vec<ExcludedInput>,
}

impl BatchManifest {
    pub fn processed(&self) -> usize {
        self.regions.iter().filter(|r| r.mosaic_path().is_some()).count()
    }

    pub fn errors(&self) -> usize {
        self.regions.iter().filter(|r| r.error.is_some()).count()
    }
}
