//! Splits a region into a grid of sub-tiles small enough for provider request limits.
//!
//! Edge convention: each tile covers the half-open box `[west, east) × [south, north)`,
//! except tiles in the last column/row, which are closed on the parent boundary.
//! Neighbouring tiles share the exact same f64 edge value because every edge is
//! computed as `origin + k * delta` and never accumulated.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::geo::{BoundingBox, degree_deltas, km_span};
use crate::error::{Error, Result};

/// Slack used when deciding whether a final, partial column/row is needed.
const STEP_EPSILON: f64 = 1e-9;

/// Regions with at least `min_radius_km` use `divisions` tiles per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivisionTier {
    pub min_radius_km: f64,
    pub divisions: u32,
}

/// Radius-tiered division policy. The thresholds are empirical safety margins
/// against providers that truncate or reject oversized requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionPolicy {
    pub tiers: Vec<DivisionTier>,
    pub fallback: u32,
}

impl Default for DivisionPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                DivisionTier {
                    min_radius_km: 80.0,
                    divisions: 5,
                },
                DivisionTier {
                    min_radius_km: 50.0,
                    divisions: 4,
                },
            ],
            fallback: 3,
        }
    }
}

impl DivisionPolicy {
    /// Divisions per axis for a region of the given radius. Thresholds are
    /// inclusive on the higher tier.
    pub fn divisions_for(&self, radius_km: f64) -> u32 {
        let mut tiers = self.tiers.clone();
        tiers.sort_by(|a, b| b.min_radius_km.total_cmp(&a.min_radius_km));
        tiers
            .iter()
            .find(|t| radius_km >= t.min_radius_km)
            .map(|t| t.divisions)
            .unwrap_or(self.fallback)
            .max(1)
    }
}

/// Position of a tile inside its grid. Orders row-major (south to north, then west to east).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub row: u32,
    pub col: u32,
}

impl TileIndex {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for TileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{:02}c{:02}", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub index: TileIndex,
    pub bbox: BoundingBox,
    /// The region this tile was cut from.
    pub parent: BoundingBox,
}

/// Ordered tiles covering one region, computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub parent: BoundingBox,
    pub rows: u32,
    pub cols: u32,
    /// Tile edge length actually used, in km.
    pub tile_size_km: f64,
    pub divisions: u32,
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    /// Degenerate grid holding the whole region as one tile.
    pub fn single(bbox: BoundingBox) -> Self {
        let (w, h) = km_span(&bbox);
        Self {
            parent: bbox,
            rows: 1,
            cols: 1,
            tile_size_km: w.max(h),
            divisions: 1,
            tiles: vec![Tile {
                index: TileIndex::new(0, 0),
                bbox,
                parent: bbox,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    pub fn get(&self, index: TileIndex) -> Option<&Tile> {
        if index.row >= self.rows || index.col >= self.cols {
            return None;
        }
        self.tiles
            .get((index.row * self.cols + index.col) as usize)
    }
}

/// Number of `delta` steps needed to cover `extent`, at least one.
fn steps(extent: f64, delta: f64) -> u32 {
    ((extent / delta) - STEP_EPSILON).ceil().max(1.0) as u32
}

/// Edge `k` of an axis starting at `origin`, clamped to `end`; the last edge is `end` itself.
fn edge(origin: f64, delta: f64, k: u32, count: u32, end: f64) -> f64 {
    if k >= count {
        end
    } else {
        (origin + k as f64 * delta).min(end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BBoxPartitioner {
    policy: DivisionPolicy,
}

impl BBoxPartitioner {
    pub fn new(policy: DivisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DivisionPolicy {
        &self.policy
    }

    /// Cut `bbox` into a row-major grid.
    ///
    /// The division tier is chosen from `total_radius_km` when it is positive,
    /// otherwise from half the box height. Tiles are never smaller than
    /// `desired_tile_size_km` but grow when the tier would make them smaller
    /// than `2 * radius / divisions`.
    pub fn partition(
        &self,
        bbox: &BoundingBox,
        desired_tile_size_km: f64,
        total_radius_km: f64,
    ) -> Result<TileGrid> {
        let bbox = bbox.validated()?;
        if !(desired_tile_size_km.is_finite() && desired_tile_size_km > 0.0) {
            return Err(Error::config("tile_size_km", desired_tile_size_km));
        }

        let (_, height_km) = km_span(&bbox);
        let radius_km = if total_radius_km.is_finite() && total_radius_km > 0.0 {
            total_radius_km
        } else {
            height_km / 2.0
        };
        let divisions = self.policy.divisions_for(radius_km);
        let tile_size_km = desired_tile_size_km.max(2.0 * radius_km / divisions as f64);

        let (center_lat, _) = bbox.center();
        let (d_lat, d_lon) = degree_deltas(center_lat, tile_size_km);
        let rows = steps(bbox.height_deg(), d_lat);
        let cols = steps(bbox.width_deg(), d_lon);

        debug!(
            "Partitioning {} (radius {:.1} km): {} divisions, tile {:.2} km -> {}x{} tiles",
            bbox, radius_km, divisions, tile_size_km, rows, cols
        );

        let mut tiles = Vec::with_capacity((rows * cols) as usize);
        for row in 0..rows {
            let south = edge(bbox.south, d_lat, row, rows, bbox.north);
            let north = edge(bbox.south, d_lat, row + 1, rows, bbox.north);
            for col in 0..cols {
                let west = edge(bbox.west, d_lon, col, cols, bbox.east);
                let east = edge(bbox.west, d_lon, col + 1, cols, bbox.east);
                tiles.push(Tile {
                    index: TileIndex::new(row, col),
                    bbox: BoundingBox::new(west, south, east, north)?,
                    parent: bbox,
                });
            }
        }

        Ok(TileGrid {
            parent: bbox,
            rows,
            cols,
            tile_size_km,
            divisions,
            tiles,
        })
    }
}
