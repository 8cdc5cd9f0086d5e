//! Bounding boxes and the degree/kilometre conversions used for tiling.
//!
//! All conversions use a local equirectangular approximation
//! (`1° latitude = 111 km`, longitude scaled by `cos(lat)`). It is good for
//! radii up to roughly 100 km and skews badly near the poles; there is no
//! geodesic correction.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kilometres per degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Axis-aligned box in decimal degrees (WGS84 unless stated otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Build a box, rejecting degenerate or non-finite extents.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let finite = [west, south, east, north].iter().all(|v| v.is_finite());
        if !finite || west >= east || south >= north {
            return Err(Error::DegenerateBox {
                west,
                south,
                east,
                north,
            });
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// Re-check the invariants of a box that came in through deserialization.
    pub fn validated(self) -> Result<Self> {
        Self::new(self.west, self.south, self.east, self.north)
    }

    pub fn width_deg(&self) -> f64 {
        self.east - self.west
    }

    pub fn height_deg(&self) -> f64 {
        self.north - self.south
    }

    /// (lat, lon) of the box center.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }

    pub fn area_deg2(&self) -> f64 {
        self.width_deg() * self.height_deg()
    }

    /// Overlapping part of two boxes; `None` when they only touch or are disjoint.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let west = self.west.max(other.west);
        let south = self.south.max(other.south);
        let east = self.east.min(other.east);
        let north = self.north.min(other.north);
        if west < east && south < north {
            Some(BoundingBox {
                west,
                south,
                east,
                north,
            })
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.intersection(other).is_some()
    }

    /// Whether `other` lies inside this box, with `eps` degrees of slack.
    pub fn contains(&self, other: &BoundingBox, eps: f64) -> bool {
        other.west >= self.west - eps
            && other.south >= self.south - eps
            && other.east <= self.east + eps
            && other.north <= self.north + eps
    }

    /// Fraction of this box's area covered by `other` (0.0..=1.0).
    pub fn coverage_by(&self, other: &BoundingBox) -> f64 {
        match self.intersection(other) {
            Some(overlap) => overlap.area_deg2() / self.area_deg2(),
            None => 0.0,
        }
    }

    /// Shrink or grow the box about its center by `factor` on each axis.
    pub fn scaled(&self, factor: f64) -> Result<BoundingBox> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(Error::config("reduction_factor", factor));
        }
        let (lat, lon) = self.center();
        let half_w = self.width_deg() * factor / 2.0;
        let half_h = self.height_deg() * factor / 2.0;
        BoundingBox::new(lon - half_w, lat - half_h, lon + half_w, lat + half_h)
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.5}, {:.5}, {:.5}, {:.5}]",
            self.west, self.south, self.east, self.north
        )
    }
}

/// Degree offsets `(Δlat, Δlon)` spanning `km` kilometres at latitude `lat`.
pub fn degree_deltas(lat: f64, km: f64) -> (f64, f64) {
    let d_lat = km / KM_PER_DEGREE;
    let d_lon = km / (KM_PER_DEGREE * lat.to_radians().cos());
    (d_lat, d_lon)
}

/// Box of half-size `radius_km` around a center point.
pub fn bbox_from_center(lat: f64, lon: f64, radius_km: f64) -> Result<BoundingBox> {
    if !(radius_km.is_finite() && radius_km > 0.0) {
        return Err(Error::config("radius_km", radius_km));
    }
    let (d_lat, d_lon) = degree_deltas(lat, radius_km);
    BoundingBox::new(lon - d_lon, lat - d_lat, lon + d_lon, lat + d_lat)
}

/// `(width_km, height_km)` of a box, scaling longitude at its vertical center.
pub fn km_span(bbox: &BoundingBox) -> (f64, f64) {
    let (lat, _) = bbox.center();
    let width = bbox.width_deg() * KM_PER_DEGREE * lat.to_radians().cos();
    let height = bbox.height_deg() * KM_PER_DEGREE;
    (width, height)
}

/// Area of interest supplied by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Region {
    Bbox(BoundingBox),
    Center { lat: f64, lon: f64, radius_km: f64 },
}

impl Region {
    pub fn bbox(&self) -> Result<BoundingBox> {
        match *self {
            Region::Bbox(b) => b.validated(),
            Region::Center {
                lat,
                lon,
                radius_km,
            } => bbox_from_center(lat, lon, radius_km),
        }
    }

    /// Radius used for the direct/tiled decision and the division tier.
    /// A bbox counts as its larger half-extent.
    pub fn radius_km(&self) -> Result<f64> {
        match *self {
            Region::Center { radius_km, .. } => Ok(radius_km),
            Region::Bbox(b) => {
                let (w, h) = km_span(&b.validated()?);
                Ok(w.max(h) / 2.0)
            }
        }
    }
}

/// A region with a caller-chosen name, e.g. one administrative tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRegion {
    pub name: String,
    pub bbox: BoundingBox,
}
