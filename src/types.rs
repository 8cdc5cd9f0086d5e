//! Shared types and enums used across satmosaic.
//! Includes `ProviderProfile`, `TimeRange` and `QualityFilter`.
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Imagery providers the pipeline has adapters or defaults for. The core is
/// identical for all of them; the profile only carries their small drifts
/// (band names, working CRS, retry budget, request pacing).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProfile {
    BrazilDataCube,
    PlanetaryComputer,
    Copernicus,
    EarthEngine,
    UsgsM2m,
}

impl ProviderProfile {
    /// Band assets downloaded per scene, in output band order.
    pub fn default_bands(&self) -> &'static [&'static str] {
        match self {
            ProviderProfile::BrazilDataCube | ProviderProfile::PlanetaryComputer => {
                &["B04", "B03", "B02"]
            }
            ProviderProfile::Copernicus => &["B02", "B03", "B04", "B08"],
            ProviderProfile::EarthEngine => &["B4", "B3", "B2"],
            ProviderProfile::UsgsM2m => &["SR_B4", "SR_B3", "SR_B2"],
        }
    }

    /// CRS the per-tile rasters are mosaicked in.
    pub fn default_crs(&self) -> &'static str {
        match self {
            ProviderProfile::EarthEngine => "EPSG:4326",
            _ => "EPSG:32721",
        }
    }

    pub fn default_max_retries(&self) -> u32 {
        match self {
            ProviderProfile::Copernicus | ProviderProfile::EarthEngine => 5,
            _ => 3,
        }
    }

    /// Minimum spacing between two request starts, in milliseconds.
    pub fn default_min_request_interval_ms(&self) -> u64 {
        match self {
            ProviderProfile::Copernicus => 1000,
            ProviderProfile::EarthEngine => 500,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ProviderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderProfile::BrazilDataCube => "BrazilDataCube",
            ProviderProfile::PlanetaryComputer => "PlanetaryComputer",
            ProviderProfile::Copernicus => "Copernicus",
            ProviderProfile::EarthEngine => "EarthEngine",
            ProviderProfile::UsgsM2m => "UsgsM2m",
        };
        write!(f, "{}", s)
    }
}

/// Inclusive acquisition date range.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::config("time_range", format!("{} > {}", start, end)));
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| Error::config("date", s))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.start, self.end)
    }
}

/// Scene acceptance rules applied before picking the best candidate of a tile.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityFilter {
    /// Maximum cloud cover percentage.
    pub max_cloud_cover: f64,
    /// Optional lower bound, used by some composite collections.
    pub min_cloud_cover: Option<f64>,
    /// Minimum fraction of the tile a scene footprint must cover (0..=1).
    pub min_footprint_coverage: f64,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self {
            max_cloud_cover: 20.0,
            min_cloud_cover: None,
            min_footprint_coverage: 0.82,
        }
    }
}

impl QualityFilter {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.max_cloud_cover) {
            return Err(Error::config("max_cloud_cover", self.max_cloud_cover));
        }
        if let Some(min) = self.min_cloud_cover {
            if !(0.0..=self.max_cloud_cover).contains(&min) {
                return Err(Error::config("min_cloud_cover", min));
            }
        }
        if !(0.0..=1.0).contains(&self.min_footprint_coverage) {
            return Err(Error::config(
                "min_footprint_coverage",
                self.min_footprint_coverage,
            ));
        }
        Ok(())
    }

    pub fn accepts_cloud_cover(&self, cloud_cover: f64) -> bool {
        cloud_cover <= self.max_cloud_cover
            && self.min_cloud_cover.is_none_or(|min| cloud_cover >= min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_parse() {
        let range = TimeRange::parse("2024-12-25", "2025-01-25").unwrap();
        assert!(range.contains(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()));
        assert_eq!(range.to_string(), "2024-12-25_2025-01-25");
    }

    #[test]
    fn test_time_range_rejects_inverted_and_garbage() {
        assert!(TimeRange::parse("2025-02-01", "2025-01-01").is_err());
        assert!(TimeRange::parse("yesterday", "2025-01-01").is_err());
    }

    #[test]
    fn test_quality_filter_bounds() {
        let filter = QualityFilter {
            max_cloud_cover: 20.0,
            min_cloud_cover: Some(10.0),
            min_footprint_coverage: 0.82,
        };
        assert!(filter.validate().is_ok());
        assert!(filter.accepts_cloud_cover(10.0));
        assert!(filter.accepts_cloud_cover(20.0));
        assert!(!filter.accepts_cloud_cover(9.9));
        assert!(!filter.accepts_cloud_cover(20.1));

        let bad = QualityFilter {
            max_cloud_cover: 120.0,
            ..QualityFilter::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_provider_profiles() {
        assert_eq!(ProviderProfile::Copernicus.default_bands().len(), 4);
        assert_eq!(ProviderProfile::BrazilDataCube.default_crs(), "EPSG:32721");
        assert_eq!(ProviderProfile::EarthEngine.to_string(), "EarthEngine");
    }
}
