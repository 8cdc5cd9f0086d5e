use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::partition::DivisionPolicy;
use crate::error::{Error, Result};
use crate::types::ProviderProfile;

/// Pipeline settings, suitable for run files. Passed to the orchestrator at
/// construction; nothing here is process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory receiving per-tile downloads and mosaics
    pub output_dir: PathBuf,
    /// CRS every mosaic input is brought to before merging
    pub target_crs: String,
    /// No-data sentinel used when reprojecting and for unfilled mosaic pixels
    pub nodata: f64,
    pub tile_size_km: f64,
    /// Regions with a smaller radius are fetched as a single tile
    pub small_region_threshold_km: f64,
    /// Worker count of the download pool
    pub concurrency: usize,
    /// Retries after the first attempt on rate-limit/timeout
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Cap on one retry wait, provider `Retry-After` hints included
    pub max_backoff_ms: u64,
    /// Minimum spacing between two request starts across all workers
    pub min_request_interval_ms: u64,
    /// Optional run-level deadline, counted from the start of the download phase
    pub deadline_secs: Option<u64>,
    pub delete_corrupt: bool,
    pub keep_reprojected: bool,
    pub division_policy: DivisionPolicy,
    /// Band assets to download per scene, in output order; empty means all
    pub bands: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("images"),
            target_crs: "EPSG:32721".to_string(),
            nodata: -32768.0,
            tile_size_km: 20.0,
            small_region_threshold_km: 50.0,
            concurrency: 3,
            max_retries: 3,
            retry_backoff_ms: 20_000,
            max_backoff_ms: 120_000,
            min_request_interval_ms: 0,
            deadline_secs: None,
            delete_corrupt: true,
            keep_reprojected: false,
            division_policy: DivisionPolicy::default(),
            bands: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Defaults adjusted to one provider's band names, CRS and pacing.
    pub fn for_provider(profile: ProviderProfile) -> Self {
        Self::default().with_provider(profile)
    }

    pub fn with_provider(mut self, profile: ProviderProfile) -> Self {
        self.target_crs = profile.default_crs().to_string();
        self.bands = profile
            .default_bands()
            .iter()
            .map(|b| b.to_string())
            .collect();
        self.max_retries = profile.default_max_retries();
        self.min_request_interval_ms = profile.default_min_request_interval_ms();
        self
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency", self.concurrency));
        }
        if !(self.tile_size_km.is_finite() && self.tile_size_km > 0.0) {
            return Err(Error::config("tile_size_km", self.tile_size_km));
        }
        if !(self.small_region_threshold_km.is_finite() && self.small_region_threshold_km >= 0.0) {
            return Err(Error::config(
                "small_region_threshold_km",
                self.small_region_threshold_km,
            ));
        }
        if self.target_crs.trim().is_empty() {
            return Err(Error::config("target_crs", "<empty>"));
        }
        if !self.nodata.is_finite() {
            return Err(Error::config("nodata", self.nodata));
        }
        if self.division_policy.fallback == 0
            || self.division_policy.tiers.iter().any(|t| t.divisions == 0)
        {
            return Err(Error::config("division_policy", "zero divisions"));
        }
        if self.max_backoff_ms < self.retry_backoff_ms {
            return Err(Error::config("max_backoff_ms", self.max_backoff_ms));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.bands.iter().find(|b| !seen.insert(b.as_str())) {
            return Err(Error::config("bands", format!("duplicate band {dup}")));
        }
        Ok(())
    }
}
