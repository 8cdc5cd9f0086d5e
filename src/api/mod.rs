//! High-level library API: run the search → download → mosaic pipeline for
//! one region or a batch of named regions. Prefer these entrypoints over
//! wiring the partitioner, coordinator and mosaicker by hand.
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::core::geo::{NamedRegion, Region};
use crate::core::mosaic::{MosaicConfig, MosaicResult, RasterMosaicker};
use crate::core::params::PipelineConfig;
use crate::core::partition::{BBoxPartitioner, Tile, TileGrid, TileIndex};
use crate::download::{
    CancelToken, ConcurrentDownloadCoordinator, FetchJob, FetchOutcome, RateLimiter, RawFetcher,
    RetryingFetcher, TimedOutcome,
};
use crate::error::{Error, Result};
use crate::io::RasterIo;
use crate::source::{FetchDescriptor, ImageSource, ProviderError, filter_bands, select_best};
use crate::types::{QualityFilter, TimeRange};

pub mod manifest;

pub use manifest::{BatchManifest, Manifest, RegionReport, RunMode, TileRecord};

/// File name of a run's mosaic inside its output directory.
pub const MOSAIC_FILE_NAME: &str = "mosaic.tif";
/// File name of the batch union mosaic.
pub const UNION_MOSAIC_FILE_NAME: &str = "union_mosaic.tif";

/// Download job key: one band asset of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BandKey {
    tile: TileIndex,
    band: usize,
}

impl std::fmt::Display for BandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/b{}", self.tile, self.band)
    }
}

/// What the search step decided for one tile.
struct TilePlan {
    tile: Tile,
    scene_id: Option<String>,
    /// Band descriptors to fetch, or the outcome recorded without fetching
    assets: std::result::Result<Vec<FetchDescriptor>, FetchOutcome>,
}

/// Sequences partitioning, per-tile scene selection, concurrent download,
/// band stacking and mosaicking. All settings come from the
/// [`PipelineConfig`] given at construction.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    source: Arc<dyn ImageSource>,
    fetcher: Arc<dyn RawFetcher>,
    raster_io: Arc<dyn RasterIo>,
    partitioner: BBoxPartitioner,
    limiter: Arc<RateLimiter>,
    cancel: CancelToken,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn ImageSource>,
        fetcher: Arc<dyn RawFetcher>,
        raster_io: Arc<dyn RasterIo>,
    ) -> Result<Self> {
        config.validate()?;
        let partitioner = BBoxPartitioner::new(config.division_policy.clone());
        let limiter = Arc::new(RateLimiter::new(config.min_request_interval()));
        Ok(Self {
            config,
            source,
            fetcher,
            raster_io,
            partitioner,
            limiter,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that stops scheduling new downloads when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// [`run`](Self::run) with the configured tile size and small-region threshold.
    pub fn run_with_defaults(
        &self,
        region: &Region,
        time_range: &TimeRange,
        filter: &QualityFilter,
    ) -> Result<Manifest> {
        self.run(
            region,
            time_range,
            filter,
            self.config.tile_size_km,
            self.config.small_region_threshold_km,
        )
    }

    /// Fetch imagery for `region` into the configured output directory.
    ///
    /// Regions whose radius is below `small_region_threshold_km` are fetched
    /// as one tile without mosaicking; larger ones are partitioned, fetched
    /// tile by tile and merged. Tile failures are recorded in the manifest.
    /// Errors are returned only for bad input and for a mosaic step that had
    /// no usable input.
    pub fn run(
        &self,
        region: &Region,
        time_range: &TimeRange,
        filter: &QualityFilter,
        tile_size_km: f64,
        small_region_threshold_km: f64,
    ) -> Result<Manifest> {
        if !(small_region_threshold_km.is_finite() && small_region_threshold_km >= 0.0) {
            return Err(Error::config(
                "small_region_threshold_km",
                small_region_threshold_km,
            ));
        }
        let radius_km = region.radius_km()?;
        let mode = if radius_km < small_region_threshold_km {
            RunMode::Direct
        } else {
            RunMode::Tiled
        };
        self.execute(
            &self.config.output_dir,
            region,
            time_range,
            filter,
            tile_size_km,
            mode,
        )
    }

    /// Run every named region in the tiled state, each into its own
    /// subdirectory, then mosaic the regional mosaics into one union mosaic.
    /// `reduction_factor` shrinks each region about its center first.
    pub fn run_batch(
        &self,
        regions: &[NamedRegion],
        time_range: &TimeRange,
        filter: &QualityFilter,
        reduction_factor: Option<f64>,
    ) -> Result<BatchManifest> {
        let started = Instant::now();
        let mut batch = BatchManifest::default();
        distinct_region_dirs(regions)?;

        for named in regions {
            let bbox = match reduction_factor {
                Some(factor) => named.bbox.scaled(factor)?,
                None => named.bbox.validated()?,
            };
            let dir = self.config.output_dir.join(sanitize(&named.name));
            info!("Region '{}' {} -> {:?}", named.name, bbox, dir);

            let report = match self.execute(
                &dir,
                &Region::Bbox(bbox),
                time_range,
                filter,
                self.config.tile_size_km,
                RunMode::Tiled,
            ) {
                Ok(manifest) => RegionReport {
                    name: named.name.clone(),
                    manifest: Some(manifest),
                    error: None,
                },
                Err(e) if e.is_configuration() => return Err(e),
                Err(Error::Mosaic { reason, manifest }) => {
                    error!("Region '{}' produced no mosaic: {}", named.name, reason);
                    RegionReport {
                        name: named.name.clone(),
                        manifest: Some(*manifest),
                        error: Some(reason),
                    }
                }
                Err(e) => {
                    error!("Region '{}' failed: {}", named.name, e);
                    RegionReport {
                        name: named.name.clone(),
                        manifest: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            batch.regions.push(report);
        }

        let regional: Vec<PathBuf> = batch
            .regions
            .iter()
            .filter_map(|r| r.mosaic_path().cloned())
            .collect();
        info!(
            "Batch: {}/{} regions produced a mosaic",
            regional.len(),
            regions.len()
        );

        if !regional.is_empty() {
            let output = self.config.output_dir.join(UNION_MOSAIC_FILE_NAME);
            let mosaicker = self.mosaicker();
            match mosaicker.mosaic(&regional, &output, &self.config.target_crs) {
                MosaicResult::Success {
                    output_path,
                    excluded,
                    ..
                } => {
                    batch.union_mosaic = Some(output_path);
                    batch.excluded = excluded;
                }
                MosaicResult::Failure { reason, excluded } => {
                    batch.excluded = excluded;
                    batch.elapsed_ms = millis(started.elapsed());
                    return Err(Error::BatchMosaic {
                        reason,
                        manifest: Box::new(batch),
                    });
                }
            }
        }

        batch.elapsed_ms = millis(started.elapsed());
        Ok(batch)
    }

    fn mosaicker(&self) -> RasterMosaicker<Arc<dyn RasterIo>> {
        RasterMosaicker::new(
            Arc::clone(&self.raster_io),
            MosaicConfig {
                nodata: self.config.nodata,
                delete_invalid: self.config.delete_corrupt,
                keep_reprojected: self.config.keep_reprojected,
            },
        )
    }

    fn execute(
        &self,
        out_dir: &Path,
        region: &Region,
        time_range: &TimeRange,
        filter: &QualityFilter,
        tile_size_km: f64,
        mode: RunMode,
    ) -> Result<Manifest> {
        filter.validate()?;
        let started = Instant::now();
        let bbox = region.bbox()?;
        let radius_km = region.radius_km()?;

        let grid = match mode {
            RunMode::Direct => TileGrid::single(bbox),
            RunMode::Tiled => self.partitioner.partition(&bbox, tile_size_km, radius_km)?,
        };
        info!(
            "{:?} run over {} (radius {:.1} km): {} tile(s) via '{}'",
            mode,
            bbox,
            radius_km,
            grid.len(),
            self.source.name()
        );

        let plans: Vec<TilePlan> = grid
            .iter()
            .map(|tile| self.plan_tile(tile, time_range, filter))
            .collect();

        let tiles_dir = out_dir.join("tiles");
        let mut jobs = Vec::new();
        for plan in &plans {
            if let Ok(assets) = &plan.assets {
                for (band, descriptor) in assets.iter().enumerate() {
                    let key = BandKey {
                        tile: plan.tile.index,
                        band,
                    };
                    let destination = tiles_dir
                        .join(plan.tile.index.to_string())
                        .join(asset_file_name(descriptor, band));
                    jobs.push((
                        key,
                        FetchJob {
                            descriptor: Some(descriptor.clone()),
                            destination,
                        },
                    ));
                }
            }
        }

        let fetcher = RetryingFetcher::new(Arc::clone(&self.fetcher), self.config.retry_backoff())
            .with_max_backoff(self.config.max_backoff())
            .with_rate_limiter(Arc::clone(&self.limiter));
        let coordinator =
            ConcurrentDownloadCoordinator::new(fetcher, self.config.concurrency, self.config.max_retries)
                .with_deadline(self.config.deadline())
                .with_cancel_token(self.cancel.clone());
        let outcomes = coordinator.run_all_timed(jobs);

        let tiles: Vec<TileRecord> = plans
            .into_iter()
            .map(|plan| self.assemble_tile(plan, &outcomes, &tiles_dir))
            .collect();

        let mut manifest = Manifest {
            region: bbox,
            mode,
            tiles,
            elapsed_ms: 0,
            mosaic_path: None,
            excluded: Vec::new(),
        };
        for failed in manifest.failures() {
            warn!(
                "Tile {} {} missing: {}",
                failed.index, failed.bbox, failed.outcome
            );
        }

        let successes: Vec<PathBuf> = manifest
            .successes()
            .filter_map(|t| t.outcome.local_path().map(Path::to_path_buf))
            .collect();

        match mode {
            RunMode::Direct => manifest.mosaic_path = successes.into_iter().next(),
            RunMode::Tiled if successes.is_empty() => {
                warn!("No tile succeeded; no mosaic for {}", bbox);
            }
            RunMode::Tiled => {
                let output = out_dir.join(MOSAIC_FILE_NAME);
                match self
                    .mosaicker()
                    .mosaic(&successes, &output, &self.config.target_crs)
                {
                    MosaicResult::Success {
                        output_path,
                        excluded,
                        ..
                    } => {
                        manifest.mosaic_path = Some(output_path);
                        manifest.excluded = excluded;
                    }
                    MosaicResult::Failure { reason, excluded } => {
                        manifest.excluded = excluded;
                        manifest.elapsed_ms = millis(started.elapsed());
                        return Err(Error::Mosaic {
                            reason,
                            manifest: Box::new(manifest),
                        });
                    }
                }
            }
        }

        manifest.elapsed_ms = millis(started.elapsed());
        info!(
            "Run finished in {:.1}s: {}/{} tiles, mosaic {:?}",
            started.elapsed().as_secs_f64(),
            manifest.success_count(),
            manifest.tiles.len(),
            manifest.mosaic_path
        );
        if let Some(estimate) = manifest.estimated_total() {
            info!(
                "Mean tile fetch {:.1}s, sequential estimate {:.1}s",
                manifest.mean_tile_duration().unwrap_or_default().as_secs_f64(),
                estimate.as_secs_f64()
            );
        }
        Ok(manifest)
    }

    /// Search, select and resolve the assets of one tile.
    fn plan_tile(&self, tile: &Tile, time_range: &TimeRange, filter: &QualityFilter) -> TilePlan {
        let unresolved = |scene_id: Option<String>, outcome: FetchOutcome| TilePlan {
            tile: *tile,
            scene_id,
            assets: Err(outcome),
        };

        let candidates = match self.source.search(&tile.bbox, time_range, filter) {
            Ok(c) => c,
            Err(e) => {
                warn!("Search for tile {} {} failed: {}", tile.index, tile.bbox, e);
                return unresolved(None, outcome_for(e));
            }
        };
        let Some(best) = select_best(&candidates, &tile.bbox, filter) else {
            warn!(
                "Tile {} {}: no acceptable scene among {} candidates",
                tile.index,
                tile.bbox,
                candidates.len()
            );
            return unresolved(None, FetchOutcome::NotFound);
        };
        info!(
            "Tile {}: scene {} (cloud {:.1}%)",
            tile.index, best.id, best.cloud_cover
        );

        let assets = self
            .source
            .fetch_descriptors(best)
            .and_then(|d| filter_bands(d, &self.config.bands));
        match assets {
            Ok(assets) if assets.is_empty() => unresolved(
                Some(best.id.clone()),
                FetchOutcome::PermanentFailure {
                    reason: format!("scene {} has no assets", best.id),
                },
            ),
            Ok(assets) => TilePlan {
                tile: *tile,
                scene_id: Some(best.id.clone()),
                assets: Ok(assets),
            },
            Err(e) => {
                warn!("Tile {}: cannot resolve assets of {}: {}", tile.index, best.id, e);
                unresolved(Some(best.id.clone()), outcome_for(e))
            }
        }
    }

    /// Fold a tile's band outcomes into one: any band failure fails the tile,
    /// several successful bands are stacked into `<tiles>/<index>.tif`.
    fn assemble_tile(
        &self,
        plan: TilePlan,
        outcomes: &BTreeMap<BandKey, TimedOutcome>,
        tiles_dir: &Path,
    ) -> TileRecord {
        let index = plan.tile.index;
        let record = |outcome: FetchOutcome, elapsed: Duration| TileRecord {
            index,
            bbox: plan.tile.bbox,
            scene_id: plan.scene_id.clone(),
            outcome,
            elapsed_ms: millis(elapsed),
        };

        let assets = match &plan.assets {
            Ok(assets) => assets,
            Err(outcome) => return record(outcome.clone(), Duration::ZERO),
        };

        let bands: Vec<&TimedOutcome> = (0..assets.len())
            .filter_map(|band| outcomes.get(&BandKey { tile: index, band }))
            .collect();
        let elapsed: Duration = bands.iter().map(|t| t.elapsed).sum();

        if let Some(failed) = bands.iter().find(|t| !t.outcome.is_success()) {
            return record(failed.outcome.clone(), elapsed);
        }
        if bands.len() != assets.len() {
            return record(FetchOutcome::Cancelled, elapsed);
        }

        let paths: Vec<PathBuf> = bands
            .iter()
            .filter_map(|t| t.outcome.local_path().map(Path::to_path_buf))
            .collect();
        let bytes_written: u64 = bands
            .iter()
            .map(|t| match t.outcome {
                FetchOutcome::Success { bytes_written, .. } => bytes_written,
                _ => 0,
            })
            .sum();

        if paths.len() == 1 {
            return record(bands[0].outcome.clone(), elapsed);
        }

        let stacked = tiles_dir.join(format!("{}.tif", index));
        match self.raster_io.stack_bands(&paths, &stacked) {
            Ok(header) => {
                info!(
                    "Tile {}: stacked {} bands into {:?}",
                    index, header.band_count, stacked
                );
                record(
                    FetchOutcome::Success {
                        local_path: stacked,
                        bytes_written,
                    },
                    elapsed,
                )
            }
            Err(e) => {
                warn!("Tile {}: band stacking failed: {}", index, e);
                record(
                    FetchOutcome::PermanentFailure {
                        reason: format!("band stacking failed: {}", e),
                    },
                    elapsed,
                )
            }
        }
    }
}

/// Search and resolution errors are recorded like fetch errors.
fn outcome_for(e: ProviderError) -> FetchOutcome {
    match e {
        ProviderError::NotFound(_) => FetchOutcome::NotFound,
        e if e.is_retryable() => FetchOutcome::TransientFailure {
            reason: e.to_string(),
        },
        e => FetchOutcome::PermanentFailure {
            reason: e.to_string(),
        },
    }
}

fn asset_file_name(descriptor: &FetchDescriptor, band: usize) -> String {
    match &descriptor.band {
        Some(name) => format!("{}.tif", sanitize(name)),
        None => format!("asset{}.tif", band),
    }
}

/// Two regions whose names sanitize alike would share one output directory.
fn distinct_region_dirs(regions: &[NamedRegion]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for named in regions {
        if let Some(first) = seen.insert(sanitize(&named.name), &named.name) {
            return Err(Error::config(
                "regions",
                format!(
                    "'{}' and '{}' share output directory '{}'",
                    first,
                    named.name,
                    sanitize(&named.name)
                ),
            ));
        }
    }
    Ok(())
}

/// Keep names usable as a single path component.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "region".to_string()
    } else {
        trimmed.to_string()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
