use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use satmosaic::api::{BatchManifest, Manifest, PipelineOrchestrator};
use satmosaic::core::geo::{BoundingBox, NamedRegion, Region};
use satmosaic::io::writers::manifest::{sidecar_path, write_json};
use satmosaic::{
    GdalRasterIo, HttpFetcher, PipelineConfig, ProviderProfile, QualityFilter, StaticCatalog,
    TimeRange,
};

use super::args::CliArgs;
use super::errors::AppError;

/// Contents of a `--run-file`. Every field is optional; flags take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunFile {
    provider: Option<ProviderProfile>,
    catalog: Option<PathBuf>,
    region: Option<Region>,
    /// Batch of named regions; takes the batch path when non-empty
    regions: Vec<NamedRegion>,
    reduction_factor: Option<f64>,
    time_range: Option<TimeRange>,
    filter: Option<QualityFilter>,
    /// Partial `PipelineConfig` applied over the provider defaults
    config: Option<serde_json::Value>,
}

fn load_run_file(path: &Path) -> Result<RunFile, AppError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Provider defaults, then run file overrides, then flag overrides.
fn build_config(args: &CliArgs, file: &RunFile) -> Result<PipelineConfig, AppError> {
    let base = match args.provider.or(file.provider) {
        Some(profile) => PipelineConfig::for_provider(profile),
        None => PipelineConfig::default(),
    };
    let mut config = match &file.config {
        Some(overrides) => {
            let mut merged = serde_json::to_value(&base)?;
            if let (Some(target), Some(source)) = (merged.as_object_mut(), overrides.as_object()) {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
            }
            serde_json::from_value(merged)?
        }
        None => base,
    };

    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(crs) = &args.target_crs {
        config.target_crs = crs.clone();
    }
    if let Some(size) = args.tile_size_km {
        config.tile_size_km = size;
    }
    if let Some(threshold) = args.small_region_threshold_km {
        config.small_region_threshold_km = threshold;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    if let Some(bands) = &args.bands {
        config.bands = bands.iter().map(|b| b.trim().to_string()).collect();
    }
    Ok(config)
}

fn parse_numbers(arg: &str, value: &str, count: usize, expected: &'static str) -> Result<Vec<f64>, AppError> {
    let invalid = || AppError::InvalidArgument {
        arg: arg.to_string(),
        value: value.to_string(),
        expected,
    };
    let numbers = value
        .split(',')
        .map(|s| s.trim().parse::<f64>().map_err(|_| invalid()))
        .collect::<Result<Vec<f64>, AppError>>()?;
    if numbers.len() != count {
        return Err(invalid());
    }
    Ok(numbers)
}

fn region_from_args(args: &CliArgs, file: &RunFile) -> Result<Option<Region>, AppError> {
    match (&args.bbox, &args.center) {
        (Some(_), Some(_)) => Err(AppError::Conflict(
            "--bbox and --center are mutually exclusive".to_string(),
        )),
        (Some(bbox), None) => {
            let v = parse_numbers("--bbox", bbox, 4, "west,south,east,north")?;
            Ok(Some(Region::Bbox(BoundingBox::new(v[0], v[1], v[2], v[3])?)))
        }
        (None, Some(center)) => {
            let v = parse_numbers("--center", center, 2, "lat,lon")?;
            let radius_km = args.radius_km.ok_or(AppError::MissingArgument {
                arg: "--radius-km".to_string(),
            })?;
            Ok(Some(Region::Center {
                lat: v[0],
                lon: v[1],
                radius_km,
            }))
        }
        (None, None) => Ok(file.region),
    }
}

fn time_range(args: &CliArgs, file: &RunFile) -> Result<TimeRange, AppError> {
    match (&args.start, &args.end, file.time_range) {
        (Some(start), Some(end), _) => Ok(TimeRange::parse(start, end)?),
        (None, None, Some(range)) => Ok(TimeRange::new(range.start, range.end)?),
        (Some(_), None, _) => Err(AppError::MissingArgument {
            arg: "--end".to_string(),
        }),
        _ => Err(AppError::MissingArgument {
            arg: "--start".to_string(),
        }),
    }
}

fn report_manifest(manifest: &Manifest) {
    info!(
        "Tiles: {} succeeded, {} failed",
        manifest.success_count(),
        manifest.failure_count()
    );
    for failed in manifest.failures() {
        warn!("  {} {}: {}", failed.index, failed.bbox, failed.outcome);
    }
    for excluded in &manifest.excluded {
        warn!("  excluded {:?}: {}", excluded.path, excluded.reason);
    }
    match &manifest.mosaic_path {
        Some(path) => info!("Mosaic: {:?}", path),
        None => warn!("No mosaic produced"),
    }
}

fn report_batch(batch: &BatchManifest) {
    info!(
        "Batch processing complete: {} with mosaic, {} errors, {} total",
        batch.processed(),
        batch.errors(),
        batch.regions.len()
    );
    for region in &batch.regions {
        if let Some(error) = &region.error {
            warn!("  {}: {}", region.name, error);
        }
    }
    if let Some(path) = &batch.union_mosaic {
        info!("Union mosaic: {:?}", path);
    }
}

fn manifest_destination(args: &CliArgs, mosaic: Option<&PathBuf>, output_dir: &Path, fallback: &str) -> PathBuf {
    args.manifest.clone().unwrap_or_else(|| match mosaic {
        Some(path) => sidecar_path(path),
        None => output_dir.join(fallback),
    })
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if args.log {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file = match &args.run_file {
        Some(path) => load_run_file(path)?,
        None => RunFile::default(),
    };

    let config = build_config(&args, &file)?;
    let catalog_path = args
        .catalog
        .clone()
        .or_else(|| file.catalog.clone())
        .ok_or(AppError::MissingArgument {
            arg: "--catalog".to_string(),
        })?;
    let range = time_range(&args, &file)?;
    let mut quality = file.filter.unwrap_or_default();
    if let Some(max) = args.max_cloud_cover {
        quality.max_cloud_cover = max;
    }
    let output_dir = config.output_dir.clone();
    std::fs::create_dir_all(&output_dir)?;

    let source = StaticCatalog::from_json_file(&catalog_path).map_err(AppError::from)?;
    let fetcher = HttpFetcher::new().map_err(satmosaic::Error::from)?;
    let orchestrator = PipelineOrchestrator::new(
        config,
        Arc::new(source),
        Arc::new(fetcher),
        Arc::new(GdalRasterIo::new()),
    )
    .map_err(AppError::from)?;

    info!("Output directory: {:?}", output_dir);

    if !file.regions.is_empty() {
        if region_from_args(&args, &file)?.is_some() {
            return Err(AppError::Conflict(
                "a batch run file cannot be combined with a single region".to_string(),
            )
            .into());
        }
        info!("Starting batch of {} regions", file.regions.len());
        let batch = match orchestrator.run_batch(&file.regions, &range, &quality, file.reduction_factor) {
            Ok(batch) => batch,
            Err(satmosaic::Error::BatchMosaic { reason, manifest }) => {
                let path = manifest_destination(&args, None, &output_dir, "batch_manifest.json");
                write_json(&path, &*manifest)?;
                report_batch(&manifest);
                return Err(AppError::from(satmosaic::Error::BatchMosaic { reason, manifest }).into());
            }
            Err(e) => return Err(AppError::from(e).into()),
        };
        let path = manifest_destination(
            &args,
            batch.union_mosaic.as_ref(),
            &output_dir,
            "batch_manifest.json",
        );
        write_json(&path, &batch)?;
        report_batch(&batch);
        return Ok(());
    }

    let region = region_from_args(&args, &file)?.ok_or(AppError::MissingArgument {
        arg: "--bbox or --center".to_string(),
    })?;
    let manifest = match orchestrator.run_with_defaults(&region, &range, &quality) {
        Ok(manifest) => manifest,
        Err(satmosaic::Error::Mosaic { reason, manifest }) => {
            let path = manifest_destination(&args, None, &output_dir, "manifest.json");
            write_json(&path, &*manifest)?;
            report_manifest(&manifest);
            return Err(AppError::from(satmosaic::Error::Mosaic { reason, manifest }).into());
        }
        Err(e) => return Err(AppError::from(e).into()),
    };
    let path = manifest_destination(&args, manifest.mosaic_path.as_ref(), &output_dir, "manifest.json");
    write_json(&path, &manifest)?;
    report_manifest(&manifest);
    Ok(())
}
