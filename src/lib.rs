#![doc = r#"
satmosaic: tile a region, download the best satellite scene per tile and
mosaic the result.

This crate splits an area of interest into provider-sized tiles, picks the
least cloudy scene for each tile from an imagery catalog, downloads the
requested band assets with bounded concurrency and retry-on-rate-limit, and
merges the per-tile rasters into one georeferenced GeoTIFF. A run never fails
because one tile failed: every tile's outcome is recorded in the returned
[`Manifest`].

Requirements
------------
- GDAL development headers and runtime available on your system
  (`gdalwarp` on `PATH` when inputs need reprojection).
- Rust 2024 edition toolchain.

Quick start: one region from a static catalog
---------------------------------------------
```rust,no_run
use std::path::Path;
use std::sync::Arc;
use satmosaic::{
    GdalRasterIo, HttpFetcher, PipelineConfig, PipelineOrchestrator, ProviderProfile,
    QualityFilter, Region, StaticCatalog, TimeRange,
};

fn main() -> satmosaic::Result<()> {
    let config = PipelineConfig::for_provider(ProviderProfile::BrazilDataCube);
    let catalog = StaticCatalog::from_json_file(Path::new("/data/catalog.json"))?;
    let orchestrator = PipelineOrchestrator::new(
        config,
        Arc::new(catalog),
        Arc::new(HttpFetcher::new()?),
        Arc::new(GdalRasterIo::new()),
    )?;

    let manifest = orchestrator.run(
        &Region::Center { lat: -24.0, lon: -54.0, radius_km: 60.0 },
        &TimeRange::parse("2025-01-01", "2025-01-31")?,
        &QualityFilter::default(),
        20.0, // tile size, km
        50.0, // below this radius, fetch a single tile
    )?;

    println!(
        "{} of {} tiles, mosaic at {:?}",
        manifest.success_count(),
        manifest.tiles.len(),
        manifest.mosaic_path
    );
    Ok(())
}
```

Batch of named regions
----------------------
[`PipelineOrchestrator::run_batch`] runs each [`NamedRegion`] in tiled mode
into its own subdirectory and then mosaics the regional mosaics into one
union mosaic.

Error handling
--------------
Tile-level problems (no scene, rate limiting, rejected requests, corrupt
downloads) are data: see [`FetchOutcome`] and [`Manifest::failures`]. Only
configuration errors and a mosaic step with zero usable inputs surface as
[`Error`].

```rust,no_run
# use satmosaic::{Error, Manifest};
fn report(result: satmosaic::Result<Manifest>) {
    match result {
        Ok(m) => println!("mosaic: {:?}", m.mosaic_path),
        Err(Error::Mosaic { reason, manifest }) => {
            eprintln!("no mosaic ({reason}); {} tiles downloaded", manifest.success_count())
        }
        Err(e) if e.is_configuration() => eprintln!("bad input: {e}"),
        Err(other) => eprintln!("error: {other}"),
    }
}
```

Useful modules
--------------
- [`api`]: the orchestrator and run manifests.
- [`core`]: geometry, partitioning, configuration and mosaicking.
- [`download`]: retrying fetcher, rate limiter and worker pool.
- [`source`]: the imagery source interface and the static catalog.
- [`io`]: raster I/O interface, GDAL adapter and writers.
- [`error`]: crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod core;
pub mod download;
pub mod error;
pub mod io;
pub mod source;
pub mod types;

// Curated public API surface
// Types
pub use crate::core::geo::{BoundingBox, NamedRegion, Region};
pub use crate::core::params::PipelineConfig;
pub use crate::core::partition::{BBoxPartitioner, TileGrid, TileIndex};
pub use crate::error::{Error, Result};
pub use crate::types::{ProviderProfile, QualityFilter, TimeRange};

// Collaborators
pub use crate::download::{FetchOutcome, HttpFetcher, RawFetcher};
pub use crate::io::{GdalRasterIo, RasterIo};
pub use crate::source::{ImageSource, StaticCatalog};

// High-level API re-exports
pub use crate::api::{BatchManifest, Manifest, PipelineOrchestrator, RunMode};
pub use crate::core::mosaic::{MosaicResult, RasterMosaicker};
