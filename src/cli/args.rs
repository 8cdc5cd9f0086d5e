use clap::Parser;
use std::path::PathBuf;

use satmosaic::ProviderProfile;

#[derive(Parser)]
#[command(
    name = "satmosaic",
    version,
    about = "Tile a region, download the best scene per tile and mosaic the result"
)]
pub struct CliArgs {
    /// JSON run file with region(s), time range, quality filter and config overrides
    #[arg(short, long)]
    pub run_file: Option<PathBuf>,

    /// Scene catalog JSON (overrides the run file's `catalog`)
    #[arg(short, long)]
    pub catalog: Option<PathBuf>,

    /// Region bounding box as "west,south,east,north" in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: Option<String>,

    /// Region center as "lat,lon" in degrees (requires --radius-km)
    #[arg(long, allow_hyphen_values = true)]
    pub center: Option<String>,

    /// Region radius around --center, in km
    #[arg(long)]
    pub radius_km: Option<f64>,

    /// First acquisition date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// Last acquisition date (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,

    /// Provider whose band names, CRS and pacing seed the configuration
    #[arg(long, value_enum)]
    pub provider: Option<ProviderProfile>,

    /// Output directory for tiles, mosaics and manifests
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Target CRS of the mosaic (e.g., EPSG:32721)
    #[arg(long)]
    pub target_crs: Option<String>,

    /// Desired tile edge length in km
    #[arg(long)]
    pub tile_size_km: Option<f64>,

    /// Regions with a smaller radius are fetched as a single tile
    #[arg(long)]
    pub small_region_threshold_km: Option<f64>,

    /// Number of concurrent downloads
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Retries after the first attempt on rate limiting or timeouts
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Maximum accepted cloud cover percentage
    #[arg(long)]
    pub max_cloud_cover: Option<f64>,

    /// Band assets to download, comma separated (e.g., B04,B03,B02)
    #[arg(long, value_delimiter = ',')]
    pub bands: Option<Vec<String>>,

    /// Where to write the run manifest (default: next to the mosaic)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
