//! In-memory collaborators for pipeline tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use satmosaic::core::geo::BoundingBox;
use satmosaic::io::raster::{PixelType, RasterData, RasterError, RasterHeader, RasterIo, reprojected_path};
use satmosaic::source::{FetchDescriptor, ImageHandle, ImageSource, ProviderError};
use satmosaic::types::{QualityFilter, TimeRange};
use satmosaic::RawFetcher;

/// Side length, in pixels, of every generated tile raster.
pub const TILE_PIXELS: usize = 4;

/// Rasters stored as JSON, so tests can build and inspect them without GDAL.
#[derive(Debug, Default)]
pub struct JsonRasterIo {
    pub reprojections: AtomicUsize,
}

#[derive(Serialize, Deserialize)]
struct JsonRaster {
    crs: String,
    dtype: PixelType,
    geotransform: [f64; 6],
    nodata: Option<f64>,
    shape: (usize, usize, usize),
    data: Vec<f64>,
}

pub fn encode(raster: &RasterData) -> String {
    let json = JsonRaster {
        crs: raster.crs.clone(),
        dtype: raster.dtype,
        geotransform: raster.geotransform,
        nodata: raster.nodata,
        shape: raster.pixels.dim(),
        data: raster.pixels.iter().copied().collect(),
    };
    serde_json::to_string(&json).unwrap()
}

impl RasterIo for JsonRasterIo {
    fn read_header(&self, path: &Path) -> Result<RasterHeader, RasterError> {
        self.read(path).map(|r| r.header())
    }

    fn read(&self, path: &Path) -> Result<RasterData, RasterError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RasterError::corrupt(path, e.to_string()))?;
        let json: JsonRaster =
            serde_json::from_str(&text).map_err(|e| RasterError::corrupt(path, e.to_string()))?;
        let pixels = Array3::from_shape_vec(json.shape, json.data)
            .map_err(|e| RasterError::corrupt(path, e.to_string()))?;
        Ok(RasterData {
            crs: json.crs,
            dtype: json.dtype,
            geotransform: json.geotransform,
            nodata: json.nodata,
            pixels,
        })
    }

    fn reproject(&self, path: &Path, target_crs: &str, nodata: f64) -> Result<PathBuf, RasterError> {
        self.reprojections.fetch_add(1, Ordering::SeqCst);
        let mut raster = self.read(path)?;
        raster.crs = target_crs.to_string();
        raster.nodata = Some(nodata);
        let out = reprojected_path(path);
        self.write(&out, &raster)?;
        Ok(out)
    }

    fn write(&self, path: &Path, raster: &RasterData) -> Result<(), RasterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, encode(raster))?;
        Ok(())
    }
}

/// A `bands x TILE_PIXELS x TILE_PIXELS` raster georeferenced to `bbox`.
pub fn raster_for(bbox: &BoundingBox, crs: &str, bands: usize, value: f64) -> RasterData {
    raster_sized(bbox, crs, bands, value, TILE_PIXELS)
}

/// A `bands x TILE_PIXELS x cols` raster covering `bbox`.
pub fn raster_sized(bbox: &BoundingBox, crs: &str, bands: usize, value: f64, cols: usize) -> RasterData {
    RasterData {
        crs: crs.to_string(),
        dtype: PixelType::I16,
        geotransform: [
            bbox.west,
            (bbox.east - bbox.west) / cols as f64,
            0.0,
            bbox.north,
            0.0,
            -(bbox.north - bbox.south) / TILE_PIXELS as f64,
        ],
        nodata: Some(-32768.0),
        pixels: Array3::from_elem((bands, TILE_PIXELS, cols), value),
    }
}

/// URL understood by [`GeneratingFetcher`].
pub fn tile_url(bbox: &BoundingBox, band: &str, value: f64, tag: &str) -> String {
    format!(
        "fake://{},{},{},{}/{}/{}{}",
        bbox.west, bbox.south, bbox.east, bbox.north, band, value, tag
    )
}

fn parse_url(url: &str) -> Option<(BoundingBox, f64)> {
    let rest = url.strip_prefix("fake://")?;
    let mut parts = rest.split('/');
    let coords: Vec<f64> = parts
        .next()?
        .split(',')
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    let _band = parts.next()?;
    let value: f64 = parts.next()?.trim_end_matches(|c: char| c.is_alphabetic() || c == '#').parse().ok()?;
    let bbox = BoundingBox::new(coords[0], coords[1], coords[2], coords[3]).ok()?;
    Some((bbox, value))
}

/// Writes a generated single-band raster for each `fake://` URL.
///
/// URLs tagged `#reject` fail permanently, `#garbage` produce an unreadable
/// file, `#narrow` produce a raster half as wide as the others, and the first `rate_limit_first` calls per URL report rate limiting.
#[derive(Debug, Default)]
pub struct GeneratingFetcher {
    pub calls: AtomicUsize,
    pub rate_limit_first: usize,
    pub crs: String,
    per_url: Mutex<HashMap<String, usize>>,
}

impl GeneratingFetcher {
    pub fn new(crs: &str) -> Self {
        Self {
            crs: crs.to_string(),
            ..Self::default()
        }
    }

    pub fn rate_limited_first(mut self, n: usize) -> Self {
        self.rate_limit_first = n;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RawFetcher for GeneratingFetcher {
    fn fetch(&self, descriptor: &FetchDescriptor, dest: &Path) -> Result<u64, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seen = {
            let mut per_url = self.per_url.lock().unwrap();
            let count = per_url.entry(descriptor.url.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if seen <= self.rate_limit_first {
            return Err(ProviderError::RateLimited { retry_after: None });
        }
        if descriptor.url.ends_with("#reject") {
            return Err(ProviderError::Rejected(format!("refused {}", descriptor.url)));
        }
        let body = if descriptor.url.ends_with("#garbage") {
            "II*\0 truncated".to_string()
        } else {
            let (bbox, value) = parse_url(&descriptor.url)
                .ok_or_else(|| ProviderError::Rejected(format!("bad url {}", descriptor.url)))?;
            let cols = if descriptor.url.ends_with("#narrow") {
                TILE_PIXELS / 2
            } else {
                TILE_PIXELS
            };
            encode(&raster_sized(&bbox, &self.crs, 1, value, cols))
        };
        std::fs::write(dest, &body)?;
        Ok(body.len() as u64)
    }
}

/// Returns one scene per searched tile whose footprint is the tile itself.
///
/// Search calls are numbered in order; numbers in `empty` return no scene and
/// numbers in `tagged` append that tag to every asset URL. `band_tagged`
/// does the same for a single `(call, band)` asset.
#[derive(Debug, Default)]
pub struct TileSource {
    pub bands: Vec<String>,
    pub empty: HashSet<usize>,
    pub tagged: HashMap<usize, String>,
    pub band_tagged: HashMap<(usize, usize), String>,
    pub searches: AtomicUsize,
}

impl TileSource {
    pub fn new(bands: &[&str]) -> Self {
        Self {
            bands: bands.iter().map(|b| b.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_empty(mut self, call: usize) -> Self {
        self.empty.insert(call);
        self
    }

    pub fn with_tag(mut self, call: usize, tag: &str) -> Self {
        self.tagged.insert(call, tag.to_string());
        self
    }

    pub fn with_band_tag(mut self, call: usize, band: usize, tag: &str) -> Self {
        self.band_tagged.insert((call, band), tag.to_string());
        self
    }

    pub fn tag_all(mut self, calls: usize, tag: &str) -> Self {
        for call in 0..calls {
            self.tagged.insert(call, tag.to_string());
        }
        self
    }
}

impl ImageSource for TileSource {
    fn name(&self) -> &str {
        "tile-source"
    }

    fn search(
        &self,
        bbox: &BoundingBox,
        _time_range: &TimeRange,
        _filter: &QualityFilter,
    ) -> Result<Vec<ImageHandle>, ProviderError> {
        let call = self.searches.fetch_add(1, Ordering::SeqCst);
        if self.empty.contains(&call) {
            return Ok(Vec::new());
        }
        let tag = self.tagged.get(&call).cloned().unwrap_or_default();
        let assets = self
            .bands
            .iter()
            .enumerate()
            .map(|(i, band)| FetchDescriptor {
                band: Some(band.clone()),
                url: tile_url(
                    bbox,
                    band,
                    (i + 1) as f64,
                    self.band_tagged.get(&(call, i)).unwrap_or(&tag),
                ),
            })
            .collect();
        let cloudy = ImageHandle {
            id: format!("cloudy-{call}"),
            cloud_cover: 15.0,
            acquired: None,
            platform: None,
            footprint: Some(*bbox),
            assets: Vec::new(),
        };
        let clear = ImageHandle {
            id: format!("scene-{call}"),
            cloud_cover: 2.5,
            acquired: None,
            platform: Some("sentinel-2a".into()),
            footprint: Some(*bbox),
            assets,
        };
        Ok(vec![cloudy, clear])
    }
}
