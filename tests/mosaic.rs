mod common;

use std::path::{Path, PathBuf};

use satmosaic::core::geo::BoundingBox;
use satmosaic::core::mosaic::MosaicConfig;
use satmosaic::{MosaicResult, RasterIo, RasterMosaicker};
use tempfile::TempDir;

use common::{JsonRasterIo, raster_for};

const CRS: &str = "EPSG:4326";

fn put(io: &JsonRasterIo, dir: &Path, name: &str, bbox: BoundingBox, bands: usize, value: f64) -> PathBuf {
    let path = dir.join(name);
    io.write(&path, &raster_for(&bbox, CRS, bands, value)).unwrap();
    path
}

fn mosaicker() -> RasterMosaicker<JsonRasterIo> {
    RasterMosaicker::new(JsonRasterIo::default(), MosaicConfig::default())
}

#[test]
fn test_band_count_mismatch_is_deleted_and_rest_merged() {
    let dir = TempDir::new().unwrap();
    let m = mosaicker();
    let a = put(m.io(), dir.path(), "a.tif", BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), 3, 1.0);
    let b = put(m.io(), dir.path(), "b.tif", BoundingBox::new(1.0, 0.0, 2.0, 1.0).unwrap(), 3, 2.0);
    let c = put(m.io(), dir.path(), "c.tif", BoundingBox::new(2.0, 0.0, 3.0, 1.0).unwrap(), 2, 3.0);
    let output = dir.path().join("mosaic.tif");

    let result = m.mosaic(&[a.clone(), b.clone(), c.clone()], &output, CRS);
    match &result {
        MosaicResult::Success { merged, excluded, .. } => {
            assert_eq!(merged, &vec![a, b]);
            assert_eq!(excluded.len(), 1);
            assert_eq!(excluded[0].path, c);
            assert!(excluded[0].deleted);
        }
        MosaicResult::Failure { reason, .. } => panic!("mosaic failed: {reason}"),
    }
    assert!(!c.exists());

    let mosaic = m.io().read(&output).unwrap();
    assert_eq!(mosaic.band_count(), 3);
    assert_eq!(mosaic.width(), 8);
    assert_eq!(mosaic.pixels[[0, 0, 0]], 1.0);
    assert_eq!(mosaic.pixels[[2, 3, 7]], 2.0);
}

#[test]
fn test_input_order_does_not_change_output() {
    let dir = TempDir::new().unwrap();
    let m = mosaicker();
    // Overlapping inputs: the overlap is resolved by path order, not argument order.
    let a = put(m.io(), dir.path(), "a.tif", BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), 1, 10.0);
    let b = put(m.io(), dir.path(), "b.tif", BoundingBox::new(0.5, 0.0, 1.5, 1.0).unwrap(), 1, 20.0);
    let c = put(m.io(), dir.path(), "c.tif", BoundingBox::new(1.0, 0.0, 2.0, 1.0).unwrap(), 1, 30.0);

    let first = dir.path().join("first.tif");
    let second = dir.path().join("second.tif");
    assert!(m.mosaic(&[b.clone(), a.clone(), c.clone()], &first, CRS).output_path().is_some());
    assert!(m.mosaic(&[a, b, c], &second, CRS).output_path().is_some());

    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    let mosaic = m.io().read(&first).unwrap();
    // Column 2 lies in the a/b overlap: a wins.
    assert_eq!(mosaic.pixels[[0, 0, 2]], 10.0);
    // Column 5 lies in the b/c overlap: b wins.
    assert_eq!(mosaic.pixels[[0, 0, 5]], 20.0);
}

#[test]
fn test_empty_input_list_fails_without_output() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("mosaic.tif");
    let result = mosaicker().mosaic(&[], &output, CRS);

    assert!(matches!(result, MosaicResult::Failure { .. }));
    assert!(result.excluded().is_empty());
    assert!(!output.exists());
}

#[test]
fn test_corrupt_inputs_kept_when_deletion_disabled() {
    let dir = TempDir::new().unwrap();
    let broken = dir.path().join("broken.tif");
    std::fs::write(&broken, b"not a raster").unwrap();
    let output = dir.path().join("mosaic.tif");

    let m = RasterMosaicker::new(
        JsonRasterIo::default(),
        MosaicConfig {
            delete_invalid: false,
            ..MosaicConfig::default()
        },
    );
    let result = m.mosaic(&[broken.clone()], &output, CRS);

    assert!(matches!(result, MosaicResult::Failure { .. }));
    assert_eq!(result.excluded().len(), 1);
    assert!(!result.excluded()[0].deleted);
    assert!(broken.exists());
    assert!(!output.exists());
}

#[test]
fn test_duplicate_inputs_merged_once() {
    let dir = TempDir::new().unwrap();
    let m = mosaicker();
    let a = put(m.io(), dir.path(), "a.tif", BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), 1, 5.0);
    let output = dir.path().join("mosaic.tif");

    match m.mosaic(&[a.clone(), a.clone()], &output, CRS) {
        MosaicResult::Success { merged, .. } => assert_eq!(merged, vec![a]),
        MosaicResult::Failure { reason, .. } => panic!("mosaic failed: {reason}"),
    }
}
