use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// `<mosaic>.json`, next to the mosaic.
pub fn sidecar_path(mosaic: &Path) -> PathBuf {
    mosaic.with_extension("json")
}

/// Write any run record as pretty JSON to `path`, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json_string = serde_json::to_string_pretty(record)?;
    std::fs::write(path, json_string)?;
    info!("Wrote run manifest: {:?}", path);
    Ok(())
}

/// Write the manifest sidecar for `mosaic` and return its path.
pub fn write_sidecar<T: Serialize>(mosaic: &Path, record: &T) -> Result<PathBuf> {
    let path = sidecar_path(mosaic);
    write_json(&path, record)?;
    Ok(path)
}
