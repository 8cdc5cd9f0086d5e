//! File-backed scene catalog.
//!
//! Lists candidate scenes in a JSON document and answers searches by footprint
//! intersection, acquisition date and cloud cover. Useful for pre-resolved
//! scene lists and for running the pipeline without a live catalog.
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{FetchDescriptor, ImageHandle, ImageSource, ProviderError};
use crate::core::geo::BoundingBox;
use crate::error::Result;
use crate::types::{QualityFilter, TimeRange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogScene {
    pub id: String,
    #[serde(default)]
    pub platform: Option<String>,
    pub date: NaiveDate,
    pub cloud_cover: f64,
    pub footprint: BoundingBox,
    pub assets: Vec<FetchDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default = "default_name")]
    name: String,
    scenes: Vec<CatalogScene>,
}

fn default_name() -> String {
    "static".to_string()
}

impl StaticCatalog {
    pub fn new(name: impl Into<String>, scenes: Vec<CatalogScene>) -> Self {
        Self {
            name: name.into(),
            scenes,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let catalog: StaticCatalog = serde_json::from_str(&text)?;
        for scene in &catalog.scenes {
            scene.footprint.validated()?;
        }
        info!(
            "Loaded catalog '{}' with {} scenes from {:?}",
            catalog.name,
            catalog.scenes.len(),
            path
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl ImageSource for StaticCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn search(
        &self,
        bbox: &BoundingBox,
        time_range: &TimeRange,
        filter: &QualityFilter,
    ) -> std::result::Result<Vec<ImageHandle>, ProviderError> {
        let handles: Vec<ImageHandle> = self
            .scenes
            .iter()
            .filter(|s| s.footprint.intersects(bbox))
            .filter(|s| time_range.contains(s.date))
            .filter(|s| filter.accepts_cloud_cover(s.cloud_cover))
            .map(|s| ImageHandle {
                id: s.id.clone(),
                cloud_cover: s.cloud_cover,
                acquired: Some(s.date),
                platform: s.platform.clone(),
                footprint: Some(s.footprint),
                assets: s.assets.clone(),
            })
            .collect();
        debug!(
            "Catalog '{}': {} of {} scenes match {}",
            self.name,
            handles.len(),
            self.scenes.len(),
            bbox
        );
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "name": "bdc-sample",
        "scenes": [
            {
                "id": "S2A_22JBT_20250110",
                "platform": "sentinel-2a",
                "date": "2025-01-10",
                "cloud_cover": 4.5,
                "footprint": {"west": -54.0, "south": -25.0, "east": -53.0, "north": -24.0},
                "assets": [
                    {"band": "B04", "url": "https://example.test/22JBT/B04.tif"},
                    {"band": "B03", "url": "https://example.test/22JBT/B03.tif"}
                ]
            },
            {
                "id": "S2B_22JBT_20250301",
                "date": "2025-03-01",
                "cloud_cover": 1.0,
                "footprint": {"west": -54.0, "south": -25.0, "east": -53.0, "north": -24.0},
                "assets": []
            },
            {
                "id": "S2A_21JYM_20250112",
                "date": "2025-01-12",
                "cloud_cover": 60.0,
                "footprint": {"west": -55.0, "south": -26.0, "east": -54.0, "north": -25.0},
                "assets": []
            }
        ]
    }"#;

    #[test]
    fn test_search_filters_space_time_and_cloud() {
        let catalog: StaticCatalog = serde_json::from_str(CATALOG).unwrap();
        assert_eq!(catalog.name(), "bdc-sample");
        assert_eq!(catalog.len(), 3);

        let bbox = BoundingBox::new(-54.8, -25.5, -53.5, -24.5).unwrap();
        let range = TimeRange::parse("2025-01-01", "2025-01-31").unwrap();
        let handles = catalog
            .search(&bbox, &range, &QualityFilter::default())
            .unwrap();

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id, "S2A_22JBT_20250110");
        assert_eq!(handles[0].platform.as_deref(), Some("sentinel-2a"));
        let descriptors = catalog.fetch_descriptors(&handles[0]).unwrap();
        assert_eq!(descriptors.len(), 2);
    }

    #[test]
    fn test_from_json_file_rejects_degenerate_footprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let broken = r#"{"scenes": [{
            "id": "bad", "date": "2025-01-01", "cloud_cover": 0.0,
            "footprint": {"west": -54.0, "south": -24.0, "east": -53.0, "north": -25.0},
            "assets": []
        }]}"#;
        std::fs::write(&path, broken).unwrap();
        assert!(StaticCatalog::from_json_file(&path).is_err());

        std::fs::write(&path, CATALOG).unwrap();
        assert_eq!(StaticCatalog::from_json_file(&path).unwrap().len(), 3);
    }
}
