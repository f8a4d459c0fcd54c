//! Workspace manifest: asset records and the container skeleton

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::asset::{AssetId, SCHEMA_VERSION};
use crate::container::TableLayout;
use crate::error::{Error, Result};

/// One table of the dumped container, in directory order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSkeleton {
    pub name: String,
    pub row_count: u32,
    /// Hash of the raw table payload, also its source image name
    pub source_hash: String,
    /// Layout used at dump time; absent for opaque tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<TableLayout>,
}

/// Shape of the container the workspace was dumped from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSkeleton {
    pub file_name: String,
    pub version: u32,
    /// Hash of the whole container file, also its source image name
    pub source_hash: String,
    pub tables: Vec<TableSkeleton>,
}

impl ContainerSkeleton {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSkeleton> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Manifest record of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Hash of the asset's source image
    pub source_hash: String,
    /// Workspace file, relative to the workspace root
    pub file: String,
    /// Container version the image was taken from
    pub container_version: u32,
    /// Source asset no longer exists upstream
    #[serde(default, skip_serializing_if = "is_false")]
    pub orphaned: bool,
}

/// `<workspace>/manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSkeleton>,
    #[serde(default)]
    pub assets: IndexMap<AssetId, AssetRecord>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            container: None,
            assets: IndexMap::new(),
            extra: IndexMap::new(),
        }
    }
}

impl Manifest {
    /// Load a manifest, rejecting newer schemas
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let manifest: Self = serde_json::from_str(&text)?;
        if manifest.schema_version > SCHEMA_VERSION {
            return Err(Error::UnsupportedSchemaVersion {
                path: path.to_path_buf(),
                version: manifest.schema_version,
            });
        }
        Ok(manifest)
    }

    #[must_use]
    pub fn record(&self, id: &AssetId) -> Option<&AssetRecord> {
        self.assets.get(id)
    }

    /// Every source image hash the manifest still refers to
    #[must_use]
    pub fn referenced_images(&self) -> std::collections::HashSet<&str> {
        let mut hashes: std::collections::HashSet<&str> = self
            .assets
            .values()
            .map(|r| r.source_hash.as_str())
            .collect();
        if let Some(container) = &self.container {
            hashes.insert(container.source_hash.as_str());
            hashes.extend(container.tables.iter().map(|t| t.source_hash.as_str()));
        }
        hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::RowKey;

    #[test]
    fn test_manifest_roundtrip() {
        let mut manifest = Manifest::default();
        manifest.assets.insert(
            AssetId::story("story", RowKey::parse("5"), "script"),
            AssetRecord {
                source_hash: "aa".into(),
                file: "story/story/5_script.json".into(),
                container_version: 1,
                orphaned: false,
            },
        );
        manifest
            .extra
            .insert("editor".into(), serde_json::json!({"last_tab": 3}));

        let json = serde_json::to_string_pretty(&manifest).unwrap();
        assert!(json.contains("\"story/story/5/script\""));
        assert!(!json.contains("orphaned"));

        let parsed: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, manifest);
    }
}
