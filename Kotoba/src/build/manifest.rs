//! `build.json`: what a build produced

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Build manifest file name inside the output tree
pub const BUILD_MANIFEST: &str = "build.json";

/// One produced output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltAsset {
    /// Output file, relative to the build root
    pub path: String,
    /// SHA-256 of the asset's output bytes
    pub hash: String,
}

/// Contents of `build.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Increases by one with every committed build
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
    /// The rebuilt container file
    pub container: BuiltAsset,
    /// Per-asset outputs; table assets carry the hash of their table payload
    pub assets: BTreeMap<String, BuiltAsset>,
}

impl BuildManifest {
    /// Read the manifest of a previous build, if there is a readable one
    #[must_use]
    pub fn load_previous(output_dir: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(output_dir.join(BUILD_MANIFEST)).ok()?;
        match serde_json::from_str(&text) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!("Ignoring unreadable previous {BUILD_MANIFEST}: {e}");
                None
            }
        }
    }

    /// Assets whose output differs from `previous` (all of them without one)
    #[must_use]
    pub fn changed_since(&self, previous: Option<&Self>) -> Vec<String> {
        self.assets
            .iter()
            .filter(|(id, asset)| {
                previous
                    .and_then(|p| p.assets.get(*id))
                    .is_none_or(|old| old.hash != asset.hash)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Write the manifest into a build tree
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write(&self, root: &Path) -> Result<()> {
        crate::utils::write_json_atomic(&root.join(BUILD_MANIFEST), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manifest(assets: &[(&str, &str)]) -> BuildManifest {
        BuildManifest {
            generation: 1,
            timestamp: Utc::now(),
            container: BuiltAsset {
                path: "master/master.mdb".into(),
                hash: "c".into(),
            },
            assets: assets
                .iter()
                .map(|(id, hash)| {
                    (
                        (*id).to_string(),
                        BuiltAsset {
                            path: format!("out/{id}"),
                            hash: (*hash).to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_changed_since() {
        let old = manifest(&[("table/a", "1"), ("table/b", "2")]);
        let new = manifest(&[("table/a", "1"), ("table/b", "3"), ("table/c", "4")]);
        assert_eq!(new.changed_since(Some(&old)), vec!["table/b", "table/c"]);
        assert_eq!(new.changed_since(None).len(), 3);
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let written = manifest(&[("table/a", "1")]);
        written.write(dir.path()).unwrap();
        assert_eq!(BuildManifest::load_previous(dir.path()), Some(written));
        assert_eq!(BuildManifest::load_previous(&dir.path().join("missing")), None);
    }
}
