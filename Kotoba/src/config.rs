//! Settings file (`kotoba.toml`)
//!
//! Loaded once at startup. A missing file is replaced by the defaults,
//! written back so the user has something to edit. Relative paths are
//! resolved against the directory holding the settings file, and a leading
//! `~` is expanded.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::autofill::Rule;
use crate::error::Result;
use crate::merge::CosmeticRule;
use crate::sync::SyncConfig;
use crate::utils::write_atomic;

/// Default settings file name
pub const CONFIG_FILE: &str = "kotoba.toml";

fn default_game_data_dir() -> String {
    "game".to_string()
}

fn default_container() -> String {
    "master/master.mdb".to_string()
}

fn default_layout() -> String {
    "layout.json".to_string()
}

fn default_workspace_dir() -> String {
    "translation".to_string()
}

fn default_output_dir() -> String {
    "build".to_string()
}

/// Where inputs and outputs live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_game_data_dir")]
    pub game_data_dir: String,
    /// Container file, relative to `game_data_dir`
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            game_data_dir: default_game_data_dir(),
            container: default_container(),
            layout: default_layout(),
            workspace_dir: default_workspace_dir(),
            output_dir: default_output_dir(),
        }
    }
}

/// Merge behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSettings {
    #[serde(default)]
    pub cosmetic: CosmeticRule,
}

/// The full settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub autofill: Vec<Rule>,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Settings {
    /// Parse a settings file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut settings: Self = toml::from_str(&text)?;
        settings.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load a settings file, writing the defaults first if it is missing
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let settings = Self {
            base_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            ..Self::default()
        };
        settings.save(path)?;
        tracing::info!("Wrote default settings to {}", path.display());
        Ok(settings)
    }

    /// Write the settings file
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        write_atomic(path.as_ref(), text.as_bytes())
    }

    /// Expand `~` and anchor relative paths at the settings directory
    #[must_use]
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    #[must_use]
    pub fn game_data_dir(&self) -> PathBuf {
        self.resolve(&self.paths.game_data_dir)
    }

    #[must_use]
    pub fn container_path(&self) -> PathBuf {
        let container = PathBuf::from(shellexpand::tilde(&self.paths.container).as_ref());
        if container.is_absolute() {
            container
        } else {
            self.game_data_dir().join(container)
        }
    }

    /// File name the container is rebuilt under
    #[must_use]
    pub fn container_file_name(&self) -> String {
        self.container_path()
            .file_name()
            .map_or_else(default_container, |n| n.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn layout_path(&self) -> PathBuf {
        self.resolve(&self.paths.layout)
    }

    #[must_use]
    pub fn workspace_dir(&self) -> PathBuf {
        self.resolve(&self.paths.workspace_dir)
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.paths.output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autofill::Scope;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let created = Settings::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.sync.url, "http://127.0.0.1:50433");
        assert_eq!(created.sync.retries, 0);
        assert_eq!(created.merge.cosmetic, CosmeticRule::TrailingWhitespace);

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.workspace_dir(), dir.path().join("translation"));
        assert_eq!(
            loaded.container_path(),
            dir.path().join("game").join("master/master.mdb")
        );
        assert_eq!(loaded.container_file_name(), "master.mdb");
    }

    #[test]
    fn test_rules_and_overrides_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
            [paths]
            output_dir = "/tmp/kotoba-out"

            [merge]
            cosmetic = "none"

            [sync]
            enabled = false

            [[autofill]]
            kind = "cross_reference"
            source = { asset = "table/skill" }
            target = { asset = "table/effect*", column = "text" }
            "#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.output_dir(), PathBuf::from("/tmp/kotoba-out"));
        assert_eq!(settings.merge.cosmetic, CosmeticRule::None);
        assert!(!settings.sync.enabled);
        assert_eq!(settings.sync.timeout_ms, 2000);
        assert_eq!(
            settings.autofill,
            vec![Rule::CrossReference {
                name: None,
                source: Scope::asset("table/skill"),
                target: Scope {
                    asset: "table/effect*".into(),
                    key_prefix: None,
                    column: Some("text".into()),
                },
            }]
        );

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }
}
