//! Asset identities, workspace files and translation entries

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::container::RowKey;
use crate::error::{Error, Result};
use crate::utils::hash_text;

/// Current workspace file schema
pub const SCHEMA_VERSION: u32 = 1;

/// Stable identifier of one translatable asset
///
/// Rendered as `table/<name>` for a database table, or
/// `story/<table>/<row key>/<column>` for the script block held in one cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AssetId {
    Table {
        table: String,
    },
    Story {
        table: String,
        key: RowKey,
        column: String,
    },
}

impl AssetId {
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table { table: name.into() }
    }

    pub fn story(table: impl Into<String>, key: RowKey, column: impl Into<String>) -> Self {
        Self::Story {
            table: table.into(),
            key,
            column: column.into(),
        }
    }

    /// Table this asset was extracted from
    #[must_use]
    pub fn table_name(&self) -> &str {
        match self {
            Self::Table { table } | Self::Story { table, .. } => table,
        }
    }

    #[must_use]
    pub fn is_story(&self) -> bool {
        matches!(self, Self::Story { .. })
    }

    /// Workspace file location relative to the workspace root
    #[must_use]
    pub fn workspace_path(&self) -> PathBuf {
        match self {
            Self::Table { table } => PathBuf::from("mdb").join(format!("{table}.json")),
            Self::Story { table, key, column } => PathBuf::from("story")
                .join(table)
                .join(format!("{}_{column}.json", key.file_stem())),
        }
    }

    /// Output location of a story asset relative to the build root
    #[must_use]
    pub fn story_output_path(&self) -> Option<PathBuf> {
        match self {
            Self::Table { .. } => None,
            Self::Story { table, key, column } => Some(
                PathBuf::from("assets")
                    .join("story")
                    .join(table)
                    .join(format!("{}_{column}.bin", key.file_stem())),
            ),
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table { table } => write!(f, "table/{table}"),
            Self::Story { table, key, column } => write!(f, "story/{table}/{key}/{column}"),
        }
    }
}

impl FromStr for AssetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAssetId(s.to_string());
        if let Some(table) = s.strip_prefix("table/") {
            if table.is_empty() || table.contains('/') {
                return Err(invalid());
            }
            return Ok(Self::table(table));
        }

        let rest = s.strip_prefix("story/").ok_or_else(invalid)?;
        let (table, rest) = rest.split_once('/').ok_or_else(invalid)?;
        let (key, column) = rest.rsplit_once('/').ok_or_else(invalid)?;
        if table.is_empty() || key.is_empty() || column.is_empty() {
            return Err(invalid());
        }
        Ok(Self::story(table, RowKey::parse(key), column))
    }
}

impl TryFrom<String> for AssetId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.to_string()
    }
}

/// Translation progress of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Untranslated,
    MachineFilled,
    Manual,
    Reviewed,
}

impl Status {
    /// Written or checked by a person
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Manual | Self::Reviewed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Untranslated => "untranslated",
            Self::MachineFilled => "machine_filled",
            Self::Manual => "manual",
            Self::Reviewed => "reviewed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "untranslated" => Ok(Self::Untranslated),
            "machine_filled" => Ok(Self::MachineFilled),
            "manual" => Ok(Self::Manual),
            "reviewed" => Ok(Self::Reviewed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// The atomic unit of translation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub asset_id: AssetId,
    pub field_path: String,
    pub source_text: String,
    pub translated_text: String,
    pub status: Status,
    pub source_hash: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub orphaned: bool,
    /// Fields written by other tools, preserved on rewrite
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Entry {
    /// A freshly extracted, untranslated entry
    pub fn new(asset_id: AssetId, field_path: impl Into<String>, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        Self {
            asset_id,
            field_path: field_path.into(),
            source_hash: hash_text(&source_text),
            source_text,
            translated_text: String::new(),
            status: Status::Untranslated,
            orphaned: false,
            extra: IndexMap::new(),
        }
    }

    /// Replace the source text, keeping its hash in step
    pub fn set_source(&mut self, source_text: &str) {
        source_text.clone_into(&mut self.source_text);
        self.source_hash = hash_text(source_text);
    }

    /// Whether the build should substitute this entry
    #[must_use]
    pub fn is_substitutable(&self) -> bool {
        !self.orphaned && !self.translated_text.is_empty()
    }
}

/// One workspace document: the entries of a single asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFile {
    pub schema_version: u32,
    pub asset_id: AssetId,
    /// Hash of the source image the entries were extracted from
    pub source_hash: String,
    pub entries: Vec<Entry>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl AssetFile {
    #[must_use]
    pub fn new(asset_id: AssetId, source_hash: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            asset_id,
            source_hash,
            entries: Vec::new(),
            extra: IndexMap::new(),
        }
    }

    /// Parse a workspace file, rejecting newer schemas
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedSchemaVersion`] for schemas newer than
    /// [`SCHEMA_VERSION`], or a JSON error.
    pub fn from_json(text: &str, path: &std::path::Path) -> Result<Self> {
        let file: Self = serde_json::from_str(text)?;
        if file.schema_version > SCHEMA_VERSION {
            return Err(Error::UnsupportedSchemaVersion {
                path: path.to_path_buf(),
                version: file.schema_version,
            });
        }
        Ok(file)
    }

    #[must_use]
    pub fn entry(&self, field_path: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.field_path == field_path)
    }

    pub fn entry_mut(&mut self, field_path: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.field_path == field_path)
    }

    /// Whether every entry is orphaned (or there are none)
    #[must_use]
    pub fn is_fully_orphaned(&self) -> bool {
        self.entries.iter().all(|e| e.orphaned)
    }
}

/// Split a table field path into row key and column
#[must_use]
pub fn split_table_field(field_path: &str) -> Option<(&str, &str)> {
    field_path.rsplit_once('/')
}

/// Field path of a table cell
#[must_use]
pub fn table_field_path(key: &RowKey, column: &str) -> String {
    format!("{key}/{column}")
}
