//! Companion layout file describing table rows
//!
//! The layout is validated once when loaded; the reader and writer then trust
//! it and never fall back to ad hoc offsets.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::TABLE_NAME_SIZE;
use crate::error::{Error, Result};

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    F32,
    /// `u32` length + UTF-8 bytes
    Text,
    /// `u32` length + opaque bytes
    Blob,
    /// `u32` length + an encoded script block
    Script,
}

impl ColumnType {
    /// Width in bytes for fixed-width columns
    #[must_use]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::U8 => Some(1),
            Self::U16 => Some(2),
            Self::U32 | Self::I32 | Self::F32 => Some(4),
            Self::U64 | Self::I64 => Some(8),
            Self::Text | Self::Blob | Self::Script => None,
        }
    }

    /// Whether the column may take part in a row key
    #[must_use]
    pub fn is_key_compatible(self) -> bool {
        matches!(
            self,
            Self::U8 | Self::U16 | Self::U32 | Self::U64 | Self::I32 | Self::I64 | Self::Text
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a table layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub translatable: bool,
}

impl ColumnLayout {
    /// A key column
    pub fn key(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            key: true,
            translatable: false,
        }
    }

    /// A translatable text column
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Text,
            key: false,
            translatable: true,
        }
    }

    /// A column carried through untouched
    pub fn plain(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            key: false,
            translatable: false,
        }
    }
}

/// Row layout of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub name: String,
    pub columns: Vec<ColumnLayout>,
}

impl TableLayout {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnLayout>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Indices of key columns, in column order
    pub fn key_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.key)
            .map(|(i, _)| i)
    }

    /// Indices of translatable text columns
    pub fn text_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.translatable)
            .map(|(i, _)| i)
    }

    /// Indices of script block columns
    pub fn script_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.column_type == ColumnType::Script)
            .map(|(i, _)| i)
    }

    /// Position of a column by name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() >= TABLE_NAME_SIZE {
            return Err(Error::InvalidLayout(format!(
                "table name '{}' must be 1-{} bytes",
                self.name,
                TABLE_NAME_SIZE - 1
            )));
        }
        if self.name.contains('/') {
            return Err(Error::InvalidLayout(format!(
                "table name '{}' may not contain '/'",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::InvalidLayout(format!(
                    "table '{}': duplicate column '{}'",
                    self.name, column.name
                )));
            }
            if column.name.contains('/') || column.name.contains(':') {
                return Err(Error::InvalidLayout(format!(
                    "table '{}': column name '{}' may not contain '/' or ':'",
                    self.name, column.name
                )));
            }
            if column.key && !column.column_type.is_key_compatible() {
                return Err(Error::InvalidLayout(format!(
                    "table '{}': key column '{}' has type {}",
                    self.name, column.name, column.column_type
                )));
            }
            if column.translatable && column.column_type != ColumnType::Text {
                return Err(Error::InvalidLayout(format!(
                    "table '{}': translatable column '{}' must be text, not {}",
                    self.name, column.name, column.column_type
                )));
            }
            if column.key && column.translatable {
                return Err(Error::InvalidLayout(format!(
                    "table '{}': column '{}' cannot be both key and translatable",
                    self.name, column.name
                )));
            }
        }

        if self.key_indices().next().is_none() {
            return Err(Error::InvalidLayout(format!(
                "table '{}' declares no key column",
                self.name
            )));
        }

        Ok(())
    }
}

fn default_layout_version() -> u32 {
    1
}

/// The companion layout file: one [`TableLayout`] per decodable table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default = "default_layout_version")]
    pub version: u32,
    pub tables: Vec<TableLayout>,
}

impl Layout {
    /// Build and validate a layout
    ///
    /// # Errors
    /// Returns [`Error::InvalidLayout`] if any table fails validation.
    pub fn new(tables: Vec<TableLayout>) -> Result<Self> {
        let layout = Self {
            version: default_layout_version(),
            tables,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Read and validate a layout file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse and validate a layout from JSON text
    ///
    /// # Errors
    /// Returns an error on malformed JSON or a failed validation.
    pub fn from_json(text: &str) -> Result<Self> {
        let layout: Self = serde_json::from_str(text)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Layout for a table, if one is declared
    #[must_use]
    pub fn get(&self, table: &str) -> Option<&TableLayout> {
        self.tables.iter().find(|t| t.name == table)
    }

    fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(Error::InvalidLayout(format!(
                "unsupported layout version {}",
                self.version
            )));
        }
        let mut names = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.as_str()) {
                return Err(Error::InvalidLayout(format!(
                    "table '{}' declared twice",
                    table.name
                )));
            }
            table.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layout_json() {
        let json = r#"{
            "tables": [{
                "name": "text_data",
                "columns": [
                    {"name": "category", "type": "i32", "key": true},
                    {"name": "index", "type": "i32", "key": true},
                    {"name": "text", "type": "text", "translatable": true}
                ]
            }]
        }"#;
        let layout = Layout::from_json(json).unwrap();
        let table = layout.get("text_data").unwrap();
        assert_eq!(table.key_indices().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(table.text_indices().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_rejects_missing_key() {
        let result = Layout::new(vec![TableLayout::new(
            "no_key",
            vec![ColumnLayout::text("text")],
        )]);
        assert!(matches!(result, Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_rejects_translatable_blob() {
        let mut column = ColumnLayout::plain("data", ColumnType::Blob);
        column.translatable = true;
        let result = Layout::new(vec![TableLayout::new(
            "bad",
            vec![ColumnLayout::key("id", ColumnType::U32), column],
        )]);
        assert!(matches!(result, Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_rejects_duplicate_tables() {
        let table = TableLayout::new(
            "dup",
            vec![ColumnLayout::key("id", ColumnType::U32)],
        );
        let result = Layout::new(vec![table.clone(), table]);
        assert!(matches!(result, Err(Error::InvalidLayout(_))));
    }
}
