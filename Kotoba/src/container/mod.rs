//! Master database container format
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! The game ships its text tables in a single `KMDB` container. Rows are not
//! self-describing: a companion layout file (see [`Layout`]) names each
//! table's columns, their widths, which of them form the row key and which
//! hold translatable text. Tables without a layout are carried as opaque
//! payloads and never touched.

mod layout;
mod reader;
mod value;
mod writer;

pub use layout::{ColumnLayout, ColumnType, Layout, TableLayout};
pub use reader::{decode, decode_table, read_container_file, split_container, verify_checksum};
pub use value::{Row, RowKey, Value};
pub use writer::{assemble, encode, encode_table, encode_table_payload, reassemble};

/// "KMDB" magic bytes
pub const MAGIC: [u8; 4] = *b"KMDB";

/// Only supported container version
pub const CONTAINER_VERSION: u32 = 1;

/// Size of the fixed header (magic, version, table count, checksum)
pub const HEADER_SIZE: usize = 16;

/// Size of one directory entry (name, offset, size, row count)
pub const DIRECTORY_ENTRY_SIZE: usize = 48;

/// Size of the NUL-padded table name field
pub const TABLE_NAME_SIZE: usize = 32;

/// A table payload as stored in the container, before row decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub name: String,
    pub row_count: u32,
    pub payload: Vec<u8>,
}

/// A container split into its table payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContainer {
    pub version: u32,
    pub tables: Vec<RawTable>,
}

impl RawContainer {
    /// Find a table payload by name
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&RawTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Decoded table contents
#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    /// Rows decoded through a layout
    Rows {
        layout: TableLayout,
        rows: Vec<Row>,
    },
    /// No layout known; payload carried verbatim
    Opaque {
        payload: Vec<u8>,
        row_count: u32,
    },
}

/// A named table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub data: TableData,
}

impl Table {
    /// Number of rows, whether decoded or opaque
    #[must_use]
    pub fn row_count(&self) -> usize {
        match &self.data {
            TableData::Rows { rows, .. } => rows.len(),
            TableData::Opaque { row_count, .. } => *row_count as usize,
        }
    }

    /// Layout used to decode this table, if any
    #[must_use]
    pub fn layout(&self) -> Option<&TableLayout> {
        match &self.data {
            TableData::Rows { layout, .. } => Some(layout),
            TableData::Opaque { .. } => None,
        }
    }

    /// Decoded rows (empty for opaque tables)
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        match &self.data {
            TableData::Rows { rows, .. } => rows,
            TableData::Opaque { .. } => &[],
        }
    }
}

/// A fully decoded container
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub version: u32,
    pub tables: Vec<Table>,
}

impl Container {
    /// Find a table by name
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}
