//! Translation workspace
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! The workspace is the editable mirror of the container: one JSON file per
//! asset under `mdb/` (tables) and `story/` (script blocks), a
//! `manifest.json` recording where every asset came from, and the raw
//! source images under `.source/`, named by content hash. Builds are
//! produced from the images plus the entries; the workspace never stores
//! non-text bytes anywhere else.
//!
//! # Layout
//!
//! ```text
//! translation/
//! ├── manifest.json
//! ├── mdb/text_data.json
//! ├── story/story_data/1001_script.json
//! └── .source/<sha256>.bin
//! ```

mod asset;
pub mod exchange;
mod extract;
mod manifest;
mod query;
mod store;

pub use asset::{
    AssetFile, AssetId, Entry, SCHEMA_VERSION, Status, split_table_field, table_field_path,
};
pub use exchange::{ExportFormat, ExportOptions, ImportResult, export_entries, import_translations};
pub use extract::{ExtractOptions, Extraction, FreshAsset, SourceImage, extract};
pub use manifest::{AssetRecord, ContainerSkeleton, Manifest, TableSkeleton};
pub use query::{FindOptions, StatusCounts, StatusReport, find};
pub use store::{Applied, Fill, Mutation, Snapshot, State, Workspace};
