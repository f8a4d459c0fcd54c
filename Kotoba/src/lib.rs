//! # Kotoba
//!
//! Translation pipeline for a mobile game's text assets.
//!
//! The game keeps its text in a `KMDB` master database; long-form story
//! text lives in compressed script blocks stored inside table cells. Kotoba
//! dumps both into a diff-friendly workspace (one JSON file per asset),
//! keeps translations across upstream updates, fills repetitive entries
//! from already-translated ones, rebuilds byte-exact game assets, and tells
//! a running game to reload what changed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kotoba::prelude::*;
//!
//! let settings = Settings::load_or_create("kotoba.toml")?;
//! let pipeline = Pipeline::open(settings)?;
//!
//! // Read the container into the workspace
//! pipeline.run(Task::Dump(DumpOptions::default()))?;
//!
//! // Translate one field
//! pipeline.workspace().edit(&AssetId::table("text"), "1/text", "Bonjour")?;
//!
//! // Rebuild and notify the game
//! if let TaskOutput::Build(summary) = pipeline.run(Task::Build { sync: true })? {
//!     println!("{} assets changed", summary.report.changed_assets.len());
//! }
//! # Ok::<(), kotoba::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`container`], [`script`] - binary codecs, no translation semantics
//! - [`workspace`] - the on-disk store and its single mutation entry point
//! - [`merge`] - reconciling fresh dumps with existing translations
//! - [`autofill`] - rule-driven fills for composite entries
//! - [`build`] - reassembling the output tree
//! - [`sync`] - hot-reload notifications
//! - [`pipeline`] - background tasks over one workspace
//!
//! ## Feature Flags
//!
//! - `cli` - Enables the `kotoba` command-line binary

pub mod autofill;
pub mod build;
pub mod compression;
pub mod config;
pub mod container;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod script;
pub mod sync;
pub mod utils;
pub mod workspace;

// Re-exports for convenience
pub use error::{AssetOutcome, Error, ErrorKind, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{AssetOutcome, Error, ErrorKind, Result};

    pub use crate::autofill::{AutofillReport, Rule, autofill};
    pub use crate::build::{BuildOptions, BuildReport, build};
    pub use crate::config::Settings;
    pub use crate::container::{Container, Layout, decode, encode};
    pub use crate::merge::{CosmeticRule, MergeMode, MergeOptions, MergeResult, merge};
    pub use crate::pipeline::{CancelToken, DumpOptions, Pipeline, Task, TaskOutput, dump};
    pub use crate::script::{Script, decode_block, encode_block};
    pub use crate::sync::{SyncClient, SyncOutcome};
    pub use crate::workspace::{AssetId, Entry, Status, Workspace};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;
