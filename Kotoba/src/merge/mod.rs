//! Merging fresh container data into an existing workspace
//!
//! A dump never overwrites translator work. Each field is classified by
//! comparing its fresh source text with the stored one:
//!
//! - **added**: new upstream; a fresh `untranslated` entry is created
//! - **changed**: source text differs; the translation is kept and the
//!   status drops to `untranslated` unless the [`CosmeticRule`] matches
//! - **removed**: gone upstream; the entry is flagged `orphaned` and kept
//!   until confirmed
//! - **restored**: an orphan whose field came back
//! - **unchanged**: everything else, including binary-only changes
//!
//! ```no_run
//! use kotoba::merge::{merge, MergeOptions};
//! use kotoba::workspace::{extract, ExtractOptions, Workspace};
//! use kotoba::container::Layout;
//! use kotoba::pipeline::CancelToken;
//!
//! let workspace = Workspace::open_or_create("translation")?;
//! let layout = Layout::load("layout.json")?;
//! let data = std::fs::read("master.mdb")?;
//! let fresh = extract("master.mdb", &data, &layout, &ExtractOptions::default(), &CancelToken::new())?;
//!
//! let result = merge(&workspace, fresh, &MergeOptions::default())?;
//! for (change, key) in result.changes() {
//!     println!("{change} {key}");
//! }
//! # Ok::<(), kotoba::Error>(())
//! ```

mod engine;
mod types;

pub use engine::plan_merge;
pub use types::{
    ChangeType, CosmeticRule, FieldKey, MergeMode, MergeOptions, MergePlan, MergeResult,
};

use crate::error::Result;
use crate::workspace::{Applied, Extraction, Mutation, Workspace};

/// Merge an extraction into the workspace and persist the outcome
///
/// # Errors
/// Returns an error if workspace files or source images cannot be written.
pub fn merge(
    workspace: &Workspace,
    extraction: Extraction,
    options: &MergeOptions,
) -> Result<MergeResult> {
    match workspace.apply(Mutation::Merge {
        extraction: Box::new(extraction),
        options: *options,
    })? {
        Applied::Merged(result) => Ok(result),
        _ => Ok(MergeResult::default()),
    }
}
