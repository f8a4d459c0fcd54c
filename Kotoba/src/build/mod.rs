//! Build assembler: workspace + source images → game-ready output tree
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! Output layout:
//!
//! ```text
//! build/
//! ├── master/master.mdb                       rebuilt container
//! ├── assets/story/<table>/<key>_<column>.bin  every script block
//! └── build.json                              generation, timestamp, per-asset hashes
//! ```
//!
//! Only non-empty translations whose source text still matches the source
//! image are written; every other byte comes from the images stored at dump
//! time. The tree is written to a staging directory next to the output and
//! swapped in only when every asset built.
//!
//! # Example
//!
//! ```no_run
//! use kotoba::build::{build, BuildOptions};
//! use kotoba::pipeline::CancelToken;
//! use kotoba::workspace::Workspace;
//!
//! let workspace = Workspace::open("translation")?;
//! let report = build(&workspace, &BuildOptions::new("build"), &CancelToken::new())?
//!     .into_result()?;
//! println!("generation {}: {} assets changed", report.generation, report.changed_assets.len());
//! # Ok::<(), kotoba::Error>(())
//! ```

mod assemble;
mod manifest;

pub use manifest::{BUILD_MANIFEST, BuildManifest, BuiltAsset};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use self::assemble::{StoryOutput, TableOutput, build_table, incomplete};
use crate::container::{RawTable, assemble, reassemble};
use crate::error::{AssetOutcome, Error, Result};
use crate::pipeline::CancelToken;
use crate::utils::{hash_bytes, normalize_path};
use crate::workspace::{ContainerSkeleton, State, Workspace};

/// Build progress phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Checking the manifest against the workspace files
    Validating,
    /// Rebuilding tables and script blocks
    Assembling,
    /// Writing the staging tree
    Writing,
    /// Swapping the staging tree in
    Committing,
    Complete,
}

impl BuildPhase {
    /// Get a human-readable description of this phase
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Validating => "Validating workspace",
            Self::Assembling => "Assembling tables",
            Self::Writing => "Writing output",
            Self::Committing => "Committing build",
            Self::Complete => "Complete",
        }
    }
}

/// Progress information during a build
#[derive(Debug, Clone)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub current: usize,
    pub total: usize,
}

impl BuildProgress {
    #[must_use]
    pub fn new(phase: BuildPhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
        }
    }
}

/// Options for [`build`]
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub output_dir: PathBuf,
}

impl BuildOptions {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// Result of a build
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// Whether the output tree was replaced
    pub committed: bool,
    /// Generation of the committed tree (0 when nothing was committed)
    pub generation: u64,
    pub output_dir: PathBuf,
    pub tables: usize,
    pub rows: usize,
    /// Script block files written
    pub stories: usize,
    /// Entries written into the output
    pub substituted: usize,
    /// The container was copied unchanged
    pub container_passthrough: bool,
    /// Assets whose output differs from the previous build
    pub changed_assets: Vec<String>,
    /// Assets attempted
    pub attempted: usize,
    pub outcomes: Vec<AssetOutcome>,
}

impl BuildReport {
    /// Turn a failed build into [`Error::BuildFailed`]
    ///
    /// # Errors
    /// Returns [`Error::BuildFailed`] if the build was not committed.
    pub fn into_result(self) -> Result<Self> {
        if self.committed {
            Ok(self)
        } else {
            Err(Error::BuildFailed {
                failed: self.outcomes.len(),
                total: self.attempted,
            })
        }
    }
}

/// Build the output tree
///
/// # Errors
/// Returns [`Error::WorkspaceNotInitialized`] before the first dump,
/// [`Error::Cancelled`], or an I/O error while writing or swapping the
/// tree. Per-asset failures do not error; they are listed in the report,
/// which is then not committed.
pub fn build(workspace: &Workspace, options: &BuildOptions, cancel: &CancelToken) -> Result<BuildReport> {
    build_with_progress(workspace, options, cancel, |_| {})
}

/// Build the output tree with progress reporting
///
/// # Errors
/// See [`build`].
pub fn build_with_progress<F>(
    workspace: &Workspace,
    options: &BuildOptions,
    cancel: &CancelToken,
    progress: F,
) -> Result<BuildReport>
where
    F: Fn(&BuildProgress) + Send + Sync,
{
    // Held until the build finishes: no entries or assets appear or vanish meanwhile
    let snapshot = workspace.snapshot();
    let state = &snapshot.state;

    progress(&BuildProgress::new(BuildPhase::Validating, 0, 1));
    let skeleton = state
        .manifest
        .container
        .as_ref()
        .ok_or_else(|| Error::WorkspaceNotInitialized(workspace.root().to_path_buf()))?;
    let mut report = BuildReport {
        output_dir: options.output_dir.clone(),
        tables: skeleton.tables.len(),
        rows: skeleton.tables.iter().map(|t| t.row_count as usize).sum(),
        outcomes: validate_records(workspace, state, skeleton),
        ..BuildReport::default()
    };

    let total = skeleton.tables.len();
    progress(&BuildProgress::new(BuildPhase::Assembling, 0, total));
    let done = AtomicUsize::new(0);
    let outputs = skeleton
        .tables
        .par_iter()
        .map(|table| {
            cancel.check()?;
            let output = build_table(workspace, state, table, cancel)?;
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress(&BuildProgress::new(BuildPhase::Assembling, current, total));
            Ok(output)
        })
        .collect::<Result<Vec<TableOutput>>>()?;

    let mut raws: Vec<RawTable> = Vec::with_capacity(outputs.len());
    let mut stories: Vec<StoryOutput> = Vec::new();
    for output in outputs {
        report.attempted += 1 + output.stories.len();
        report.substituted += output.substituted;
        report.outcomes.extend(output.outcomes);
        raws.extend(output.raw);
        stories.extend(output.stories);
    }
    report.stories = stories.len();
    // A story missing its image is caught both up front and while assembling
    let mut seen = std::collections::HashSet::new();
    report.outcomes.retain(|o| seen.insert(o.asset_id.clone()));

    if !report.outcomes.is_empty() {
        tracing::warn!(
            "Build failed for {} assets; output left untouched",
            report.outcomes.len()
        );
        return Ok(report);
    }

    check_shape(skeleton, &raws)?;
    let (container, passthrough) = match workspace.load_image(&skeleton.source_hash)? {
        Some(original) if report.substituted == 0 => (original, true),
        Some(original) => (reassemble(&original, &raws)?, false),
        None => (assemble(skeleton.version, &raws)?, false),
    };
    report.container_passthrough = passthrough;
    cancel.check()?;

    let previous = BuildManifest::load_previous(&options.output_dir);
    let container_path = normalize_path(Path::new("master").join(&skeleton.file_name));
    let mut assets = BTreeMap::new();
    for raw in &raws {
        assets.insert(
            format!("table/{}", raw.name),
            BuiltAsset {
                path: container_path.clone(),
                hash: hash_bytes(&raw.payload),
            },
        );
    }
    for story in &stories {
        if let Some(path) = story.id.story_output_path() {
            assets.insert(
                story.id.to_string(),
                BuiltAsset {
                    path: normalize_path(path),
                    hash: hash_bytes(&story.bytes),
                },
            );
        }
    }
    let manifest = BuildManifest {
        generation: previous.as_ref().map_or(1, |p| p.generation + 1),
        timestamp: Utc::now(),
        container: BuiltAsset {
            path: container_path,
            hash: hash_bytes(&container),
        },
        assets,
    };

    progress(&BuildProgress::new(BuildPhase::Writing, 0, stories.len() + 2));
    let staging = sibling_dir(&options.output_dir, "staging");
    let written = write_tree(&staging, &container, &stories, &manifest, cancel)
        .and_then(|()| cancel.check());
    if let Err(e) = written {
        discard(&staging);
        return Err(e);
    }

    progress(&BuildProgress::new(BuildPhase::Committing, 0, 1));
    if let Err(e) = commit(&staging, &options.output_dir) {
        discard(&staging);
        return Err(e);
    }

    report.committed = true;
    report.generation = manifest.generation;
    report.changed_assets = manifest.changed_since(previous.as_ref());
    tracing::info!(
        "Build {} committed to {}: {} entries substituted, {} assets changed",
        report.generation,
        options.output_dir.display(),
        report.substituted,
        report.changed_assets.len()
    );
    progress(&BuildProgress::new(BuildPhase::Complete, 1, 1));
    Ok(report)
}

/// Per-asset checks that need no image decoding
fn validate_records(workspace: &Workspace, state: &State, skeleton: &ContainerSkeleton) -> Vec<AssetOutcome> {
    let mut outcomes = Vec::new();
    for (id, file) in &state.assets {
        if file.is_fully_orphaned() {
            continue;
        }
        let error = match state.manifest.record(id) {
            None => incomplete(id, "workspace file has no manifest record"),
            Some(record) if record.orphaned => continue,
            Some(record) if record.container_version != skeleton.version => incomplete(
                id,
                format!(
                    "dumped from container version {}, manifest skeleton is version {}",
                    record.container_version, skeleton.version
                ),
            ),
            Some(_) if skeleton.table(id.table_name()).is_none() => {
                incomplete(id, format!("table '{}' is not in the container", id.table_name()))
            }
            Some(record) if id.is_story() && !workspace.image_path(&record.source_hash).exists() => {
                incomplete(id, format!("script image {} not found", record.source_hash))
            }
            Some(_) => continue,
        };
        tracing::warn!("Cannot build {id}: {error}");
        outcomes.push(AssetOutcome::new(id, &error));
    }
    outcomes
}

/// Text substitution never changes the container's shape
fn check_shape(skeleton: &ContainerSkeleton, raws: &[RawTable]) -> Result<()> {
    if raws.len() != skeleton.tables.len() {
        return Err(Error::MalformedContainer(format!(
            "rebuilt {} tables, source has {}",
            raws.len(),
            skeleton.tables.len()
        )));
    }
    for (raw, table) in raws.iter().zip(&skeleton.tables) {
        if raw.name != table.name || raw.row_count != table.row_count {
            return Err(Error::MalformedContainer(format!(
                "table '{}' rebuilt with {} rows, source has {}",
                table.name, raw.row_count, table.row_count
            )));
        }
    }
    Ok(())
}

fn write_tree(
    root: &Path,
    container: &[u8],
    stories: &[StoryOutput],
    manifest: &BuildManifest,
    cancel: &CancelToken,
) -> Result<()> {
    let container_path = root.join(&manifest.container.path);
    if let Some(parent) = container_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&container_path, container)?;

    for story in stories {
        cancel.check()?;
        let Some(relative) = story.id.story_output_path() else {
            continue;
        };
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &story.bytes)?;
    }

    manifest.write(root)
}

/// A uniquely named directory next to `output`
fn sibling_dir(output: &Path, tag: &str) -> PathBuf {
    let name = output
        .file_name()
        .map_or_else(|| "build".to_string(), |n| n.to_string_lossy().into_owned());
    output.with_file_name(format!(".{name}.{tag}-{}", Uuid::new_v4().simple()))
}

/// Replace `output` with `staging`
fn commit(staging: &Path, output: &Path) -> Result<()> {
    if !output.exists() {
        std::fs::rename(staging, output)?;
        return Ok(());
    }
    let old = sibling_dir(output, "old");
    std::fs::rename(output, &old)?;
    if let Err(e) = std::fs::rename(staging, output) {
        if let Err(restore) = std::fs::rename(&old, output) {
            tracing::error!(
                "Could not restore previous build from {}: {restore}",
                old.display()
            );
        }
        return Err(e.into());
    }
    std::fs::remove_dir_all(&old)?;
    Ok(())
}

fn discard(staging: &Path) {
    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            tracing::warn!("Could not remove staging tree {}: {e}", staging.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;
    use crate::container::{
        CONTAINER_VERSION, ColumnLayout, ColumnType, Container, Layout, Row, Table, TableData,
        TableLayout, Value, decode, encode,
    };
    use crate::merge::{MergeOptions, merge};
    use crate::script::{Block, Script, ScriptBody, decode_block, encode_block};
    use crate::workspace::{AssetId, ExtractOptions, extract};
    use pretty_assertions::assert_eq;

    fn layout() -> Layout {
        Layout::new(vec![
            TableLayout::new(
                "text",
                vec![
                    ColumnLayout::key("id", ColumnType::U32),
                    ColumnLayout::plain("flags", ColumnType::U16),
                    ColumnLayout::text("text"),
                ],
            ),
            TableLayout::new(
                "story",
                vec![
                    ColumnLayout::key("id", ColumnType::U32),
                    ColumnLayout::plain("script", ColumnType::Script),
                ],
            ),
        ])
        .unwrap()
    }

    fn script() -> Vec<u8> {
        encode_block(&Script::new(
            ScriptBody {
                title: "Prologue".into(),
                blocks: vec![Block {
                    name: "Trainer".into(),
                    text: "Good morning".into(),
                    trailer: vec![1, 2, 3],
                    ..Block::default()
                }],
            },
            CompressionMethod::Zlib,
            Some(0x1234_5678_9abc_def0),
        ))
        .unwrap()
    }

    fn container() -> Vec<u8> {
        let layout = layout();
        encode(&Container {
            version: CONTAINER_VERSION,
            tables: vec![
                Table {
                    name: "text".into(),
                    data: TableData::Rows {
                        layout: layout.tables[0].clone(),
                        rows: vec![
                            Row::new(vec![Value::U32(1), Value::U16(7), Value::Text("Hello".into())]),
                            Row::new(vec![Value::U32(2), Value::U16(9), Value::Text("World".into())]),
                        ],
                    },
                },
                Table {
                    name: "story".into(),
                    data: TableData::Rows {
                        layout: layout.tables[1].clone(),
                        rows: vec![Row::new(vec![Value::U32(5), Value::Script(script())])],
                    },
                },
            ],
        })
        .unwrap()
    }

    fn dumped(dir: &Path) -> Workspace {
        let ws = Workspace::open_or_create(dir.join("ws")).unwrap();
        let extraction = extract(
            "master.mdb",
            &container(),
            &layout(),
            &ExtractOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        merge(&ws, extraction, &MergeOptions::default()).unwrap();
        ws
    }

    #[test]
    fn test_untouched_build_is_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dumped(dir.path());
        let out = dir.path().join("out");

        let report = build(&ws, &BuildOptions::new(&out), &CancelToken::new())
            .unwrap()
            .into_result()
            .unwrap();
        assert!(report.container_passthrough);
        assert_eq!(report.generation, 1);
        assert_eq!(std::fs::read(out.join("master/master.mdb")).unwrap(), container());
        assert_eq!(
            std::fs::read(out.join("assets/story/story/5_script.bin")).unwrap(),
            script()
        );

        // Same inputs again: nothing changed for the game
        let again = build(&ws, &BuildOptions::new(&out), &CancelToken::new()).unwrap();
        assert_eq!(again.generation, 2);
        assert!(again.changed_assets.is_empty());
    }

    #[test]
    fn test_translations_substituted() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dumped(dir.path());
        let out = dir.path().join("out");
        build(&ws, &BuildOptions::new(&out), &CancelToken::new()).unwrap();
        let story: AssetId = "story/story/5/script".parse().unwrap();
        ws.edit(&AssetId::table("text"), "1/text", "Bonjour").unwrap();
        ws.edit(&story, "block/0/text", "Bonjour à tous").unwrap();

        let report = build(&ws, &BuildOptions::new(&out), &CancelToken::new()).unwrap();
        assert!(report.committed);
        assert!(!report.container_passthrough);
        assert_eq!(report.substituted, 2);
        // The story cell lives in table/story, so that payload changes too
        assert_eq!(
            report.changed_assets,
            vec!["story/story/5/script", "table/story", "table/text"]
        );

        let rebuilt = decode(&std::fs::read(out.join("master/master.mdb")).unwrap(), &layout()).unwrap();
        let text = rebuilt.table("text").unwrap();
        assert_eq!(text.rows()[0].get(2), Some(&Value::Text("Bonjour".into())));
        assert_eq!(text.rows()[0].get(1), Some(&Value::U16(7)));
        assert_eq!(text.rows()[1].get(2), Some(&Value::Text("World".into())));

        let bin = std::fs::read(out.join("assets/story/story/5_script.bin")).unwrap();
        let block = decode_block(&bin).unwrap();
        assert_eq!(block.body.blocks[0].text, "Bonjour à tous");
        assert_eq!(block.body.blocks[0].trailer, vec![1, 2, 3]);
        assert_eq!(block.compression, CompressionMethod::Zlib);
        assert!(block.is_masked());
        let cell = rebuilt.table("story").unwrap().rows()[0].get(1).cloned();
        assert_eq!(cell, Some(Value::Script(bin)));
    }

    #[test]
    fn test_missing_image_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dumped(dir.path());
        let out = dir.path().join("out");
        build(&ws, &BuildOptions::new(&out), &CancelToken::new()).unwrap();
        let before = std::fs::read(out.join(BUILD_MANIFEST)).unwrap();

        let story: AssetId = "story/story/5/script".parse().unwrap();
        let hash = ws.read(|s| s.manifest.record(&story).unwrap().source_hash.clone());
        std::fs::remove_file(ws.image_path(&hash)).unwrap();

        let report = build(&ws, &BuildOptions::new(&out), &CancelToken::new()).unwrap();
        assert!(!report.committed);
        assert_eq!(report.outcomes[0].asset_id, story.to_string());
        assert_eq!(report.outcomes[0].kind, crate::ErrorKind::IncompleteSource);
        assert!(matches!(report.into_result(), Err(Error::BuildFailed { .. })));
        assert_eq!(std::fs::read(out.join(BUILD_MANIFEST)).unwrap(), before);
    }

    #[test]
    fn test_cancelled_build_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dumped(dir.path());
        let out = dir.path().join("out");
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            build(&ws, &BuildOptions::new(&out), &cancel),
            Err(Error::Cancelled)
        ));
        assert!(!out.exists());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1); // only the workspace
    }
}
