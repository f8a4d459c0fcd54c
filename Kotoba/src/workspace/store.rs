//! The workspace store: one owner for entries, manifest and source images
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! Every change goes through [`Workspace::apply`]. It holds the entry lock
//! for exactly one [`Mutation`] and writes the touched files before
//! releasing it. Mutations that add or remove entries or assets also take
//! the structure lock for writing; a build holds that lock for reading for
//! its whole run (see [`Workspace::snapshot`]), so it never sees entries
//! appear or vanish halfway through.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use walkdir::WalkDir;

use super::asset::{AssetFile, AssetId, Entry, Status};
use super::extract::{Extraction, SourceImage};
use super::manifest::Manifest;
use crate::error::{Error, Result};
use crate::merge::{MergeOptions, MergeResult, plan_merge};
use crate::utils::{normalize_path, relative_path, write_atomic, write_json_atomic};

const MANIFEST_FILE: &str = "manifest.json";
const SOURCE_DIR: &str = ".source";

/// In-memory contents of a workspace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub manifest: Manifest,
    pub assets: BTreeMap<AssetId, AssetFile>,
}

impl State {
    /// Look up one entry
    #[must_use]
    pub fn entry(&self, asset: &AssetId, field: &str) -> Option<&Entry> {
        self.assets.get(asset)?.entry(field)
    }

    /// Every entry, in asset order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.assets.values().flat_map(|file| file.entries.iter())
    }
}

/// One machine fill, checked against the entry when applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub field: String,
    /// Source text the fill was derived for
    pub source_text: String,
    pub text: String,
}

/// A single change to the workspace
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Translator edit; sets `manual` (or `untranslated` when cleared)
    Edit {
        asset: AssetId,
        field: String,
        text: String,
    },
    /// Explicit status change, e.g. marking an entry reviewed
    SetStatus {
        asset: AssetId,
        field: String,
        status: Status,
    },
    /// Autofill writes for one asset; only `untranslated` entries change
    Fill { asset: AssetId, fills: Vec<Fill> },
    /// Drop orphaned entries: one field, one asset, or everything
    ConfirmOrphans {
        asset: Option<AssetId>,
        field: Option<String>,
    },
    /// Apply a fresh extraction
    Merge {
        extraction: Box<Extraction>,
        options: MergeOptions,
    },
}

impl Mutation {
    fn is_structural(&self) -> bool {
        matches!(self, Self::ConfirmOrphans { .. } | Self::Merge { .. })
    }
}

/// What a mutation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Edited,
    StatusSet,
    Filled(usize),
    OrphansDropped(usize),
    Merged(MergeResult),
}

/// A consistent copy of the workspace, taken under the structure lock
pub struct Snapshot<'a> {
    _structure: RwLockReadGuard<'a, ()>,
    pub state: State,
}

/// An open workspace directory
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    structure: RwLock<()>,
    state: Mutex<State>,
}

impl Workspace {
    /// Open an existing workspace
    ///
    /// # Errors
    /// Returns [`Error::WorkspaceNotInitialized`] if there is no manifest, or
    /// an error if a workspace file cannot be loaded.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(Error::WorkspaceNotInitialized(root));
        }
        let manifest = Manifest::load(&manifest_path)?;
        let assets = load_assets(&root)?;
        tracing::debug!("Opened workspace {} with {} assets", root.display(), assets.len());

        Ok(Self {
            root,
            structure: RwLock::new(()),
            state: Mutex::new(State { manifest, assets }),
        })
    }

    /// Open a workspace, creating an empty one if none exists
    ///
    /// # Errors
    /// Returns an error if the directory or manifest cannot be written.
    pub fn open_or_create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if root.join(MANIFEST_FILE).exists() {
            return Self::open(root);
        }
        std::fs::create_dir_all(root)?;
        let workspace = Self {
            root: root.to_path_buf(),
            structure: RwLock::new(()),
            state: Mutex::new(State::default()),
        };
        workspace.save_manifest(&workspace.lock_state().manifest)?;
        tracing::info!("Created workspace at {}", root.display());
        Ok(workspace)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read-only query against the current state
    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.lock_state())
    }

    /// Copy the state and keep structural mutations out until dropped
    pub fn snapshot(&self) -> Snapshot<'_> {
        let guard = self.structure.read().unwrap_or_else(PoisonError::into_inner);
        let state = self.lock_state().clone();
        Snapshot {
            _structure: guard,
            state,
        }
    }

    /// Apply one mutation and persist what it touched
    ///
    /// # Errors
    /// Returns [`Error::UnknownAsset`], [`Error::UnknownField`] or
    /// [`Error::OrphanedEntry`] for invalid targets, or an I/O error if the
    /// result cannot be written.
    pub fn apply(&self, mutation: Mutation) -> Result<Applied> {
        let _structure = mutation
            .is_structural()
            .then(|| self.structure.write().unwrap_or_else(PoisonError::into_inner));
        let mut state = self.lock_state();

        match mutation {
            Mutation::Edit { asset, field, text } => {
                let entry = editable_entry(&mut state, &asset, &field)?;
                entry.status = if text.is_empty() {
                    Status::Untranslated
                } else {
                    Status::Manual
                };
                entry.translated_text = text;
                self.save_asset(&state, &asset)?;
                Ok(Applied::Edited)
            }
            Mutation::SetStatus {
                asset,
                field,
                status,
            } => {
                editable_entry(&mut state, &asset, &field)?.status = status;
                self.save_asset(&state, &asset)?;
                Ok(Applied::StatusSet)
            }
            Mutation::Fill { asset, fills } => {
                let Some(file) = state.assets.get_mut(&asset) else {
                    return Ok(Applied::Filled(0));
                };
                let mut filled = 0;
                for fill in fills {
                    let Some(entry) = file.entry_mut(&fill.field) else {
                        continue;
                    };
                    // Re-checked here: the entry may have changed since the fill was planned
                    if entry.orphaned
                        || entry.status != Status::Untranslated
                        || !entry.translated_text.is_empty()
                        || entry.source_text != fill.source_text
                        || fill.text.is_empty()
                    {
                        continue;
                    }
                    entry.translated_text = fill.text;
                    entry.status = Status::MachineFilled;
                    filled += 1;
                }
                if filled > 0 {
                    self.save_asset(&state, &asset)?;
                }
                Ok(Applied::Filled(filled))
            }
            Mutation::ConfirmOrphans { asset, field } => {
                let dropped = self.drop_orphans(&mut state, asset.as_ref(), field.as_deref())?;
                Ok(Applied::OrphansDropped(dropped))
            }
            Mutation::Merge {
                extraction,
                options,
            } => {
                let result = self.apply_merge(&mut state, &extraction, &options)?;
                Ok(Applied::Merged(result))
            }
        }
    }

    /// Set a translator's text for one entry
    ///
    /// # Errors
    /// See [`apply`](Self::apply).
    pub fn edit(&self, asset: &AssetId, field: &str, text: &str) -> Result<()> {
        self.apply(Mutation::Edit {
            asset: asset.clone(),
            field: field.to_string(),
            text: text.to_string(),
        })
        .map(|_| ())
    }

    /// Change one entry's status
    ///
    /// # Errors
    /// See [`apply`](Self::apply).
    pub fn set_status(&self, asset: &AssetId, field: &str, status: Status) -> Result<()> {
        self.apply(Mutation::SetStatus {
            asset: asset.clone(),
            field: field.to_string(),
            status,
        })
        .map(|_| ())
    }

    /// Drop confirmed orphans; returns how many entries were removed
    ///
    /// # Errors
    /// Returns [`Error::OrphanedEntry`] when a named field is not orphaned.
    pub fn confirm_orphans(&self, asset: Option<&AssetId>, field: Option<&str>) -> Result<usize> {
        match self.apply(Mutation::ConfirmOrphans {
            asset: asset.cloned(),
            field: field.map(String::from),
        })? {
            Applied::OrphansDropped(n) => Ok(n),
            _ => Ok(0),
        }
    }

    // ==================== Mutation bodies ====================

    fn drop_orphans(
        &self,
        state: &mut State,
        asset: Option<&AssetId>,
        field: Option<&str>,
    ) -> Result<usize> {
        let targets: Vec<AssetId> = match asset {
            Some(id) if state.assets.contains_key(id) => vec![id.clone()],
            Some(id) => return Err(Error::UnknownAsset(id.to_string())),
            None => state.assets.keys().cloned().collect(),
        };

        if let (Some(id), Some(field)) = (asset, field) {
            let entry = state
                .entry(id, field)
                .ok_or_else(|| Error::UnknownField {
                    asset: id.to_string(),
                    field: field.to_string(),
                })?;
            if !entry.orphaned {
                return Err(Error::OrphanedEntry {
                    asset: id.to_string(),
                    field: field.to_string(),
                    reason: "is not orphaned".to_string(),
                });
            }
        }

        let mut dropped = 0;
        let mut manifest_dirty = false;
        for id in targets {
            let Some(file) = state.assets.get_mut(&id) else {
                continue;
            };
            let before = file.entries.len();
            file.entries
                .retain(|e| !e.orphaned || field.is_some_and(|f| e.field_path != f));
            let removed = before - file.entries.len();
            if removed == 0 {
                continue;
            }
            dropped += removed;

            let asset_gone = state.manifest.record(&id).is_none_or(|r| r.orphaned);
            if file.entries.is_empty() && asset_gone {
                state.assets.remove(&id);
                state.manifest.assets.shift_remove(&id);
                manifest_dirty = true;
                let path = self.root.join(id.workspace_path());
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            } else {
                self.save_asset(state, &id)?;
            }
        }

        if manifest_dirty {
            self.save_manifest(&state.manifest)?;
            self.prune_images(&state.manifest)?;
        }
        tracing::info!("Dropped {dropped} orphaned entries");
        Ok(dropped)
    }

    fn apply_merge(
        &self,
        state: &mut State,
        extraction: &Extraction,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        for image in &extraction.images {
            self.store_image(image)?;
        }

        let plan = plan_merge(state, extraction, options);
        tracing::info!(
            "Merge: {} added, {} removed, {} changed, {} restored, {} deleted, {} files to write",
            plan.result.added.len(),
            plan.result.removed.len(),
            plan.result.changed.len(),
            plan.result.restored.len(),
            plan.result.deleted.len(),
            plan.files.len()
        );

        for file in plan.files {
            let id = file.asset_id.clone();
            state.assets.insert(id.clone(), file);
            self.save_asset(state, &id)?;
        }
        for (id, record) in plan.records {
            state.manifest.assets.insert(id, record);
        }
        state.manifest.container = Some(extraction.skeleton.clone());
        self.save_manifest(&state.manifest)?;
        self.prune_images(&state.manifest)?;

        Ok(plan.result)
    }

    // ==================== Files ====================

    fn save_asset(&self, state: &State, id: &AssetId) -> Result<()> {
        let file = state
            .assets
            .get(id)
            .ok_or_else(|| Error::UnknownAsset(id.to_string()))?;
        write_json_atomic(&self.root.join(id.workspace_path()), file)
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        write_json_atomic(&self.root.join(MANIFEST_FILE), manifest)
    }

    /// Location of a source image
    #[must_use]
    pub fn image_path(&self, hash: &str) -> PathBuf {
        self.root.join(SOURCE_DIR).join(format!("{hash}.bin"))
    }

    /// Read a source image, if it was stored
    ///
    /// # Errors
    /// Returns an I/O error for anything but a missing file.
    pub fn load_image(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.image_path(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store_image(&self, image: &SourceImage) -> Result<()> {
        let path = self.image_path(&image.hash);
        if !path.exists() {
            write_atomic(&path, &image.bytes)?;
        }
        Ok(())
    }

    /// Delete source images the manifest no longer refers to
    fn prune_images(&self, manifest: &Manifest) -> Result<usize> {
        let dir = self.root.join(SOURCE_DIR);
        if !dir.exists() {
            return Ok(0);
        }
        let keep = manifest.referenced_images();
        let mut removed = 0;
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if entry.file_type().is_file() && !keep.contains(stem) {
                std::fs::remove_file(path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("Pruned {removed} unreferenced source images");
        }
        Ok(removed)
    }
}

fn editable_entry<'s>(state: &'s mut State, asset: &AssetId, field: &str) -> Result<&'s mut Entry> {
    let file = state
        .assets
        .get_mut(asset)
        .ok_or_else(|| Error::UnknownAsset(asset.to_string()))?;
    let entry = file.entry_mut(field).ok_or_else(|| Error::UnknownField {
        asset: asset.to_string(),
        field: field.to_string(),
    })?;
    if entry.orphaned {
        return Err(Error::OrphanedEntry {
            asset: asset.to_string(),
            field: field.to_string(),
            reason: "is orphaned; confirm or wait for it to be restored".to_string(),
        });
    }
    Ok(entry)
}

/// Load every workspace file under `mdb/` and `story/`
///
/// Files are found by walking the tree rather than through the manifest, so
/// files that were never dumped still show up (and fail the build).
fn load_assets(root: &Path) -> Result<BTreeMap<AssetId, AssetFile>> {
    let mut assets = BTreeMap::new();
    let mut seen = HashSet::new();
    for dir in ["mdb", "story"] {
        let dir = root.join(dir);
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().is_none_or(|ext| ext != "json")
            {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let file = AssetFile::from_json(&text, path)?;
            if let Some(relative) = relative_path(path, root) {
                let expected = normalize_path(file.asset_id.workspace_path());
                if relative != expected {
                    tracing::warn!("{relative} holds {}; edits will be saved to {expected}", file.asset_id);
                }
            }
            if !seen.insert(file.asset_id.clone()) {
                return Err(Error::InvalidAssetId(format!(
                    "{} appears in more than one workspace file",
                    file.asset_id
                )));
            }
            assets.insert(file.asset_id.clone(), file);
        }
    }
    Ok(assets)
}
