//! Core types for merge operations

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::workspace::{AssetFile, AssetId, AssetRecord};

/// Which source edits keep an entry's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CosmeticRule {
    /// Every source edit downgrades the entry
    None,
    /// Edits that only touch trailing whitespace are cosmetic
    #[default]
    TrailingWhitespace,
    /// Edits that only add, remove or move whitespace are cosmetic
    Whitespace,
}

impl CosmeticRule {
    /// Whether `old` -> `new` is a cosmetic edit under this rule
    #[must_use]
    pub fn is_cosmetic(self, old: &str, new: &str) -> bool {
        match self {
            Self::None => false,
            Self::TrailingWhitespace => old.trim_end() == new.trim_end(),
            Self::Whitespace => old
                .chars()
                .filter(|c| !c.is_whitespace())
                .eq(new.chars().filter(|c| !c.is_whitespace())),
        }
    }
}

/// How fresh data is combined with existing entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Keep translations, classify each field
    #[default]
    Update,
    /// Discard existing entries of the merged assets
    Overwrite,
}

/// Options for merge operations
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub cosmetic: CosmeticRule,
    pub mode: MergeMode,
}

/// Type of change detected for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Removed,
    Changed,
    Restored,
    /// Dropped by an overwrite merge
    Deleted,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "+"),
            Self::Removed => write!(f, "-"),
            Self::Changed => write!(f, "~"),
            Self::Restored => write!(f, "^"),
            Self::Deleted => write!(f, "x"),
        }
    }
}

/// Identity of one entry across merges
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldKey {
    pub asset_id: AssetId,
    pub field_path: String,
}

impl FieldKey {
    pub fn new(asset_id: &AssetId, field_path: &str) -> Self {
        Self {
            asset_id: asset_id.clone(),
            field_path: field_path.to_string(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.asset_id, self.field_path)
    }
}

/// Per-field classification of one merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub added: Vec<FieldKey>,
    pub removed: Vec<FieldKey>,
    pub changed: Vec<FieldKey>,
    pub unchanged: Vec<FieldKey>,
    pub restored: Vec<FieldKey>,
    /// Changed fields whose status was kept by the cosmetic rule
    pub cosmetic: Vec<FieldKey>,
    /// Entries an overwrite merge dropped because they are gone upstream
    pub deleted: Vec<FieldKey>,
    /// Non-empty translations an overwrite merge threw away
    pub discarded_translations: usize,
}

impl MergeResult {
    /// Whether anything besides `unchanged` was reported
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.restored.is_empty()
            && self.deleted.is_empty())
    }

    /// All reported changes, for display
    pub fn changes(&self) -> impl Iterator<Item = (ChangeType, &FieldKey)> {
        self.added
            .iter()
            .map(|k| (ChangeType::Added, k))
            .chain(self.removed.iter().map(|k| (ChangeType::Removed, k)))
            .chain(self.changed.iter().map(|k| (ChangeType::Changed, k)))
            .chain(self.restored.iter().map(|k| (ChangeType::Restored, k)))
            .chain(self.deleted.iter().map(|k| (ChangeType::Deleted, k)))
    }

    pub(crate) fn absorb(&mut self, other: MergeResult) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.changed.extend(other.changed);
        self.unchanged.extend(other.unchanged);
        self.restored.extend(other.restored);
        self.cosmetic.extend(other.cosmetic);
        self.deleted.extend(other.deleted);
        self.discarded_translations += other.discarded_translations;
    }
}

/// Everything a merge wants written, computed before anything is touched
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub result: MergeResult,
    /// Workspace files that differ from their current contents
    pub files: Vec<AssetFile>,
    /// Manifest records to insert or replace
    pub records: Vec<(AssetId, AssetRecord)>,
}
