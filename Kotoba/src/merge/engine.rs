//! Reconciling fresh extractions with existing workspace entries

use std::collections::{HashMap, HashSet};

use super::types::{FieldKey, MergeMode, MergeOptions, MergePlan, MergeResult};
use crate::utils::normalize_path;
use crate::workspace::{
    AssetFile, AssetId, AssetRecord, Entry, Extraction, FreshAsset, State, Status,
};

/// Compute the merge of an extraction into the current workspace state
///
/// Nothing is written; the store applies the returned plan.
#[must_use]
pub fn plan_merge(state: &State, extraction: &Extraction, options: &MergeOptions) -> MergePlan {
    let version = extraction.skeleton.version;
    let mut plan = MergePlan::default();
    let mut fresh_ids = HashSet::with_capacity(extraction.assets.len());

    for fresh in &extraction.assets {
        fresh_ids.insert(&fresh.id);
        let existing = state.assets.get(&fresh.id);
        let record = state.manifest.record(&fresh.id);

        let new_record = AssetRecord {
            source_hash: fresh.source_hash.clone(),
            file: normalize_path(fresh.id.workspace_path()),
            container_version: version,
            orphaned: false,
        };

        let fast_path = options.mode == MergeMode::Update
            && existing.is_some_and(|file| file.source_hash == fresh.source_hash)
            && record.is_some_and(|r| r.source_hash == fresh.source_hash && !r.orphaned);

        if fast_path {
            if let Some(file) = existing {
                plan.result.unchanged.extend(
                    file.entries
                        .iter()
                        .filter(|e| !e.orphaned)
                        .map(|e| FieldKey::new(&fresh.id, &e.field_path)),
                );
            }
        } else {
            let (file, result) = match options.mode {
                MergeMode::Update => merge_asset(existing, fresh, options),
                MergeMode::Overwrite => overwrite_asset(existing, fresh),
            };
            plan.result.absorb(result);
            if existing != Some(&file) {
                plan.files.push(file);
            }
        }

        if record != Some(&new_record) {
            plan.records.push((fresh.id.clone(), new_record));
        }
    }

    if plan.result.discarded_translations > 0 {
        tracing::warn!(
            "Overwrite discarded {} translated entries",
            plan.result.discarded_translations
        );
    }

    // Assets that vanished upstream: orphan their entries, keep the files
    for (id, file) in &state.assets {
        if fresh_ids.contains(id) || !extraction.covers(id) {
            continue;
        }
        let mut orphaned = file.clone();
        for entry in orphaned.entries.iter_mut().filter(|e| !e.orphaned) {
            entry.orphaned = true;
            plan.result
                .removed
                .push(FieldKey::new(id, &entry.field_path));
        }
        if orphaned != *file {
            plan.files.push(orphaned);
        }
        if let Some(record) = state.manifest.record(id) {
            if !record.orphaned {
                let mut record = record.clone();
                record.orphaned = true;
                plan.records.push((id.clone(), record));
            }
        }
    }

    plan
}

/// Classify and update one asset's entries
///
/// Fresh fields come first in upstream order; entries that no longer exist
/// upstream follow as orphans in their previous order.
fn merge_asset(
    existing: Option<&AssetFile>,
    fresh: &FreshAsset,
    options: &MergeOptions,
) -> (AssetFile, MergeResult) {
    let mut result = MergeResult::default();
    let mut file = existing.map_or_else(
        || AssetFile::new(fresh.id.clone(), fresh.source_hash.clone()),
        |file| AssetFile {
            entries: Vec::with_capacity(fresh.fields.len()),
            ..file.clone()
        },
    );
    file.source_hash.clone_from(&fresh.source_hash);

    let mut old: HashMap<&str, &Entry> = existing
        .map(|f| f.entries.iter().map(|e| (e.field_path.as_str(), e)).collect())
        .unwrap_or_default();

    for (field_path, source_text) in &fresh.fields {
        let key = FieldKey::new(&fresh.id, field_path);
        let Some(previous) = old.remove(field_path.as_str()) else {
            file.entries
                .push(Entry::new(fresh.id.clone(), field_path, source_text));
            result.added.push(key);
            continue;
        };

        let mut entry = previous.clone();
        let source_changed = entry.source_text != *source_text;
        if source_changed {
            let cosmetic = options.cosmetic.is_cosmetic(&entry.source_text, source_text);
            if cosmetic {
                result.cosmetic.push(key.clone());
            } else {
                entry.status = Status::Untranslated;
            }
            entry.set_source(source_text);
        }

        if entry.orphaned {
            entry.orphaned = false;
            result.restored.push(key);
        } else if source_changed {
            result.changed.push(key);
        } else {
            result.unchanged.push(key);
        }
        file.entries.push(entry);
    }

    // Anything left in `old` is gone upstream
    if let Some(existing) = existing {
        for previous in &existing.entries {
            if !old.contains_key(previous.field_path.as_str()) {
                continue;
            }
            let mut entry = previous.clone();
            if !entry.orphaned {
                entry.orphaned = true;
                result
                    .removed
                    .push(FieldKey::new(&fresh.id, &entry.field_path));
            }
            file.entries.push(entry);
        }
    }

    (file, result)
}

/// Replace an asset's entries with fresh untranslated ones
///
/// Entries gone upstream are dropped rather than orphaned.
fn overwrite_asset(existing: Option<&AssetFile>, fresh: &FreshAsset) -> (AssetFile, MergeResult) {
    let mut result = MergeResult::default();
    let mut file = AssetFile::new(fresh.id.clone(), fresh.source_hash.clone());
    if let Some(existing) = existing {
        file.extra.clone_from(&existing.extra);
        let kept: HashSet<&str> = fresh.fields.iter().map(|(p, _)| p.as_str()).collect();
        result.deleted.extend(
            existing
                .entries
                .iter()
                .filter(|e| !kept.contains(e.field_path.as_str()))
                .map(|e| FieldKey::new(&fresh.id, &e.field_path)),
        );
        result.discarded_translations = existing
            .entries
            .iter()
            .filter(|e| !e.translated_text.is_empty())
            .count();
    }
    for (field_path, source_text) in &fresh.fields {
        file.entries
            .push(Entry::new(fresh.id.clone(), field_path, source_text));
        result.added.push(FieldKey::new(&fresh.id, field_path));
    }
    (file, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::CosmeticRule;
    use crate::workspace::{ContainerSkeleton, Manifest};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn id() -> AssetId {
        AssetId::table("text")
    }

    fn fresh(hash: &str, fields: &[(&str, &str)]) -> FreshAsset {
        FreshAsset {
            id: id(),
            source_hash: hash.to_string(),
            fields: fields
                .iter()
                .map(|(p, t)| ((*p).to_string(), (*t).to_string()))
                .collect(),
        }
    }

    fn extraction(assets: Vec<FreshAsset>) -> Extraction {
        Extraction {
            skeleton: ContainerSkeleton {
                file_name: "master.mdb".into(),
                version: 1,
                source_hash: "c".into(),
                tables: vec![],
            },
            images: vec![],
            assets,
            covered_tables: BTreeSet::from(["text".to_string()]),
            skipped_assets: HashSet::new(),
            outcomes: vec![],
        }
    }

    fn apply(state: &mut State, plan: MergePlan) -> MergeResult {
        for file in plan.files {
            state.assets.insert(file.asset_id.clone(), file);
        }
        for (id, record) in plan.records {
            state.manifest.assets.insert(id, record);
        }
        plan.result
    }

    fn translated(state: &mut State, field: &str, text: &str) {
        let entry = state
            .assets
            .get_mut(&id())
            .unwrap()
            .entry_mut(field)
            .unwrap();
        entry.translated_text = text.to_string();
        entry.status = Status::Manual;
    }

    fn keys(keys: &[FieldKey]) -> Vec<&str> {
        keys.iter().map(|k| k.field_path.as_str()).collect()
    }

    fn seeded() -> State {
        let mut state = State {
            manifest: Manifest::default(),
            assets: Default::default(),
        };
        let options = MergeOptions::default();
        let first = fresh("h1", &[("1/text", "Hello"), ("2/text", "World")]);
        let plan = plan_merge(&state, &extraction(vec![first]), &options);
        let result = apply(&mut state, plan);
        assert_eq!(keys(&result.added), vec!["1/text", "2/text"]);
        translated(&mut state, "1/text", "Bonjour");
        translated(&mut state, "2/text", "Monde");
        state
    }

    #[test]
    fn test_changed_source_downgrades() {
        let mut state = seeded();
        let update = fresh("h2", &[("1/text", "Hello"), ("2/text", "Earth")]);
        let plan = plan_merge(&state, &extraction(vec![update]), &MergeOptions::default());
        let result = apply(&mut state, plan);
        assert_eq!(keys(&result.changed), vec!["2/text"]);
        assert_eq!(keys(&result.unchanged), vec!["1/text"]);

        let file = &state.assets[&id()];
        let entry = file.entry("2/text").unwrap();
        assert_eq!(entry.translated_text, "Monde");
        assert_eq!(entry.status, Status::Untranslated);
        assert_eq!(entry.source_text, "Earth");
        assert_eq!(file.entry("1/text").unwrap().status, Status::Manual);
    }

    #[test]
    fn test_cosmetic_change_keeps_status() {
        let mut state = seeded();
        let update = fresh("h2", &[("1/text", "Hello  "), ("2/text", "World")]);
        let options = MergeOptions {
            cosmetic: CosmeticRule::TrailingWhitespace,
            ..MergeOptions::default()
        };
        let plan = plan_merge(&state, &extraction(vec![update]), &options);
        let result = apply(&mut state, plan);
        assert_eq!(keys(&result.changed), vec!["1/text"]);
        assert_eq!(keys(&result.cosmetic), vec!["1/text"]);
        assert_eq!(
            state.assets[&id()].entry("1/text").unwrap().status,
            Status::Manual
        );
    }

    #[test]
    fn test_removed_then_restored() {
        let mut state = seeded();
        let options = MergeOptions::default();

        let removed = fresh("h3", &[("1/text", "Hello")]);
        let plan = plan_merge(&state, &extraction(vec![removed.clone()]), &options);
        let result = apply(&mut state, plan);
        assert_eq!(keys(&result.removed), vec!["2/text"]);
        assert!(state.assets[&id()].entry("2/text").unwrap().orphaned);

        // Orphans are not reported again
        let plan = plan_merge(&state, &extraction(vec![removed]), &options);
        let again = apply(&mut state, plan);
        assert!(!again.has_changes());

        let back = fresh("h1", &[("1/text", "Hello"), ("2/text", "World")]);
        let plan = plan_merge(&state, &extraction(vec![back]), &options);
        let result = apply(&mut state, plan);
        assert_eq!(keys(&result.restored), vec!["2/text"]);
        let entry = state.assets[&id()].entry("2/text").unwrap();
        assert!(!entry.orphaned);
        assert_eq!(entry.translated_text, "Monde");
        assert_eq!(entry.status, Status::Manual);
    }

    #[test]
    fn test_non_text_change_is_unchanged() {
        let mut state = seeded();
        // Same text, different asset bytes
        let update = fresh("h2", &[("1/text", "Hello"), ("2/text", "World")]);
        let plan = plan_merge(&state, &extraction(vec![update]), &MergeOptions::default());
        let result = apply(&mut state, plan);
        assert!(!result.has_changes());
        assert_eq!(keys(&result.unchanged), vec!["1/text", "2/text"]);
        assert_eq!(state.manifest.assets[&id()].source_hash, "h2");

        let file = &state.assets[&id()];
        assert_eq!(file.source_hash, "h2");
        assert_eq!(file.entry("2/text").unwrap().status, Status::Manual);
        assert_eq!(file.entry("2/text").unwrap().translated_text, "Monde");
    }

    #[test]
    fn test_second_merge_is_idempotent() {
        let mut state = seeded();
        let options = MergeOptions::default();
        let same = fresh("h1", &[("1/text", "Hello"), ("2/text", "World")]);
        let plan = plan_merge(&state, &extraction(vec![same]), &options);
        assert!(plan.files.is_empty());
        let result = apply(&mut state, plan);
        assert!(!result.has_changes());
        assert_eq!(result.unchanged.len(), 2);
    }

    #[test]
    fn test_vanished_asset_orphaned() {
        let mut state = seeded();
        let plan = plan_merge(&state, &extraction(vec![]), &MergeOptions::default());
        let result = apply(&mut state, plan);
        assert_eq!(result.removed.len(), 2);
        assert!(state.manifest.assets[&id()].orphaned);
        assert!(state.assets[&id()].is_fully_orphaned());
    }

    #[test]
    fn test_overwrite_discards_translations() {
        let mut state = seeded();
        let options = MergeOptions {
            mode: MergeMode::Overwrite,
            ..MergeOptions::default()
        };
        let same = fresh("h1", &[("1/text", "Hello")]);
        let plan = plan_merge(&state, &extraction(vec![same]), &options);
        let result = apply(&mut state, plan);
        assert_eq!(keys(&result.added), vec!["1/text"]);
        assert_eq!(keys(&result.deleted), vec!["2/text"]);
        assert!(result.removed.is_empty());
        assert_eq!(result.discarded_translations, 2);
        let file = &state.assets[&id()];
        assert_eq!(file.entries.len(), 1);
        assert_eq!(file.entries[0].status, Status::Untranslated);
        assert!(file.entries[0].translated_text.is_empty());
    }
}
