//! Rebuilding one table (and the script blocks it holds) from its source image

use std::collections::HashMap;

use rayon::prelude::*;

use crate::container::{RawTable, Row, TableData, TableLayout, Value, decode_table, encode_table};
use crate::error::{AssetOutcome, Error, Result};
use crate::pipeline::CancelToken;
use crate::script::{decode_block, encode_block};
use crate::utils::hash_bytes;
use crate::workspace::{
    AssetFile, AssetId, Entry, State, TableSkeleton, Workspace, split_table_field,
};

/// A rebuilt script block
#[derive(Debug, Clone)]
pub(super) struct StoryOutput {
    pub id: AssetId,
    pub bytes: Vec<u8>,
}

/// Everything built from one table
#[derive(Debug, Default)]
pub(super) struct TableOutput {
    pub raw: Option<RawTable>,
    pub stories: Vec<StoryOutput>,
    /// Entries written into cells
    pub substituted: usize,
    pub outcomes: Vec<AssetOutcome>,
}

impl TableOutput {
    fn failed(id: &AssetId, error: &Error) -> Self {
        tracing::warn!("Cannot build {id}: {error}");
        Self {
            outcomes: vec![AssetOutcome::new(id, error)],
            ..Self::default()
        }
    }
}

pub(super) fn incomplete(id: &AssetId, detail: impl Into<String>) -> Error {
    Error::IncompleteSource {
        asset: id.to_string(),
        detail: detail.into(),
    }
}

/// Rebuild one table
///
/// Per-asset failures end up in `outcomes`; only cancellation is returned
/// as an error.
pub(super) fn build_table(
    workspace: &Workspace,
    state: &State,
    skeleton: &TableSkeleton,
    cancel: &CancelToken,
) -> Result<TableOutput> {
    let table_id = AssetId::table(&skeleton.name);
    let payload = match workspace.load_image(&skeleton.source_hash) {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            let error = incomplete(&table_id, format!("table image {} not found", skeleton.source_hash));
            return Ok(TableOutput::failed(&table_id, &error));
        }
        Err(e) => return Ok(TableOutput::failed(&table_id, &e)),
    };
    let raw = RawTable {
        name: skeleton.name.clone(),
        row_count: skeleton.row_count,
        payload,
    };

    let Some(layout) = skeleton.layout.as_ref() else {
        return Ok(TableOutput {
            raw: Some(raw),
            ..TableOutput::default()
        });
    };
    let mut table = match decode_table(&raw, Some(layout)) {
        Ok(table) => table,
        Err(e) => return Ok(TableOutput::failed(&table_id, &e)),
    };
    let TableData::Rows { layout, rows } = &mut table.data else {
        return Ok(TableOutput {
            raw: Some(raw),
            ..TableOutput::default()
        });
    };

    let mut output = TableOutput::default();
    if let Some(file) = state.assets.get(&table_id) {
        output.substituted += substitute_text(rows, layout, file);
    }
    build_scripts(workspace, state, &skeleton.name, layout, rows, cancel, &mut output)?;

    if output.substituted == 0 {
        output.raw = Some(raw);
        return Ok(output);
    }
    match encode_table(&table) {
        Ok(encoded) => output.raw = Some(encoded),
        Err(e) => {
            tracing::warn!("Cannot encode table {}: {e}", skeleton.name);
            output.outcomes.push(AssetOutcome::new(&table_id, &e));
        }
    }
    Ok(output)
}

/// Write translations into text cells whose source is still current
fn substitute_text(rows: &mut [Row], layout: &TableLayout, file: &AssetFile) -> usize {
    let key_indices: Vec<usize> = layout.key_indices().collect();
    let text_columns: HashMap<&str, usize> = layout
        .text_indices()
        .map(|i| (layout.columns[i].name.as_str(), i))
        .collect();
    let by_key: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| Some((row.key(&key_indices)?.to_string(), i)))
        .collect();

    let mut substituted = 0;
    for entry in file.entries.iter().filter(|e| e.is_substitutable()) {
        let Some((key, column)) = split_table_field(&entry.field_path) else {
            continue;
        };
        let (Some(&row), Some(&col)) = (by_key.get(key), text_columns.get(column)) else {
            continue;
        };
        if rows[row].get(col).and_then(Value::as_text) != Some(entry.source_text.as_str()) {
            tracing::debug!(
                "{}#{}: source changed since the last dump, left as is",
                entry.asset_id,
                entry.field_path
            );
            continue;
        }
        rows[row].set(col, Value::Text(entry.translated_text.clone()));
        substituted += 1;
    }
    substituted
}

struct ScriptCell {
    row: usize,
    column: usize,
    id: AssetId,
    bytes: Vec<u8>,
}

fn build_scripts(
    workspace: &Workspace,
    state: &State,
    table: &str,
    layout: &TableLayout,
    rows: &mut [Row],
    cancel: &CancelToken,
    output: &mut TableOutput,
) -> Result<()> {
    let key_indices: Vec<usize> = layout.key_indices().collect();
    let cells: Vec<ScriptCell> = rows
        .iter()
        .enumerate()
        .flat_map(|(row_index, row)| {
            let key = row.key(&key_indices);
            layout.script_indices().filter_map(move |column| {
                let bytes = row.get(column).and_then(Value::as_script)?;
                let key = key.clone()?;
                (!bytes.is_empty()).then(|| ScriptCell {
                    row: row_index,
                    column,
                    id: AssetId::story(table, key, &layout.columns[column].name),
                    bytes: bytes.to_vec(),
                })
            })
        })
        .collect();

    let built = cells
        .par_iter()
        .map(|cell| {
            cancel.check()?;
            Ok(build_script(workspace, state, &cell.id, &cell.bytes))
        })
        .collect::<Result<Vec<_>>>()?;

    for (cell, result) in cells.into_iter().zip(built) {
        match result {
            Ok((bytes, 0)) => output.stories.push(StoryOutput { id: cell.id, bytes }),
            Ok((bytes, substituted)) => {
                rows[cell.row].set(cell.column, Value::Script(bytes.clone()));
                output.substituted += substituted;
                output.stories.push(StoryOutput { id: cell.id, bytes });
            }
            Err(e) => {
                tracing::warn!("Cannot build {}: {e}", cell.id);
                output.outcomes.push(AssetOutcome::new(&cell.id, &e));
            }
        }
    }
    Ok(())
}

/// Rebuild one script block; returns its bytes and the number of fields replaced
fn build_script(
    workspace: &Workspace,
    state: &State,
    id: &AssetId,
    cell: &[u8],
) -> Result<(Vec<u8>, usize)> {
    let entries: Vec<&Entry> = state
        .assets
        .get(id)
        .map(|file| file.entries.iter().filter(|e| e.is_substitutable()).collect())
        .unwrap_or_default();
    if entries.is_empty() {
        return Ok((cell.to_vec(), 0));
    }

    let record = state
        .manifest
        .record(id)
        .ok_or_else(|| incomplete(id, "no manifest record"))?;
    let image = workspace
        .load_image(&record.source_hash)?
        .ok_or_else(|| incomplete(id, format!("script image {} not found", record.source_hash)))?;
    if record.source_hash != hash_bytes(cell) {
        tracing::warn!("{id}: entries come from an older dump; block passed through untranslated");
        return Ok((cell.to_vec(), 0));
    }

    let mut script = decode_block(&image)?;
    let mut substituted = 0;
    for entry in entries {
        if script.body.get(&entry.field_path) == Some(entry.source_text.as_str()) {
            script.body.set(&entry.field_path, &entry.translated_text)?;
            substituted += 1;
        }
    }
    if substituted == 0 {
        return Ok((cell.to_vec(), 0));
    }
    Ok((encode_block(&script)?, substituted))
}
