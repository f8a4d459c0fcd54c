//! Turning a container into fresh assets for merging

use std::collections::{BTreeSet, HashSet};

use rayon::prelude::*;

use super::asset::{AssetId, table_field_path};
use super::manifest::{ContainerSkeleton, TableSkeleton};
use crate::container::{Layout, RawTable, Table, Value, decode_table, split_container};
use crate::error::{AssetOutcome, Result};
use crate::pipeline::CancelToken;
use crate::script::decode_block;
use crate::utils::hash_bytes;

/// Which tables a dump covers
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Only merge assets of these tables; all tables when `None`
    pub tables: Option<Vec<String>>,
}

impl ExtractOptions {
    fn includes(&self, table: &str) -> bool {
        self.tables
            .as_ref()
            .is_none_or(|tables| tables.iter().any(|t| t == table))
    }
}

/// Raw bytes stored content-addressed under `.source/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub hash: String,
    pub bytes: Vec<u8>,
}

impl SourceImage {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            hash: hash_bytes(&bytes),
            bytes,
        }
    }
}

/// One asset as it exists upstream right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshAsset {
    pub id: AssetId,
    /// Hash of the asset's source image
    pub source_hash: String,
    /// `(field path, source text)` in document order
    pub fields: Vec<(String, String)>,
}

/// Everything a dump read from the container
#[derive(Debug, Clone)]
pub struct Extraction {
    pub skeleton: ContainerSkeleton,
    pub images: Vec<SourceImage>,
    pub assets: Vec<FreshAsset>,
    /// Tables whose rows were fully decoded and merged by this dump
    pub covered_tables: BTreeSet<String>,
    /// Assets that failed to decode; left alone by the merge
    pub skipped_assets: HashSet<AssetId>,
    pub outcomes: Vec<AssetOutcome>,
}

impl Extraction {
    /// Whether an asset missing from this extraction really vanished upstream
    #[must_use]
    pub fn covers(&self, id: &AssetId) -> bool {
        self.covered_tables.contains(id.table_name()) && !self.skipped_assets.contains(id)
    }
}

#[derive(Default)]
struct TablePart {
    skeleton: Option<TableSkeleton>,
    images: Vec<SourceImage>,
    assets: Vec<FreshAsset>,
    covered: bool,
    skipped: Vec<AssetId>,
    outcomes: Vec<AssetOutcome>,
}

/// Decode a container into fresh assets
///
/// A table that fails to decode is reported in `outcomes` and the other
/// tables continue. Only a container that cannot be split at all fails the
/// whole call.
///
/// # Errors
/// Returns a format error for an unreadable container, or
/// [`Error::Cancelled`](crate::Error::Cancelled).
pub fn extract(
    file_name: &str,
    data: &[u8],
    layout: &Layout,
    options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<Extraction> {
    let raw = split_container(data)?;
    let container_image = SourceImage::new(data.to_vec());

    let parts = raw
        .tables
        .par_iter()
        .map(|table| {
            cancel.check()?;
            Ok(extract_table(table, layout, options))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut extraction = Extraction {
        skeleton: ContainerSkeleton {
            file_name: file_name.to_string(),
            version: raw.version,
            source_hash: container_image.hash.clone(),
            tables: Vec::with_capacity(parts.len()),
        },
        images: vec![container_image],
        assets: Vec::new(),
        covered_tables: BTreeSet::new(),
        skipped_assets: HashSet::new(),
        outcomes: Vec::new(),
    };

    for (table, part) in raw.tables.iter().zip(parts) {
        if let Some(skeleton) = part.skeleton {
            extraction.skeleton.tables.push(skeleton);
        }
        if part.covered {
            extraction.covered_tables.insert(table.name.clone());
        }
        extraction.images.extend(part.images);
        extraction.assets.extend(part.assets);
        extraction.skipped_assets.extend(part.skipped);
        extraction.outcomes.extend(part.outcomes);
    }

    tracing::info!(
        "Extracted {} assets from {} tables ({} failures)",
        extraction.assets.len(),
        extraction.skeleton.tables.len(),
        extraction.outcomes.len()
    );
    Ok(extraction)
}

fn extract_table(raw: &RawTable, layout: &Layout, options: &ExtractOptions) -> TablePart {
    let payload_image = SourceImage::new(raw.payload.clone());
    let table_layout = layout.get(&raw.name);
    let mut part = TablePart {
        skeleton: Some(TableSkeleton {
            name: raw.name.clone(),
            row_count: raw.row_count,
            source_hash: payload_image.hash.clone(),
            layout: table_layout.cloned(),
        }),
        ..TablePart::default()
    };
    part.images.push(payload_image);

    let Some(table_layout) = table_layout else {
        return part;
    };
    if !options.includes(&raw.name) {
        return part;
    }

    let table = match decode_table(raw, Some(table_layout)) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("Skipping table {}: {e}", raw.name);
            part.outcomes
                .push(AssetOutcome::new(AssetId::table(&raw.name), &e));
            return part;
        }
    };
    part.covered = true;

    if table_layout.text_indices().next().is_some() {
        part.assets.push(table_asset(&table, part.images[0].hash.clone()));
    }
    extract_scripts(&table, &mut part);
    part
}

fn table_asset(table: &Table, source_hash: String) -> FreshAsset {
    let mut fields = Vec::new();
    if let Some(layout) = table.layout() {
        let key_indices: Vec<usize> = layout.key_indices().collect();
        let text_indices: Vec<usize> = layout.text_indices().collect();
        for row in table.rows() {
            let Some(key) = row.key(&key_indices) else {
                continue;
            };
            for &i in &text_indices {
                if let Some(text) = row.get(i).and_then(Value::as_text) {
                    if !text.is_empty() {
                        fields.push((
                            table_field_path(&key, &layout.columns[i].name),
                            text.to_string(),
                        ));
                    }
                }
            }
        }
    }
    FreshAsset {
        id: AssetId::table(&table.name),
        source_hash,
        fields,
    }
}

fn extract_scripts(table: &Table, part: &mut TablePart) {
    let Some(layout) = table.layout() else {
        return;
    };
    let key_indices: Vec<usize> = layout.key_indices().collect();
    let cells: Vec<(AssetId, &[u8])> = table
        .rows()
        .iter()
        .flat_map(|row| {
            let key = row.key(&key_indices);
            layout.script_indices().filter_map(move |i| {
                let bytes = row.get(i).and_then(Value::as_script)?;
                let key = key.clone()?;
                (!bytes.is_empty())
                    .then(|| (AssetId::story(&table.name, key, &layout.columns[i].name), bytes))
            })
        })
        .collect();

    let decoded: Vec<_> = cells
        .par_iter()
        .map(|(id, bytes)| (id, bytes, decode_block(bytes)))
        .collect();

    for (id, bytes, result) in decoded {
        match result {
            Ok(script) => {
                let image = SourceImage::new(bytes.to_vec());
                part.assets.push(FreshAsset {
                    id: id.clone(),
                    source_hash: image.hash.clone(),
                    fields: script
                        .body
                        .fields()
                        .into_iter()
                        .filter(|(_, text)| !text.is_empty())
                        .collect(),
                });
                part.images.push(image);
            }
            Err(e) => {
                tracing::warn!("Skipping script {id}: {e}");
                part.outcomes.push(AssetOutcome::new(id, &e));
                part.skipped.push(id.clone());
            }
        }
    }
}
