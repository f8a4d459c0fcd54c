//! CLI commands that query or edit the workspace

use std::path::Path;

use console::style;

use crate::config::Settings;
use crate::workspace::{
    AssetId, ExportFormat, ExportOptions, FindOptions, Status, StatusReport, Workspace,
    export_entries, find as find_entries, import_translations,
};

/// Longest source excerpt shown in listings
const EXCERPT_CHARS: usize = 60;

fn open(settings: &Settings) -> anyhow::Result<Workspace> {
    Ok(Workspace::open(settings.workspace_dir())?)
}

fn excerpt(text: &str) -> String {
    let single_line = text.replace('\n', "\\n");
    if single_line.chars().count() <= EXCERPT_CHARS {
        single_line
    } else {
        let cut: String = single_line.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}…")
    }
}

pub fn status(settings: &Settings, asset: Option<&str>, all: bool, json: bool) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let asset = asset.map(str::parse::<AssetId>).transpose()?;
    let report = workspace.read(|state| StatusReport::from_state(state, asset.as_ref()));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let rows: Vec<_> = if all {
        report.assets.iter().map(|(id, counts)| (id.as_str(), counts)).collect()
    } else {
        report.incomplete().collect()
    };
    for (id, counts) in &rows {
        println!(
            "  {:<48} {:>5.1}%  {:>5} untranslated  {:>5} machine  {:>5} manual  {:>5} reviewed",
            id,
            counts.progress() * 100.0,
            counts.untranslated,
            counts.machine_filled,
            counts.manual,
            counts.reviewed
        );
    }

    let total = &report.total;
    println!(
        "{} {:.1}% of {} entries translated ({} reviewed, {} manual, {} machine filled); {} untranslated, {} orphaned",
        style("Total:").bold(),
        total.progress() * 100.0,
        total.total(),
        total.reviewed,
        total.manual,
        total.machine_filled,
        total.untranslated,
        total.orphaned
    );
    Ok(())
}

pub fn find(
    settings: &Settings,
    text: &str,
    translations: bool,
    case_sensitive: bool,
    limit: usize,
) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let options = FindOptions {
        case_sensitive,
        include_translations: translations,
        limit: Some(limit),
    };
    let lines: Vec<String> = workspace.read(|state| {
        find_entries(state, text, &options)
            .into_iter()
            .map(|entry| {
                let translation = if entry.translated_text.is_empty() {
                    style("(untranslated)".to_string()).dim().to_string()
                } else {
                    excerpt(&entry.translated_text)
                };
                format!(
                    "{}#{} [{}]\n    {}\n    {}",
                    entry.asset_id,
                    entry.field_path,
                    entry.status,
                    excerpt(&entry.source_text),
                    translation
                )
            })
            .collect()
    });

    if lines.is_empty() {
        println!("No entries found matching '{text}'");
        return Ok(());
    }
    for line in &lines {
        println!("{line}");
    }
    println!("{} matches{}", lines.len(), if lines.len() == limit { " (limit reached)" } else { "" });
    Ok(())
}

pub fn edit(settings: &Settings, asset: &str, field: &str, text: &str) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let asset: AssetId = asset.parse()?;
    workspace.edit(&asset, field, text)?;
    println!("{asset}#{field} = {}", excerpt(text));
    Ok(())
}

pub fn review(settings: &Settings, asset: &str, field: &str) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let asset: AssetId = asset.parse()?;
    workspace.set_status(&asset, field, Status::Reviewed)?;
    println!("{asset}#{field} marked reviewed");
    Ok(())
}

pub fn orphans(
    settings: &Settings,
    confirm: bool,
    asset: Option<&str>,
    field: Option<&str>,
) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let asset = asset.map(str::parse::<AssetId>).transpose()?;

    let listed: Vec<String> = workspace.read(|state| {
        state
            .entries()
            .filter(|e| e.orphaned)
            .filter(|e| asset.as_ref().is_none_or(|a| *a == e.asset_id))
            .filter(|e| field.is_none_or(|f| f == e.field_path))
            .map(|e| {
                format!(
                    "  {}#{}  {}{}",
                    e.asset_id,
                    e.field_path,
                    excerpt(&e.source_text),
                    if e.translated_text.is_empty() {
                        String::new()
                    } else {
                        format!(" -> {}", excerpt(&e.translated_text))
                    }
                )
            })
            .collect()
    });

    if listed.is_empty() {
        println!("No orphaned entries");
        return Ok(());
    }
    for line in &listed {
        println!("{line}");
    }
    if confirm {
        let dropped = workspace.confirm_orphans(asset.as_ref(), field)?;
        println!("Dropped {dropped} orphaned entries");
    } else {
        println!(
            "{} orphaned entries; run with --confirm to drop them",
            listed.len()
        );
    }
    Ok(())
}

pub fn export(
    settings: &Settings,
    output: &Path,
    asset: Option<&str>,
    untranslated: bool,
) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let options = ExportOptions {
        asset: asset.map(str::parse::<AssetId>).transpose()?,
        untranslated_only: untranslated,
    };
    let format = ExportFormat::from_path(output);
    let count = export_entries(&workspace, output, format, &options)?;
    println!("Exported {count} entries to {}", output.display());
    Ok(())
}

pub fn import(settings: &Settings, input: &Path) -> anyhow::Result<()> {
    let workspace = open(settings)?;
    let result = import_translations(&workspace, input, ExportFormat::from_path(input))?;
    println!(
        "Imported {} translations ({} skipped, {} orphaned, {} not found)",
        result.translated, result.skipped, result.orphaned, result.not_found
    );
    for key in result.missing_keys.iter().take(10) {
        println!("  not found: {key}");
    }
    Ok(())
}
