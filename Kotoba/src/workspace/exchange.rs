//! Translator exchange files
//!
//! Export entries to TSV/CSV for translators, import translated files back
//! as manual edits.
//!
//! # Format
//!
//! Columns:
//! 1. Key (asset id)
//! 2. Field (field path inside the asset)
//! 3. Source text
//! 4. Translation
//!
//! Line breaks, tabs and backslashes inside text are written as `\n`, `\t`
//! and `\\` so every entry stays on one line. CSV fields containing commas
//! or quotes are additionally quoted.
//!
//! ```tsv
//! Key\tField\tSource\tTranslation
//! table/text_data\t1:3/text\tHello world\tBonjour le monde
//! ```

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::asset::AssetId;
use super::store::Workspace;
use crate::error::{Error, Result};

/// Export format for translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Tab-separated values (recommended for spreadsheets)
    Tsv,
    /// Comma-separated values
    Csv,
}

impl ExportFormat {
    /// Pick the format from a file extension, defaulting to TSV
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Tsv,
        }
    }

    /// Get the file extension for this format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tsv => "tsv",
            Self::Csv => "csv",
        }
    }

    /// Get the delimiter character
    #[must_use]
    pub fn delimiter(&self) -> char {
        match self {
            Self::Tsv => '\t',
            Self::Csv => ',',
        }
    }
}

/// Which entries to export
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Only entries of this asset
    pub asset: Option<AssetId>,
    /// Only entries without any translation
    pub untranslated_only: bool,
}

/// Result of importing translations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Entries updated with a new translation
    pub translated: usize,
    /// Rows with an empty or unchanged translation
    pub skipped: usize,
    /// Rows naming an orphaned entry
    pub orphaned: usize,
    /// Rows whose asset or field does not exist
    pub not_found: usize,
    /// Keys that were not found
    pub missing_keys: Vec<String>,
}

/// Export workspace entries to a translation file
///
/// Orphaned entries are never exported.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn export_entries<P: AsRef<Path>>(
    workspace: &Workspace,
    path: P,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<usize> {
    let rows: Vec<[String; 4]> = workspace.read(|state| {
        state
            .entries()
            .filter(|e| !e.orphaned)
            .filter(|e| options.asset.as_ref().is_none_or(|a| *a == e.asset_id))
            .filter(|e| !options.untranslated_only || e.translated_text.is_empty())
            .map(|e| {
                [
                    e.asset_id.to_string(),
                    e.field_path.clone(),
                    e.source_text.clone(),
                    e.translated_text.clone(),
                ]
            })
            .collect()
    });

    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    let delimiter = format.delimiter();

    writeln!(writer, "Key{delimiter}Field{delimiter}Source{delimiter}Translation")?;
    for row in &rows {
        let fields: Vec<String> = row
            .iter()
            .map(|field| escape_for_delimited(field, delimiter))
            .collect();
        writeln!(writer, "{}", fields.join(&delimiter.to_string()))?;
    }

    writer.flush()?;
    tracing::info!("Exported {} entries", rows.len());
    Ok(rows.len())
}

/// Import translations from a TSV/CSV file as manual edits
///
/// Only rows with a non-empty translation that differs from the current one
/// are applied. Each applied row is one workspace mutation.
///
/// # Errors
/// Returns an error if the file cannot be read or an edit cannot be saved.
pub fn import_translations<P: AsRef<Path>>(
    workspace: &Workspace,
    path: P,
    format: ExportFormat,
) -> Result<ImportResult> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let delimiter = format.delimiter();

    let mut result = ImportResult::default();
    let mut lines = reader.lines();

    // Skip header
    if lines.next().is_none() {
        return Ok(result);
    }

    for line_result in lines {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let parts = split_delimited(&line, delimiter);
        if parts.len() < 4 {
            continue; // Skip malformed lines
        }

        let key = parts[0].trim();
        let field = parts[1].trim();
        let translation = parts[3].clone();
        if translation.is_empty() {
            result.skipped += 1;
            continue;
        }

        let Ok(asset) = key.parse::<AssetId>() else {
            result.not_found += 1;
            result.missing_keys.push(key.to_string());
            continue;
        };

        let current = workspace.read(|state| {
            state
                .entry(&asset, field)
                .map(|e| (e.orphaned, e.translated_text.clone(), e.status))
        });
        match current {
            None => {
                result.not_found += 1;
                result.missing_keys.push(format!("{key}#{field}"));
            }
            Some((true, _, _)) => result.orphaned += 1,
            Some((false, existing, status))
                if existing == translation && status.is_settled() =>
            {
                result.skipped += 1;
            }
            Some(_) => match workspace.edit(&asset, field, &translation) {
                Ok(()) => result.translated += 1,
                // Orphaned between the read and the edit
                Err(Error::OrphanedEntry { .. }) => result.orphaned += 1,
                Err(e) => return Err(e),
            },
        }
    }

    tracing::info!(
        "Imported {} translations ({} skipped, {} not found)",
        result.translated,
        result.skipped,
        result.not_found
    );
    Ok(result)
}

// ============================================================================
// Helper functions
// ============================================================================

fn escape_backslashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_backslashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Escape text for TSV/CSV output
fn escape_for_delimited(text: &str, delimiter: char) -> String {
    let escaped = escape_backslashes(text);
    // If text contains the delimiter or quotes, wrap in quotes and escape quotes
    if escaped.contains(delimiter) || escaped.contains('"') {
        format!("\"{}\"", escaped.replace('"', "\"\""))
    } else {
        escaped
    }
}

/// Split one record, honouring quoted fields
fn split_delimited(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' if in_quotes => in_quotes = false,
            '"' if current.is_empty() => in_quotes = true,
            c if c == delimiter && !in_quotes => {
                fields.push(unescape_backslashes(&current));
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(unescape_backslashes(&current));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_escape_unescape() {
        let original = "Hello\tworld\nsecond line";
        let escaped = escape_for_delimited(original, '\t');
        assert!(!escaped.contains('\t'));
        assert!(!escaped.contains('\n'));

        let fields = split_delimited(&format!("a\t{escaped}"), '\t');
        assert_eq!(fields, vec!["a".to_string(), original.to_string()]);
    }

    #[test]
    fn test_escape_quotes_csv() {
        let original = "Say \"hello\", then leave";
        let escaped = escape_for_delimited(original, ',');
        assert_eq!(escaped, "\"Say \"\"hello\"\", then leave\"");

        let fields = split_delimited(&format!("{escaped},x"), ',');
        assert_eq!(fields, vec![original.to_string(), "x".to_string()]);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path("out.CSV"), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path("out.tsv"), ExportFormat::Tsv);
        assert_eq!(ExportFormat::from_path("out"), ExportFormat::Tsv);
    }
}
