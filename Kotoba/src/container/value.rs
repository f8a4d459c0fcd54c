//! Cell values, rows and row keys

use std::fmt::{self, Write as _};

use super::ColumnType;

/// A single decoded cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    F32(f32),
    Text(String),
    Blob(Vec<u8>),
    /// Encoded script block, kept in its stored form
    Script(Vec<u8>),
}

impl Value {
    /// The column type this value belongs to
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::U8(_) => ColumnType::U8,
            Self::U16(_) => ColumnType::U16,
            Self::U32(_) => ColumnType::U32,
            Self::U64(_) => ColumnType::U64,
            Self::I32(_) => ColumnType::I32,
            Self::I64(_) => ColumnType::I64,
            Self::F32(_) => ColumnType::F32,
            Self::Text(_) => ColumnType::Text,
            Self::Blob(_) => ColumnType::Blob,
            Self::Script(_) => ColumnType::Script,
        }
    }

    /// Text content, if this is a text cell
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Stored script bytes, if this is a script cell
    #[must_use]
    pub fn as_script(&self) -> Option<&[u8]> {
        match self {
            Self::Script(b) => Some(b),
            _ => None,
        }
    }

    /// Render a key-compatible value as a key part
    #[must_use]
    pub fn key_part(&self) -> Option<String> {
        match self {
            Self::U8(v) => Some(v.to_string()),
            Self::U16(v) => Some(v.to_string()),
            Self::U32(v) => Some(v.to_string()),
            Self::U64(v) => Some(v.to_string()),
            Self::I32(v) => Some(v.to_string()),
            Self::I64(v) => Some(v.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::F32(_) | Self::Blob(_) | Self::Script(_) => None,
        }
    }
}

/// Stable identifier of a row: its key column values in column order
///
/// Rendered as parts joined by `:` (`6:1001`). Characters that would make a
/// rendering ambiguous are written as `%XX`: `%`, `:` and `/` in
/// [`Display`](fmt::Display), plus `_` and `\` in [`RowKey::file_stem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub Vec<String>);

/// Reserved in the rendered key
const KEY_RESERVED: &[char] = &['%', ':', '/'];
/// Reserved in file names
const STEM_RESERVED: &[char] = &['%', ':', '/', '\\', '_'];

fn escape_part(part: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if reserved.contains(&c) {
            let _ = write!(out, "%{:02X}", u32::from(c));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        let escaped = rest
            .get(at + 1..at + 3)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .filter(u8::is_ascii);
        if let Some(byte) = escaped {
            out.push(char::from(byte));
            rest = &rest[at + 3..];
        } else {
            out.push('%');
            rest = &rest[at + 1..];
        }
    }
    out.push_str(rest);
    out
}

impl RowKey {
    /// Parse a rendered key (`6:1001`)
    #[must_use]
    pub fn parse(s: &str) -> Self {
        Self(s.split(':').map(unescape_part).collect())
    }

    /// Key rendered for file names (`6_1001`)
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.0
            .iter()
            .map(|part| escape_part(part, STEM_RESERVED))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| escape_part(p, KEY_RESERVED)).collect();
        f.write_str(&parts.join(":"))
    }
}

/// One table row; `None` cells were never loaded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub cells: Vec<Option<Value>>,
}

impl Row {
    /// A fully loaded row
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            cells: values.into_iter().map(Some).collect(),
        }
    }

    /// Value at a column index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.cells.get(index).and_then(Option::as_ref)
    }

    /// Replace the value at a column index
    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.cells.len() {
            self.cells.resize(index + 1, None);
        }
        self.cells[index] = Some(value);
    }

    /// Build this row's key from the given key column indices
    #[must_use]
    pub fn key(&self, key_indices: &[usize]) -> Option<RowKey> {
        key_indices
            .iter()
            .map(|&i| self.get(i).and_then(Value::key_part))
            .collect::<Option<Vec<_>>>()
            .map(RowKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key() {
        let row = Row::new(vec![
            Value::I32(6),
            Value::I32(1001),
            Value::Text("Special Week".into()),
        ]);
        let key = row.key(&[0, 1]).unwrap();
        assert_eq!(key.to_string(), "6:1001");
        assert_eq!(key.file_stem(), "6_1001");
        assert_eq!(RowKey::parse("6:1001"), key);
    }

    #[test]
    fn test_reserved_characters_survive_rendering() {
        for key in [
            RowKey(vec!["ch1:intro".into()]),
            RowKey(vec!["a/b".into(), "50%".into()]),
            RowKey(vec!["%3A".into()]),
        ] {
            assert_eq!(RowKey::parse(&key.to_string()), key);
        }
        assert_eq!(RowKey(vec!["ch1:intro".into()]).to_string(), "ch1%3Aintro");
        assert_eq!(RowKey::parse("100%"), RowKey(vec!["100%".into()]));
    }

    #[test]
    fn test_file_stems_do_not_collide() {
        let text = RowKey(vec!["1_2".into()]);
        let composite = RowKey(vec!["1".into(), "2".into()]);
        assert_eq!(composite.file_stem(), "1_2");
        assert_eq!(text.file_stem(), "1%5F2");
        assert_eq!(RowKey(vec!["a\\b/c".into()]).file_stem(), "a%5Cb%2Fc");
    }

    #[test]
    fn test_unloaded_cell_has_no_key() {
        let row = Row {
            cells: vec![None, Some(Value::Text("x".into()))],
        };
        assert!(row.key(&[0]).is_none());
    }
}
