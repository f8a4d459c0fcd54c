//! Story script blocks stored in `script` columns
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! A script block is a small `SCRB` container: a fixed header naming the
//! compression method and an optional XOR mask, followed by the compressed
//! body. The body holds a title and a list of dialogue blocks, each with a
//! speaker name, text, choices, colour texts and opaque trailer bytes.
//!
//! A decoded [`Script`] remembers the bytes it came from. As long as its
//! body is not altered, [`encode_block`] hands those bytes back unchanged.

pub mod cipher;
mod reader;
mod writer;

pub use reader::decode_block;
pub use writer::{encode_block, encode_body};

use crate::compression::CompressionMethod;
use crate::error::{Error, Result};

/// "SCRB" magic bytes
pub const SCRIPT_MAGIC: [u8; 4] = *b"SCRB";

/// Only supported script block version
pub const SCRIPT_VERSION: u8 = 1;

/// Header size: magic, version, compression, flags, mask key, size
pub const SCRIPT_HEADER_SIZE: usize = 20;

/// Flag bit: payload is XOR-masked
pub const FLAG_MASKED: u16 = 0x0001;

/// One dialogue block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub name: String,
    pub text: String,
    pub choices: Vec<String>,
    pub colors: Vec<String>,
    /// Clip lengths, jump targets and voice cues, kept verbatim
    pub trailer: Vec<u8>,
}

/// Decompressed script body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptBody {
    pub title: String,
    pub blocks: Vec<Block>,
}

/// A parsed field path inside a script asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptField {
    Title,
    Name(usize),
    Text(usize),
    Choice(usize, usize),
    Color(usize, usize),
}

impl ScriptField {
    fn parse(path: &str) -> Option<Self> {
        if path == "title" {
            return Some(Self::Title);
        }
        let mut parts = path.split('/');
        if parts.next()? != "block" {
            return None;
        }
        let block: usize = parts.next()?.parse().ok()?;
        let field = match (parts.next()?, parts.next()) {
            ("name", None) => Self::Name(block),
            ("text", None) => Self::Text(block),
            ("choice", Some(j)) => Self::Choice(block, j.parse().ok()?),
            ("color", Some(j)) => Self::Color(block, j.parse().ok()?),
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(field)
    }
}

impl ScriptBody {
    /// Every text field with its path, in document order
    ///
    /// Empty strings are included; whether they are worth translating is the
    /// caller's decision.
    #[must_use]
    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("title".to_string(), self.title.clone())];
        for (i, block) in self.blocks.iter().enumerate() {
            fields.push((format!("block/{i}/name"), block.name.clone()));
            fields.push((format!("block/{i}/text"), block.text.clone()));
            for (j, choice) in block.choices.iter().enumerate() {
                fields.push((format!("block/{i}/choice/{j}"), choice.clone()));
            }
            for (j, color) in block.colors.iter().enumerate() {
                fields.push((format!("block/{i}/color/{j}"), color.clone()));
            }
        }
        fields
    }

    fn slot_mut(&mut self, field: ScriptField) -> Option<&mut String> {
        match field {
            ScriptField::Title => Some(&mut self.title),
            ScriptField::Name(i) => self.blocks.get_mut(i).map(|b| &mut b.name),
            ScriptField::Text(i) => self.blocks.get_mut(i).map(|b| &mut b.text),
            ScriptField::Choice(i, j) => self.blocks.get_mut(i)?.choices.get_mut(j),
            ScriptField::Color(i, j) => self.blocks.get_mut(i)?.colors.get_mut(j),
        }
    }

    /// Read one field by path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        let field = ScriptField::parse(path)?;
        let value = match field {
            ScriptField::Title => &self.title,
            ScriptField::Name(i) => &self.blocks.get(i)?.name,
            ScriptField::Text(i) => &self.blocks.get(i)?.text,
            ScriptField::Choice(i, j) => self.blocks.get(i)?.choices.get(j)?,
            ScriptField::Color(i, j) => self.blocks.get(i)?.colors.get(j)?,
        };
        Some(value)
    }

    /// Replace one field by path
    ///
    /// # Errors
    /// Returns [`Error::MalformedScript`] if the path does not name an
    /// existing field; substitution never adds blocks or choices.
    pub fn set(&mut self, path: &str, text: &str) -> Result<()> {
        let slot = ScriptField::parse(path)
            .and_then(|field| self.slot_mut(field))
            .ok_or_else(|| Error::MalformedScript(format!("no field at '{path}'")))?;
        text.clone_into(slot);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Original {
    body: ScriptBody,
    bytes: Vec<u8>,
}

/// A decoded script block together with its storage settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub compression: CompressionMethod,
    pub flags: u16,
    pub mask_key: u64,
    pub body: ScriptBody,
    original: Option<Original>,
}

impl Script {
    /// A new script with no stored form yet
    #[must_use]
    pub fn new(body: ScriptBody, compression: CompressionMethod, mask_key: Option<u64>) -> Self {
        Self {
            compression,
            flags: if mask_key.is_some() { FLAG_MASKED } else { 0 },
            mask_key: mask_key.unwrap_or(0),
            body,
            original: None,
        }
    }

    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.flags & FLAG_MASKED != 0
    }

    /// Whether the body differs from the decoded original
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.original
            .as_ref()
            .is_none_or(|original| original.body != self.body)
    }

    fn original_bytes(&self) -> Option<&[u8]> {
        self.original
            .as_ref()
            .filter(|original| original.body == self.body)
            .map(|original| original.bytes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> ScriptBody {
        ScriptBody {
            title: "Chapter 1".into(),
            blocks: vec![Block {
                name: "Trainer".into(),
                text: "Ready?".into(),
                choices: vec!["Yes".into(), "No".into()],
                colors: vec![],
                trailer: vec![1, 0, 0, 0],
            }],
        }
    }

    #[test]
    fn test_field_paths() {
        let body = sample_body();
        let paths: Vec<String> = body.fields().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "title",
                "block/0/name",
                "block/0/text",
                "block/0/choice/0",
                "block/0/choice/1"
            ]
        );
        assert_eq!(body.get("block/0/choice/1"), Some("No"));
        assert_eq!(body.get("block/1/text"), None);
        assert_eq!(body.get("block/0/text/extra"), None);
    }

    #[test]
    fn test_set_rejects_unknown_path() {
        let mut body = sample_body();
        body.set("block/0/text", "Prêt ?").unwrap();
        assert_eq!(body.blocks[0].text, "Prêt ?");
        assert!(body.set("block/0/color/0", "x").is_err());
        assert!(body.set("footer", "x").is_err());
    }
}
