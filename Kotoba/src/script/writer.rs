//! Script block encoding

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{SCRIPT_HEADER_SIZE, SCRIPT_MAGIC, SCRIPT_VERSION, Script, ScriptBody, cipher};
use crate::compression;
use crate::error::{Error, Result};

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::MalformedScript(format!("field of {} bytes", bytes.len())))?;
    out.write_u32::<LittleEndian>(len)?;
    out.write_all(bytes)?;
    Ok(())
}

fn write_list(out: &mut Vec<u8>, items: &[String]) -> Result<()> {
    let count = u16::try_from(items.len())
        .map_err(|_| Error::MalformedScript(format!("{} list items", items.len())))?;
    out.write_u16::<LittleEndian>(count)?;
    for item in items {
        write_blob(out, item.as_bytes())?;
    }
    Ok(())
}

/// Serialize a body without compression or header
///
/// # Errors
/// Returns [`Error::MalformedScript`] if a field exceeds its length prefix.
pub fn encode_body(body: &ScriptBody) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_blob(&mut out, body.title.as_bytes())?;
    let block_count = u32::try_from(body.blocks.len())
        .map_err(|_| Error::MalformedScript("too many blocks".to_string()))?;
    out.write_u32::<LittleEndian>(block_count)?;
    for block in &body.blocks {
        write_blob(&mut out, block.name.as_bytes())?;
        write_blob(&mut out, block.text.as_bytes())?;
        write_list(&mut out, &block.choices)?;
        write_list(&mut out, &block.colors)?;
        write_blob(&mut out, &block.trailer)?;
    }
    Ok(out)
}

/// Encode a script block
///
/// An unaltered decoded script returns its original bytes. Anything else is
/// re-encoded with the script's compression and mask settings.
///
/// # Errors
/// Returns an error if the body cannot be serialized or compressed.
pub fn encode_block(script: &Script) -> Result<Vec<u8>> {
    if let Some(bytes) = script.original_bytes() {
        return Ok(bytes.to_vec());
    }

    let body = encode_body(&script.body)?;
    let size = u32::try_from(body.len())
        .map_err(|_| Error::MalformedScript(format!("body of {} bytes", body.len())))?;
    let mut payload = compression::compress(script.compression, &body)?;
    if script.is_masked() {
        cipher::apply_mask(&mut payload, script.mask_key);
    }

    let mut out = Vec::with_capacity(SCRIPT_HEADER_SIZE + payload.len());
    out.write_all(&SCRIPT_MAGIC)?;
    out.write_u8(SCRIPT_VERSION)?;
    out.write_u8(script.compression.as_byte())?;
    out.write_u16::<LittleEndian>(script.flags)?;
    out.write_u64::<LittleEndian>(script.mask_key)?;
    out.write_u32::<LittleEndian>(size)?;
    out.write_all(&payload)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;
    use crate::script::{Block, decode_block};
    use pretty_assertions::assert_eq;

    fn long_body() -> ScriptBody {
        ScriptBody {
            title: "第1話".into(),
            blocks: (0..40)
                .map(|i| Block {
                    name: format!("Speaker {i}"),
                    text: format!("Line number {i} of the story."),
                    choices: if i % 10 == 0 {
                        vec!["A".into(), "B".into()]
                    } else {
                        vec![]
                    },
                    colors: vec![],
                    trailer: vec![i as u8; 6],
                })
                .collect(),
        }
    }

    #[test]
    fn test_untouched_block_is_bit_identical() {
        for method in [
            CompressionMethod::None,
            CompressionMethod::Zlib,
            CompressionMethod::Lz4,
        ] {
            let raw = encode_block(&Script::new(long_body(), method, Some(0x0bad_cafe))).unwrap();
            let decoded = decode_block(&raw).unwrap();
            assert!(!decoded.is_modified());
            assert_eq!(encode_block(&decoded).unwrap(), raw);
        }
    }

    #[test]
    fn test_edited_block_keeps_settings() {
        let raw = encode_block(&Script::new(
            long_body(),
            CompressionMethod::Lz4,
            Some(42),
        ))
        .unwrap();
        let mut script = decode_block(&raw).unwrap();
        script.body.set("block/3/text", "Translated line.").unwrap();
        assert!(script.is_modified());

        let rebuilt = encode_block(&script).unwrap();
        let reread = decode_block(&rebuilt).unwrap();
        assert_eq!(reread.compression, CompressionMethod::Lz4);
        assert!(reread.is_masked());
        assert_eq!(reread.mask_key, 42);
        assert_eq!(reread.body.get("block/3/text"), Some("Translated line."));
        assert_eq!(reread.body.blocks[3].trailer, vec![3u8; 6]);
    }

    #[test]
    fn test_reverting_edit_restores_original_bytes() {
        let raw = encode_block(&Script::new(long_body(), CompressionMethod::Zlib, None)).unwrap();
        let mut script = decode_block(&raw).unwrap();
        script.body.set("title", "changed").unwrap();
        script.body.set("title", "第1話").unwrap();
        assert_eq!(encode_block(&script).unwrap(), raw);
    }
}
