//! Script block decoding

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::{
    Block, Original, SCRIPT_HEADER_SIZE, SCRIPT_MAGIC, SCRIPT_VERSION, Script, ScriptBody, cipher,
};
use crate::compression::{self, CompressionMethod};
use crate::error::{Error, Result};

/// Decode a stored script block
///
/// # Errors
/// Returns a format error if the header is invalid, the payload does not
/// decompress to the declared size, or the body is malformed.
pub fn decode_block(raw: &[u8]) -> Result<Script> {
    if raw.len() < SCRIPT_HEADER_SIZE {
        return Err(Error::MalformedScript(format!(
            "header truncated: {} bytes",
            raw.len()
        )));
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&raw[0..4]);
    if magic != SCRIPT_MAGIC {
        return Err(Error::InvalidScriptMagic(magic));
    }

    let version = raw[4];
    if version != SCRIPT_VERSION {
        return Err(Error::UnsupportedScriptVersion { version });
    }

    let compression = CompressionMethod::from_byte(raw[5])?;
    let flags = LittleEndian::read_u16(&raw[6..8]);
    let mask_key = LittleEndian::read_u64(&raw[8..16]);
    let size = LittleEndian::read_u32(&raw[16..20]) as usize;

    let mut script = Script {
        compression,
        flags,
        mask_key,
        body: ScriptBody::default(),
        original: None,
    };

    let mut payload = raw[SCRIPT_HEADER_SIZE..].to_vec();
    if script.is_masked() {
        cipher::apply_mask(&mut payload, mask_key);
    }
    let body_bytes = compression::decompress(compression, &payload, size)?;
    let body = parse_body(&body_bytes)?;

    script.original = Some(Original {
        body: body.clone(),
        bytes: raw.to_vec(),
    });
    script.body = body;
    Ok(script)
}

fn truncated(what: &str) -> Error {
    Error::MalformedScript(format!("body truncated in {what}"))
}

fn read_string(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<String> {
    let bytes = read_blob(cursor, what)?;
    String::from_utf8(bytes)
        .map_err(|_| Error::MalformedScript(format!("{what} is not valid UTF-8")))
}

fn read_blob(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<Vec<u8>> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated(what))? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(truncated(what));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(|_| truncated(what))?;
    Ok(buf)
}

fn read_list(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<Vec<String>> {
    let count = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| truncated(what))?;
    (0..count).map(|_| read_string(cursor, what)).collect()
}

fn parse_body(data: &[u8]) -> Result<ScriptBody> {
    let mut cursor = Cursor::new(data);
    let title = read_string(&mut cursor, "title")?;
    let block_count = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated("block count"))?;

    // Each block needs at least 16 bytes; don't trust the count for allocation
    let mut blocks = Vec::with_capacity((block_count as usize).min(data.len() / 16));
    for i in 0..block_count {
        blocks.push(Block {
            name: read_string(&mut cursor, &format!("block {i} name"))?,
            text: read_string(&mut cursor, &format!("block {i} text"))?,
            choices: read_list(&mut cursor, &format!("block {i} choices"))?,
            colors: read_list(&mut cursor, &format!("block {i} colours"))?,
            trailer: read_blob(&mut cursor, &format!("block {i} trailer"))?,
        });
    }

    let consumed = cursor.position() as usize;
    if consumed != data.len() {
        return Err(Error::MalformedScript(format!(
            "{} trailing bytes after {block_count} blocks",
            data.len() - consumed
        )));
    }

    Ok(ScriptBody { title, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::encode_block;

    #[test]
    fn test_rejects_bad_magic() {
        let mut raw = vec![0u8; SCRIPT_HEADER_SIZE];
        raw[..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            decode_block(&raw),
            Err(Error::InvalidScriptMagic(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_body() {
        let script = Script::new(
            ScriptBody {
                title: "t".into(),
                blocks: vec![Block::default()],
            },
            CompressionMethod::None,
            None,
        );
        let mut raw = encode_block(&script).unwrap();
        raw.truncate(raw.len() - 2);
        // Shorten the declared size to match, so the body parser sees the cut
        let size = (raw.len() - SCRIPT_HEADER_SIZE) as u32;
        raw[16..20].copy_from_slice(&size.to_le_bytes());
        assert!(matches!(
            decode_block(&raw),
            Err(Error::MalformedScript(_))
        ));
    }
}
