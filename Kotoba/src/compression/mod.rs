//! Compression utilities

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Compression method recorded in a script block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Zlib,
    /// LZ4 block with the uncompressed size prepended
    Lz4,
}

impl CompressionMethod {
    /// Parse the header byte
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedCompressionMethod`] for unknown values.
    pub fn from_byte(method: u8) -> Result<Self> {
        match method {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Zlib),
            2 => Ok(CompressionMethod::Lz4),
            _ => Err(Error::UnsupportedCompressionMethod { method }),
        }
    }

    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Zlib => 1,
            CompressionMethod::Lz4 => 2,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Zlib => "zlib",
            CompressionMethod::Lz4 => "lz4",
        }
    }
}

/// Largest output pre-allocated per input byte; the buffer grows past it
const MAX_PREALLOC_RATIO: usize = 16;

/// Compress data with the given method
///
/// # Errors
/// Returns an error if the zlib stream cannot be written.
pub fn compress(method: CompressionMethod, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionMethod::Zlib => {
            use flate2::Compression;
            use flate2::write::ZlibEncoder;
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Decompress data and check it against the expected size
///
/// # Errors
/// Returns [`Error::DecompressionError`] if the stream is corrupt or its
/// length differs from `expected_size`.
pub fn decompress(method: CompressionMethod, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let decompressed = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Lz4 => {
            // The prepended size drives the allocation; check it first
            let prepended = data
                .get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize);
            if prepended != Some(expected_size) {
                return Err(Error::DecompressionError(format!(
                    "lz4: expected {expected_size} bytes, header says {prepended:?}"
                )));
            }
            lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::DecompressionError(format!("LZ4: {e}")))?
        }
        CompressionMethod::Zlib => {
            use flate2::read::ZlibDecoder;
            // One byte past the expected size is enough to detect overlong streams
            let mut decoder = ZlibDecoder::new(data).take(expected_size as u64 + 1);
            let capacity = expected_size.min(data.len().saturating_mul(MAX_PREALLOC_RATIO));
            let mut out = Vec::with_capacity(capacity);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::DecompressionError(format!("Zlib: {e}")))?;
            out
        }
    };

    if decompressed.len() != expected_size {
        return Err(Error::DecompressionError(format!(
            "{}: expected {expected_size} bytes, got {}",
            method.as_str(),
            decompressed.len()
        )));
    }
    Ok(decompressed)
}
