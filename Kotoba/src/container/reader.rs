//! Container reading and row decoding
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use rayon::prelude::*;

use super::{
    CONTAINER_VERSION, ColumnType, Container, DIRECTORY_ENTRY_SIZE, HEADER_SIZE, Layout, MAGIC,
    RawContainer, RawTable, Row, TABLE_NAME_SIZE, Table, TableData, TableLayout, Value,
};
use crate::error::{Error, Result};

/// Read a container file, re-reading once if the checksum does not match
///
/// A mismatch on the first read is treated as a possibly transient read
/// failure; a second mismatch is reported as [`Error::ChecksumMismatch`].
///
/// # Errors
/// Returns [`Error::Io`] if the file cannot be read, or a format error if the
/// header is invalid or the checksum fails twice.
pub fn read_container_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    match verify_checksum(&data) {
        Ok(()) => Ok(data),
        Err(Error::ChecksumMismatch { .. }) => {
            tracing::warn!("Checksum mismatch in {}, re-reading once", path.display());
            let data = std::fs::read(path)?;
            verify_checksum(&data)?;
            Ok(data)
        }
        Err(e) => Err(e),
    }
}

/// Validate header and body checksum without splitting the directory
///
/// # Errors
/// Returns a format error if the header is invalid or the checksum fails.
pub fn verify_checksum(data: &[u8]) -> Result<()> {
    let (_, _, expected) = read_header(data)?;
    let actual = crc32fast::hash(&data[HEADER_SIZE..]);
    if actual != expected {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Returns (version, table count, checksum)
fn read_header(data: &[u8]) -> Result<(u32, usize, u32)> {
    if data.len() < HEADER_SIZE {
        return Err(Error::MalformedContainer(format!(
            "header truncated: {} bytes",
            data.len()
        )));
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&data[0..4]);
    if magic != MAGIC {
        return Err(Error::InvalidContainerMagic(magic));
    }

    let version = LittleEndian::read_u32(&data[4..8]);
    if version != CONTAINER_VERSION {
        return Err(Error::UnsupportedContainerVersion { version });
    }

    let table_count = LittleEndian::read_u32(&data[8..12]) as usize;
    let checksum = LittleEndian::read_u32(&data[12..16]);
    Ok((version, table_count, checksum))
}

/// Split a container into raw table payloads
///
/// Checks the header, checksum and directory; rows are not decoded.
///
/// # Errors
/// Returns a format error on any consistency failure.
pub fn split_container(data: &[u8]) -> Result<RawContainer> {
    verify_checksum(data)?;
    let (version, table_count, _) = read_header(data)?;

    let directory_end = table_count
        .checked_mul(DIRECTORY_ENTRY_SIZE)
        .and_then(|size| size.checked_add(HEADER_SIZE))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            Error::MalformedContainer(format!(
                "directory for {table_count} tables exceeds file size {}",
                data.len()
            ))
        })?;

    let mut names = HashSet::with_capacity(table_count);
    let mut spans = Vec::with_capacity(table_count);
    let mut tables = Vec::with_capacity(table_count);

    for i in 0..table_count {
        let entry = &data[HEADER_SIZE + i * DIRECTORY_ENTRY_SIZE..][..DIRECTORY_ENTRY_SIZE];

        let name_bytes = &entry[..TABLE_NAME_SIZE];
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TABLE_NAME_SIZE);
        let name = std::str::from_utf8(&name_bytes[..name_len])
            .map_err(|_| Error::MalformedContainer(format!("table {i}: name is not UTF-8")))?
            .to_string();
        if name.is_empty() {
            return Err(Error::MalformedContainer(format!("table {i}: empty name")));
        }
        if !names.insert(name.clone()) {
            return Err(Error::MalformedContainer(format!(
                "table '{name}' appears twice in the directory"
            )));
        }

        let offset = LittleEndian::read_u64(&entry[32..40]);
        let size = LittleEndian::read_u32(&entry[40..44]) as u64;
        let row_count = LittleEndian::read_u32(&entry[44..48]);

        let end = offset.checked_add(size).unwrap_or(u64::MAX);
        if offset < directory_end as u64 || end > data.len() as u64 {
            return Err(Error::MalformedContainer(format!(
                "table '{name}': payload {offset}..{end} outside body {directory_end}..{}",
                data.len()
            )));
        }
        spans.push((offset, end, i));

        tables.push(RawTable {
            name,
            row_count,
            payload: data[offset as usize..end as usize].to_vec(),
        });
    }

    spans.sort_unstable();
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(Error::MalformedContainer(format!(
                "tables '{}' and '{}' overlap",
                tables[pair[0].2].name,
                tables[pair[1].2].name
            )));
        }
    }

    Ok(RawContainer { version, tables })
}

/// Decode a whole container, using the layout where one is declared
///
/// Tables are decoded in parallel; they share no mutable state.
///
/// # Errors
/// Returns the first format error encountered.
pub fn decode(data: &[u8], layout: &Layout) -> Result<Container> {
    let raw = split_container(data)?;
    let tables = raw
        .tables
        .par_iter()
        .map(|table| decode_table(table, layout.get(&table.name)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Container {
        version: raw.version,
        tables,
    })
}

enum CellError {
    Truncated,
    InvalidUtf8,
}

impl From<std::io::Error> for CellError {
    fn from(_: std::io::Error) -> Self {
        CellError::Truncated
    }
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> std::result::Result<Vec<u8>, CellError> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(CellError::Truncated);
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_cell(
    cursor: &mut Cursor<&[u8]>,
    column_type: ColumnType,
) -> std::result::Result<Value, CellError> {
    let value = match column_type {
        ColumnType::U8 => Value::U8(cursor.read_u8()?),
        ColumnType::U16 => Value::U16(cursor.read_u16::<LittleEndian>()?),
        ColumnType::U32 => Value::U32(cursor.read_u32::<LittleEndian>()?),
        ColumnType::U64 => Value::U64(cursor.read_u64::<LittleEndian>()?),
        ColumnType::I32 => Value::I32(cursor.read_i32::<LittleEndian>()?),
        ColumnType::I64 => Value::I64(cursor.read_i64::<LittleEndian>()?),
        ColumnType::F32 => Value::F32(cursor.read_f32::<LittleEndian>()?),
        ColumnType::Text => {
            let bytes = read_bytes(cursor)?;
            Value::Text(String::from_utf8(bytes).map_err(|_| CellError::InvalidUtf8)?)
        }
        ColumnType::Blob => Value::Blob(read_bytes(cursor)?),
        ColumnType::Script => Value::Script(read_bytes(cursor)?),
    };
    Ok(value)
}

/// Decode one table payload
///
/// Without a layout the payload is kept opaque.
///
/// # Errors
/// Returns [`Error::TruncatedRow`] if a row runs past the payload, or
/// [`Error::MalformedContainer`] for trailing bytes, invalid text or
/// duplicate row keys.
pub fn decode_table(raw: &RawTable, layout: Option<&TableLayout>) -> Result<Table> {
    let Some(layout) = layout else {
        return Ok(Table {
            name: raw.name.clone(),
            data: TableData::Opaque {
                payload: raw.payload.clone(),
                row_count: raw.row_count,
            },
        });
    };

    let key_indices: Vec<usize> = layout.key_indices().collect();
    let mut cursor = Cursor::new(raw.payload.as_slice());
    let mut rows = Vec::with_capacity(raw.row_count as usize);
    let mut keys = HashSet::with_capacity(raw.row_count as usize);

    for row_index in 0..raw.row_count as usize {
        let mut values = Vec::with_capacity(layout.columns.len());
        for column in &layout.columns {
            let value = read_cell(&mut cursor, column.column_type).map_err(|e| match e {
                CellError::Truncated => Error::TruncatedRow {
                    table: raw.name.clone(),
                    row: row_index,
                },
                CellError::InvalidUtf8 => Error::MalformedContainer(format!(
                    "table '{}': row {row_index} column '{}' is not UTF-8",
                    raw.name, column.name
                )),
            })?;
            values.push(value);
        }

        let row = Row::new(values);
        // Key columns are validated as key-compatible, so every decoded row has a key
        if let Some(key) = row.key(&key_indices) {
            if !keys.insert(key.clone()) {
                return Err(Error::MalformedContainer(format!(
                    "table '{}': duplicate row key {key}",
                    raw.name
                )));
            }
        }
        rows.push(row);
    }

    let consumed = cursor.position() as usize;
    if consumed != raw.payload.len() {
        return Err(Error::MalformedContainer(format!(
            "table '{}': {} trailing bytes after {} rows",
            raw.name,
            raw.payload.len() - consumed,
            raw.row_count
        )));
    }

    Ok(Table {
        name: raw.name.clone(),
        data: TableData::Rows {
            layout: layout.clone(),
            rows,
        },
    })
}
