//! Container assembly and row encoding
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use rayon::prelude::*;

use super::{
    Container, DIRECTORY_ENTRY_SIZE, HEADER_SIZE, MAGIC, RawTable, TABLE_NAME_SIZE, Table,
    TableData, Value, split_container,
};
use crate::error::{Error, Result};

/// Encode a whole container
///
/// # Errors
/// Returns [`Error::MissingSource`] if any row has a cell that was never
/// loaded, or [`Error::MalformedContainer`] if a cell does not match its
/// column type.
pub fn encode(container: &Container) -> Result<Vec<u8>> {
    let tables = container
        .tables
        .par_iter()
        .map(encode_table)
        .collect::<Result<Vec<_>>>()?;
    assemble(container.version, &tables)
}

/// Encode one table into its stored payload
///
/// # Errors
/// See [`encode`].
pub fn encode_table(table: &Table) -> Result<RawTable> {
    let row_count = u32::try_from(table.row_count()).map_err(|_| {
        Error::MalformedContainer(format!("table '{}': too many rows", table.name))
    })?;
    Ok(RawTable {
        name: table.name.clone(),
        row_count,
        payload: encode_table_payload(table)?,
    })
}

/// Encode a table's rows without the directory entry
///
/// Opaque tables return their payload unchanged.
///
/// # Errors
/// See [`encode`].
pub fn encode_table_payload(table: &Table) -> Result<Vec<u8>> {
    let (layout, rows) = match &table.data {
        TableData::Opaque { payload, .. } => return Ok(payload.clone()),
        TableData::Rows { layout, rows } => (layout, rows),
    };

    let mut out = Vec::new();
    for (row_index, row) in rows.iter().enumerate() {
        if row.cells.len() > layout.columns.len() {
            return Err(Error::MalformedContainer(format!(
                "table '{}': row {row_index} has {} cells for {} columns",
                table.name,
                row.cells.len(),
                layout.columns.len()
            )));
        }
        for (column_index, column) in layout.columns.iter().enumerate() {
            let value = row.get(column_index).ok_or_else(|| Error::MissingSource {
                table: table.name.clone(),
                row: row_index,
                column: column.name.clone(),
            })?;
            if value.column_type() != column.column_type {
                return Err(Error::MalformedContainer(format!(
                    "table '{}': row {row_index} column '{}' holds {} but is declared {}",
                    table.name,
                    column.name,
                    value.column_type(),
                    column.column_type
                )));
            }
            write_cell(&mut out, value)?;
        }
    }
    Ok(out)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::MalformedContainer(format!("cell of {} bytes", bytes.len())))?;
    out.write_u32::<LittleEndian>(len)?;
    out.write_all(bytes)?;
    Ok(())
}

fn write_cell(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::U8(v) => out.write_u8(*v)?,
        Value::U16(v) => out.write_u16::<LittleEndian>(*v)?,
        Value::U32(v) => out.write_u32::<LittleEndian>(*v)?,
        Value::U64(v) => out.write_u64::<LittleEndian>(*v)?,
        Value::I32(v) => out.write_i32::<LittleEndian>(*v)?,
        Value::I64(v) => out.write_i64::<LittleEndian>(*v)?,
        Value::F32(v) => out.write_f32::<LittleEndian>(*v)?,
        Value::Text(s) => write_bytes(out, s.as_bytes())?,
        Value::Blob(b) | Value::Script(b) => write_bytes(out, b)?,
    }
    Ok(())
}

/// Lay out header, directory and payloads, and compute the body checksum
///
/// Payloads are written in the given order directly after the directory.
///
/// # Errors
/// Returns [`Error::MalformedContainer`] if a table name does not fit the
/// directory or a payload exceeds the 32-bit size field.
pub fn assemble(version: u32, tables: &[RawTable]) -> Result<Vec<u8>> {
    let table_count = u32::try_from(tables.len())
        .map_err(|_| Error::MalformedContainer("too many tables".to_string()))?;
    let directory_end = HEADER_SIZE + tables.len() * DIRECTORY_ENTRY_SIZE;
    let payload_total: usize = tables.iter().map(|t| t.payload.len()).sum();

    let mut body = Vec::with_capacity(directory_end - HEADER_SIZE + payload_total);
    let mut offset = directory_end as u64;

    for table in tables {
        let name = table.name.as_bytes();
        if name.is_empty() || name.len() >= TABLE_NAME_SIZE {
            return Err(Error::MalformedContainer(format!(
                "table name '{}' does not fit the directory",
                table.name
            )));
        }
        let size = u32::try_from(table.payload.len()).map_err(|_| {
            Error::MalformedContainer(format!("table '{}': payload too large", table.name))
        })?;

        let mut name_field = [0u8; TABLE_NAME_SIZE];
        name_field[..name.len()].copy_from_slice(name);
        body.write_all(&name_field)?;
        body.write_u64::<LittleEndian>(offset)?;
        body.write_u32::<LittleEndian>(size)?;
        body.write_u32::<LittleEndian>(table.row_count)?;
        offset += u64::from(size);
    }

    for table in tables {
        body.write_all(&table.payload)?;
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.write_all(&MAGIC)?;
    out.write_u32::<LittleEndian>(version)?;
    out.write_u32::<LittleEndian>(table_count)?;
    out.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Rebuild a source container around replacement payloads
///
/// Keeps the source's directory bytes, payload order and any bytes between or
/// after payloads; only the offsets and sizes of the replaced payloads and of
/// those stored after them change.
///
/// # Errors
/// Returns a format error if the source does not split, or
/// [`Error::MalformedContainer`] if `tables` does not match its directory.
pub fn reassemble(source: &[u8], tables: &[RawTable]) -> Result<Vec<u8>> {
    let raw = split_container(source)?;
    if raw.tables.len() != tables.len() {
        return Err(Error::MalformedContainer(format!(
            "{} tables given for a source with {}",
            tables.len(),
            raw.tables.len()
        )));
    }
    let directory_end = HEADER_SIZE + tables.len() * DIRECTORY_ENTRY_SIZE;

    // (offset, size, directory index)
    let mut spans = Vec::with_capacity(tables.len());
    for (i, (table, old)) in tables.iter().zip(&raw.tables).enumerate() {
        if table.name != old.name {
            return Err(Error::MalformedContainer(format!(
                "table {i} is '{}' in the source but '{}' was given",
                old.name, table.name
            )));
        }
        let entry = &source[HEADER_SIZE + i * DIRECTORY_ENTRY_SIZE..][..DIRECTORY_ENTRY_SIZE];
        let offset = LittleEndian::read_u64(&entry[32..40]) as usize;
        let size = LittleEndian::read_u32(&entry[40..44]) as usize;
        spans.push((offset, size, i));
    }
    spans.sort_unstable();

    let payload_total: usize = tables.iter().map(|t| t.payload.len()).sum();
    let mut out = Vec::with_capacity(source.len() + payload_total);
    out.extend_from_slice(&source[..directory_end]);
    let mut cursor = directory_end;
    for &(offset, size, i) in &spans {
        let gap = source.get(cursor..offset).ok_or_else(|| {
            Error::MalformedContainer(format!("table '{}' overlaps its neighbour", tables[i].name))
        })?;
        out.extend_from_slice(gap);

        let table = &tables[i];
        let new_size = u32::try_from(table.payload.len()).map_err(|_| {
            Error::MalformedContainer(format!("table '{}': payload too large", table.name))
        })?;
        let entry = HEADER_SIZE + i * DIRECTORY_ENTRY_SIZE;
        let new_offset = out.len() as u64;
        LittleEndian::write_u64(&mut out[entry + 32..entry + 40], new_offset);
        LittleEndian::write_u32(&mut out[entry + 40..entry + 44], new_size);
        LittleEndian::write_u32(&mut out[entry + 44..entry + 48], table.row_count);
        out.extend_from_slice(&table.payload);
        cursor = offset + size;
    }
    out.extend_from_slice(&source[cursor..]);

    let checksum = crc32fast::hash(&out[HEADER_SIZE..]);
    LittleEndian::write_u32(&mut out[12..16], checksum);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ColumnLayout, ColumnType, Row, TableLayout, split_container};

    fn text_table(rows: Vec<Row>) -> Table {
        Table {
            name: "text".into(),
            data: TableData::Rows {
                layout: TableLayout::new(
                    "text",
                    vec![
                        ColumnLayout::key("id", ColumnType::U32),
                        ColumnLayout::text("text"),
                    ],
                ),
                rows,
            },
        }
    }

    #[test]
    fn test_unloaded_cell_is_missing_source() {
        let table = text_table(vec![Row {
            cells: vec![Some(Value::U32(1)), None],
        }]);
        let err = encode_table(&table).unwrap_err();
        assert!(matches!(err, Error::MissingSource { row: 0, .. }));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let table = text_table(vec![Row::new(vec![Value::U32(1), Value::U32(2)])]);
        assert!(matches!(
            encode_table(&table),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_assemble_layout() {
        let tables = vec![
            RawTable {
                name: "a".into(),
                row_count: 1,
                payload: vec![1, 2, 3],
            },
            RawTable {
                name: "b".into(),
                row_count: 0,
                payload: vec![],
            },
        ];
        let bytes = assemble(1, &tables).unwrap();
        assert_eq!(&bytes[0..4], b"KMDB");
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * DIRECTORY_ENTRY_SIZE + 3);

        let raw = split_container(&bytes).unwrap();
        assert_eq!(raw.tables, tables);
    }

    /// One-table container with padding after the directory and junk after
    /// the name's NUL terminator
    fn padded_container(payload: &[u8]) -> Vec<u8> {
        let plain = assemble(
            1,
            &[RawTable {
                name: "text".into(),
                row_count: 1,
                payload: payload.to_vec(),
            }],
        )
        .unwrap();
        let directory_end = HEADER_SIZE + DIRECTORY_ENTRY_SIZE;
        let mut bytes = [&plain[..directory_end], &[0xAA_u8; 8][..], &plain[directory_end..]].concat();
        bytes[HEADER_SIZE + 20] = 0x55;
        bytes[HEADER_SIZE + 32..HEADER_SIZE + 40]
            .copy_from_slice(&(directory_end as u64 + 8).to_le_bytes());
        bytes.extend_from_slice(&[0xBB; 4]);
        let checksum = crc32fast::hash(&bytes[HEADER_SIZE..]);
        bytes[12..16].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    #[test]
    fn test_reassemble_keeps_source_layout() {
        let source = padded_container(&[1, 2, 3]);
        let raw = split_container(&source).unwrap();
        assert_eq!(reassemble(&source, &raw.tables).unwrap(), source);

        let mut tables = raw.tables.clone();
        tables[0].payload = vec![9, 9, 9, 9, 9];
        let rebuilt = reassemble(&source, &tables).unwrap();
        assert_eq!(rebuilt.len(), source.len() + 2);
        assert_eq!(&rebuilt[..HEADER_SIZE + 32], &source[..HEADER_SIZE + 32]);
        assert_eq!(&rebuilt[64..72], &[0xAA; 8]);
        assert_eq!(&rebuilt[rebuilt.len() - 4..], &[0xBB; 4]);
        assert_eq!(split_container(&rebuilt).unwrap().tables, tables);
    }

    #[test]
    fn test_reassemble_keeps_payload_order() {
        let source = assemble(
            1,
            &[
                RawTable {
                    name: "a".into(),
                    row_count: 1,
                    payload: vec![1],
                },
                RawTable {
                    name: "b".into(),
                    row_count: 1,
                    payload: vec![2, 2],
                },
            ],
        )
        .unwrap();
        // Store "b" before "a"
        let mut swapped = source.clone();
        let body = HEADER_SIZE + 2 * DIRECTORY_ENTRY_SIZE;
        swapped[body..].copy_from_slice(&[2, 2, 1]);
        swapped[HEADER_SIZE + 32..HEADER_SIZE + 40].copy_from_slice(&(body as u64 + 2).to_le_bytes());
        let b_entry = HEADER_SIZE + DIRECTORY_ENTRY_SIZE;
        swapped[b_entry + 32..b_entry + 40].copy_from_slice(&(body as u64).to_le_bytes());
        let checksum = crc32fast::hash(&swapped[HEADER_SIZE..]);
        swapped[12..16].copy_from_slice(&checksum.to_le_bytes());

        let mut tables = split_container(&swapped).unwrap().tables;
        tables[0].payload = vec![7, 7];
        let rebuilt = reassemble(&swapped, &tables).unwrap();
        assert_eq!(&rebuilt[body..], &[2, 2, 7, 7]);
        assert_eq!(split_container(&rebuilt).unwrap().tables, tables);
    }

    #[test]
    fn test_reassemble_rejects_other_tables() {
        let source = padded_container(&[1]);
        let tables = vec![RawTable {
            name: "other".into(),
            row_count: 1,
            payload: vec![1],
        }];
        assert!(matches!(
            reassemble(&source, &tables),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_rejects_long_table_name() {
        let tables = vec![RawTable {
            name: "x".repeat(TABLE_NAME_SIZE),
            row_count: 0,
            payload: vec![],
        }];
        assert!(assemble(1, &tables).is_err());
    }
}
