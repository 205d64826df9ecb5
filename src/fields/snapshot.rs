//! On-disk snapshot of the fields map tables.

use super::map::{Table, Tables};
use crate::error::{IndexError, Result};
use crate::types::{DocumentId, FieldKind};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::Path;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"FMAP";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Write all tables to `path`, replacing any previous snapshot atomically.
pub(crate) fn save(path: &Path, tables: &Tables) -> Result<()> {
    let mut buf = Vec::new();

    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.push(SNAPSHOT_VERSION);
    buf.extend_from_slice(&(tables.len() as u32).to_le_bytes());

    for (kind, table) in tables.iter() {
        let name = kind.table_name().as_bytes();
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(name);

        buf.extend_from_slice(&(table.len() as u64).to_le_bytes());
        for (value, ids) in table.iter() {
            let value = value.as_bytes();
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);

            buf.extend_from_slice(&(ids.len() as u64).to_le_bytes());
            for id in ids {
                buf.extend_from_slice(&id.0.to_le_bytes());
            }
        }
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    Ok(())
}

/// Load tables from `path`. Every indexed kind gets a table, even if the file
/// predates it.
pub(crate) fn load(path: &Path) -> Result<Tables> {
    let bytes = fs::read(path)?;
    if bytes.len() < SNAPSHOT_MAGIC.len() + 1 + 4 {
        return Err(IndexError::InvalidFormat("Snapshot too short".into()));
    }

    let (body, checksum_bytes) = bytes.split_at(bytes.len() - 4);
    let mut expected = [0u8; 4];
    expected.copy_from_slice(checksum_bytes);
    let expected = u32::from_le_bytes(expected);
    let got = crc32fast::hash(body);
    if expected != got {
        return Err(IndexError::ChecksumMismatch { expected, got });
    }

    let mut file = Cursor::new(body);

    // Read magic
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(IndexError::InvalidFormat("Invalid snapshot magic".into()));
    }

    // Read version
    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != SNAPSHOT_VERSION {
        return Err(IndexError::InvalidFormat(format!(
            "Unsupported snapshot version: {}",
            version[0]
        )));
    }

    let mut tables = Tables::new();
    for kind in FieldKind::ALL {
        tables.insert(kind, Table::new());
    }

    let table_count = read_u32(&mut file)? as usize;
    for _ in 0..table_count {
        let name_len = read_u16(&mut file)? as usize;
        let name = read_string(&mut file, name_len)?;

        let entry_count = read_u64(&mut file)? as usize;
        let mut table = Table::with_capacity(entry_count);
        for _ in 0..entry_count {
            let value_len = read_u32(&mut file)? as usize;
            let value = read_string(&mut file, value_len)?;

            let id_count = read_u64(&mut file)? as usize;
            let mut ids = HashSet::with_capacity(id_count);
            for _ in 0..id_count {
                ids.insert(DocumentId(read_u64(&mut file)?));
            }
            table.insert(value, ids);
        }

        match FieldKind::from_field_name(&name) {
            Some(kind) => {
                tables.insert(kind, table);
            }
            None => {
                tracing::warn!(table = %name, "ignoring snapshot table for unindexed field");
            }
        }
    }

    Ok(tables)
}

fn read_u16(file: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut bytes = [0u8; 2];
    file.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(file: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut bytes = [0u8; 4];
    file.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(file: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut bytes = [0u8; 8];
    file.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_string(file: &mut Cursor<&[u8]>, len: usize) -> Result<String> {
    let remaining = file.get_ref().len() as u64 - file.position();
    if len as u64 > remaining {
        return Err(IndexError::Corruption("Snapshot string overruns file".into()));
    }
    let mut bytes = vec![0u8; len];
    file.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| IndexError::Corruption(e.to_string()))
}
