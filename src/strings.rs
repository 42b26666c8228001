//! Append-only interning of UTF-8 strings inside the fixed-capacity
//! string buffer region of a table file, with growth-by-rewrite when
//! the region runs out of room.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::bytes::TableIo;
use crate::error::{Error, Result};
use crate::format::{entry_record_size, EntryMiniHeader, Header, RawRecord, MINI_HEADER_LEN, NONE_PTR};
use crate::schema::TableSignature;
use crate::Options;

/// In-memory `value -> offset` lookup for the strings already interned
/// in a table's string buffer, built lazily by a linear scan.
#[derive(Default)]
pub struct StringLookup {
    by_value: HashMap<String, i64>,
}

impl StringLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, value: &str) -> Option<i64> {
        self.by_value.get(value).copied()
    }

    fn insert(&mut self, value: String, offset: i64) {
        self.by_value.insert(value, offset);
    }

    /// Scan `[header.string_buffer_offset, header.string_buffer_first_available)`
    /// and populate the lookup from scratch.
    pub fn build<F: Read + Write + Seek>(io: &mut TableIo<F>, header: &Header) -> Result<Self> {
        let mut lookup = Self::new();
        let mut pos = header.string_buffer_offset;
        let end = header.string_buffer_first_available;
        io.goto(pos)?;
        while pos < end {
            let s = io.read_string()?;
            lookup.insert(s, pos);
            pos = io.tell()? as i64;
        }
        Ok(lookup)
    }
}

/// Intern `value` in the string buffer described by `header`, growing
/// the file if necessary. Returns the offset of the interned string's
/// length prefix and the (possibly refreshed) header.
///
/// On growth, `table_path` is rewritten in place (write-temp-then-rename);
/// the caller's `io` handle is swapped to the new file.
pub fn intern<F: Read + Write + Seek>(
    io: &mut TableIo<F>,
    header: &mut Header,
    lookup: &mut StringLookup,
    value: &str,
    table_path: Option<&Path>,
    opts: &Options,
    reopen: &mut dyn FnMut() -> Result<F>,
) -> Result<i64> {
    if let Some(offset) = lookup.get(value) {
        return Ok(offset);
    }

    let need = 2 + value.as_bytes().len() as i64;
    let available = header.entry_buffer_offset - header.string_buffer_first_available;
    if need > available {
        let Some(path) = table_path else {
            return Err(Error::BufferFull {
                need: need as usize,
                available: available.max(0) as usize,
            });
        };
        grow(io, header, lookup, path, opts, reopen)?;
        let available = header.entry_buffer_offset - header.string_buffer_first_available;
        if need > available {
            return Err(Error::BufferFull {
                need: need as usize,
                available: available.max(0) as usize,
            });
        }
    }

    let offset = header.string_buffer_first_available;
    io.write_string_at(offset, value)?;
    header.string_buffer_first_available += need;
    header.write_string_buffer_first_available(io, header.string_buffer_first_available)?;
    lookup.insert(value.to_owned(), offset);
    Ok(offset)
}

/// Grow the string buffer by rewriting the table file with a larger
/// string buffer capacity (`opts.string_buffer_grow_factor` times the
/// current capacity), preserving every interned string and every entry
/// record (with string-field offsets remapped to the new buffer).
fn grow<F: Read + Write + Seek>(
    io: &mut TableIo<F>,
    header: &mut Header,
    lookup: &mut StringLookup,
    table_path: &Path,
    opts: &Options,
    reopen: &mut dyn FnMut() -> Result<F>,
) -> Result<()> {
    let current_capacity = (header.entry_buffer_offset - header.string_buffer_offset).max(16);
    let new_capacity = current_capacity * opts.string_buffer_grow_factor as i64;
    debug!(
        "growing string buffer from {current_capacity} to {new_capacity} bytes ({} bytes needed)",
        new_capacity - current_capacity
    );

    let new_string_buffer_offset = header.string_buffer_offset;
    let new_entry_buffer_offset = new_string_buffer_offset + new_capacity;

    let dir = table_path.parent().ok_or_else(|| {
        Error::BadArgument("table path has no parent directory".to_string())
    })?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut new_io = TableIo::new(tmp.as_file_mut());
        new_io.goto(0)?;
        crate::format::Header::create_with_offsets(
            &mut new_io,
            &header.signature,
            new_string_buffer_offset,
            new_capacity,
        )?;

        // Copy every interned string, recording old->new offset mapping.
        let mut remap: HashMap<i64, i64> = HashMap::new();
        let mut old_pos = header.string_buffer_offset;
        let end = header.string_buffer_first_available;
        let mut new_pos = new_string_buffer_offset;
        io.goto(old_pos)?;
        while old_pos < end {
            let s = io.read_string()?;
            new_io.write_string_at(new_pos, &s)?;
            remap.insert(old_pos, new_pos);
            let written = 2 + s.as_bytes().len() as i64;
            old_pos += written;
            new_pos += written;
            io.goto(old_pos)?;
        }
        new_io.write_int_at(
            string_buffer_first_available_pos(&header.signature),
            new_pos,
            4,
        )?;

        // Copy every entry record in traversal order, remapping string slots.
        let mini = EntryMiniHeader::parse(io, header.entry_buffer_offset)?;
        let entry_size = entry_record_size(header.signature.len());
        let mut records = Vec::with_capacity(mini.nentries.max(0) as usize);
        let mut pos = mini.first_entry_pointer;
        let mut visited = std::collections::HashSet::new();
        while pos != NONE_PTR {
            if !visited.insert(pos) {
                return Err(Error::FormatError(format!(
                    "cycle detected in entry list at position {pos}"
                )));
            }
            let record = RawRecord::read(io, pos, header.signature.len())?;
            let remapped_slots = record
                .slots
                .iter()
                .zip(header.signature.iter())
                .map(|(slot, (_, ty))| match ty {
                    crate::schema::FieldType::Str => remap.get(slot).copied().ok_or_else(|| {
                        Error::FormatError(format!("string offset {slot} not found in buffer"))
                    }),
                    crate::schema::FieldType::Integer => Ok(*slot),
                })
                .collect::<Result<Vec<_>>>()?;
            pos = record.next;
            records.push(RawRecord {
                id: record.id,
                slots: remapped_slots,
                prev: NONE_PTR,
                next: NONE_PTR,
            });
        }

        let first_record_pos = new_entry_buffer_offset + MINI_HEADER_LEN;
        let total_len = first_record_pos + entry_size * records.len() as i64;
        let cur_len = new_io.size()? as i64;
        if total_len > cur_len {
            new_io.goto(cur_len)?;
            new_io.get_mut().write_all(&vec![0u8; (total_len - cur_len) as usize])?;
        }
        for (i, record) in records.iter_mut().enumerate() {
            let this_pos = first_record_pos + entry_size * i as i64;
            record.prev = if i == 0 {
                NONE_PTR
            } else {
                first_record_pos + entry_size * (i as i64 - 1)
            };
            record.next = if i + 1 == records.len() {
                NONE_PTR
            } else {
                first_record_pos + entry_size * (i as i64 + 1)
            };
            record.write(&mut new_io, this_pos)?;
        }

        let new_mini = EntryMiniHeader {
            last_used_id: mini.last_used_id,
            nentries: records.len() as i64,
            first_entry_pointer: if records.is_empty() { NONE_PTR } else { first_record_pos },
            last_entry_pointer: if records.is_empty() {
                NONE_PTR
            } else {
                first_record_pos + entry_size * (records.len() as i64 - 1)
            },
            reserved_pointer: mini.reserved_pointer,
        };
        new_mini.write(&mut new_io, new_entry_buffer_offset)?;
        new_io.get_mut().flush()?;
    }

    tmp.persist(table_path).map_err(|e| Error::Io(e.error))?;
    let new_file = reopen()?;
    *io = TableIo::new(new_file);

    let new_header = Header::parse(io)?;
    *lookup = StringLookup::build(io, &new_header)?;
    *header = new_header;
    Ok(())
}

fn string_buffer_first_available_pos(signature: &TableSignature) -> i64 {
    Header::encoded_signature_len(signature) as i64 + 4
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use std::fs::File;

    use super::*;
    use crate::schema::FieldType;

    fn open(path: &Path) -> TableIo<File> {
        let file = File::options().read(true).write(true).open(path).unwrap();
        TableIo::new(file)
    }

    #[test]
    fn intern_deduplicates_identical_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.table");
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let mut io = TableIo::new(file);
        let sig: TableSignature = vec![("NAME".to_string(), FieldType::Str)];
        let mut header = Header::create(&mut io, &sig).unwrap();
        let mut lookup = StringLookup::new();
        let opts = Options::default();

        let path2 = path.clone();
        let offset1 = intern(
            &mut io,
            &mut header,
            &mut lookup,
            "hello",
            Some(&path),
            &opts,
            &mut || Ok(File::options().read(true).write(true).open(&path2).unwrap()),
        )
        .unwrap();
        let path3 = path.clone();
        let offset2 = intern(
            &mut io,
            &mut header,
            &mut lookup,
            "hello",
            Some(&path),
            &opts,
            &mut || Ok(File::options().read(true).write(true).open(&path3).unwrap()),
        )
        .unwrap();
        assert_eq!(offset1, offset2);
    }

    #[test]
    fn intern_grows_when_buffer_is_exhausted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.table");
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let mut io = TableIo::new(file);
        let sig: TableSignature = vec![("NAME".to_string(), FieldType::Str)];
        let mut header = Header::create(&mut io, &sig).unwrap();
        let mut lookup = StringLookup::new();
        let opts = Options::default();

        // The fresh buffer is 16 bytes; several distinct short strings
        // will exhaust it and force at least one grow.
        for i in 0..10 {
            let s = format!("value-{i}");
            let p1 = path.clone();
            intern(&mut io, &mut header, &mut lookup, &s, Some(&path), &opts, &mut || {
                Ok(File::options().read(true).write(true).open(&p1).unwrap())
            })
            .unwrap();
        }
        assert!(header.entry_buffer_offset > crate::format::FRESH_ENTRY_BUFFER_OFFSET);
        assert_eq!(io.size().unwrap(), io.size().unwrap());

        // Re-open from disk and verify every string is still resolvable.
        let mut fresh_io = open(&path);
        let fresh_header = Header::parse(&mut fresh_io).unwrap();
        let fresh_lookup = StringLookup::build(&mut fresh_io, &fresh_header).unwrap();
        for i in 0..10 {
            let s = format!("value-{i}");
            assert!(fresh_lookup.get(&s).is_some());
        }
    }
}
