//! Append-only doubly-linked list of entry records living in a table's
//! entry buffer, plus forward traversal with a cycle guard.

use std::collections::HashSet;
use std::io::{Read, Seek, Write};
use std::path::Path;

use log::warn;

use crate::bytes::TableIo;
use crate::error::{Error, Result};
use crate::format::{EntryMiniHeader, Header, RawRecord, NONE_PTR};
use crate::schema::{validate_entry, Entry, EntryId, FieldType, Value};
use crate::strings::{intern, StringLookup};
use crate::Options;

/// Validate and append `entry` to the table described by `header`,
/// interning any string fields first (which may grow the file and
/// refresh `header`/`lookup`/`io` in place). Returns the assigned id.
#[allow(clippy::too_many_arguments)]
pub fn append<F: Read + Write + Seek>(
    io: &mut TableIo<F>,
    header: &mut Header,
    lookup: &mut StringLookup,
    table_path: Option<&Path>,
    opts: &Options,
    reopen: &mut dyn FnMut() -> Result<F>,
    entry: &Entry,
) -> Result<EntryId> {
    validate_entry(&header.signature, entry)?;

    let mut slots = Vec::with_capacity(header.signature.len());
    for (name, ty) in &header.signature {
        let value = entry
            .get(name)
            .expect("validate_entry already checked every field is present");
        let slot = match (ty, value) {
            (FieldType::Integer, Value::Int(n)) => *n as i64,
            (FieldType::Str, Value::Str(s)) => {
                intern(io, header, lookup, s, table_path, opts, reopen)?
            }
            _ => unreachable!("validate_entry guarantees the value matches the declared type"),
        };
        slots.push(slot);
    }

    let mut mini = EntryMiniHeader::parse(io, header.entry_buffer_offset)?;
    let new_id = mini.last_used_id + 1;
    if new_id > i32::MAX as i64 {
        return Err(Error::BadArgument(
            "table has exhausted its entry id space".into(),
        ));
    }

    let new_pos = io.size()? as i64;
    let record = RawRecord {
        id: new_id,
        slots,
        prev: mini.last_entry_pointer,
        next: NONE_PTR,
    };
    record.write(io, new_pos)?;

    if mini.last_entry_pointer != NONE_PTR {
        let mut prev_record =
            RawRecord::read(io, mini.last_entry_pointer, header.signature.len())?;
        prev_record.next = new_pos;
        prev_record.write(io, mini.last_entry_pointer)?;
    } else {
        mini.first_entry_pointer = new_pos;
    }
    mini.last_entry_pointer = new_pos;
    mini.last_used_id = new_id;
    mini.nentries += 1;
    mini.write(io, header.entry_buffer_offset)?;

    Ok(new_id as EntryId)
}

/// Walk the entry list from first to last, calling `on_record` with
/// each decoded record in order. Stops early (without error) if
/// `on_record` returns `Ok(ControlFlow::Break)`.
///
/// Guards against a corrupted file whose `next` pointers form a cycle:
/// aborts with [`Error::FormatError`] once more records have been
/// visited than `mini.nentries` accounts for, and again if a position
/// repeats.
pub fn traverse<F: Read + Write + Seek>(
    io: &mut TableIo<F>,
    header: &Header,
    opts: &Options,
    mut on_record: impl FnMut(&RawRecord) -> Result<ControlFlow>,
) -> Result<()> {
    let mini = EntryMiniHeader::parse(io, header.entry_buffer_offset)?;
    let mut visited = HashSet::new();
    let mut pos = mini.first_entry_pointer;
    let mut steps: i64 = 0;
    let max_steps = opts.max_traversal_steps.min(mini.nentries.max(0) as u64 + 1) as i64;

    while pos != NONE_PTR {
        steps += 1;
        if steps > max_steps || !visited.insert(pos) {
            warn!("cycle or runaway chain detected in entry list at position {pos}, aborting traversal");
            return Err(Error::FormatError(
                "entry list traversal exceeded the expected number of entries; the file may be corrupted".into(),
            ));
        }
        let record = RawRecord::read(io, pos, header.signature.len())?;
        let next = record.next;
        if let ControlFlow::Break = on_record(&record)? {
            return Ok(());
        }
        pos = next;
    }
    Ok(())
}

/// Signal for [`traverse`] on whether to keep walking the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlFlow {
    Continue,
    Break,
}

/// Decode a [`RawRecord`]'s slots back into an [`Entry`], resolving
/// string slots through `resolve_string`.
pub fn decode_record(
    header: &Header,
    record: &RawRecord,
    mut resolve_string: impl FnMut(i64) -> Result<String>,
) -> Result<Entry> {
    let mut entry = Entry::new();
    for ((name, ty), slot) in header.signature.iter().zip(record.slots.iter()) {
        let value = match ty {
            FieldType::Integer => Value::Int(*slot as i32),
            FieldType::Str => Value::Str(resolve_string(*slot)?),
        };
        entry.insert(name.clone(), value);
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use tempfile::tempdir;

    use super::*;
    use crate::format::Header;
    use crate::schema::TableSignature;

    fn signature() -> TableSignature {
        vec![
            ("ID".to_string(), FieldType::Integer),
            ("NAME".to_string(), FieldType::Str),
        ]
    }

    fn entry(id: i32, name: &str) -> Entry {
        let mut e = Entry::new();
        e.insert("ID".to_string(), Value::Int(id));
        e.insert("NAME".to_string(), Value::Str(name.to_string()));
        e
    }

    #[test]
    fn append_assigns_increasing_ids_and_links_records() {
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
        let sig = signature();
        let mut header = Header::create(&mut io, &sig).unwrap();
        let mut lookup = StringLookup::new();
        let opts = Options::default();

        let p1 = path.clone();
        let id1 = append(
            &mut io,
            &mut header,
            &mut lookup,
            Some(&path),
            &opts,
            &mut || Ok(File::options().read(true).write(true).open(&p1).unwrap()),
            &entry(1, "alpha"),
        )
        .unwrap();
        let p2 = path.clone();
        let id2 = append(
            &mut io,
            &mut header,
            &mut lookup,
            Some(&path),
            &opts,
            &mut || Ok(File::options().read(true).write(true).open(&p2).unwrap()),
            &entry(2, "beta"),
        )
        .unwrap();
        assert_eq!(id2, id1 + 1);

        let mut names = Vec::new();
        traverse(&mut io, &header, &opts, |record| {
            let e = decode_record(&header, record, |offset| io_read_string_at(&path, offset)).unwrap();
            names.push(e.get("NAME").unwrap().as_str().unwrap().to_string());
            Ok(ControlFlow::Continue)
        })
        .unwrap();
        assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    }

    fn io_read_string_at(path: &std::path::Path, offset: i64) -> Result<String> {
        let file = File::options().read(true).write(true).open(path).unwrap();
        let mut io = TableIo::new(file);
        io.read_string_at(offset)
    }
}
