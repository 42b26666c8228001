//! In-memory secondary indexes over a table's entries: by id, and by
//! value for every field. Built by a full scan on first access and
//! kept current incrementally as entries are appended.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};

use crate::bytes::TableIo;
use crate::entries::{decode_record, traverse, ControlFlow};
use crate::error::Result;
use crate::format::Header;
use crate::schema::{Entry, EntryId, Value};
use crate::Options;

/// Secondary indexes for one table, kept in memory alongside the
/// table's open file handle.
#[derive(Default)]
pub struct TableIndex {
    by_id: HashMap<EntryId, Entry>,
    /// Insertion order of every entry currently indexed; mirrors the
    /// on-disk entry list order for `get_entries`/`select_entries`.
    order: Vec<EntryId>,
    by_field: HashMap<String, HashMap<Value, Vec<EntryId>>>,
}

impl TableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from scratch by walking every entry in the file.
    pub fn build<F: Read + Write + Seek>(
        io: &mut TableIo<F>,
        header: &Header,
        opts: &Options,
    ) -> Result<Self> {
        let mut index = Self::new();
        let mut pending = Vec::new();
        traverse(io, header, opts, |record| {
            pending.push((record.id, record.slots.clone()));
            Ok(ControlFlow::Continue)
        })?;
        for (id, slots) in pending {
            let raw = crate::format::RawRecord {
                id,
                slots,
                prev: crate::format::NONE_PTR,
                next: crate::format::NONE_PTR,
            };
            let entry = decode_record(header, &raw, |offset| io.read_string_at(offset))?;
            index.insert(id as EntryId, entry);
        }
        Ok(index)
    }

    /// Record a newly appended entry without rescanning the file.
    pub fn insert(&mut self, id: EntryId, entry: Entry) {
        for (name, value) in &entry {
            self.by_field
                .entry(name.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .push(id);
        }
        self.order.push(id);
        self.by_id.insert(id, entry);
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.by_id.get(&id)
    }

    /// Every indexed entry with its id, in insertion order.
    pub fn all(&self) -> Vec<(EntryId, Entry)> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|e| (*id, e.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids of entries whose `field` equals `value`, in insertion order.
    pub fn lookup(&self, field: &str, value: &Value) -> &[EntryId] {
        self.by_field
            .get(field)
            .and_then(|by_value| by_value.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use tempfile::tempdir;

    use super::*;
    use crate::entries::append;
    use crate::format::Header;
    use crate::schema::{FieldType, TableSignature};
    use crate::strings::StringLookup;

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
    fn build_scans_every_entry_and_lookup_finds_matches() {
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

        for (id, name) in [(1, "alpha"), (2, "beta"), (3, "alpha")] {
            let p = path.clone();
            append(
                &mut io,
                &mut header,
                &mut lookup,
                Some(&path),
                &opts,
                &mut || Ok(File::options().read(true).write(true).open(&p).unwrap()),
                &entry(id, name),
            )
            .unwrap();
        }

        let index = TableIndex::build(&mut io, &header, &opts).unwrap();
        assert_eq!(index.len(), 3);
        let alphas = index.lookup("NAME", &Value::Str("alpha".to_string()));
        assert_eq!(alphas, &[1, 3]);
        assert!(index.get(2).is_some());
    }
}
