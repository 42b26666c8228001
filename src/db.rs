//! The top-level `Database` facade: opens table files by name, keeps a
//! per-table cache of parsed headers, string lookups and secondary
//! indexes, and dispatches every public operation to the lower layers.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::bytes::TableIo;
use crate::entries::append;
use crate::error::{Error, Result};
use crate::format::{EntryMiniHeader, Header};
use crate::index::TableIndex;
use crate::schema::{Entry, EntryId, TableSignature, Value};
use crate::strings::StringLookup;
use crate::Options;

struct TableHandle {
    io: TableIo<File>,
    header: Header,
    lookup: StringLookup,
    index: Option<TableIndex>,
}

/// A single-node database: a directory on disk holding one file per
/// table, plus this process's in-memory cache of each table's parsed
/// state.
pub struct Database {
    root: PathBuf,
    opts: Options,
    tables: HashMap<String, TableHandle>,
}

impl Database {
    /// Open (creating if necessary) the database rooted at `root`.
    pub fn open(root: impl AsRef<Path>, opts: Options) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Database {
            root,
            opts,
            tables: HashMap::new(),
        })
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.table"))
    }

    fn validate_table_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::BadArgument("table name must not be empty".into()));
        }
        Ok(())
    }

    fn reopen_file(path: &Path) -> Result<File> {
        Ok(File::options().read(true).write(true).open(path)?)
    }

    fn load_handle(&self, name: &str) -> Result<TableHandle> {
        let path = self.table_path(name);
        let file = Self::reopen_file(&path)?;
        let mut io = TableIo::new(file);
        let header = Header::parse(&mut io)?;
        let lookup = StringLookup::build(&mut io, &header)?;
        Ok(TableHandle {
            io,
            header,
            lookup,
            index: None,
        })
    }

    fn handle_mut(&mut self, name: &str) -> Result<&mut TableHandle> {
        if !self.tables.contains_key(name) {
            if !self.table_path(name).exists() {
                return Err(Error::NoSuchTable(name.to_string()));
            }
            let handle = self.load_handle(name)?;
            self.tables.insert(name.to_string(), handle);
        }
        Ok(self.tables.get_mut(name).expect("just inserted"))
    }

    fn ensure_index(&mut self, name: &str) -> Result<()> {
        let opts = self.opts;
        let handle = self.handle_mut(name)?;
        if handle.index.is_none() {
            debug!("building index for table {name:?}");
            let index = TableIndex::build(&mut handle.io, &handle.header, &opts)?;
            handle.index = Some(index);
        }
        Ok(())
    }

    /// Create a new table file named `name` with the given field
    /// signature. Fails with [`Error::TableExists`] if a table with
    /// that name is already on disk.
    pub fn create_table(&mut self, name: &str, signature: TableSignature) -> Result<()> {
        Self::validate_table_name(name)?;
        let path = self.table_path(name);
        if path.exists() {
            return Err(Error::TableExists(name.to_string()));
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let mut io = TableIo::new(file);
        let header = match Header::create(&mut io, &signature) {
            Ok(h) => h,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };
        info!("created table {name:?} with {} field(s)", header.signature.len());
        self.tables.insert(
            name.to_string(),
            TableHandle {
                io,
                header,
                lookup: StringLookup::new(),
                index: Some(TableIndex::new()),
            },
        );
        Ok(())
    }

    /// Permanently remove a table's file. Drops any cached state for it.
    pub fn delete_table(&mut self, name: &str) -> Result<()> {
        let path = self.table_path(name);
        if !path.exists() {
            return Err(Error::NoSuchTable(name.to_string()));
        }
        self.tables.remove(name);
        fs::remove_file(&path)?;
        info!("deleted table {name:?}");
        Ok(())
    }

    /// Names of every table currently present in the database directory.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("table") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn get_table_signature(&mut self, name: &str) -> Result<TableSignature> {
        Ok(self.handle_mut(name)?.header.signature.clone())
    }

    /// Insert `entry` into `name`, returning the id assigned to it.
    pub fn add_entry(&mut self, name: &str, entry: Entry) -> Result<EntryId> {
        let path = self.table_path(name);
        let opts = self.opts;
        let handle = self.handle_mut(name)?;

        let id = append(
            &mut handle.io,
            &mut handle.header,
            &mut handle.lookup,
            Some(&path),
            &opts,
            &mut || Self::reopen_file(&path),
            &entry,
        )?;
        if let Some(index) = handle.index.as_mut() {
            index.insert(id, entry);
        }
        Ok(id)
    }

    /// The first entry whose `field` equals `value`, with the id it
    /// was assigned on insert; `None` if no entry matches.
    pub fn get_entry(&mut self, name: &str, field: &str, value: &Value) -> Result<Option<(EntryId, Entry)>> {
        self.ensure_index(name)?;
        let handle = self.handle_mut(name)?;
        let index = handle.index.as_ref().expect("ensure_index just built it");
        Ok(index
            .lookup(field, value)
            .first()
            .and_then(|&id| index.get(id).map(|e| (id, e.clone()))))
    }

    /// Every entry whose `field` equals `value`, in insertion order.
    pub fn get_entries(&mut self, name: &str, field: &str, value: &Value) -> Result<Vec<(EntryId, Entry)>> {
        self.ensure_index(name)?;
        let handle = self.handle_mut(name)?;
        let index = handle.index.as_ref().expect("ensure_index just built it");
        Ok(index
            .lookup(field, value)
            .iter()
            .filter_map(|&id| index.get(id).map(|e| (id, e.clone())))
            .collect())
    }

    /// `(signature, entries)` for the whole table, entries sorted by
    /// ascending id.
    pub fn get_complete_table(&mut self, name: &str) -> Result<(TableSignature, Vec<(EntryId, Entry)>)> {
        let signature = self.get_table_signature(name)?;
        self.ensure_index(name)?;
        let handle = self.handle_mut(name)?;
        let mut entries = handle.index.as_ref().expect("ensure_index just built it").all();
        entries.sort_by_key(|(id, _)| *id);
        Ok((signature, entries))
    }

    /// Number of entries currently stored in `name`, read from the
    /// entry mini-header without building the full index.
    pub fn get_table_size(&mut self, name: &str) -> Result<usize> {
        let handle = self.handle_mut(name)?;
        let mini = EntryMiniHeader::parse(&mut handle.io, handle.header.entry_buffer_offset)?;
        Ok(mini.nentries.max(0) as usize)
    }

    /// Values of `fields` (in the order given) for the first entry
    /// whose `field` equals `value`; a single bare value when exactly
    /// one field is requested, the tuple otherwise. `None` if no entry
    /// matches.
    pub fn select_entry(
        &mut self,
        name: &str,
        fields: &[String],
        field: &str,
        value: &Value,
    ) -> Result<Option<Selected>> {
        let Some((_, entry)) = self.get_entry(name, field, value)? else {
            return Ok(None);
        };
        Ok(Some(Selected::from_values(select_fields(name, &entry, fields)?)))
    }

    /// Values of `fields` for every entry matching `field`/`value`,
    /// concatenated in insertion order (not grouped per entry).
    pub fn select_entries(
        &mut self,
        name: &str,
        fields: &[String],
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>> {
        let matches = self.get_entries(name, field, value)?;
        let mut out = Vec::with_capacity(matches.len() * fields.len());
        for (_, entry) in &matches {
            out.extend(select_fields(name, entry, fields)?);
        }
        Ok(out)
    }
}

/// Result of [`Database::select_entry`]: a single value when exactly
/// one field was requested, the tuple of values otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selected {
    One(Value),
    Many(Vec<Value>),
}

impl Selected {
    fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            Selected::One(values.pop().expect("len checked above"))
        } else {
            Selected::Many(values)
        }
    }
}

fn select_fields(name: &str, entry: &Entry, fields: &[String]) -> Result<Vec<Value>> {
    fields
        .iter()
        .map(|f| {
            entry.get(f).cloned().ok_or_else(|| {
                Error::BadArgument(format!("table {name:?} has no field named {f:?}"))
            })
        })
        .collect()
}
