//! Encode/decode of the table header, entry mini-header, and entry
//! records. Owns the layout constants and offsets of the file format.
//!
//! All readers must obtain offsets from the header that was actually
//! parsed; the constants below describe the layout of a *freshly
//! created* table only (see [`FRESH_STRING_BUFFER_OFFSET`]).

use std::io::{Read, Seek, Write};

use crate::bytes::TableIo;
use crate::error::{Error, Result};
use crate::schema::{validate_signature, FieldType, TableSignature};

/// Raw, non-length-prefixed magic bytes every table file starts with.
pub const MAGIC: [u8; 4] = *b"ULDB";

/// Offset of the string buffer in a freshly created table file.
pub const FRESH_STRING_BUFFER_OFFSET: i64 = 64;
/// Capacity (bytes) of the string buffer in a freshly created table file.
pub const FRESH_STRING_BUFFER_CAPACITY: i64 = 16;
/// Offset of the entry buffer in a freshly created table file.
pub const FRESH_ENTRY_BUFFER_OFFSET: i64 = FRESH_STRING_BUFFER_OFFSET + FRESH_STRING_BUFFER_CAPACITY;

/// Size in bytes of the entry mini-header.
pub const MINI_HEADER_LEN: i64 = 20;

/// `-1` sentinel used for "no such pointer" everywhere in the format.
pub const NONE_PTR: i64 = -1;

/// The parsed table header: signature plus the three buffer offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub signature: TableSignature,
    pub string_buffer_offset: i64,
    pub string_buffer_first_available: i64,
    pub entry_buffer_offset: i64,
}

impl Header {
    /// Number of bytes the signature portion of the header would
    /// encode to: magic + nfields + per-field (type byte + length
    /// prefix + name), not counting the three trailing offset fields.
    pub fn encoded_signature_len(signature: &[(String, FieldType)]) -> usize {
        let mut len = MAGIC.len() + 4;
        for (name, _) in signature {
            len += 1 + 2 + name.as_bytes().len();
        }
        len
    }

    /// Total encoded header length, signature portion plus the three
    /// trailing 4-byte offset fields.
    pub fn encoded_len(signature: &[(String, FieldType)]) -> usize {
        Self::encoded_signature_len(signature) + 4 * 3
    }

    /// Write a fresh header (signature + `FRESH_*` offsets) at the
    /// start of `io`, and initialize the string buffer (zero-filled)
    /// and entry mini-header that follow it.
    ///
    /// Fails with [`Error::BadArgument`] if the encoded header would
    /// overrun the fixed `FRESH_STRING_BUFFER_OFFSET` layout, rather
    /// than silently corrupting the string buffer that follows it.
    pub fn create<F: Read + Write + Seek>(io: &mut TableIo<F>, signature: &TableSignature) -> Result<Header> {
        Self::create_with_offsets(
            io,
            signature,
            FRESH_STRING_BUFFER_OFFSET,
            FRESH_STRING_BUFFER_CAPACITY,
        )
    }

    /// Like [`Header::create`], but with an explicit string buffer
    /// offset and capacity. Used both for fresh tables (via
    /// [`Header::create`], which always passes the `FRESH_*` layout)
    /// and for rewriting a table with a grown string buffer, where the
    /// offset is unchanged but the capacity is larger.
    pub fn create_with_offsets<F: Read + Write + Seek>(
        io: &mut TableIo<F>,
        signature: &TableSignature,
        string_buffer_offset: i64,
        string_buffer_capacity: i64,
    ) -> Result<Header> {
        validate_signature(signature)?;
        let needed = Self::encoded_len(signature);
        if needed as i64 > string_buffer_offset {
            return Err(Error::BadArgument(format!(
                "signature encodes to {needed} header bytes, which exceeds the {string_buffer_offset}-byte initial layout"
            )));
        }
        let entry_buffer_offset = string_buffer_offset + string_buffer_capacity;

        io.goto(0)?;
        write_magic(io)?;
        io.write_int(signature.len() as i64, 4)?;
        for (name, ty) in signature {
            io.write_int(ty.code() as i64, 1)?;
            io.write_string(name)?;
        }
        io.write_int(string_buffer_offset, 4)?;
        io.write_int(string_buffer_offset, 4)?;
        io.write_int(entry_buffer_offset, 4)?;

        init_string_buffer(io, string_buffer_offset, string_buffer_capacity)?;
        init_entry_mini_header(io, entry_buffer_offset)?;

        Ok(Header {
            signature: signature.clone(),
            string_buffer_offset,
            string_buffer_first_available: string_buffer_offset,
            entry_buffer_offset,
        })
    }

    /// Parse the header at the start of `io`. Leaves the cursor
    /// position unspecified; callers that need a known position should
    /// `goto` explicitly afterwards.
    pub fn parse<F: Read + Write + Seek>(io: &mut TableIo<F>) -> Result<Header> {
        io.goto(0)?;
        let mut magic = [0u8; 4];
        for b in magic.iter_mut() {
            *b = io.read_int(1)? as u8;
        }
        if magic != MAGIC {
            return Err(Error::FormatError(format!(
                "bad magic: expected {:?}, got {:?}",
                MAGIC, magic
            )));
        }
        let nfields = io.read_int(4)?;
        if nfields < 0 {
            return Err(Error::FormatError(format!("negative nfields {nfields}")));
        }
        let mut signature = TableSignature::with_capacity(nfields as usize);
        for _ in 0..nfields {
            let type_code = io.read_int(1)? as u8;
            let field_type = FieldType::from_code(type_code)?;
            let field_name = io.read_string()?;
            signature.push((field_name, field_type));
        }
        let string_buffer_offset = io.read_int(4)?;
        let string_buffer_first_available = io.read_int(4)?;
        let entry_buffer_offset = io.read_int(4)?;

        if !(string_buffer_offset <= string_buffer_first_available
            && string_buffer_first_available <= entry_buffer_offset)
        {
            return Err(Error::FormatError(format!(
                "header offsets out of order: string_buffer_offset={string_buffer_offset} first_available={string_buffer_first_available} entry_buffer_offset={entry_buffer_offset}"
            )));
        }

        Ok(Header {
            signature,
            string_buffer_offset,
            string_buffer_first_available,
            entry_buffer_offset,
        })
    }

    /// Size in bytes of one entry record for this header's signature.
    pub fn entry_size(&self) -> i64 {
        entry_record_size(self.signature.len())
    }

    /// Overwrite the `string_buffer_first_available` field in place.
    pub fn write_string_buffer_first_available<F: Read + Write + Seek>(
        &self,
        io: &mut TableIo<F>,
        value: i64,
    ) -> Result<()> {
        let pos = Self::encoded_signature_len(&self.signature) as i64 + 4;
        io.write_int_at(pos, value, 4)?;
        Ok(())
    }
}

/// Fixed size (bytes) of one entry record for a signature of `nfields`
/// fields: id (4) + one 4-byte slot per field + prev/next pointers (8).
pub fn entry_record_size(nfields: usize) -> i64 {
    4 + 4 * nfields as i64 + 8
}

fn write_magic<F: Read + Write + Seek>(io: &mut TableIo<F>) -> Result<()> {
    for b in MAGIC {
        io.write_int(b as i64, 1)?;
    }
    Ok(())
}

fn init_string_buffer<F: Read + Write + Seek>(io: &mut TableIo<F>, offset: i64, capacity: i64) -> Result<()> {
    io.goto(offset)?;
    for _ in 0..capacity {
        io.write_int(0, 1)?;
    }
    Ok(())
}

/// The 20-byte mini-header that begins the entry buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryMiniHeader {
    pub last_used_id: i64,
    pub nentries: i64,
    pub first_entry_pointer: i64,
    pub last_entry_pointer: i64,
    pub reserved_pointer: i64,
}

impl EntryMiniHeader {
    pub fn empty() -> Self {
        EntryMiniHeader {
            last_used_id: 0,
            nentries: 0,
            first_entry_pointer: NONE_PTR,
            last_entry_pointer: NONE_PTR,
            reserved_pointer: NONE_PTR,
        }
    }

    pub fn parse<F: Read + Write + Seek>(io: &mut TableIo<F>, entry_buffer_offset: i64) -> Result<Self> {
        io.goto(entry_buffer_offset)?;
        let last_used_id = io.read_int(4)?;
        let nentries = io.read_int(4)?;
        let first_entry_pointer = io.read_int(4)?;
        let last_entry_pointer = io.read_int(4)?;
        let reserved_pointer = io.read_int(4)?;
        if nentries < 0 {
            return Err(Error::FormatError(format!("negative nentries {nentries}")));
        }
        if (nentries == 0) != (first_entry_pointer == NONE_PTR) {
            return Err(Error::FormatError(
                "first_entry_pointer/nentries are inconsistent with an empty list".into(),
            ));
        }
        Ok(EntryMiniHeader {
            last_used_id,
            nentries,
            first_entry_pointer,
            last_entry_pointer,
            reserved_pointer,
        })
    }

    pub fn write<F: Read + Write + Seek>(&self, io: &mut TableIo<F>, entry_buffer_offset: i64) -> Result<()> {
        io.goto(entry_buffer_offset)?;
        io.write_int(self.last_used_id, 4)?;
        io.write_int(self.nentries, 4)?;
        io.write_int(self.first_entry_pointer, 4)?;
        io.write_int(self.last_entry_pointer, 4)?;
        io.write_int(self.reserved_pointer, 4)?;
        Ok(())
    }
}

fn init_entry_mini_header<F: Read + Write + Seek>(io: &mut TableIo<F>, entry_buffer_offset: i64) -> Result<()> {
    EntryMiniHeader::empty().write(io, entry_buffer_offset)
}

/// One entry record as stored on disk: an id plus one raw 4-byte slot
/// per signature field (an integer value, or a string-buffer offset),
/// plus prev/next pointers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub id: i64,
    /// One slot per signature field, in signature order. INTEGER
    /// fields store the value directly; STRING fields store the
    /// absolute offset of the interned string's length prefix.
    pub slots: Vec<i64>,
    pub prev: i64,
    pub next: i64,
}

impl RawRecord {
    pub fn write<F: Read + Write + Seek>(&self, io: &mut TableIo<F>, pos: i64) -> Result<()> {
        io.goto(pos)?;
        io.write_int(self.id, 4)?;
        for slot in &self.slots {
            io.write_int(*slot, 4)?;
        }
        io.write_int(self.prev, 4)?;
        io.write_int(self.next, 4)?;
        Ok(())
    }

    pub fn read<F: Read + Write + Seek>(io: &mut TableIo<F>, pos: i64, nfields: usize) -> Result<Self> {
        io.goto(pos)?;
        let id = io.read_int(4)?;
        let mut slots = Vec::with_capacity(nfields);
        for _ in 0..nfields {
            slots.push(io.read_int(4)?);
        }
        let prev = io.read_int(4)?;
        let next = io.read_int(4)?;
        Ok(RawRecord { id, slots, prev, next })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn fresh_table(signature: &TableSignature) -> TableIo<Cursor<Vec<u8>>> {
        let mut io = TableIo::new(Cursor::new(Vec::new()));
        Header::create(&mut io, signature).unwrap();
        io
    }

    fn sample_signature() -> TableSignature {
        vec![
            ("MNEMONIQUE".to_string(), FieldType::Integer),
            ("NOM".to_string(), FieldType::Str),
            ("COORDINATEUR".to_string(), FieldType::Str),
            ("CREDITS".to_string(), FieldType::Integer),
        ]
    }

    #[test]
    fn fresh_header_has_expected_offsets_and_magic() {
        let sig = sample_signature();
        let mut io = fresh_table(&sig);
        let header = Header::parse(&mut io).unwrap();
        assert_eq!(header.string_buffer_offset, FRESH_STRING_BUFFER_OFFSET);
        assert_eq!(header.string_buffer_first_available, FRESH_STRING_BUFFER_OFFSET);
        assert_eq!(header.entry_buffer_offset, FRESH_ENTRY_BUFFER_OFFSET);
        assert_eq!(header.signature, sig);

        io.goto(0).unwrap();
        let mut magic = [0u8; 4];
        for b in magic.iter_mut() {
            *b = io.read_int(1).unwrap() as u8;
        }
        assert_eq!(magic, MAGIC);
    }

    #[test]
    fn fresh_file_size_matches_header_plus_buffer_plus_mini_header() {
        let sig = sample_signature();
        let mut io = fresh_table(&sig);
        let expected = Header::encoded_len(&sig) as u64
            + FRESH_STRING_BUFFER_CAPACITY as u64
            + MINI_HEADER_LEN as u64;
        assert_eq!(io.size().unwrap(), expected);
        // For this specific signature the encoded header is exactly 64 bytes.
        assert_eq!(Header::encoded_len(&sig), FRESH_STRING_BUFFER_OFFSET as usize);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut io = TableIo::new(Cursor::new(vec![0u8; 64]));
        io.goto(0).unwrap();
        io.write_int(b'X' as i64, 1).unwrap();
        io.write_int(b'X' as i64, 1).unwrap();
        io.write_int(b'X' as i64, 1).unwrap();
        io.write_int(b'X' as i64, 1).unwrap();
        assert!(matches!(Header::parse(&mut io), Err(Error::FormatError(_))));
    }

    #[test]
    fn oversized_signature_is_rejected_at_creation() {
        let sig = vec![(
            "a_very_long_field_name_that_blows_the_budget".to_string(),
            FieldType::Str,
        )];
        let mut io = TableIo::new(Cursor::new(Vec::new()));
        assert!(matches!(
            Header::create(&mut io, &sig),
            Err(Error::BadArgument(_))
        ));
    }

    #[test]
    fn empty_mini_header_roundtrips() {
        let sig = sample_signature();
        let mut io = fresh_table(&sig);
        let header = Header::parse(&mut io).unwrap();
        let mini = EntryMiniHeader::parse(&mut io, header.entry_buffer_offset).unwrap();
        assert_eq!(mini, EntryMiniHeader::empty());
    }

    #[test]
    fn entry_record_roundtrip() {
        let sig = sample_signature();
        let mut io = fresh_table(&sig);
        let header = Header::parse(&mut io).unwrap();
        let pos = header.entry_buffer_offset + MINI_HEADER_LEN;
        // Extend the in-memory file enough to hold one record.
        let record = RawRecord {
            id: 1,
            slots: vec![101, 200, 300, 10],
            prev: -1,
            next: -1,
        };
        let size = header.entry_size();
        io.goto(0).unwrap();
        let cur_len = io.size().unwrap() as i64;
        if pos + size > cur_len {
            io.goto(cur_len).unwrap();
            for _ in 0..(pos + size - cur_len) {
                io.write_int(0, 1).unwrap();
            }
        }
        record.write(&mut io, pos).unwrap();
        let read_back = RawRecord::read(&mut io, pos, sig.len()).unwrap();
        assert_eq!(read_back, record);
    }
}
