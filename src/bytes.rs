//! Positioned read/write of signed little-endian integers and
//! length-prefixed UTF-8 strings over a seekable byte stream.
//!
//! This is the lowest layer of the table file format: the codec
//! (`crate::format`) and string buffer manager (`crate::strings`) are
//! both built entirely out of the operations here.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// Maximum encoded length (in bytes) of a string value.
pub const MAX_STRING_LEN: usize = 32767;

/// A byte-oriented wrapper around any seekable read/write stream.
///
/// `TableIo` does not buffer: every call is a direct `read`/`write`/`seek`
/// on the underlying stream, since the table file format relies on
/// precise cursor positions and small, infrequent accesses rather than
/// sequential throughput.
pub struct TableIo<F> {
    inner: F,
}

impl<F> TableIo<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut F {
        &mut self.inner
    }
}

impl<F: Read + Write + Seek> TableIo<F> {
    /// Current byte offset of the cursor.
    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Total number of bytes in the stream.
    pub fn size(&mut self) -> Result<u64> {
        let cur = self.tell()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(cur))?;
        Ok(end)
    }

    /// Seek to an absolute position, or to `size() + pos` if `pos < 0`.
    ///
    /// Returns the resolved absolute position.
    pub fn goto(&mut self, pos: i64) -> Result<u64> {
        let size = self.size()?;
        let resolved = if pos < 0 {
            size.checked_sub(pos.unsigned_abs())
                .ok_or(Error::OutOfBounds { pos, size })?
        } else {
            pos as u64
        };
        if resolved > size {
            return Err(Error::OutOfBounds { pos, size });
        }
        self.inner.seek(SeekFrom::Start(resolved))?;
        Ok(resolved)
    }

    /// Write `n` as a little-endian two's-complement integer occupying
    /// exactly `width` bytes (`width` in `{1, 2, 4}`).
    pub fn write_int(&mut self, n: i64, width: u8) -> Result<usize> {
        let (min, max) = int_range(width)?;
        if !(min..=max).contains(&n) {
            return Err(Error::BadArgument(format!(
                "integer {n} does not fit in {width} signed byte(s)"
            )));
        }
        let bytes = n.to_le_bytes();
        let buf = &bytes[..width as usize];
        let written = self.inner.write(buf)?;
        if written != width as usize {
            return Err(Error::ShortWrite {
                expected: width as usize,
                actual: written,
            });
        }
        Ok(written)
    }

    /// Read a little-endian two's-complement integer occupying exactly
    /// `width` bytes (`width` in `{1, 2, 4}`).
    pub fn read_int(&mut self, width: u8) -> Result<i64> {
        int_range(width)?;
        let mut buf = [0u8; 4];
        let slice = &mut buf[..width as usize];
        let read = read_up_to(&mut self.inner, slice)?;
        if read != width as usize {
            return Err(Error::ShortRead {
                expected: width as usize,
                actual: read,
            });
        }
        Ok(sign_extend(slice))
    }

    /// Encode `s` as UTF-8, write a 2-byte signed length prefix followed
    /// by the encoded bytes. Returns the total number of bytes written.
    pub fn write_string(&mut self, s: &str) -> Result<usize> {
        let encoded = s.as_bytes();
        if encoded.len() > MAX_STRING_LEN {
            return Err(Error::StringTooLong { len: encoded.len() });
        }
        let prefix_written = self.write_int(encoded.len() as i64, 2)?;
        let body_written = self.inner.write(encoded)?;
        if body_written != encoded.len() {
            return Err(Error::ShortWrite {
                expected: encoded.len(),
                actual: body_written,
            });
        }
        Ok(prefix_written + body_written)
    }

    /// Read a 2-byte signed length prefix followed by that many UTF-8
    /// bytes, and decode them.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_int(2)?;
        if !(0..=MAX_STRING_LEN as i64).contains(&len) {
            return Err(Error::FormatError(format!(
                "invalid string length prefix {len}"
            )));
        }
        let len = len as usize;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Eof
            } else {
                Error::Io(e)
            }
        })?;
        String::from_utf8(buf).map_err(|e| Error::EncodingError(e.utf8_error()))
    }

    /// Seek to `pos`, perform `op`, then restore the original cursor
    /// position if `op` fails. On success the cursor is left wherever
    /// `op` leaves it (immediately after the bytes read/written).
    fn at<T>(&mut self, pos: i64, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.tell()?;
        self.goto(pos)?;
        match op(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                // Best-effort restore; the original error is what matters.
                let _ = self.goto(saved as i64);
                Err(e)
            }
        }
    }

    pub fn write_int_at(&mut self, pos: i64, n: i64, width: u8) -> Result<usize> {
        self.at(pos, |io| io.write_int(n, width))
    }

    pub fn read_int_at(&mut self, pos: i64, width: u8) -> Result<i64> {
        self.at(pos, |io| io.read_int(width))
    }

    pub fn write_string_at(&mut self, pos: i64, s: &str) -> Result<usize> {
        self.at(pos, |io| io.write_string(s))
    }

    pub fn read_string_at(&mut self, pos: i64) -> Result<String> {
        self.at(pos, |io| io.read_string())
    }
}

fn read_up_to(r: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    match r.read_exact(buf) {
        Ok(()) => Ok(buf.len()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
        Err(e) => Err(Error::Io(e)),
    }
}

fn int_range(width: u8) -> Result<(i64, i64)> {
    match width {
        1 => Ok((i8::MIN as i64, i8::MAX as i64)),
        2 => Ok((i16::MIN as i64, i16::MAX as i64)),
        4 => Ok((i32::MIN as i64, i32::MAX as i64)),
        _ => Err(Error::BadArgument(format!(
            "integer width must be 1, 2 or 4 bytes, got {width}"
        ))),
    }
}

fn sign_extend(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        _ => unreachable!("int_range rejects any other width"),
    }
}
