use std::io;

use thiserror::Error;

/// Errors produced by the ULDB storage engine.
///
/// Every variant corresponds to one of the error sentinels named in the
/// engine's format and facade contract; callers should match on kind
/// rather than on the rendered message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("position {pos} is out of bounds for a file of size {size}")]
    OutOfBounds { pos: i64, size: u64 },

    #[error("unexpected end of file")]
    Eof,

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("encoded string length {len} exceeds the 32767-byte limit")]
    StringTooLong { len: usize },

    #[error("string bytes are not valid UTF-8")]
    EncodingError(#[source] std::str::Utf8Error),

    #[error("format error: {0}")]
    FormatError(String),

    #[error("string buffer cannot grow to fit {need} bytes (capacity {available})")]
    BufferFull { need: usize, available: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
