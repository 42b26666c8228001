//! A single-node, synchronous table database: each table is an
//! independent binary file holding a header, an append-only string
//! buffer, and a doubly-linked list of fixed-size entry records.
//!
//! See [`Database`] for the entry point.

pub mod bytes;
pub mod db;
pub mod entries;
pub mod error;
pub mod format;
pub mod index;
pub mod schema;
pub mod strings;

pub use crate::db::{Database, Selected};
pub use crate::error::{Error, Result};
pub use crate::schema::{Entry, EntryId, FieldType, TableSignature, Value};

/// Tunable knobs for the engine, separate from any single table's
/// on-disk state.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Factor by which a table's string buffer capacity is multiplied
    /// each time it is grown to make room for a new interned string.
    ///
    /// Default: 4
    pub string_buffer_grow_factor: u32,
    /// Capacity in bytes of the string buffer in a freshly created
    /// table. Informational only; table creation always uses
    /// [`format::FRESH_STRING_BUFFER_CAPACITY`]. This field documents
    /// that value for callers inspecting `Options`.
    ///
    /// Default: 16
    pub initial_string_buffer_capacity: i64,
    /// Upper bound on the number of records a single entry-list
    /// traversal will visit before concluding the file is corrupted.
    ///
    /// Default: 1,000,000
    pub max_traversal_steps: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            string_buffer_grow_factor: 4,
            initial_string_buffer_capacity: format::FRESH_STRING_BUFFER_CAPACITY,
            max_traversal_steps: 1_000_000,
        }
    }
}
