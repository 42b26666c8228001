//! Data model shared by every layer of the engine: field types, table
//! signatures, field values, and entries.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// The type of a field in a table signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Str,
}

impl FieldType {
    pub const fn code(self) -> u8 {
        match self {
            FieldType::Integer => 1,
            FieldType::Str => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(FieldType::Integer),
            2 => Ok(FieldType::Str),
            other => Err(Error::FormatError(format!(
                "unknown field type code {other}"
            ))),
        }
    }
}

/// A field value: either a 32-bit signed integer or a UTF-8 string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i32),
    Str(String),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Int(_) => FieldType::Integer,
            Value::Str(_) => FieldType::Str,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Int(_) => None,
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

/// An ordered, named list of `(field_name, field_type)` pairs. Field
/// names are unique within a signature; order fixes the on-disk layout
/// of every entry in the table.
pub type TableSignature = Vec<(String, FieldType)>;

/// Validate a signature: non-empty, unique field names.
pub fn validate_signature(signature: &[(String, FieldType)]) -> Result<()> {
    if signature.is_empty() {
        return Err(Error::BadArgument("table signature has no fields".into()));
    }
    let mut seen = std::collections::HashSet::new();
    for (name, _) in signature {
        if !seen.insert(name.as_str()) {
            return Err(Error::BadArgument(format!(
                "duplicate field name {name:?} in signature"
            )));
        }
    }
    Ok(())
}

/// A row of a table: a mapping from field name to field value.
pub type Entry = HashMap<String, Value>;

/// A positive, monotonically assigned identifier for an entry within a
/// table file. Never reused.
pub type EntryId = i32;

/// Validate `entry` against `signature`: every field in the signature
/// must be present with a value of the declared type, and no extra
/// fields may be present.
pub fn validate_entry(signature: &[(String, FieldType)], entry: &Entry) -> Result<()> {
    if entry.len() != signature.len() {
        return Err(Error::BadArgument(format!(
            "entry has {} fields, signature expects {}",
            entry.len(),
            signature.len()
        )));
    }
    for (name, ty) in signature {
        let value = entry
            .get(name)
            .ok_or_else(|| Error::BadArgument(format!("entry is missing field {name:?}")))?;
        if value.field_type() != *ty {
            return Err(Error::BadArgument(format!(
                "field {name:?} has type {:?}, expected {:?}",
                value.field_type(),
                ty
            )));
        }
        if let Value::Str(s) = value {
            if s.as_bytes().len() > crate::bytes::MAX_STRING_LEN {
                return Err(Error::StringTooLong {
                    len: s.as_bytes().len(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_signature() {
        assert!(validate_signature(&[]).is_err());
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let sig = vec![
            ("a".to_string(), FieldType::Integer),
            ("a".to_string(), FieldType::Str),
        ];
        assert!(validate_signature(&sig).is_err());
    }

    #[test]
    fn entry_must_match_signature_exactly() {
        let sig = vec![
            ("a".to_string(), FieldType::Integer),
            ("b".to_string(), FieldType::Str),
        ];
        let mut entry = Entry::new();
        entry.insert("a".to_string(), Value::Int(1));
        entry.insert("b".to_string(), Value::Str("x".to_string()));
        assert!(validate_entry(&sig, &entry).is_ok());

        entry.insert("c".to_string(), Value::Int(2));
        assert!(validate_entry(&sig, &entry).is_err());
    }

    #[test]
    fn entry_field_type_mismatch_rejected() {
        let sig = vec![("a".to_string(), FieldType::Integer)];
        let mut entry = Entry::new();
        entry.insert("a".to_string(), Value::Str("oops".to_string()));
        assert!(validate_entry(&sig, &entry).is_err());
    }
}
