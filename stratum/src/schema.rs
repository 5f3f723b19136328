//! Tuple schemas: an ordered sequence of typed, optionally named fields.

use std::fmt;

use crate::error::{Result, StorageError};

/// The type of a single tuple field. Every type has a fixed on-disk size,
/// so tuples of a given schema are all the same length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 32-bit signed integer, big-endian.
    Int,
    /// Variable-length string with a fixed byte capacity: a 4-byte
    /// big-endian length prefix followed by `cap` bytes of content,
    /// zero-padded past the stored length.
    Text(usize),
}

impl FieldType {
    /// On-disk size of a value of this type.
    pub fn byte_size(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Text(cap) => 4 + cap,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => write!(f, "int"),
            FieldType::Text(cap) => write!(f, "text({cap})"),
        }
    }
}

/// One field of a schema. Names are optional and play no part in schema
/// equality; they exist for lookup by operators that qualify fields with a
/// table alias (`alias.field`).
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub ty: FieldType,
    pub name: Option<String>,
}

impl FieldDef {
    pub fn named(ty: FieldType, name: impl Into<String>) -> Self {
        Self { ty, name: Some(name.into()) }
    }

    pub fn anonymous(ty: FieldType) -> Self {
        Self { ty, name: None }
    }
}

/// Describes the layout of every tuple in one table.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// A schema with the given types and no field names.
    pub fn from_types(types: &[FieldType]) -> Self {
        Self {
            fields: types.iter().map(|&ty| FieldDef::anonymous(ty)).collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, i: usize) -> FieldType {
        self.fields[i].ty
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.fields[i].name.as_deref()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Index of the first field whose stored name matches `name` exactly.
    /// Anonymous fields never match.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
            .ok_or_else(|| StorageError::FieldNotFound { name: name.to_string() })
    }

    /// Total on-disk size of one tuple of this schema.
    pub fn byte_size(&self) -> usize {
        self.fields.iter().map(|f| f.ty.byte_size()).sum()
    }

    /// Concatenates `a`'s fields followed by `b`'s.
    pub fn merge(a: &Schema, b: &Schema) -> Schema {
        let mut fields = a.fields.clone();
        fields.extend(b.fields.iter().cloned());
        Schema::new(fields)
    }
}

/// Two schemas are equal iff they have the same field count and the same
/// type sequence; names are ignored.
impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.ty == b.ty)
    }
}

impl Eq for Schema {}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &field.name {
                Some(name) => write!(f, "{}({})", field.ty, name)?,
                None => write!(f, "{}", field.ty)?,
            }
        }
        Ok(())
    }
}
