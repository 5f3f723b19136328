//! Typed field values and the tuples that hold them.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::schema::{FieldType, Schema};
use crate::{PageId, RecordId};

/// One field value. The stored form is fixed-size per [`FieldType`]; text
/// longer than its capacity is truncated at a character boundary on write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i32),
    Text(String),
}

impl Value {
    /// Whether this value can be stored in a field of type `ty`.
    pub fn matches(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Value::Int(_), FieldType::Int) | (Value::Text(_), FieldType::Text(_))
        )
    }

    pub(crate) fn serialize_into(&self, ty: FieldType, out: &mut Vec<u8>) {
        match (self, ty) {
            (Value::Int(v), FieldType::Int) => out.extend_from_slice(&v.to_be_bytes()),
            (Value::Text(s), FieldType::Text(cap)) => {
                let content = truncate_to_boundary(s, cap);
                out.extend_from_slice(&(content.len() as u32).to_be_bytes());
                out.extend_from_slice(content.as_bytes());
                out.resize(out.len() + (cap - content.len()), 0);
            }
            // Tuple construction rejects mismatched kinds.
            _ => unreachable!("value kind does not match field type"),
        }
    }

    pub(crate) fn parse(ty: FieldType, bytes: &[u8], page: PageId) -> Result<Value> {
        let prefix = |reason: &str| StorageError::CorruptPage {
            page,
            reason: reason.to_string(),
        };
        match ty {
            FieldType::Int => {
                let raw: [u8; 4] = bytes
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| prefix("short integer field"))?;
                Ok(Value::Int(i32::from_be_bytes(raw)))
            }
            FieldType::Text(cap) => {
                if bytes.len() < 4 + cap {
                    return Err(prefix("short text field"));
                }
                let raw: [u8; 4] = bytes
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| prefix("short text field"))?;
                let len = u32::from_be_bytes(raw) as usize;
                if len > cap {
                    return Err(StorageError::CorruptPage {
                        page,
                        reason: format!("text length {len} exceeds capacity {cap}"),
                    });
                }
                let content =
                    std::str::from_utf8(&bytes[4..4 + len]).map_err(|_| StorageError::CorruptPage {
                        page,
                        reason: "text field is not valid UTF-8".to_string(),
                    })?;
                Ok(Value::Text(content.to_string()))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The longest prefix of `s` that fits in `cap` bytes without splitting a
/// character.
fn truncate_to_boundary(s: &str, cap: usize) -> &str {
    if s.len() <= cap {
        return s;
    }
    let mut end = cap;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A mutable container of field values laid out per its schema, plus the
/// record id of its storage location once placed on a page.
#[derive(Debug, Clone)]
pub struct Tuple {
    schema: Arc<Schema>,
    values: Vec<Value>,
    rid: Option<RecordId>,
}

impl Tuple {
    /// Fails with a schema mismatch if the value count or any value kind
    /// disagrees with the schema.
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.num_fields() {
            return Err(StorageError::SchemaMismatch);
        }
        for (i, value) in values.iter().enumerate() {
            if !value.matches(schema.field_type(i)) {
                return Err(StorageError::SchemaMismatch);
            }
        }
        Ok(Self { schema, values, rid: None })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn value(&self, i: usize) -> &Value {
        &self.values[i]
    }

    pub fn set_value(&mut self, i: usize, value: Value) -> Result<()> {
        if !value.matches(self.schema.field_type(i)) {
            return Err(StorageError::SchemaMismatch);
        }
        self.values[i] = value;
        Ok(())
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_record_id(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }

    pub fn clear_record_id(&mut self) {
        self.rid = None;
    }

    pub(crate) fn serialize_into(&self, out: &mut Vec<u8>) {
        for (i, value) in self.values.iter().enumerate() {
            value.serialize_into(self.schema.field_type(i), out);
        }
    }

    pub(crate) fn parse(schema: Arc<Schema>, rid: RecordId, bytes: &[u8]) -> Result<Self> {
        let mut values = Vec::with_capacity(schema.num_fields());
        let mut offset = 0;
        for i in 0..schema.num_fields() {
            let ty = schema.field_type(i);
            let size = ty.byte_size();
            values.push(Value::parse(ty, &bytes[offset..offset + size], rid.page)?);
            offset += size;
        }
        Ok(Self { schema, values, rid: Some(rid) })
    }
}

/// Tuples compare by schema type sequence and field values; storage
/// location and identity are ignored.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.values == other.values
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}
