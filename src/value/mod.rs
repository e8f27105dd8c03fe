//! # Row and Value Model
//!
//! The typed row representation handed over by the host engine for each
//! output partition.
//!
//! ## Design Decisions
//!
//! - **Shared schema**: every row of a partition points at the same
//!   `Arc<Schema>`, so rows stay cheap to move into the write pipeline
//! - **Closed type set**: string, integer, boolean, binary and struct are
//!   the semantic types the pipeline distinguishes; anything richer is the
//!   host engine's concern
//! - **Immutable rows**: a `Row` exposes no mutating API once built
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docbridge::value::{DataType, Field, Row, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Field::new("URI", DataType::String),
//!     Field::nullable("CitationID", DataType::Integer),
//! ]).into_shared();
//!
//! let row = Row::new(schema, vec![Value::from("/a.json"), Value::Integer(1)])?;
//! assert_eq!(row.get("CitationID"), Some(&Value::Integer(1)));
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Semantic column types understood by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Boolean,
    Binary,
    /// Nested record with its own named fields
    Struct(Vec<Field>),
}

impl DataType {
    /// Human-readable type name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
            DataType::Binary => "binary",
            DataType::Struct(_) => "struct",
        }
    }

    /// Check if a non-null value matches this type.
    ///
    /// Struct values must carry exactly the declared fields, in order.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::String, Value::String(_))
            | (DataType::Integer, Value::Integer(_))
            | (DataType::Boolean, Value::Boolean(_))
            | (DataType::Binary, Value::Binary(_)) => true,
            (DataType::Struct(fields), Value::Struct(entries)) => {
                fields.len() == entries.len()
                    && fields.iter().zip(entries).all(|(field, (name, inner))| {
                        field.name == *name
                            && ((inner.is_null() && field.nullable)
                                || field.data_type.matches(inner))
                    })
            }
            _ => false,
        }
    }

    /// Ordering comparisons are only meaningful for scalar, non-binary types
    pub fn is_orderable(&self) -> bool {
        matches!(self, DataType::String | DataType::Integer | DataType::Boolean)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
}

impl Field {
    /// Non-nullable column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Field {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    /// Nullable column
    pub fn nullable(name: impl Into<String>, data_type: DataType) -> Self {
        Field {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

/// Ordered column definitions shared by all rows of a partition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    /// Wrap in an `Arc` for sharing across rows
    pub fn into_shared(self) -> Arc<Schema> {
        Arc::new(self)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a column by exact (case-sensitive) name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Row construction error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("Row has {actual} values but schema declares {expected} columns")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Column '{column}' expects {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    #[error("Column '{column}' is not nullable")]
    UnexpectedNull { column: String },
}

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    Binary(Vec<u8>),
    /// Nested record: (field name, value) pairs in schema order
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Type name of the value ("null" for `Null`)
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Binary(_) => "binary",
            Value::Struct(_) => "struct",
        }
    }

    /// Compare two values of the same scalar type.
    ///
    /// Returns `None` for nulls, mixed types, binary and struct values:
    /// those have no ordering in either engine.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// JSON form used for document content and variable bindings.
    ///
    /// Binary values are base64-encoded; structs become nested objects.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Binary(bytes) => serde_json::Value::String(BASE64.encode(bytes)),
            Value::Struct(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Plain-text rendering used for URIs and external-variable values.
    ///
    /// Returns `None` for `Null`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Binary(bytes) => Some(BASE64.encode(bytes)),
            Value::Struct(_) => Some(self.to_json().to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Struct(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Binary(bytes)
    }
}

/// One input row: values aligned with a shared schema
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row, validating arity, types and nullability against the schema
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self, RowError> {
        if schema.len() != values.len() {
            return Err(RowError::ArityMismatch {
                expected: schema.len(),
                actual: values.len(),
            });
        }
        for (field, value) in schema.fields().iter().zip(&values) {
            if value.is_null() {
                if !field.nullable {
                    return Err(RowError::UnexpectedNull {
                        column: field.name.clone(),
                    });
                }
                continue;
            }
            if !field.data_type.matches(value) {
                return Err(RowError::TypeMismatch {
                    column: field.name.clone(),
                    expected: field.data_type.name().to_string(),
                    got: value.type_name().to_string(),
                });
            }
        }
        Ok(Row { schema, values })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Look up a value by exact column name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Iterate `(column name, value)` pairs in schema order
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema.names().zip(self.values.iter())
    }

    /// The row as a JSON object keyed by column name
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns()
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect()
    }
}
