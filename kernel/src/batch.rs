// Row Batches
//
// Typed values and the validated, schema-bound row batches that callers
// hand to the writer.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::schema::{DataType, Schema, SchemaError};

/// A single typed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    /// Microseconds since the Unix epoch, UTC.
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of the value, `None` for null.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Utf8(_) => Some(DataType::Utf8),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    /// Order two values of the same type.
    ///
    /// Returns `None` for nulls, mixed types and NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Convert a JSON value into a typed value of `data_type`.
    ///
    /// Timestamps accept integer microseconds or RFC 3339 strings.
    pub fn from_json(json: &serde_json::Value, data_type: DataType) -> Result<Value, String> {
        use serde_json::Value as Json;

        if json.is_null() {
            return Ok(Value::Null);
        }

        let value = match (data_type, json) {
            (DataType::Boolean, Json::Bool(b)) => Value::Boolean(*b),
            (DataType::Int64, Json::Number(n)) => {
                Value::Int64(n.as_i64().ok_or_else(|| format!("{n} is not a 64-bit integer"))?)
            }
            (DataType::Float64, Json::Number(n)) => {
                Value::Float64(n.as_f64().ok_or_else(|| format!("{n} is not a float"))?)
            }
            (DataType::Utf8, Json::String(s)) => Value::Utf8(s.clone()),
            (DataType::Timestamp, Json::Number(n)) => Value::Timestamp(
                n.as_i64()
                    .ok_or_else(|| format!("{n} is not a microsecond timestamp"))?,
            ),
            (DataType::Timestamp, Json::String(s)) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(s)
                    .map_err(|e| format!("invalid RFC 3339 timestamp `{s}`: {e}"))?;
                Value::Timestamp(parsed.timestamp_micros())
            }
            (expected, other) => return Err(format!("expected {expected}, found {other}")),
        };

        Ok(value)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("invalid batch schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("row {row} has {actual} values, schema has {expected} columns")]
    WidthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row}: column `{column}` expects {expected}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: DataType,
    },

    #[error("row {row}: column `{column}` is not nullable")]
    NullNotAllowed { row: usize, column: String },

    #[error("row {row}: {reason}")]
    InvalidJson { row: usize, reason: String },
}

/// Ordered rows sharing one schema.
///
/// Values in each row are positioned by schema column index.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn try_new(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self, BatchError> {
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(BatchError::WidthMismatch {
                    row: row_idx,
                    expected: schema.len(),
                    actual: row.len(),
                });
            }

            for (field, value) in schema.fields().iter().zip(row) {
                match value.data_type() {
                    None if !field.nullable => {
                        return Err(BatchError::NullNotAllowed {
                            row: row_idx,
                            column: field.name.clone(),
                        })
                    }
                    Some(actual) if actual != field.data_type => {
                        return Err(BatchError::TypeMismatch {
                            row: row_idx,
                            column: field.name.clone(),
                            expected: field.data_type,
                        })
                    }
                    _ => {}
                }
            }
        }

        Ok(Self { schema, rows })
    }

    /// Build a batch from JSON rows, each either an array in schema order
    /// or an object keyed by column name (absent keys become null).
    pub fn from_json_rows(schema: Schema, rows: &[serde_json::Value]) -> Result<Self, BatchError> {
        let mut typed = Vec::with_capacity(rows.len());

        for (row_idx, row) in rows.iter().enumerate() {
            let cells: Vec<&serde_json::Value> = match row {
                serde_json::Value::Array(values) => {
                    if values.len() != schema.len() {
                        return Err(BatchError::WidthMismatch {
                            row: row_idx,
                            expected: schema.len(),
                            actual: values.len(),
                        });
                    }
                    values.iter().collect()
                }
                serde_json::Value::Object(map) => schema
                    .fields()
                    .iter()
                    .map(|f| map.get(&f.name).unwrap_or(&serde_json::Value::Null))
                    .collect(),
                other => {
                    return Err(BatchError::InvalidJson {
                        row: row_idx,
                        reason: format!("expected an array or object, found {other}"),
                    })
                }
            };

            let values = schema
                .fields()
                .iter()
                .zip(cells)
                .map(|(field, cell)| {
                    Value::from_json(cell, field.data_type).map_err(|reason| BatchError::InvalidJson {
                        row: row_idx,
                        reason: format!("column `{}`: {reason}", field.name),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            typed.push(values);
        }

        Self::try_new(schema, typed)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
