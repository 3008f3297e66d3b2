// Table Schema
//
// Column types, fields and the append-compatibility rules that decide
// whether a batch may be written into an existing table.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Microseconds since the Unix epoch, UTC.
    Timestamp,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),

    #[error("column `{0}` is missing from the batch")]
    MissingColumn(String),

    #[error("column `{column}` has type {actual}, table expects {expected}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("column `{0}` is non-nullable in the table but nullable in the batch")]
    NullabilityMismatch(String),
}

/// Ordered set of uniquely named fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        if let Some(name) = first_duplicate(&fields) {
            return Err(SchemaError::DuplicateColumn(name));
        }
        Ok(Self { fields })
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

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Name of the first repeated column, if any.
    ///
    /// Deserialized schemas skip the constructor, so callers that accept
    /// schemas from the log re-check with this.
    pub fn duplicate_column(&self) -> Option<String> {
        first_duplicate(&self.fields)
    }

    /// Merge a batch schema into this (table) schema for an append.
    ///
    /// Every table column must be present in the batch with the same type,
    /// and a non-nullable table column must stay non-nullable. Batch columns
    /// unknown to the table are appended as nullable columns, so existing
    /// data files read them as null.
    pub fn merge_for_append(&self, batch: &Schema) -> Result<Schema, SchemaError> {
        for field in &self.fields {
            let incoming = batch
                .field(&field.name)
                .ok_or_else(|| SchemaError::MissingColumn(field.name.clone()))?;

            if incoming.data_type != field.data_type {
                return Err(SchemaError::TypeMismatch {
                    column: field.name.clone(),
                    expected: field.data_type,
                    actual: incoming.data_type,
                });
            }

            if !field.nullable && incoming.nullable {
                return Err(SchemaError::NullabilityMismatch(field.name.clone()));
            }
        }

        let mut merged = self.fields.clone();
        for field in &batch.fields {
            if self.field(&field.name).is_none() {
                merged.push(Field {
                    nullable: true,
                    ..field.clone()
                });
            }
        }

        Ok(Schema { fields: merged })
    }
}

fn first_duplicate(fields: &[Field]) -> Option<String> {
    let mut seen = HashSet::new();
    fields
        .iter()
        .find(|f| !seen.insert(f.name.as_str()))
        .map(|f| f.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("message", DataType::Utf8, true),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("id", DataType::Utf8, true),
        ])
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateColumn("id".into()));
    }

    #[test]
    fn identical_schema_merges_to_itself() {
        let schema = table_schema();
        assert_eq!(schema.merge_for_append(&schema).unwrap(), schema);
    }

    #[test]
    fn extra_batch_columns_widen_as_nullable() {
        let batch = Schema::new(vec![
            Field::new("user", DataType::Utf8, false),
            Field::new("id", DataType::Int64, false),
            Field::new("message", DataType::Utf8, true),
        ])
        .unwrap();

        let merged = table_schema().merge_for_append(&batch).unwrap();
        let names: Vec<_> = merged.column_names().collect();
        assert_eq!(names, vec!["id", "message", "user"]);
        assert!(merged.field("user").unwrap().nullable);
    }

    #[test]
    fn missing_column_is_rejected() {
        let batch = Schema::new(vec![Field::new("id", DataType::Int64, false)]).unwrap();
        let err = table_schema().merge_for_append(&batch).unwrap_err();
        assert_eq!(err, SchemaError::MissingColumn("message".into()));
    }

    #[test]
    fn type_and_nullability_changes_are_rejected() {
        let retyped = Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("message", DataType::Utf8, true),
        ])
        .unwrap();
        assert!(matches!(
            table_schema().merge_for_append(&retyped),
            Err(SchemaError::TypeMismatch { .. })
        ));

        let loosened = Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("message", DataType::Utf8, true),
        ])
        .unwrap();
        assert_eq!(
            table_schema().merge_for_append(&loosened).unwrap_err(),
            SchemaError::NullabilityMismatch("id".into())
        );
    }

    #[test]
    fn field_nullable_defaults_to_true_in_json() {
        let field: Field = serde_json::from_str(r#"{"name":"id","type":"int64"}"#).unwrap();
        assert!(field.nullable);
        assert_eq!(field.data_type, DataType::Int64);
    }
}
