// Partition Planning
//
// Splits a row batch into groups sharing identical partition-key values
// and derives the Hive-style directory path for each group.

use std::collections::{BTreeMap, HashMap};

use crate::batch::{RowBatch, Value};

/// Directory segment value used for null partition values.
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

/// Partition column name to stringified value (`None` for null).
pub type PartitionValues = BTreeMap<String, Option<String>>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("partition column `{0}` is not in the schema")]
    UnknownColumn(String),

    #[error("partition column `{0}` is listed more than once")]
    DuplicateColumn(String),

    #[error("cannot partition by every column; at least one data column is required")]
    NoDataColumns,
}

/// Rows of one batch that share a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionGroup {
    /// Relative directory, `""` for the table root.
    pub path: String,
    pub values: PartitionValues,
    /// Row indices into the source batch, in original order.
    pub rows: Vec<usize>,
}

impl PartitionGroup {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// Stringify a partition value.
///
/// Deterministic for a given value: floats use the shortest round-trip
/// form and timestamps render as `YYYY-MM-DD HH:MM:SS.ffffff` UTC.
pub fn partition_value_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Boolean(b) => Some(b.to_string()),
        Value::Int64(i) => Some(i.to_string()),
        Value::Float64(f) => Some(f.to_string()),
        Value::Utf8(s) => Some(s.clone()),
        Value::Timestamp(micros) => Some(
            chrono::DateTime::from_timestamp_micros(*micros)
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
                .unwrap_or_else(|| micros.to_string()),
        ),
    }
}

fn needs_escape(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
        )
}

/// Escape a path segment the way Hive does: reserved characters become `%XX`.
pub fn escape_partition_segment(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if needs_escape(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Directory for the given partition values, in partition-column order.
pub fn partition_path(columns: &[String], values: &PartitionValues) -> String {
    columns
        .iter()
        .map(|column| {
            let value = match values.get(column) {
                // A literal sentinel string must not share the null directory.
                Some(Some(v)) if v == NULL_PARTITION_VALUE => format!("%5F{}", &v[1..]),
                Some(Some(v)) => escape_partition_segment(v),
                _ => NULL_PARTITION_VALUE.to_string(),
            };
            format!("{}={value}", escape_partition_segment(column))
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check a partition column list against a batch schema.
pub fn validate_partition_columns(
    batch: &RowBatch,
    columns: &[String],
) -> Result<Vec<usize>, PartitionError> {
    let schema = batch.schema();
    let mut indices = Vec::with_capacity(columns.len());

    for (pos, column) in columns.iter().enumerate() {
        if columns[..pos].contains(column) {
            return Err(PartitionError::DuplicateColumn(column.clone()));
        }
        let idx = schema
            .index_of(column)
            .ok_or_else(|| PartitionError::UnknownColumn(column.clone()))?;
        indices.push(idx);
    }

    if !columns.is_empty() && columns.len() == schema.len() {
        return Err(PartitionError::NoDataColumns);
    }

    Ok(indices)
}

/// Group the rows of `batch` by the values of `columns`.
///
/// Groups appear in order of first occurrence. With no partition columns
/// the whole batch forms one group at the table root.
pub fn plan_partitions(
    batch: &RowBatch,
    columns: &[String],
) -> Result<Vec<PartitionGroup>, PartitionError> {
    let indices = validate_partition_columns(batch, columns)?;

    if columns.is_empty() {
        return Ok(vec![PartitionGroup {
            path: String::new(),
            values: PartitionValues::new(),
            rows: (0..batch.num_rows()).collect(),
        }]);
    }

    let mut groups: Vec<PartitionGroup> = Vec::new();
    let mut by_values: HashMap<PartitionValues, usize> = HashMap::new();

    for (row_idx, row) in batch.rows().iter().enumerate() {
        let values: PartitionValues = columns
            .iter()
            .zip(&indices)
            .map(|(column, &idx)| (column.clone(), partition_value_string(&row[idx])))
            .collect();

        match by_values.get(&values) {
            Some(&group) => groups[group].rows.push(row_idx),
            None => {
                by_values.insert(values.clone(), groups.len());
                groups.push(PartitionGroup {
                    path: partition_path(columns, &values),
                    values,
                    rows: vec![row_idx],
                });
            }
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field, Schema};

    fn batch(users: &[Option<&str>]) -> RowBatch {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("user", DataType::Utf8, true),
        ])
        .unwrap();

        let rows = users
            .iter()
            .enumerate()
            .map(|(i, user)| {
                vec![
                    Value::Int64(i as i64 + 1),
                    user.map(|u| Value::Utf8(u.into())).unwrap_or(Value::Null),
                ]
            })
            .collect();

        RowBatch::try_new(schema, rows).unwrap()
    }

    #[test]
    fn groups_preserve_row_order_and_first_occurrence() {
        let batch = batch(&[Some("odd_user"), Some("even_user"), Some("odd_user")]);
        let groups = plan_partitions(&batch, &["user".to_string()]).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].path, "user=odd_user");
        assert_eq!(groups[0].rows, vec![0, 2]);
        assert_eq!(groups[1].path, "user=even_user");
        assert_eq!(groups[1].rows, vec![1]);
        assert_eq!(
            groups[1].values.get("user"),
            Some(&Some("even_user".to_string()))
        );
    }

    #[test]
    fn no_partition_columns_yield_one_root_group() {
        let batch = batch(&[Some("a"), Some("b")]);
        let groups = plan_partitions(&batch, &[]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].path, "");
        assert_eq!(groups[0].rows, vec![0, 1]);
    }

    #[test]
    fn null_values_use_reserved_segment() {
        let batch = batch(&[None]);
        let groups = plan_partitions(&batch, &["user".to_string()]).unwrap();
        assert_eq!(groups[0].path, format!("user={NULL_PARTITION_VALUE}"));
        assert_eq!(groups[0].values.get("user"), Some(&None));
    }

    #[test]
    fn literal_sentinel_string_is_kept_apart_from_null() {
        let batch = batch(&[None, Some(NULL_PARTITION_VALUE), None]);
        let groups = plan_partitions(&batch, &["user".to_string()]).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].rows, vec![0, 2]);
        assert_eq!(groups[0].values.get("user"), Some(&None));
        assert_eq!(groups[0].path, format!("user={NULL_PARTITION_VALUE}"));

        assert_eq!(groups[1].rows, vec![1]);
        assert_eq!(
            groups[1].values.get("user"),
            Some(&Some(NULL_PARTITION_VALUE.to_string()))
        );
        assert_eq!(groups[1].path, "user=%5F_HIVE_DEFAULT_PARTITION__");
    }

    #[test]
    fn reserved_characters_are_escaped() {
        assert_eq!(escape_partition_segment("a/b=c"), "a%2Fb%3Dc");
        assert_eq!(escape_partition_segment("100%"), "100%25");
        assert_eq!(escape_partition_segment("plain value"), "plain value");
    }

    #[test]
    fn invalid_partition_columns_are_rejected() {
        let batch = batch(&[Some("a")]);
        assert_eq!(
            plan_partitions(&batch, &["missing".to_string()]).unwrap_err(),
            PartitionError::UnknownColumn("missing".into())
        );
        assert_eq!(
            plan_partitions(&batch, &["user".to_string(), "user".to_string()]).unwrap_err(),
            PartitionError::DuplicateColumn("user".into())
        );
        assert_eq!(
            plan_partitions(&batch, &["id".to_string(), "user".to_string()]).unwrap_err(),
            PartitionError::NoDataColumns
        );
    }

    #[test]
    fn values_stringify_deterministically() {
        assert_eq!(partition_value_string(&Value::Float64(0.1)), Some("0.1".into()));
        assert_eq!(partition_value_string(&Value::Boolean(true)), Some("true".into()));
        assert_eq!(
            partition_value_string(&Value::Timestamp(1_704_067_200_000_001)),
            Some("2024-01-01 00:00:00.000001".into())
        );
    }
}
