// Column Statistics
//
// Per-file statistics recorded in add actions: row count plus min, max and
// null count for every data column.

use std::cmp::Ordering;

use crate::batch::{RowBatch, Value};
use crate::log::FileStats;

/// NaN has no order and infinities have no JSON encoding.
fn excluded_from_bounds(value: &Value) -> bool {
    matches!(value, Value::Float64(f) if !f.is_finite())
}

/// Statistics for `rows` of `batch`, restricted to the columns at `columns`.
///
/// Nulls and non-finite floats never become a min or max. A column with no
/// comparable values has a null count but no bounds.
pub fn collect_stats(batch: &RowBatch, rows: &[usize], columns: &[usize]) -> FileStats {
    let mut stats = FileStats {
        num_records: rows.len() as u64,
        ..FileStats::default()
    };

    for &col in columns {
        let name = batch.schema().fields()[col].name.clone();
        let mut nulls = 0u64;
        let mut min: Option<&Value> = None;
        let mut max: Option<&Value> = None;

        for &row in rows {
            let value = &batch.rows()[row][col];
            if value.is_null() {
                nulls += 1;
                continue;
            }
            if excluded_from_bounds(value) {
                continue;
            }

            if min.map_or(true, |m| value.compare(m) == Some(Ordering::Less)) {
                min = Some(value);
            }
            if max.map_or(true, |m| value.compare(m) == Some(Ordering::Greater)) {
                max = Some(value);
            }
        }

        stats.null_count.insert(name.clone(), nulls);
        if let (Some(min), Some(max)) = (min, max) {
            stats.min_values.insert(name.clone(), min.clone());
            stats.max_values.insert(name, max.clone());
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field, Schema};

    fn batch() -> RowBatch {
        let schema = Schema::new(vec![
            Field::new("n", DataType::Int64, true),
            Field::new("x", DataType::Float64, true),
            Field::new("s", DataType::Utf8, true),
        ])
        .unwrap();

        RowBatch::try_new(
            schema,
            vec![
                vec![Value::Int64(5), Value::Float64(f64::NAN), Value::Null],
                vec![Value::Null, Value::Float64(2.5), Value::Null],
                vec![Value::Int64(0), Value::Float64(f64::INFINITY), Value::Null],
                vec![Value::Int64(-3), Value::Float64(-1.0), Value::Null],
                vec![Value::Int64(9), Value::Float64(0.0), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn min_max_skip_nulls_and_non_finite() {
        let stats = collect_stats(&batch(), &[0, 1, 2, 3, 4], &[0, 1, 2]);

        assert_eq!(stats.num_records, 5);
        assert_eq!(stats.min_values["n"], Value::Int64(-3));
        assert_eq!(stats.max_values["n"], Value::Int64(9));
        assert_eq!(stats.null_count["n"], 1);

        assert_eq!(stats.min_values["x"], Value::Float64(-1.0));
        assert_eq!(stats.max_values["x"], Value::Float64(2.5));
        assert_eq!(stats.null_count["x"], 0);
    }

    #[test]
    fn all_null_column_has_no_bounds() {
        let stats = collect_stats(&batch(), &[0, 1], &[2]);
        assert_eq!(stats.null_count["s"], 2);
        assert!(!stats.min_values.contains_key("s"));
        assert!(!stats.max_values.contains_key("s"));
    }

    #[test]
    fn only_selected_rows_and_columns_count() {
        let stats = collect_stats(&batch(), &[4], &[0]);
        assert_eq!(stats.num_records, 1);
        assert_eq!(stats.min_values["n"], Value::Int64(9));
        assert!(!stats.null_count.contains_key("x"));
    }
}
