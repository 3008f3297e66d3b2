mod common;

use std::collections::BTreeSet;

use common::{batch, by_user, local_table, schema};
use strata_kernel::invariants::InvariantEngine;
use strata_kernel::log::{Operation, TransactionLog};
use strata_kernel::replay::replay_table_state;
use strata_kernel::storage::StorageBackend;
use strata_kernel::{
    DataType, Field, RowBatch, Schema, TableConfig, TableError, TableState, Value, WriteMode,
};

#[test]
fn partitioned_appends_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());

    let first = table.write(&batch(1..=3), WriteMode::Append, &by_user()).unwrap();
    assert_eq!(first.version, 1);

    let state = table.snapshot().unwrap();
    assert_eq!(state.num_records(), 3);
    assert_eq!(
        state.partitions().into_iter().collect::<Vec<_>>(),
        vec!["user=even_user", "user=odd_user"]
    );
    let v1_files: BTreeSet<String> = state.files().map(|f| f.path.clone()).collect();

    let second = table.write(&batch(4..=6), WriteMode::Append, &by_user()).unwrap();
    assert_eq!(second.version, 2);

    let state = table.snapshot().unwrap();
    assert_eq!(state.num_records(), 6);
    assert_eq!(state.partitions().len(), 2);

    // Live files are the union of everything added.
    let live: BTreeSet<String> = state.files().map(|f| f.path.clone()).collect();
    assert!(v1_files.is_subset(&live));
    assert_eq!(live.len(), first.files_added + second.files_added);

    for file in state.files() {
        let user = file.partition_values["user"].as_deref().unwrap();
        assert!(file.path.starts_with(&format!("user={user}/")));
    }
}

#[test]
fn missing_column_is_a_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());
    table.write(&batch(1..=3), WriteMode::Append, &by_user()).unwrap();

    let narrow = Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("user", DataType::Utf8, true),
    ])
    .unwrap();
    let rows = vec![vec![Value::Int64(9), Value::Utf8("odd_user".into())]];
    let batch = RowBatch::try_new(narrow, rows).unwrap();

    let err = table.write(&batch, WriteMode::Append, &by_user()).unwrap_err();
    assert!(matches!(err, TableError::SchemaMismatch(_)), "{err}");
    assert_eq!(table.version().unwrap(), Some(1));

    // Nothing was written for the rejected batch.
    let data_files: Vec<String> = dir
        .path()
        .join("user=odd_user")
        .read_dir()
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(data_files.len(), 1);
}

#[test]
fn type_change_is_a_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());
    table.write(&batch(1..=2), WriteMode::Append, &[]).unwrap();

    let retyped = Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("user", DataType::Utf8, true),
        Field::new("value", DataType::Float64, true),
    ])
    .unwrap();
    let rows = vec![vec![
        Value::Utf8("x".into()),
        Value::Null,
        Value::Float64(1.0),
    ]];
    let batch = RowBatch::try_new(retyped, rows).unwrap();

    let err = table.write(&batch, WriteMode::Append, &[]).unwrap_err();
    assert!(matches!(err, TableError::SchemaMismatch(_)));
}

#[test]
fn extra_columns_widen_the_schema() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());
    table.write(&batch(1..=2), WriteMode::Append, &[]).unwrap();

    let mut fields = schema().fields().to_vec();
    fields.push(Field::new("tag", DataType::Utf8, false));
    let wide = Schema::new(fields).unwrap();
    let rows = vec![vec![
        Value::Int64(3),
        Value::Null,
        Value::Null,
        Value::Utf8("new".into()),
    ]];
    table
        .write(&RowBatch::try_new(wide, rows).unwrap(), WriteMode::Append, &[])
        .unwrap();

    let state = table.snapshot().unwrap();
    let tag = state.schema().unwrap().field("tag").unwrap();
    assert!(tag.nullable);
    assert_eq!(state.num_records(), 3);
}

#[test]
fn unknown_partition_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());

    let err = table
        .write(&batch(1..=2), WriteMode::Append, &["region".to_string()])
        .unwrap_err();
    assert!(matches!(err, TableError::InvalidPartitionColumn(_)));
    assert_eq!(table.version().unwrap(), None);
}

#[test]
fn null_partition_values_use_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());

    let rows = vec![
        vec![Value::Int64(1), Value::Null, Value::Null],
        vec![Value::Int64(2), Value::Utf8("a/b".into()), Value::Null],
    ];
    let batch = RowBatch::try_new(schema(), rows).unwrap();
    table.write(&batch, WriteMode::Append, &by_user()).unwrap();

    let partitions: Vec<String> = table.snapshot().unwrap().partitions().into_iter().collect();
    assert_eq!(
        partitions,
        vec!["user=__HIVE_DEFAULT_PARTITION__", "user=a%2Fb"]
    );

    let state = table.snapshot().unwrap();
    let null_file = state
        .files()
        .find(|f| f.path.starts_with("user=__HIVE_DEFAULT_PARTITION__/"))
        .unwrap();
    assert_eq!(null_file.partition_values["user"], None);
}

#[test]
fn overwrite_replaces_contents_and_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());
    table.write(&batch(1..=3), WriteMode::Append, &by_user()).unwrap();

    let result = table.write(&batch(10..=11), WriteMode::Overwrite, &by_user()).unwrap();
    assert_eq!(result.version, 2);
    assert_eq!(result.files_removed, 2);

    let state = table.snapshot().unwrap();
    assert_eq!(state.num_records(), 2);

    // Older versions stay readable.
    assert_eq!(table.snapshot_at(1).unwrap().num_records(), 3);

    let history = table.history(None).unwrap();
    let ops: Vec<Operation> = history.iter().map(|(_, info)| info.operation).collect();
    assert_eq!(
        ops,
        vec![Operation::Overwrite, Operation::Append, Operation::CreateTable]
    );
}

#[test]
fn replay_is_idempotent_and_checkpoints_match_full_replay() {
    let dir = tempfile::tempdir().unwrap();
    let config = TableConfig {
        checkpoint_interval: 3,
        ..TableConfig::default()
    };
    let table = local_table(&dir, config);

    for i in 0..7 {
        table
            .write(&batch(i * 10..i * 10 + 4), WriteMode::Append, &by_user())
            .unwrap();
    }

    let backend = table.log().backend().clone();
    let checkpoints: Vec<String> = backend
        .list("_log")
        .unwrap()
        .into_iter()
        .filter(|p| p.ends_with(".checkpoint.json"))
        .collect();
    assert_eq!(checkpoints.len(), 2);

    let commits: Vec<_> = (0..=7)
        .map(|v| table.log().read_commit(v).unwrap())
        .collect();
    let invariants = InvariantEngine::standard();
    let full = replay_table_state(TableState::empty(), &commits, &invariants).unwrap();
    let again = replay_table_state(TableState::empty(), &commits, &invariants).unwrap();
    assert_eq!(full, again);

    assert_eq!(table.snapshot().unwrap(), full);

    // A fresh reader with checkpoints disabled still uses the existing ones.
    let reader = TransactionLog::new(backend, TableConfig {
        checkpoint_interval: 0,
        ..TableConfig::default()
    });
    assert_eq!(reader.snapshot().unwrap(), full);
    assert_eq!(reader.snapshot_at(4).unwrap().version(), Some(4));
}

#[test]
fn data_files_are_parquet_with_row_counts() {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());
    table.write(&batch(1..=5), WriteMode::Append, &by_user()).unwrap();

    let backend = table.log().backend().clone();
    for file in table.snapshot().unwrap().files() {
        let data = bytes::Bytes::from(backend.read(&file.path).unwrap());
        let reader = ParquetRecordBatchReaderBuilder::try_new(data)
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows as u64, file.stats.num_records);
    }
}

#[test]
fn no_temporary_files_remain_after_writes() {
    let dir = tempfile::tempdir().unwrap();
    let table = local_table(&dir, TableConfig::default());
    table.write(&batch(1..=4), WriteMode::Append, &by_user()).unwrap();
    table.write(&batch(5..=8), WriteMode::Overwrite, &[]).unwrap();

    let backend = table.log().backend().clone();
    assert!(backend.list("_tmp").unwrap().is_empty());
    assert!(backend.list("_log/_tmp").unwrap().is_empty());
}
