// Data File Writer
//
// Encodes the rows of one partition group as Parquet and publishes each
// file under its final name only once it is complete. Partition columns
// are not stored in the file; their values travel in the add action.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, RecordBatchOptions,
    StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{
    DataType as ArrowType, Field as ArrowField, Schema as ArrowSchema, TimeUnit,
};
use arrow::error::ArrowError;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use tracing::debug;
use uuid::Uuid;

use super::stats::collect_stats;
use crate::batch::{RowBatch, Value};
use crate::config::{CompressionCodec, TableConfig};
use crate::log::AddFile;
use crate::partition::PartitionGroup;
use crate::schema::{DataType, Field};
use crate::storage::{StorageBackend, StorageError};

/// Directory for data files that are still being written.
pub const DATA_TMP_DIR: &str = "_tmp";

#[derive(Debug, thiserror::Error)]
pub enum FileWriteError {
    #[error("failed to build record batch: {0}")]
    Arrow(#[from] ArrowError),

    #[error("failed to encode parquet: {0}")]
    Parquet(#[from] ParquetError),

    #[error("failed to store data file: {0}")]
    Storage(#[from] StorageError),
}

pub struct FileWriter {
    backend: Arc<dyn StorageBackend>,
    max_rows_per_file: usize,
    properties: WriterProperties,
}

impl FileWriter {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &TableConfig) -> Self {
        let compression = match config.compression {
            CompressionCodec::Uncompressed => Compression::UNCOMPRESSED,
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
        };

        let properties = WriterProperties::builder()
            .set_compression(compression)
            .build();

        Self {
            backend,
            max_rows_per_file: config.max_rows_per_file.max(1),
            properties,
        }
    }

    /// Write the rows of `group` as one or more data files.
    ///
    /// Returns one add action per file, in write order. An empty group
    /// produces no files.
    pub fn write_group(
        &self,
        batch: &RowBatch,
        group: &PartitionGroup,
        partition_columns: &[String],
    ) -> Result<Vec<AddFile>, FileWriteError> {
        let columns: Vec<usize> = batch
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !partition_columns.contains(&f.name))
            .map(|(idx, _)| idx)
            .collect();

        let arrow_schema = Arc::new(ArrowSchema::new(
            columns
                .iter()
                .map(|&idx| arrow_field(&batch.schema().fields()[idx]))
                .collect::<Vec<_>>(),
        ));

        let mut adds = Vec::new();
        for chunk in group.rows.chunks(self.max_rows_per_file) {
            let record_batch = record_batch(batch, chunk, &columns, arrow_schema.clone())?;
            let data = self.encode(&record_batch)?;

            let path = data_file_path(&group.path);
            self.publish(&path, &data)?;
            debug!(path, rows = chunk.len(), bytes = data.len(), "wrote data file");

            adds.push(AddFile {
                path,
                partition_values: group.values.clone(),
                size: data.len() as u64,
                modification_time: chrono::Utc::now().timestamp_millis(),
                data_change: true,
                stats: collect_stats(batch, chunk, &columns),
            });
        }

        Ok(adds)
    }

    fn encode(&self, batch: &RecordBatch) -> Result<Vec<u8>, FileWriteError> {
        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(self.properties.clone()))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(buffer)
    }

    fn publish(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let tmp = format!("{DATA_TMP_DIR}/{}.parquet.tmp", Uuid::new_v4());
        self.backend.write(&tmp, data, false)?;

        if let Err(e) = self.backend.atomic_rename(&tmp, path) {
            if let Err(cleanup) = self.backend.delete(&tmp) {
                debug!(tmp, error = %cleanup, "failed to remove temporary data file");
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Fresh, time-ordered data file name inside `partition_path`.
fn data_file_path(partition_path: &str) -> String {
    let name = format!("{}.parquet", Uuid::now_v7());
    if partition_path.is_empty() {
        name
    } else {
        format!("{partition_path}/{name}")
    }
}

fn arrow_field(field: &Field) -> ArrowField {
    let data_type = match field.data_type {
        DataType::Boolean => ArrowType::Boolean,
        DataType::Int64 => ArrowType::Int64,
        DataType::Float64 => ArrowType::Float64,
        DataType::Utf8 => ArrowType::Utf8,
        DataType::Timestamp => ArrowType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    };
    ArrowField::new(&field.name, data_type, field.nullable)
}

fn record_batch(
    batch: &RowBatch,
    rows: &[usize],
    columns: &[usize],
    schema: Arc<ArrowSchema>,
) -> Result<RecordBatch, ArrowError> {
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|&col| {
            let cells = rows.iter().map(|&row| &batch.rows()[row][col]);
            column_array(batch.schema().fields()[col].data_type, cells)
        })
        .collect();

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
}

/// Build one Arrow column. Values were type checked when the batch was
/// built, so anything that is not of `data_type` is null.
fn column_array<'a>(data_type: DataType, cells: impl Iterator<Item = &'a Value>) -> ArrayRef {
    match data_type {
        DataType::Boolean => Arc::new(
            cells
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        DataType::Int64 => Arc::new(
            cells
                .map(|v| match v {
                    Value::Int64(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            cells
                .map(|v| match v {
                    Value::Float64(f) => Some(*f),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(
            cells
                .map(|v| match v {
                    Value::Utf8(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
        DataType::Timestamp => Arc::new(
            cells
                .map(|v| match v {
                    Value::Timestamp(ts) => Some(*ts),
                    _ => None,
                })
                .collect::<TimestampMicrosecondArray>()
                .with_timezone("UTC"),
        ),
    }
}
