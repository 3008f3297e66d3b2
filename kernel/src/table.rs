// Table Writer
//
// Caller-facing handle for one table: resolves storage once, turns a row
// batch into data files and commits them through the transaction log.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{BatchError, RowBatch};
use crate::config::{ConfigError, TableConfig};
use crate::log::{
    CommitError, CommitInfo, ConflictError, LogError, Transaction, TransactionLog, Version,
};
use crate::partition::{plan_partitions, validate_partition_columns, PartitionError};
use crate::replay::ReplayError;
use crate::schema::Schema;
use crate::state::TableState;
use crate::storage::{open_backend, StorageBackend, StorageError, StorageOptions};
use crate::writer::{FileWriteError, FileWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Append,
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => f.write_str("append"),
            WriteMode::Overwrite => f.write_str("overwrite"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown write mode `{0}`, expected `append` or `overwrite`")]
pub struct ParseWriteModeError(String);

impl FromStr for WriteMode {
    type Err = ParseWriteModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            _ => Err(ParseWriteModeError(s.to_string())),
        }
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub version: Version,
    pub files_added: usize,
    pub files_removed: usize,
    pub rows_written: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("commit did not succeed after {attempts} attempts")]
    ConcurrentCommitExceeded { attempts: u32 },

    #[error(transparent)]
    Io(#[from] StorageError),

    #[error("table already exists")]
    TableAlreadyExists,

    #[error("invalid batch: {0}")]
    InvalidBatch(#[from] BatchError),

    #[error("invalid partition column: {0}")]
    InvalidPartitionColumn(#[from] PartitionError),

    #[error("corrupt table log: {0}")]
    Corrupt(String),

    #[error("write rejected: {0}")]
    InvariantViolation(ReplayError),

    #[error(transparent)]
    FileWrite(#[from] FileWriteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("version {requested} does not exist (latest: {latest:?})")]
    VersionNotFound {
        requested: Version,
        latest: Option<Version>,
    },
}

impl From<LogError> for TableError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Storage(e) => TableError::Io(e),
            LogError::VersionNotFound { requested, latest } => {
                TableError::VersionNotFound { requested, latest }
            }
            LogError::VersionAlreadyCommitted(v) => {
                TableError::ConcurrentModification(format!("version {v} was committed concurrently"))
            }
            other @ (LogError::Encode(_)
            | LogError::Corrupt { .. }
            | LogError::MissingVersion(_)
            | LogError::Replay(_)) => TableError::Corrupt(other.to_string()),
        }
    }
}

impl From<ConflictError> for TableError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::TableExists => TableError::TableAlreadyExists,
            ConflictError::Schema(e) => TableError::SchemaMismatch(e.to_string()),
            e @ ConflictError::PartitionColumnsChanged { .. } => {
                TableError::SchemaMismatch(e.to_string())
            }
            e @ (ConflictError::TableMissing
            | ConflictError::FileRemovedConcurrently { .. }
            | ConflictError::MetadataChangedConcurrently(_)) => {
                TableError::ConcurrentModification(e.to_string())
            }
        }
    }
}

impl From<CommitError> for TableError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Log(e) => e.into(),
            CommitError::Conflict(e) => e.into(),
            CommitError::Rejected(e) => TableError::InvariantViolation(e),
            CommitError::AttemptsExceeded { attempts } => {
                TableError::ConcurrentCommitExceeded { attempts }
            }
        }
    }
}

/// Handle to one table.
///
/// Cheap to share between threads; every operation re-reads the log, the
/// cached state only saves replaying versions already seen.
pub struct Table {
    location: String,
    config: TableConfig,
    log: TransactionLog,
    files: FileWriter,
    cached: Mutex<TableState>,
}

impl Table {
    /// Open the table at `table_path`, choosing the backend from `options`.
    pub fn open(
        table_path: &str,
        options: &StorageOptions,
        config: TableConfig,
    ) -> Result<Self, TableError> {
        config.validate()?;
        let backend = open_backend(table_path, options)?;
        Self::with_backend(backend, config)
    }

    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        config: TableConfig,
    ) -> Result<Self, TableError> {
        config.validate()?;

        let location = backend.describe();
        let log = TransactionLog::new(backend.clone(), config.clone());
        let files = FileWriter::new(backend, &config);

        info!(table = %location, "opened table");
        Ok(Self {
            location,
            config,
            log,
            files,
            cached: Mutex::new(TableState::empty()),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Latest state, reusing the cached prefix of the log.
    fn refresh(&self) -> Result<TableState, TableError> {
        let cached = self.cached.lock().clone();
        let latest = self.log.update(&cached)?;
        self.remember(&latest);
        Ok(latest)
    }

    fn remember(&self, state: &TableState) {
        let mut cached = self.cached.lock();
        if state.version() >= cached.version() {
            *cached = state.clone();
        }
    }

    /// Define the table explicitly. Returns version 0.
    pub fn create(
        &self,
        schema: Schema,
        partition_columns: Vec<String>,
    ) -> Result<Version, TableError> {
        let probe = RowBatch::try_new(schema.clone(), Vec::new())?;
        validate_partition_columns(&probe, &partition_columns)?;

        let state = self.refresh()?;
        if state.exists() {
            return Err(TableError::TableAlreadyExists);
        }

        let outcome = self
            .log
            .commit(Transaction::create(state, schema, partition_columns))?;
        self.remember(&outcome.state);

        info!(table = %self.location, "created table");
        Ok(outcome.commit.version)
    }

    /// Create the table from the first batch, tolerating a concurrent
    /// creator.
    fn ensure_created(
        &self,
        batch: &RowBatch,
        partition_columns: &[String],
    ) -> Result<TableState, TableError> {
        validate_partition_columns(batch, partition_columns)?;

        let txn = Transaction::create(
            TableState::empty(),
            batch.schema().clone(),
            partition_columns.to_vec(),
        );
        match self.log.commit(txn) {
            Ok(outcome) => {
                info!(table = %self.location, "created table on first write");
                self.remember(&outcome.state);
                Ok(outcome.state)
            }
            Err(CommitError::Conflict(ConflictError::TableExists)) => {
                info!(table = %self.location, "table was created concurrently");
                self.refresh()
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write `batch` as one atomic commit.
    ///
    /// For appends `partition_columns` may be empty to inherit the table's.
    /// Overwrites replace the table schema and partitioning with the
    /// batch's.
    pub fn write(
        &self,
        batch: &RowBatch,
        mode: WriteMode,
        partition_columns: &[String],
    ) -> Result<WriteResult, TableError> {
        let mut state = self.refresh()?;
        if !state.exists() {
            state = self.ensure_created(batch, partition_columns)?;
        }

        let partition_columns = match mode {
            WriteMode::Append => {
                let table_columns = state.partition_columns();
                if !partition_columns.is_empty() && partition_columns != table_columns {
                    return Err(ConflictError::PartitionColumnsChanged {
                        table: table_columns.to_vec(),
                        write: partition_columns.to_vec(),
                    }
                    .into());
                }

                if let Some(schema) = state.schema() {
                    schema
                        .merge_for_append(batch.schema())
                        .map_err(ConflictError::from)?;
                }

                if batch.is_empty() {
                    return Ok(WriteResult {
                        version: state.version().unwrap_or_default(),
                        files_added: 0,
                        files_removed: 0,
                        rows_written: 0,
                    });
                }
                table_columns.to_vec()
            }
            WriteMode::Overwrite => partition_columns.to_vec(),
        };

        let groups = plan_partitions(batch, &partition_columns)?;
        let mut adds = Vec::new();
        for group in &groups {
            adds.extend(self.files.write_group(batch, group, &partition_columns)?);
        }
        let files_added = adds.len();

        let schema = batch.schema().clone();
        let txn = match mode {
            WriteMode::Append => Transaction::append(state, schema, partition_columns, adds),
            WriteMode::Overwrite => Transaction::overwrite(state, schema, partition_columns, adds),
        };

        let outcome = self.log.commit(txn)?;
        self.remember(&outcome.state);

        let result = WriteResult {
            version: outcome.commit.version,
            files_added,
            files_removed: outcome.commit.removes().count(),
            rows_written: batch.num_rows(),
        };
        info!(
            table = %self.location,
            %mode,
            version = result.version,
            files_added = result.files_added,
            files_removed = result.files_removed,
            rows = result.rows_written,
            attempts = outcome.attempts,
            "write committed"
        );
        Ok(result)
    }

    /// State at the latest version.
    pub fn snapshot(&self) -> Result<TableState, TableError> {
        self.refresh()
    }

    pub fn snapshot_at(&self, version: Version) -> Result<TableState, TableError> {
        Ok(self.log.snapshot_at(version)?)
    }

    /// Latest committed version, `None` before the table exists.
    pub fn version(&self) -> Result<Option<Version>, TableError> {
        Ok(self.log.latest_version()?)
    }

    /// Commit infos, newest first.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<(Version, CommitInfo)>, TableError> {
        Ok(self.log.history(limit)?)
    }
}
