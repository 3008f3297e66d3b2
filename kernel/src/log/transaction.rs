// Transactions
//
// A transaction is the intent of one logical write, bound to the table
// state it was read against. Its action list is derived from that state,
// so rebasing onto a newer state recomputes removes and metadata.

use uuid::Uuid;

use super::actions::{Action, AddFile, CommitInfo, Operation, RemoveFile, TableMetadata};
use super::conflict::ConflictError;
use super::Version;
use crate::schema::Schema;
use crate::state::TableState;

pub const ENGINE_INFO: &str = concat!("strata-kernel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Transaction {
    operation: Operation,
    read_state: TableState,
    table_id: Uuid,
    schema: Schema,
    partition_columns: Vec<String>,
    adds: Vec<AddFile>,
}

impl Transaction {
    /// Define a new table at version 0.
    pub fn create(read_state: TableState, schema: Schema, partition_columns: Vec<String>) -> Self {
        Self {
            operation: Operation::CreateTable,
            read_state,
            table_id: Uuid::new_v4(),
            schema,
            partition_columns,
            adds: Vec::new(),
        }
    }

    /// Add files without touching existing ones.
    ///
    /// `schema` is the batch schema; it is merged into the table schema
    /// each time the action list is built.
    pub fn append(
        read_state: TableState,
        schema: Schema,
        partition_columns: Vec<String>,
        adds: Vec<AddFile>,
    ) -> Self {
        Self {
            operation: Operation::Append,
            read_state,
            table_id: Uuid::nil(),
            schema,
            partition_columns,
            adds,
        }
    }

    /// Replace every live file with `adds` and the table definition with
    /// `schema` / `partition_columns`.
    pub fn overwrite(
        read_state: TableState,
        schema: Schema,
        partition_columns: Vec<String>,
        adds: Vec<AddFile>,
    ) -> Self {
        Self {
            operation: Operation::Overwrite,
            read_state,
            table_id: Uuid::nil(),
            schema,
            partition_columns,
            adds,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn read_state(&self) -> &TableState {
        &self.read_state
    }

    pub fn read_version(&self) -> Option<Version> {
        self.read_state.version()
    }

    pub fn adds(&self) -> &[AddFile] {
        &self.adds
    }

    /// Move the transaction onto a newer table state.
    pub(crate) fn rebase(&mut self, state: TableState) {
        self.read_state = state;
    }

    /// Build the action list against the current read state.
    ///
    /// `now` is milliseconds since the Unix epoch.
    pub fn actions(&self, now: i64) -> Result<Vec<Action>, ConflictError> {
        let mut metadata = None;
        let mut removes = Vec::new();

        match self.operation {
            Operation::CreateTable => {
                if self.read_state.exists() {
                    return Err(ConflictError::TableExists);
                }
                metadata = Some(TableMetadata {
                    id: self.table_id,
                    schema: self.schema.clone(),
                    partition_columns: self.partition_columns.clone(),
                    created_time: now,
                });
            }
            Operation::Append => {
                let meta = self
                    .read_state
                    .metadata()
                    .ok_or(ConflictError::TableMissing)?;

                if meta.partition_columns != self.partition_columns {
                    return Err(ConflictError::PartitionColumnsChanged {
                        table: meta.partition_columns.clone(),
                        write: self.partition_columns.clone(),
                    });
                }

                let merged = meta.schema.merge_for_append(&self.schema)?;
                if merged != meta.schema {
                    metadata = Some(TableMetadata {
                        schema: merged,
                        ..meta.clone()
                    });
                }
            }
            Operation::Overwrite => {
                let meta = self
                    .read_state
                    .metadata()
                    .ok_or(ConflictError::TableMissing)?;

                removes = self
                    .read_state
                    .files()
                    .map(|file| RemoveFile {
                        path: file.path.clone(),
                        deletion_timestamp: now,
                        data_change: true,
                    })
                    .collect();

                if meta.schema != self.schema || meta.partition_columns != self.partition_columns {
                    metadata = Some(TableMetadata {
                        schema: self.schema.clone(),
                        partition_columns: self.partition_columns.clone(),
                        ..meta.clone()
                    });
                }
            }
        }

        let is_blind_append = self.operation == Operation::Append && metadata.is_none();
        let mut actions = Vec::with_capacity(2 + removes.len() + self.adds.len());

        actions.push(Action::CommitInfo(CommitInfo {
            timestamp: now,
            operation: self.operation,
            read_version: self.read_state.version(),
            is_blind_append,
            engine_info: ENGINE_INFO.to_string(),
        }));
        actions.extend(metadata.map(Action::Metadata));
        actions.extend(removes.into_iter().map(Action::Remove));
        actions.extend(self.adds.iter().cloned().map(Action::Add));

        Ok(actions)
    }
}
