// Conflict Detection
//
// Runs after a commit attempt loses the race for its version. Decides,
// from the commits that won, whether the transaction may be rebased and
// retried or has to fail.

use super::actions::{Commit, Operation};
use super::transaction::Transaction;
use super::Version;
use crate::schema::SchemaError;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("table already exists")]
    TableExists,

    #[error("table does not exist")]
    TableMissing,

    #[error("incompatible schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("table partitions by {table:?}, write partitions by {write:?}")]
    PartitionColumnsChanged {
        table: Vec<String>,
        write: Vec<String>,
    },

    #[error("file `{path}` was removed by concurrent version {version}")]
    FileRemovedConcurrently { path: String, version: Version },

    #[error("table metadata was changed by concurrent version {0}")]
    MetadataChangedConcurrently(Version),
}

/// Check `txn` against the commits that landed after its read version.
///
/// Appends commute with everything; their schema is re-validated when the
/// action list is rebuilt. Overwrites tolerate concurrent adds (the remove
/// set is recomputed) but not concurrent removes of files they read, nor
/// concurrent metadata changes.
pub fn check_conflicts(txn: &Transaction, winning: &[Commit]) -> Result<(), ConflictError> {
    match txn.operation() {
        Operation::CreateTable => {
            if winning.is_empty() {
                Ok(())
            } else {
                Err(ConflictError::TableExists)
            }
        }
        Operation::Append => Ok(()),
        Operation::Overwrite => {
            for commit in winning {
                if commit.metadata().is_some() {
                    return Err(ConflictError::MetadataChangedConcurrently(commit.version));
                }

                if let Some(removed) = commit
                    .removes()
                    .find(|r| txn.read_state().contains_file(&r.path))
                {
                    return Err(ConflictError::FileRemovedConcurrently {
                        path: removed.path.clone(),
                        version: commit.version,
                    });
                }
            }
            Ok(())
        }
    }
}
