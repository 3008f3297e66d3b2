// Transaction Log
//
// Append-only, versioned record of table changes. Version N lives in
// `_log/<N zero-padded to 20 digits>.json`; the only synchronization point
// between writers is the atomic creation of that file.

pub mod actions;
pub mod conflict;
pub mod store;
pub mod transaction;

pub use actions::{
    Action, AddFile, Commit, CommitInfo, FileStats, Operation, RemoveFile, TableMetadata,
};
pub use conflict::ConflictError;
pub use store::{CommitError, CommitOutcome, TransactionLog};
pub use transaction::Transaction;

use crate::replay::ReplayError;
use crate::storage::StorageError;

/// Logical version of a table.
pub type Version = u64;

pub const LOG_DIR: &str = "_log";
pub const LOG_TMP_DIR: &str = "_log/_tmp";

pub fn commit_path(version: Version) -> String {
    format!("{LOG_DIR}/{version:020}.json")
}

pub fn checkpoint_path(version: Version) -> String {
    format!("{LOG_DIR}/{version:020}.checkpoint.json")
}

/// Kind of file found in the log directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFile {
    Commit(Version),
    Checkpoint(Version),
}

/// Classify a path from a log listing. Anything else is ignored.
pub fn parse_log_file(path: &str) -> Option<LogFile> {
    let name = path.strip_prefix(LOG_DIR)?.strip_prefix('/')?;

    let (digits, kind): (&str, fn(Version) -> LogFile) =
        if let Some(d) = name.strip_suffix(".checkpoint.json") {
            (d, LogFile::Checkpoint)
        } else if let Some(d) = name.strip_suffix(".json") {
            (d, LogFile::Commit)
        } else {
            return None;
        };

    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(kind)
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to encode log entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt log entry at version {version}: {reason}")]
    Corrupt { version: Version, reason: String },

    #[error("log is missing version {0}")]
    MissingVersion(Version),

    #[error("version {requested} does not exist (latest: {latest:?})")]
    VersionNotFound {
        requested: Version,
        latest: Option<Version>,
    },

    /// Another writer already committed this version.
    #[error("version {0} is already committed")]
    VersionAlreadyCommitted(Version),

    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),
}
