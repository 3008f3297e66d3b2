// Log Actions
//
// The verbs of the transaction log. A commit file holds one JSON-encoded
// action per line; the version is carried by the file name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{LogError, Version};
use crate::batch::Value;
use crate::partition::PartitionValues;
use crate::schema::Schema;

/// Statistics recorded for each data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub num_records: u64,
    pub min_values: BTreeMap<String, Value>,
    pub max_values: BTreeMap<String, Value>,
    pub null_count: BTreeMap<String, u64>,
}

/// Table definition. The latest metadata action wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub id: Uuid,
    pub schema: Schema,
    pub partition_columns: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub created_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFile {
    /// Relative to the table root.
    pub path: String,
    pub partition_values: PartitionValues,
    pub size: u64,
    pub modification_time: i64,
    pub data_change: bool,
    pub stats: FileStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFile {
    pub path: String,
    pub deletion_timestamp: i64,
    pub data_change: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    CreateTable,
    Append,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub timestamp: i64,
    pub operation: Operation,
    /// Version the writer built this commit against.
    pub read_version: Option<Version>,
    pub is_blind_append: bool,
    pub engine_info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    CommitInfo(CommitInfo),
    Metadata(TableMetadata),
    Add(AddFile),
    Remove(RemoveFile),
}

/// One committed (or candidate) log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub version: Version,
    pub actions: Vec<Action>,
}

impl Commit {
    pub fn new(version: Version, actions: Vec<Action>) -> Self {
        Self { version, actions }
    }

    /// Newline-delimited JSON, one action per line.
    pub fn encode(&self) -> Result<Vec<u8>, LogError> {
        let mut out = Vec::new();
        for action in &self.actions {
            serde_json::to_writer(&mut out, action).map_err(LogError::Encode)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    pub fn decode(version: Version, data: &[u8]) -> Result<Self, LogError> {
        let text = std::str::from_utf8(data).map_err(|e| LogError::Corrupt {
            version,
            reason: e.to_string(),
        })?;

        let actions = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<Action>(line).map_err(|e| LogError::Corrupt {
                    version,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { version, actions })
    }

    pub fn commit_info(&self) -> Option<&CommitInfo> {
        self.actions.iter().find_map(|a| match a {
            Action::CommitInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn metadata(&self) -> Option<&TableMetadata> {
        self.actions.iter().rev().find_map(|a| match a {
            Action::Metadata(meta) => Some(meta),
            _ => None,
        })
    }

    pub fn adds(&self) -> impl Iterator<Item = &AddFile> {
        self.actions.iter().filter_map(|a| match a {
            Action::Add(add) => Some(add),
            _ => None,
        })
    }

    pub fn removes(&self) -> impl Iterator<Item = &RemoveFile> {
        self.actions.iter().filter_map(|a| match a {
            Action::Remove(remove) => Some(remove),
            _ => None,
        })
    }
}
