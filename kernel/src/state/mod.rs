// Table State Machine
//
// Derives table state (metadata plus the live file set) from a sequence of
// commits. This module is pure, deterministic, and side-effect free.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::log::{Action, AddFile, Commit, TableMetadata, Version};
use crate::schema::Schema;

/// Table state as of one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableState {
    version: Option<Version>,
    metadata: Option<TableMetadata>,
    files: BTreeMap<String, AddFile>,
}

impl TableState {
    /// State of a table with no commits.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Latest applied version, `None` before the table exists.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Version the next commit must use.
    pub fn next_version(&self) -> Version {
        self.version.map_or(0, |v| v + 1)
    }

    pub fn exists(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn metadata(&self) -> Option<&TableMetadata> {
        self.metadata.as_ref()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.metadata.as_ref().map(|m| &m.schema)
    }

    pub fn partition_columns(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|m| m.partition_columns.as_slice())
            .unwrap_or_default()
    }

    /// Live files ordered by path.
    pub fn files(&self) -> impl Iterator<Item = &AddFile> {
        self.files.values()
    }

    pub fn file(&self, path: &str) -> Option<&AddFile> {
        self.files.get(path)
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Row count across live files.
    pub fn num_records(&self) -> u64 {
        self.files.values().map(|f| f.stats.num_records).sum()
    }

    /// Distinct partition directories of live files (`""` for the root).
    pub fn partitions(&self) -> BTreeSet<String> {
        self.files
            .keys()
            .map(|path| {
                path.rsplit_once('/')
                    .map(|(dir, _)| dir.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("expected version {expected}, got {actual}")]
    VersionGap { expected: Version, actual: Version },

    #[error("version {0} changes data before the table has metadata")]
    MissingMetadata(Version),
}

/// Stateful reducer for commits.
#[derive(Debug, Default)]
pub struct TableStateMachine {
    state: TableState,
}

impl TableStateMachine {
    /// Start from a table with no commits.
    pub fn new() -> Self {
        Self {
            state: TableState::empty(),
        }
    }

    /// Resume from a previously derived state (e.g. a checkpoint).
    pub fn from_state(state: TableState) -> Self {
        Self { state }
    }

    /// Check that `commit` can be applied to the current state.
    pub fn validate(&self, commit: &Commit) -> Result<(), StateError> {
        let expected = self.state.next_version();
        if commit.version != expected {
            return Err(StateError::VersionGap {
                expected,
                actual: commit.version,
            });
        }

        let mut has_metadata = self.state.metadata.is_some();
        for action in &commit.actions {
            match action {
                Action::Metadata(_) => has_metadata = true,
                Action::Add(_) if !has_metadata => {
                    return Err(StateError::MissingMetadata(commit.version))
                }
                _ => {}
            }
        }

        // Version 0 defines the table.
        if !has_metadata {
            return Err(StateError::MissingMetadata(commit.version));
        }
        Ok(())
    }

    /// Apply a single commit in place.
    ///
    /// On error the state is left unchanged.
    pub fn apply(&mut self, commit: &Commit) -> Result<(), StateError> {
        self.validate(commit)?;

        let state = &mut self.state;
        for action in &commit.actions {
            match action {
                Action::Metadata(meta) => state.metadata = Some(meta.clone()),
                Action::Add(add) => {
                    state.files.insert(add.path.clone(), add.clone());
                }
                Action::Remove(remove) => {
                    state.files.remove(&remove.path);
                }
                Action::CommitInfo(_) => {}
            }
        }

        state.version = Some(commit.version);
        Ok(())
    }

    /// Get the current derived state.
    pub fn current_state(&self) -> &TableState {
        &self.state
    }

    pub fn into_state(self) -> TableState {
        self.state
    }
}
