// Transaction Log Store
//
// Persists commits through a `StorageBackend` and rebuilds table state from
// them. Commits use optimistic concurrency: the candidate entry is written
// to a temporary name and atomically published as the next version; losing
// that race triggers conflict detection, a rebase and a bounded retry.
//
// Properties:
// - Append-only: a published version is never rewritten
// - Ordered: version N+1 is only ever written by a writer that read N
// - No gaps: replay fails loudly on a missing version

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::actions::{Commit, CommitInfo};
use super::conflict::{check_conflicts, ConflictError};
use super::transaction::Transaction;
use super::{
    checkpoint_path, commit_path, parse_log_file, LogError, LogFile, Version, LOG_DIR,
    LOG_TMP_DIR,
};
use crate::config::TableConfig;
use crate::invariants::InvariantEngine;
use crate::replay::{apply_commit, replay_table_state, ReplayError};
use crate::state::TableState;
use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("commit conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("candidate commit rejected: {0}")]
    Rejected(#[from] ReplayError),

    #[error("gave up after {attempts} commit attempts")]
    AttemptsExceeded { attempts: u32 },
}

/// A published commit and the table state it produced.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub commit: Commit,
    pub state: TableState,
    /// Attempts used, 1 when the first try won.
    pub attempts: u32,
}

/// Commit and checkpoint versions found in the log directory.
#[derive(Debug, Default)]
struct LogListing {
    commits: Vec<Version>,
    checkpoints: Vec<Version>,
}

impl LogListing {
    fn latest_commit(&self) -> Option<Version> {
        self.commits.last().copied()
    }

    fn checkpoint_at_or_below(&self, version: Version) -> Option<Version> {
        self.checkpoints.iter().rev().find(|v| **v <= version).copied()
    }
}

pub struct TransactionLog {
    backend: Arc<dyn StorageBackend>,
    invariants: InvariantEngine,
    config: TableConfig,
}

impl TransactionLog {
    pub fn new(backend: Arc<dyn StorageBackend>, config: TableConfig) -> Self {
        Self {
            backend,
            invariants: InvariantEngine::standard(),
            config,
        }
    }

    /// Replace the invariant set used for replay and commit validation.
    pub fn with_invariants(mut self, invariants: InvariantEngine) -> Self {
        self.invariants = invariants;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn list(&self) -> Result<LogListing, LogError> {
        let mut listing = LogListing::default();
        for path in self.backend.list(LOG_DIR)? {
            match parse_log_file(&path) {
                Some(LogFile::Commit(v)) => listing.commits.push(v),
                Some(LogFile::Checkpoint(v)) => listing.checkpoints.push(v),
                None => {}
            }
        }
        listing.commits.sort_unstable();
        listing.checkpoints.sort_unstable();
        Ok(listing)
    }

    /// Highest committed version, `None` if the table has no log.
    pub fn latest_version(&self) -> Result<Option<Version>, LogError> {
        Ok(self.list()?.latest_commit())
    }

    pub fn read_commit(&self, version: Version) -> Result<Commit, LogError> {
        let data = match self.backend.read(&commit_path(version)) {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => return Err(LogError::MissingVersion(version)),
            Err(e) => return Err(e.into()),
        };
        Commit::decode(version, &data)
    }

    fn read_commits(&self, from: Version, to: Version) -> Result<Vec<Commit>, LogError> {
        (from..=to).map(|v| self.read_commit(v)).collect()
    }

    fn read_checkpoint(&self, version: Version) -> Result<TableState, LogError> {
        let data = self.backend.read(&checkpoint_path(version))?;
        let state: TableState = serde_json::from_slice(&data).map_err(|e| LogError::Corrupt {
            version,
            reason: format!("checkpoint: {e}"),
        })?;

        if state.version() != Some(version) {
            return Err(LogError::Corrupt {
                version,
                reason: format!("checkpoint holds version {:?}", state.version()),
            });
        }
        Ok(state)
    }

    fn load(&self, target: Option<Version>) -> Result<TableState, LogError> {
        let listing = self.list()?;
        let latest = listing.latest_commit();

        let target = match (target, latest) {
            (None, None) => return Ok(TableState::empty()),
            (None, Some(latest)) => latest,
            (Some(requested), Some(latest)) if requested <= latest => requested,
            (Some(requested), latest) => {
                return Err(LogError::VersionNotFound { requested, latest })
            }
        };

        let base = match listing.checkpoint_at_or_below(target) {
            Some(cp) => match self.read_checkpoint(cp) {
                Ok(state) => state,
                Err(e) => {
                    warn!(checkpoint = cp, error = %e, "ignoring unreadable checkpoint");
                    TableState::empty()
                }
            },
            None => TableState::empty(),
        };

        let commits = self.read_commits(base.next_version(), target)?;
        debug!(
            target,
            from_checkpoint = base.version(),
            commits = commits.len(),
            "replaying log"
        );
        Ok(replay_table_state(base, &commits, &self.invariants)?)
    }

    /// State at the latest version.
    pub fn snapshot(&self) -> Result<TableState, LogError> {
        self.load(None)
    }

    /// State at `version`.
    pub fn snapshot_at(&self, version: Version) -> Result<TableState, LogError> {
        self.load(Some(version))
    }

    /// Bring a cached state up to the latest version.
    pub fn update(&self, state: &TableState) -> Result<TableState, LogError> {
        Ok(self.catch_up(state)?.0)
    }

    /// Latest state plus the commits applied on top of `state`.
    fn catch_up(&self, state: &TableState) -> Result<(TableState, Vec<Commit>), LogError> {
        let latest = match self.latest_version()? {
            Some(latest) => latest,
            None => return Ok((TableState::empty(), Vec::new())),
        };

        // A cached state ahead of storage is stale; start over.
        if state.version().is_some_and(|v| v > latest) {
            return Ok((self.load(Some(latest))?, Vec::new()));
        }

        let next = state.next_version();
        if next > latest {
            return Ok((state.clone(), Vec::new()));
        }

        let commits = self.read_commits(next, latest)?;
        let updated = replay_table_state(state.clone(), &commits, &self.invariants)?;
        Ok((updated, commits))
    }

    /// Commit infos, newest first.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<(Version, CommitInfo)>, LogError> {
        let listing = self.list()?;
        let mut entries = Vec::new();

        for version in listing.commits.iter().rev().take(limit.unwrap_or(usize::MAX)) {
            let commit = self.read_commit(*version)?;
            if let Some(info) = commit.commit_info() {
                entries.push((*version, info.clone()));
            }
        }
        Ok(entries)
    }

    /// Write a temporary file and publish it under `final_path`.
    fn publish(&self, final_path: &str, data: &[u8]) -> Result<(), StorageError> {
        let tmp = format!("{LOG_TMP_DIR}/{}.json", Uuid::new_v4());
        self.backend.write(&tmp, data, false)?;

        match self.backend.atomic_rename(&tmp, final_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(cleanup) = self.backend.delete(&tmp) {
                    debug!(tmp, error = %cleanup, "failed to remove temporary log file");
                }
                Err(e)
            }
        }
    }

    /// Attempt to publish `commit` exactly once.
    pub fn try_commit(&self, commit: &Commit) -> Result<(), LogError> {
        let data = commit.encode()?;
        match self.publish(&commit_path(commit.version), &data) {
            Ok(()) => Ok(()),
            Err(StorageError::AlreadyExists(_)) => {
                Err(LogError::VersionAlreadyCommitted(commit.version))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commit `txn`, retrying on lost races.
    pub fn commit(&self, mut txn: Transaction) -> Result<CommitOutcome, CommitError> {
        let max_attempts = self.config.max_commit_attempts;

        for attempt in 1..=max_attempts {
            let version = txn.read_state().next_version();
            let now = chrono::Utc::now().timestamp_millis();
            let commit = Commit::new(version, txn.actions(now)?);

            // Validated before publishing: an invalid entry must never land.
            let next_state = apply_commit(txn.read_state(), &commit, &self.invariants)?;

            match self.try_commit(&commit) {
                Ok(()) => {
                    info!(
                        version,
                        attempt,
                        operation = ?txn.operation(),
                        adds = txn.adds().len(),
                        "committed"
                    );
                    self.maybe_checkpoint(&next_state);
                    return Ok(CommitOutcome {
                        commit,
                        state: next_state,
                        attempts: attempt,
                    });
                }
                Err(LogError::VersionAlreadyCommitted(_)) => {
                    let (latest, winning) = self.catch_up(txn.read_state())?;
                    warn!(
                        version,
                        attempt,
                        latest = latest.version(),
                        "lost commit race, rebasing"
                    );
                    check_conflicts(&txn, &winning)?;
                    txn.rebase(latest);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CommitError::AttemptsExceeded {
            attempts: max_attempts,
        })
    }

    fn maybe_checkpoint(&self, state: &TableState) {
        let interval = self.config.checkpoint_interval;
        let Some(version) = state.version() else {
            return;
        };

        if interval == 0 || version == 0 || version % interval != 0 {
            return;
        }

        if let Err(e) = self.write_checkpoint(state) {
            warn!(version, error = %e, "failed to write checkpoint");
        }
    }

    /// Persist `state` as the checkpoint for its version.
    ///
    /// Checkpoints are write-once; an existing one for the same version
    /// holds the same state and is left alone.
    pub fn write_checkpoint(&self, state: &TableState) -> Result<(), LogError> {
        let Some(version) = state.version() else {
            return Ok(());
        };

        let data = serde_json::to_vec(state).map_err(LogError::Encode)?;
        match self.publish(&checkpoint_path(version), &data) {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {
                debug!(version, "checkpoint written");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Action;
    use crate::schema::{DataType, Field, Schema};
    use crate::state::tests::add;
    use crate::storage::LocalBackend;

    fn log(config: TableConfig) -> (tempfile::TempDir, TransactionLog) {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(dir.path()));
        (dir, TransactionLog::new(backend, config))
    }

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::Int64, false)]).unwrap()
    }

    fn create(log: &TransactionLog) -> TableState {
        log.commit(Transaction::create(TableState::empty(), schema(), vec![]))
            .unwrap()
            .state
    }

    fn append(log: &TransactionLog, state: TableState, path: &str) -> TableState {
        log.commit(Transaction::append(state, schema(), vec![], vec![add(path, 1)]))
            .unwrap()
            .state
    }

    #[test]
    fn empty_log_has_no_version() {
        let (_dir, log) = log(TableConfig::default());
        assert_eq!(log.latest_version().unwrap(), None);
        assert_eq!(log.snapshot().unwrap(), TableState::empty());
    }

    #[test]
    fn commits_advance_versions_and_replay() {
        let (_dir, log) = log(TableConfig::default());
        let created = create(&log);
        assert_eq!(created.version(), Some(0));

        let appended = append(&log, created, "a.parquet");
        assert_eq!(appended.version(), Some(1));
        assert_eq!(log.latest_version().unwrap(), Some(1));
        assert_eq!(log.snapshot().unwrap(), appended);
        assert_eq!(log.snapshot_at(0).unwrap().num_files(), 0);
    }

    #[test]
    fn stale_writer_rebases_onto_winner() {
        let (_dir, log) = log(TableConfig::default());
        let created = create(&log);

        append(&log, created.clone(), "winner.parquet");
        let outcome = log
            .commit(Transaction::append(
                created,
                schema(),
                vec![],
                vec![add("loser.parquet", 1)],
            ))
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.commit.version, 2);
        assert!(outcome.state.contains_file("winner.parquet"));
        assert!(outcome.state.contains_file("loser.parquet"));
    }

    #[test]
    fn retries_are_bounded() {
        let (_dir, log) = log(TableConfig {
            max_commit_attempts: 1,
            ..TableConfig::default()
        });
        let created = create(&log);
        append(&log, created.clone(), "winner.parquet");

        let err = log
            .commit(Transaction::append(
                created,
                schema(),
                vec![],
                vec![add("loser.parquet", 1)],
            ))
            .unwrap_err();
        assert!(matches!(err, CommitError::AttemptsExceeded { attempts: 1 }));
        assert_eq!(log.latest_version().unwrap(), Some(1));
    }

    #[test]
    fn invalid_candidate_is_never_published() {
        let (_dir, log) = log(TableConfig::default());
        let state = append(&log, create(&log), "a.parquet");

        let err = log
            .commit(Transaction::append(
                state,
                schema(),
                vec![],
                vec![add("a.parquet", 1)],
            ))
            .unwrap_err();
        assert!(matches!(err, CommitError::Rejected(_)));
        assert_eq!(log.latest_version().unwrap(), Some(1));
    }

    #[test]
    fn try_commit_reports_taken_version() {
        let (_dir, log) = log(TableConfig::default());
        create(&log);

        let err = log
            .try_commit(&Commit::new(0, vec![Action::Add(add("x.parquet", 1))]))
            .unwrap_err();
        assert!(matches!(err, LogError::VersionAlreadyCommitted(0)));
        assert!(log.backend().list(LOG_TMP_DIR).unwrap().is_empty());
    }

    #[test]
    fn checkpoints_are_written_and_used() {
        let (_dir, log) = log(TableConfig {
            checkpoint_interval: 2,
            ..TableConfig::default()
        });

        let mut state = create(&log);
        for i in 0..5 {
            state = append(&log, state, &format!("f{i}.parquet"));
        }

        let listing = log.list().unwrap();
        assert_eq!(listing.checkpoints, vec![2, 4]);
        assert_eq!(log.snapshot().unwrap(), state);
        assert_eq!(log.snapshot_at(3).unwrap().num_files(), 3);
    }

    #[test]
    fn unreadable_checkpoint_falls_back_to_full_replay() {
        let (_dir, log) = log(TableConfig {
            checkpoint_interval: 0,
            ..TableConfig::default()
        });
        let mut state = create(&log);
        state = append(&log, state, "a.parquet");

        log.backend()
            .write(&checkpoint_path(1), b"not json", false)
            .unwrap();
        assert_eq!(log.snapshot().unwrap(), state);
    }

    #[test]
    fn missing_version_is_reported() {
        let (_dir, log) = log(TableConfig::default());
        let state = create(&log);
        let state = append(&log, state, "a.parquet");
        append(&log, state, "b.parquet");

        log.backend().delete(&commit_path(1)).unwrap();
        assert!(matches!(
            log.snapshot().unwrap_err(),
            LogError::MissingVersion(1)
        ));
    }

    #[test]
    fn snapshot_beyond_latest_is_not_found() {
        let (_dir, log) = log(TableConfig::default());
        create(&log);
        assert!(matches!(
            log.snapshot_at(5).unwrap_err(),
            LogError::VersionNotFound {
                requested: 5,
                latest: Some(0)
            }
        ));
    }

    #[test]
    fn history_is_newest_first() {
        let (_dir, log) = log(TableConfig::default());
        let state = create(&log);
        append(&log, state, "a.parquet");

        let history = log.history(None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].0, 1);
        assert_eq!(history[1].1.operation, crate::log::Operation::CreateTable);
        assert_eq!(log.history(Some(1)).unwrap().len(), 1);
    }
}
