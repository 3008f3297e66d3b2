// Invariant Framework
//
// Invariants are pure rules that must hold for every table state
// transition. They judge a commit against the state it applies to, during
// replay and against every candidate commit before it is written, so
// violations are caught before they are durable.

use std::collections::{BTreeSet, HashSet};

use crate::log::Commit;
use crate::state::TableState;

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, previous_state: &TableState, commit: &Commit) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine with the invariants every table relies on.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(WellFormedMetadata);
        engine.register(AddsAreNew);
        engine.register(RemovesTargetLiveFiles);
        engine.register(PartitionValuesMatchColumns);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Evaluate all invariants for `commit` on top of `previous_state`.
    ///
    /// Stops at the first failure.
    pub fn evaluate(
        &self,
        previous_state: &TableState,
        commit: &Commit,
    ) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(previous_state, commit) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        version: commit.version,
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invariant `{invariant}` violated at version {version}: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub version: u64,
    pub reason: String,
}

/// Metadata must name unique columns and partition by existing ones,
/// leaving at least one data column.
pub struct WellFormedMetadata;

impl Invariant for WellFormedMetadata {
    fn name(&self) -> &'static str {
        "well-formed-metadata"
    }

    fn validate(&self, _: &TableState, commit: &Commit) -> InvariantResult {
        let Some(meta) = commit.metadata() else {
            return InvariantResult::Pass;
        };

        if let Some(column) = meta.schema.duplicate_column() {
            return InvariantResult::Fail(format!("duplicate column `{column}`"));
        }

        let mut seen = HashSet::new();
        for column in &meta.partition_columns {
            if !seen.insert(column) {
                return InvariantResult::Fail(format!("partition column `{column}` repeated"));
            }
            if meta.schema.field(column).is_none() {
                return InvariantResult::Fail(format!(
                    "partition column `{column}` is not in the schema"
                ));
            }
        }

        if !meta.partition_columns.is_empty() && meta.partition_columns.len() == meta.schema.len() {
            return InvariantResult::Fail("every column is a partition column".into());
        }

        InvariantResult::Pass
    }
}

/// An add may not reuse the path of a live file or of another add in the
/// same commit, unless the commit also removes it.
pub struct AddsAreNew;

impl Invariant for AddsAreNew {
    fn name(&self) -> &'static str {
        "adds-are-new"
    }

    fn validate(&self, previous: &TableState, commit: &Commit) -> InvariantResult {
        let removed: HashSet<&str> = commit.removes().map(|r| r.path.as_str()).collect();
        let mut added = HashSet::new();

        for add in commit.adds() {
            if !added.insert(add.path.as_str()) {
                return InvariantResult::Fail(format!("`{}` added twice", add.path));
            }
            if previous.contains_file(&add.path) && !removed.contains(add.path.as_str()) {
                return InvariantResult::Fail(format!("`{}` is already live", add.path));
            }
        }
        InvariantResult::Pass
    }
}

/// Removes must reference files that are live before the commit.
pub struct RemovesTargetLiveFiles;

impl Invariant for RemovesTargetLiveFiles {
    fn name(&self) -> &'static str {
        "removes-target-live-files"
    }

    fn validate(&self, previous: &TableState, commit: &Commit) -> InvariantResult {
        match commit.removes().find(|r| !previous.contains_file(&r.path)) {
            Some(stale) => InvariantResult::Fail(format!("`{}` is not live", stale.path)),
            None => InvariantResult::Pass,
        }
    }
}

/// Every added file carries exactly the table's partition columns, as
/// redefined by the commit's own metadata if it has any.
pub struct PartitionValuesMatchColumns;

impl Invariant for PartitionValuesMatchColumns {
    fn name(&self) -> &'static str {
        "partition-values-match-columns"
    }

    fn validate(&self, previous: &TableState, commit: &Commit) -> InvariantResult {
        let columns = match commit.metadata() {
            Some(meta) => meta.partition_columns.as_slice(),
            None => previous.partition_columns(),
        };
        let expected: BTreeSet<&str> = columns.iter().map(String::as_str).collect();

        for add in commit.adds() {
            let actual: BTreeSet<&str> = add.partition_values.keys().map(String::as_str).collect();
            if actual != expected {
                return InvariantResult::Fail(format!(
                    "`{}` has partition values for {actual:?}, table partitions by {expected:?}",
                    add.path
                ));
            }
        }
        InvariantResult::Pass
    }
}
