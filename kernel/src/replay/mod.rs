// Deterministic Replay Engine
//
// Replays commits while enforcing invariants and produces the derived
// table state. Replaying the same commits always yields the same state.

use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::log::Commit;
use crate::state::{StateError, TableState, TableStateMachine};

/// Errors that can occur during replay.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("state machine error: {0}")]
    State(#[from] StateError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Apply one commit on top of `state`, enforcing invariants.
///
/// Leaves `state` untouched; used to validate candidate commits.
pub fn apply_commit(
    state: &TableState,
    commit: &Commit,
    invariants: &InvariantEngine,
) -> Result<TableState, ReplayError> {
    let mut state_machine = TableStateMachine::from_state(state.clone());
    step(&mut state_machine, commit, invariants)?;
    Ok(state_machine.into_state())
}

/// Replay `commits` on top of `base` and derive the final table state.
///
/// `base` is either the empty state or a checkpoint; commits must continue
/// it without gaps. Commits are applied in place.
pub fn replay_table_state<'a, I>(
    base: TableState,
    commits: I,
    invariants: &InvariantEngine,
) -> Result<TableState, ReplayError>
where
    I: IntoIterator<Item = &'a Commit>,
{
    let mut state_machine = TableStateMachine::from_state(base);

    for commit in commits {
        step(&mut state_machine, commit, invariants)?;
    }

    Ok(state_machine.into_state())
}

fn step(
    state_machine: &mut TableStateMachine,
    commit: &Commit,
    invariants: &InvariantEngine,
) -> Result<(), ReplayError> {
    state_machine.validate(commit)?;
    invariants.evaluate(state_machine.current_state(), commit)?;
    state_machine.apply(commit)?;
    Ok(())
}
