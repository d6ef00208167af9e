//! Run state machine.

use serde::Serialize;

use crate::types::{ExecutionId, StoreId, Version};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "version", rename_all = "snake_case")]
pub enum RunState {
    /// Nothing has happened yet.
    Idle,
    /// The store lock is held.
    LockAcquired,
    /// Reading and checking the ledger.
    Validating,
    /// Running a migration's operations.
    Applying(Version),
    /// Writing the ledger entry for a migration.
    Recording(Version),
    /// A forward migration was recorded.
    Advancing,
    /// A reversal was recorded.
    RolledBack(Version),
    /// Finished successfully.
    Done,
    /// Stopped with an error.
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::LockAcquired => write!(f, "lock_acquired"),
            RunState::Validating => write!(f, "validating"),
            RunState::Applying(v) => write!(f, "applying({v})"),
            RunState::Recording(v) => write!(f, "recording({v})"),
            RunState::Advancing => write!(f, "advancing"),
            RunState::RolledBack(v) => write!(f, "rolled_back({v})"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

impl RunState {
    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, LockAcquired) => true,
            (LockAcquired, Validating) => true,
            (Validating, Applying(_) | Done | Failed) => true,
            (Applying(a), Recording(r)) => a == r,
            (Applying(_), Failed) => true,
            (Recording(_), Advancing | Failed) => true,
            (Recording(r), RolledBack(b)) => r == b,
            (Advancing | RolledBack(_), Applying(_) | Done) => true,
            _ => false,
        }
    }

    /// Whether the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Tracks and logs state transitions for one run.
#[derive(Debug)]
pub(crate) struct StateTracker {
    store: StoreId,
    execution_id: ExecutionId,
    state: RunState,
}

impl StateTracker {
    pub(crate) fn new(store: StoreId, execution_id: ExecutionId) -> Self {
        Self {
            store,
            execution_id,
            state: RunState::Idle,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid run transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(
            store = %self.store,
            execution_id = %self.execution_id,
            from = %self.state,
            state = %next,
            "Run state changed"
        );
        self.state = next;
    }

    /// Move to `Failed` unless the run already ended.
    pub(crate) fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.transition(RunState::Failed);
        }
    }
}
