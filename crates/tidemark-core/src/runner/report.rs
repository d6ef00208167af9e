//! What a run did.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::RunState;
use crate::types::{Direction, ExecutionId, StoreId, Version};

/// Non-fatal condition observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// The lock was taken over from a holder whose lease had expired.
    LockExpiredTakeover {
        /// Holder of the expired lease.
        previous_holder: ExecutionId,
        /// When that lease lapsed.
        expired_at: DateTime<Utc>,
    },
    /// An applied migration no longer matches its recorded checksum.
    ChecksumDrift {
        /// Applied version.
        version: Version,
        /// Migration name.
        name: String,
        /// Checksum in the ledger.
        recorded: String,
        /// Checksum of the registered migration.
        current: String,
    },
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunWarning::LockExpiredTakeover {
                previous_holder,
                expired_at,
            } => write!(
                f,
                "took over lock from {previous_holder} whose lease expired at {expired_at}"
            ),
            RunWarning::ChecksumDrift { version, name, .. } => {
                write!(f, "migration {version} ({name}) changed since it was applied")
            }
        }
    }
}

/// One migration that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Version.
    pub version: Version,
    /// Name.
    pub name: String,
    /// Direction it ran in.
    pub direction: Direction,
    /// Time spent in its operations.
    pub elapsed_ms: u64,
}

/// Result of `migrate_up`, `migrate_down`, `rollback_last` or `plan`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Store the run targeted.
    pub store: StoreId,
    /// Execution identifier used for the lock and ledger.
    pub execution_id: ExecutionId,
    /// Direction of the run.
    pub direction: Direction,
    /// Whether no migration was actually run.
    pub dry_run: bool,
    /// Version confirmed by the ledger before the run.
    pub from_version: Option<Version>,
    /// Version confirmed after the run, or projected for a dry run.
    pub to_version: Option<Version>,
    /// Versions selected to run, in execution order.
    pub planned: Vec<Version>,
    /// Migrations that ran.
    pub steps: Vec<StepOutcome>,
    /// Non-fatal conditions.
    pub warnings: Vec<RunWarning>,
    /// State the machine ended in.
    pub final_state: RunState,
}

impl RunReport {
    /// Whether the run changed nothing because nothing was pending.
    pub fn is_noop(&self) -> bool {
        self.planned.is_empty()
    }

    /// Versions that ran, in order.
    pub fn applied_versions(&self) -> Vec<Version> {
        self.steps.iter().map(|s| s.version).collect()
    }
}
