//! Read-only view of a store's migration state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lock::LockState;
use crate::types::{ExecutionId, StoreId, Version};

/// One applied migration as the ledger records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Version.
    pub version: Version,
    /// Name recorded at apply time.
    pub name: String,
    /// When it was applied.
    pub applied_at: DateTime<Utc>,
    /// Execution that applied it.
    pub execution_id: ExecutionId,
    /// Whether the recorded checksum matches the registered migration.
    /// `None` when no checksum was recorded.
    pub checksum_matches: Option<bool>,
}

/// Answer to `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Store described.
    pub store: StoreId,
    /// Highest applied version.
    pub current_version: Option<Version>,
    /// Highest registered version.
    pub latest_version: Option<Version>,
    /// Applied migrations, ascending.
    pub applied: Vec<AppliedMigration>,
    /// Registered versions not yet applied, ascending.
    pub pending: Vec<Version>,
    /// Lock holder, if any.
    pub lock: LockState,
}

impl StatusReport {
    /// Whether every registered migration is applied.
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Applied migrations whose checksum no longer matches.
    pub fn drifted(&self) -> impl Iterator<Item = &AppliedMigration> {
        self.applied
            .iter()
            .filter(|m| m.checksum_matches == Some(false))
    }
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<Version>| v.map_or_else(|| "none".to_string(), |v| v.to_string());
        writeln!(f, "store:   {}", self.store)?;
        writeln!(f, "current: {}", show(self.current_version))?;
        writeln!(f, "latest:  {}", show(self.latest_version))?;
        match &self.lock {
            LockState::Free => writeln!(f, "lock:    free")?,
            LockState::Held {
                holder, expires_at, ..
            } => writeln!(f, "lock:    held by {holder} until {expires_at}")?,
            LockState::Expired { holder, expired_at } => {
                writeln!(f, "lock:    expired ({holder}, lapsed {expired_at})")?
            }
        }
        for m in &self.applied {
            let drift = if m.checksum_matches == Some(false) {
                "  [changed]"
            } else {
                ""
            };
            writeln!(
                f,
                "  [x] {}_{}  {}{}",
                m.version,
                m.name,
                m.applied_at.format("%Y-%m-%d %H:%M:%S"),
                drift
            )?;
        }
        for v in &self.pending {
            writeln!(f, "  [ ] {v}")?;
        }
        Ok(())
    }
}
