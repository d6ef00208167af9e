//! Engine error types.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::adapter::StoreKind;
use crate::types::{Direction, ExecutionId, StoreId, Version};

/// Kind of schema object named in an adapter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A table or collection.
    Collection,
    /// An index.
    Index,
    /// A column or document field.
    Field,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Collection => write!(f, "collection"),
            ObjectKind::Index => write!(f, "index"),
            ObjectKind::Field => write!(f, "field"),
        }
    }
}

/// Errors raised by a store adapter or its ledger/lock backends.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The object does not exist and the operation was not idempotent.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What kind of object was missing.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// The object exists and strict creation was requested.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// What kind of object already exists.
        kind: ObjectKind,
        /// Object name.
        name: String,
    },

    /// An index with this name exists over different keys.
    #[error("index {name} already exists with keys [{existing}], requested [{requested}]")]
    IndexConflict {
        /// Index name.
        name: String,
        /// Key signature of the existing index.
        existing: String,
        /// Key signature that was requested.
        requested: String,
    },

    /// The operation has no meaning for this store kind.
    #[error("{operation} is not supported by the {store} adapter")]
    Unsupported {
        /// Operation that was attempted.
        operation: &'static str,
        /// Kind of store that rejected it.
        store: StoreKind,
    },

    /// The definition passed to the adapter is malformed.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Starting, committing or rolling back a unit of work failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Error reported by the underlying driver.
    #[error("store error: {0}")]
    Backend(String),

    /// A ledger write was refused because another execution owns that slot
    /// or the migration lock.
    #[error("ledger conflict: {0}")]
    LedgerConflict(String),
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised by the registry, ledger, lock manager and runner.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Another execution holds a live lock on the store.
    #[error("store {store} is locked by {holder} until {expires_at}")]
    LockHeld {
        /// Store that is locked.
        store: StoreId,
        /// Current holder.
        holder: ExecutionId,
        /// Lease expiry of the current holder.
        expires_at: DateTime<Utc>,
    },

    /// The lease was taken over or removed while this execution was running.
    #[error("lock on {store} is no longer held by {execution_id}")]
    LockLost {
        /// Store whose lock was lost.
        store: StoreId,
        /// Execution that lost it.
        execution_id: ExecutionId,
    },

    /// The ledger does not describe a contiguous prefix of the registry.
    ///
    /// Requires manual intervention.
    #[error("ledger for {store} is corrupt: {reason}")]
    LedgerCorrupt {
        /// Affected store.
        store: StoreId,
        /// Description of the inconsistency.
        reason: String,
    },

    /// Two registered migrations share a version.
    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        /// The shared version.
        version: Version,
        /// Name of the first migration.
        first: String,
        /// Name of the second migration.
        second: String,
    },

    /// Two registered migrations share a name.
    #[error("duplicate migration name {name}: versions {first} and {second}")]
    DuplicateName {
        /// The shared name.
        name: String,
        /// Version of the first migration.
        first: Version,
        /// Version of the second migration.
        second: Version,
    },

    /// A migration was registered with the reserved version 0.
    #[error("migration {name} uses reserved version 0")]
    InvalidVersion {
        /// Offending migration.
        name: String,
    },

    /// The store identifier is empty or contains forbidden characters.
    #[error("invalid store identifier: {0:?}")]
    InvalidStoreId(String),

    /// A `<timestamp>_<name>` identifier could not be parsed.
    #[error("invalid migration identifier: {0:?}")]
    InvalidMigrationId(String),

    /// The requested target version cannot be reached.
    #[error("invalid target version {target}: {reason}")]
    InvalidTarget {
        /// Requested target.
        target: Version,
        /// Why it was rejected.
        reason: String,
    },

    /// A recorded checksum differs from the registered migration.
    #[error("checksum mismatch for {version} ({name}): recorded {recorded}, current {current}")]
    ChecksumMismatch {
        /// Applied version.
        version: Version,
        /// Migration name.
        name: String,
        /// Checksum stored in the ledger.
        recorded: String,
        /// Checksum of the registered migration.
        current: String,
    },

    /// An adapter operation failed while running a migration.
    ///
    /// The run stopped at `version`; the ledger still confirms `confirmed_version`.
    #[error(
        "migration {version} ({name}) failed during {direction}; ledger confirms {}: {source}",
        display_confirmed(.confirmed_version)
    )]
    MigrationFailed {
        /// Direction being run.
        direction: Direction,
        /// Last attempted version.
        version: Version,
        /// Its name.
        name: String,
        /// Highest version the ledger confirms as applied.
        confirmed_version: Option<Version>,
        /// Underlying store error.
        #[source]
        source: AdapterError,
    },

    /// The schema change succeeded but could not be recorded.
    ///
    /// The store may not match the ledger; an operator must check it by hand.
    #[error(
        "migration {version} ({name}) was applied ({direction}) but recording it failed after {attempts} attempts: {source}"
    )]
    LedgerWriteAfterApply {
        /// Applied version.
        version: Version,
        /// Its name.
        name: String,
        /// Direction that was applied.
        direction: Direction,
        /// Number of ledger write attempts.
        attempts: u32,
        /// Last ledger write error.
        #[source]
        source: AdapterError,
    },

    /// Ledger or lock storage error.
    #[error("storage error: {0}")]
    Storage(#[from] AdapterError),

    /// Runner configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MigrationError {
    /// Whether this error is lock contention, the only retryable condition.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, MigrationError::LockHeld { .. })
    }

    /// Whether this error needs an operator to inspect the store by hand.
    pub fn requires_intervention(&self) -> bool {
        matches!(
            self,
            MigrationError::LedgerCorrupt { .. } | MigrationError::LedgerWriteAfterApply { .. }
        )
    }
}

fn display_confirmed(version: &Option<Version>) -> String {
    match version {
        Some(v) => format!("version {v}"),
        None => "no applied version".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::NotFound {
            kind: ObjectKind::Index,
            name: "email_1".to_string(),
        };
        assert_eq!(err.to_string(), "index not found: email_1");

        let err = AdapterError::Unsupported {
            operation: "add_field with expression default",
            store: StoreKind::Document,
        };
        assert!(err.to_string().contains("document adapter"));
    }

    #[test]
    fn test_migration_failed_reports_confirmed_version() {
        let err = MigrationError::MigrationFailed {
            direction: Direction::Up,
            version: Version::new(3),
            name: "add phone column".to_string(),
            confirmed_version: Some(Version::new(2)),
            source: AdapterError::Backend("connection reset".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("migration 3 (add phone column)"));
        assert!(text.contains("ledger confirms version 2"));
        assert!(text.contains("connection reset"));

        let err = MigrationError::MigrationFailed {
            direction: Direction::Up,
            version: Version::new(1),
            name: "init".to_string(),
            confirmed_version: None,
            source: AdapterError::Backend("boom".to_string()),
        };
        assert!(err.to_string().contains("no applied version"));
    }

    #[test]
    fn test_error_classification() {
        let corrupt = MigrationError::LedgerCorrupt {
            store: StoreId::new("svc/pg").unwrap(),
            reason: "gap".to_string(),
        };
        assert!(corrupt.requires_intervention());
        assert!(!corrupt.is_lock_held());
    }
}
