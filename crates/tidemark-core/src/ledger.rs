//! Durable record of applied and reverted migrations.
//!
//! The ledger is append-only. The latest entry for a version decides whether
//! it counts as applied, so reverting and re-applying leaves a readable
//! history behind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{AdapterError, AdapterResult, MigrationError};
use crate::registry::MigrationRegistry;
use crate::types::{Direction, ExecutionId, StoreId, Version};

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Timeline this entry belongs to.
    pub store: StoreId,
    /// Append order within the store, starting at 1.
    pub seq: u64,
    /// Migration version.
    pub version: Version,
    /// Migration name at the time it ran.
    pub name: String,
    /// When the run finished.
    pub applied_at: DateTime<Utc>,
    /// Runner invocation that wrote the entry.
    pub execution_id: ExecutionId,
    /// Whether the migration was applied or reverted.
    pub direction: Direction,
    /// Checksum of the migration when it was applied.
    pub checksum: Option<String>,
    /// Wall time spent in the migration's operations.
    pub execution_time_ms: u64,
}

impl LedgerEntry {
    /// Whether `self` and `other` are the same write: same slot, execution,
    /// version and direction.
    pub fn same_write(&self, other: &LedgerEntry) -> bool {
        self.store == other.store
            && self.seq == other.seq
            && self.execution_id == other.execution_id
            && self.version == other.version
            && self.direction == other.direction
    }

    /// Accept `existing`, the row already stored at this entry's seq, only if
    /// it is this same write.
    pub fn confirm_existing(&self, existing: &LedgerEntry) -> AdapterResult<()> {
        if self.same_write(existing) {
            return Ok(());
        }
        Err(AdapterError::LedgerConflict(format!(
            "seq {} of {} already holds {} {} written by {}",
            self.seq, self.store, existing.version, existing.direction, existing.execution_id
        )))
    }
}

/// Storage for ledger entries, implemented by each concrete store.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Create the ledger table or collection if missing. Idempotent.
    async fn ensure_ledger(&self) -> AdapterResult<()>;

    /// All entries for `store`, ascending by `seq`.
    async fn load_entries(&self, store: &StoreId) -> AdapterResult<Vec<LedgerEntry>>;

    /// Durably append one entry.
    ///
    /// If `(store, seq)` already exists, the stored row must be this same
    /// write (see [`LedgerEntry::confirm_existing`]), so a retry after a lost
    /// acknowledgement succeeds. A row written by anyone else fails with
    /// [`AdapterError::LedgerConflict`].
    async fn append_entry(&self, entry: &LedgerEntry) -> AdapterResult<()>;
}

/// Point-in-time view of what the ledger says is applied.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerView {
    /// Highest applied version.
    pub current_version: Option<Version>,
    /// The live `up` entry of each applied version, ascending.
    pub applied: Vec<LedgerEntry>,
}

/// Ledger for one store, with its entries cached in memory.
pub struct MigrationLedger {
    backend: Arc<dyn LedgerBackend>,
    store: StoreId,
    clock: Arc<dyn Clock>,
    entries: Vec<LedgerEntry>,
}

impl MigrationLedger {
    /// Load the ledger for `store`.
    pub async fn open(
        backend: Arc<dyn LedgerBackend>,
        store: StoreId,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MigrationError> {
        let mut ledger = Self {
            backend,
            store,
            clock,
            entries: Vec::new(),
        };
        ledger.refresh().await?;
        Ok(ledger)
    }

    /// Re-read all entries from the backend.
    pub async fn refresh(&mut self) -> Result<(), MigrationError> {
        let entries = self.backend.load_entries(&self.store).await?;
        for pair in entries.windows(2) {
            if pair[1].seq <= pair[0].seq {
                return Err(MigrationError::LedgerCorrupt {
                    store: self.store.clone(),
                    reason: format!(
                        "entries out of order: seq {} follows seq {}",
                        pair[1].seq, pair[0].seq
                    ),
                });
            }
        }
        self.entries = entries;
        Ok(())
    }

    /// Store this ledger belongs to.
    pub fn store(&self) -> &StoreId {
        &self.store
    }

    /// Every entry, ascending by `seq`.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Latest entry per version, keeping only versions whose latest entry is `up`.
    pub fn applied(&self) -> BTreeMap<Version, &LedgerEntry> {
        let mut latest: BTreeMap<Version, &LedgerEntry> = BTreeMap::new();
        for entry in &self.entries {
            latest.insert(entry.version, entry);
        }
        latest.retain(|_, e| e.direction == Direction::Up);
        latest
    }

    /// Highest applied version, after checking the ledger against `registry`.
    pub fn current_version(
        &self,
        registry: &MigrationRegistry,
    ) -> Result<Option<Version>, MigrationError> {
        let applied: Vec<Version> = self.applied().keys().copied().collect();
        validate_prefix(&self.store, &applied, &registry.all_versions_ascending())?;
        Ok(applied.last().copied())
    }

    /// Applied entries and the current version.
    pub fn snapshot(&self, registry: &MigrationRegistry) -> Result<LedgerView, MigrationError> {
        let current_version = self.current_version(registry)?;
        let applied = self.applied().into_values().cloned().collect();
        Ok(LedgerView {
            current_version,
            applied,
        })
    }

    /// Record that `version` was applied.
    pub async fn record_applied(
        &mut self,
        version: Version,
        name: &str,
        execution_id: &ExecutionId,
        checksum: Option<String>,
        elapsed: Duration,
    ) -> Result<(), MigrationError> {
        self.append(version, name, execution_id, Direction::Up, checksum, elapsed)
            .await
    }

    /// Record that `version` was reverted.
    pub async fn record_reverted(
        &mut self,
        version: Version,
        name: &str,
        execution_id: &ExecutionId,
        elapsed: Duration,
    ) -> Result<(), MigrationError> {
        self.append(version, name, execution_id, Direction::Down, None, elapsed)
            .await
    }

    async fn append(
        &mut self,
        version: Version,
        name: &str,
        execution_id: &ExecutionId,
        direction: Direction,
        checksum: Option<String>,
        elapsed: Duration,
    ) -> Result<(), MigrationError> {
        let seq = self.entries.last().map_or(1, |e| e.seq + 1);
        let entry = LedgerEntry {
            store: self.store.clone(),
            seq,
            version,
            name: name.to_string(),
            applied_at: self.clock.now(),
            execution_id: execution_id.clone(),
            direction,
            checksum,
            execution_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };

        self.backend.append_entry(&entry).await?;

        tracing::debug!(
            store = %self.store,
            seq,
            version = %version,
            direction = %direction,
            "Ledger entry recorded"
        );
        self.entries.push(entry);
        Ok(())
    }
}

/// Check that `applied` (ascending) is a prefix of `registered` (ascending).
pub fn validate_prefix(
    store: &StoreId,
    applied: &[Version],
    registered: &[Version],
) -> Result<(), MigrationError> {
    for (idx, version) in applied.iter().enumerate() {
        if registered.binary_search(version).is_err() {
            return Err(MigrationError::LedgerCorrupt {
                store: store.clone(),
                reason: format!("version {version} is recorded as applied but is not registered"),
            });
        }
        if registered.get(idx) != Some(version) {
            let missing = registered.get(idx).copied().unwrap_or(Version::ZERO);
            return Err(MigrationError::LedgerCorrupt {
                store: store.clone(),
                reason: format!(
                    "version {version} is applied but earlier version {missing} is not"
                ),
            });
        }
    }
    Ok(())
}
