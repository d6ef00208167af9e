//! Lease-based mutual exclusion per store.
//!
//! A lock is a single record keyed by store. The holder keeps it alive by
//! renewing before `expires_at`; an expired record may be taken over by
//! anyone, using compare-and-swap so that two contenders cannot both win.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{truncate_millis, Clock};
use crate::config::LockRetryPolicy;
use crate::error::{AdapterResult, MigrationError};
use crate::types::{ExecutionId, StoreId};

/// Persisted lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Locked store.
    pub store: StoreId,
    /// Execution holding the lease.
    pub holder: ExecutionId,
    /// When the holder first acquired it.
    pub acquired_at: DateTime<Utc>,
    /// Lease expiry.
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    /// Whether the lease has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage for lock records, implemented by each concrete store.
///
/// Every mutating call must be atomic with respect to concurrent callers.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Create the lock table or collection if missing. Idempotent.
    async fn ensure_locks(&self) -> AdapterResult<()>;

    /// Current record for `store`.
    async fn get_lock(&self, store: &StoreId) -> AdapterResult<Option<LockRecord>>;

    /// Insert `record` if no record exists for its store. Returns whether it was inserted.
    async fn try_insert_lock(&self, record: &LockRecord) -> AdapterResult<bool>;

    /// Replace `expected` with `replacement` if the stored record still has
    /// `expected`'s holder and expiry. Returns whether it was replaced.
    async fn compare_and_replace_lock(
        &self,
        expected: &LockRecord,
        replacement: &LockRecord,
    ) -> AdapterResult<bool>;

    /// Move the expiry of a record held by `holder`. Returns whether it was held.
    async fn extend_lock(
        &self,
        store: &StoreId,
        holder: &ExecutionId,
        expires_at: DateTime<Utc>,
    ) -> AdapterResult<bool>;

    /// Delete the record if held by `holder`. Returns whether it was removed.
    async fn remove_lock(&self, store: &StoreId, holder: &ExecutionId) -> AdapterResult<bool>;
}

/// Lock status as reported by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    /// Nobody holds the lock.
    Free,
    /// A live lease exists.
    Held {
        /// Holder.
        holder: ExecutionId,
        /// When it was acquired.
        acquired_at: DateTime<Utc>,
        /// When it lapses.
        expires_at: DateTime<Utc>,
    },
    /// A record exists but its lease has lapsed.
    Expired {
        /// Last holder.
        holder: ExecutionId,
        /// When the lease lapsed.
        expired_at: DateTime<Utc>,
    },
}

/// Outcome of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// The record now stored.
    pub record: LockRecord,
    /// The expired record that was replaced, if this was a takeover.
    pub taken_over: Option<LockRecord>,
}

/// Acquires, renews and releases per-store leases.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    /// Create a lock manager.
    pub fn new(backend: Arc<dyn LockBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// A manager over the same backend with a different clock.
    pub fn with_clock(&self, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock,
        }
    }

    /// Bootstrap the lock table or collection.
    pub async fn ensure(&self) -> Result<(), MigrationError> {
        self.backend.ensure_locks().await?;
        Ok(())
    }

    /// Take the lock once, or fail with `LockHeld`.
    ///
    /// Succeeds when no record exists, when the record is expired, or when
    /// `execution_id` already holds it (the lease is extended).
    pub async fn acquire(
        &self,
        store: &StoreId,
        execution_id: &ExecutionId,
        lease: Duration,
    ) -> Result<LockGrant, MigrationError> {
        let lease = to_chrono(lease)?;

        loop {
            let now = self.clock.now();
            let record = LockRecord {
                store: store.clone(),
                holder: execution_id.clone(),
                acquired_at: now,
                expires_at: truncate_millis(now + lease),
            };

            if self.backend.try_insert_lock(&record).await? {
                debug!(store = %store, execution_id = %execution_id, "Lock acquired");
                return Ok(LockGrant {
                    record,
                    taken_over: None,
                });
            }

            let Some(existing) = self.backend.get_lock(store).await? else {
                // Released between insert and read.
                continue;
            };

            if existing.holder == *execution_id {
                if self
                    .backend
                    .extend_lock(store, execution_id, record.expires_at)
                    .await?
                {
                    return Ok(LockGrant {
                        record: LockRecord {
                            expires_at: record.expires_at,
                            ..existing
                        },
                        taken_over: None,
                    });
                }
                continue;
            }

            if !existing.is_expired(now) {
                return Err(MigrationError::LockHeld {
                    store: store.clone(),
                    holder: existing.holder,
                    expires_at: existing.expires_at,
                });
            }

            if self
                .backend
                .compare_and_replace_lock(&existing, &record)
                .await?
            {
                warn!(
                    store = %store,
                    execution_id = %execution_id,
                    previous_holder = %existing.holder,
                    expired_at = %existing.expires_at,
                    "Took over expired migration lock"
                );
                return Ok(LockGrant {
                    record,
                    taken_over: Some(existing),
                });
            }
            // Another contender replaced the record first. Re-read and decide again.
        }
    }

    /// Take the lock, backing off while it is held by someone else.
    pub async fn acquire_with_retry(
        &self,
        store: &StoreId,
        execution_id: &ExecutionId,
        lease: Duration,
        policy: &LockRetryPolicy,
    ) -> Result<LockGrant, MigrationError> {
        let mut attempt = 1;
        loop {
            match self.acquire(store, execution_id, lease).await {
                Err(e) if e.is_lock_held() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    info!(
                        store = %store,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Migration lock is held, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Extend the lease. Fails with `LockLost` if the caller no longer holds it.
    pub async fn renew(
        &self,
        store: &StoreId,
        execution_id: &ExecutionId,
        lease: Duration,
    ) -> Result<DateTime<Utc>, MigrationError> {
        let expires_at = truncate_millis(self.clock.now() + to_chrono(lease)?);
        if self
            .backend
            .extend_lock(store, execution_id, expires_at)
            .await?
        {
            debug!(store = %store, execution_id = %execution_id, %expires_at, "Lease renewed");
            Ok(expires_at)
        } else {
            Err(MigrationError::LockLost {
                store: store.clone(),
                execution_id: execution_id.clone(),
            })
        }
    }

    /// Release the lock if `execution_id` holds it. Otherwise nothing happens.
    pub async fn release(
        &self,
        store: &StoreId,
        execution_id: &ExecutionId,
    ) -> Result<(), MigrationError> {
        let removed = self.backend.remove_lock(store, execution_id).await?;
        debug!(store = %store, execution_id = %execution_id, removed, "Lock released");
        Ok(())
    }

    /// Report who holds the lock, without changing it.
    pub async fn inspect(&self, store: &StoreId) -> Result<LockState, MigrationError> {
        let state = match self.backend.get_lock(store).await? {
            None => LockState::Free,
            Some(record) if record.is_expired(self.clock.now()) => LockState::Expired {
                holder: record.holder,
                expired_at: record.expires_at,
            },
            Some(record) => LockState::Held {
                holder: record.holder,
                acquired_at: record.acquired_at,
                expires_at: record.expires_at,
            },
        };
        Ok(state)
    }
}

fn to_chrono(lease: Duration) -> Result<chrono::Duration, MigrationError> {
    chrono::Duration::from_std(lease)
        .map_err(|e| MigrationError::InvalidConfig(format!("lease duration out of range: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;

    const LEASE: Duration = Duration::from_secs(60);

    fn store() -> StoreId {
        StoreId::new("events/memory").unwrap()
    }

    fn manager() -> (LockManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = Arc::new(MemoryStore::new());
        (LockManager::new(backend, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (locks, _) = manager();
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();

        let grant = locks.acquire(&store(), &a, LEASE).await.unwrap();
        assert!(grant.taken_over.is_none());

        let held = locks.acquire(&store(), &b, LEASE).await;
        assert!(matches!(held, Err(MigrationError::LockHeld { ref holder, .. }) if *holder == a));

        locks.release(&store(), &a).await.unwrap();
        assert_eq!(locks.inspect(&store()).await.unwrap(), LockState::Free);
        assert!(locks.acquire(&store(), &b, LEASE).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_owner_only() {
        let (locks, _) = manager();
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();

        locks.release(&store(), &a).await.unwrap();
        locks.acquire(&store(), &a, LEASE).await.unwrap();
        locks.release(&store(), &b).await.unwrap();
        assert!(matches!(
            locks.inspect(&store()).await.unwrap(),
            LockState::Held { holder, .. } if holder == a
        ));
        locks.release(&store(), &a).await.unwrap();
        locks.release(&store(), &a).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (locks, clock) = manager();
        let crashed = ExecutionId::generate();
        let next = ExecutionId::generate();

        locks.acquire(&store(), &crashed, LEASE).await.unwrap();
        clock.advance(LEASE + Duration::from_secs(1));

        assert!(matches!(
            locks.inspect(&store()).await.unwrap(),
            LockState::Expired { .. }
        ));

        let grant = locks.acquire(&store(), &next, LEASE).await.unwrap();
        let previous = grant.taken_over.unwrap();
        assert_eq!(previous.holder, crashed);
        assert_eq!(grant.record.holder, next);

        let renewed = locks.renew(&store(), &crashed, LEASE).await;
        assert!(matches!(renewed, Err(MigrationError::LockLost { .. })));
    }

    #[tokio::test]
    async fn test_renew_extends_expiry() {
        let (locks, clock) = manager();
        let a = ExecutionId::generate();

        let grant = locks.acquire(&store(), &a, LEASE).await.unwrap();
        clock.advance(Duration::from_secs(30));
        let expires_at = locks.renew(&store(), &a, LEASE).await.unwrap();
        assert_eq!((expires_at - grant.record.expires_at).num_seconds(), 30);

        clock.advance(Duration::from_secs(45));
        assert!(matches!(
            locks.inspect(&store()).await.unwrap(),
            LockState::Held { .. }
        ));
    }

    #[tokio::test]
    async fn test_reacquire_by_holder_extends() {
        let (locks, _) = manager();
        let a = ExecutionId::generate();
        locks.acquire(&store(), &a, LEASE).await.unwrap();
        let again = locks.acquire(&store(), &a, LEASE).await.unwrap();
        assert_eq!(again.record.holder, a);
        assert!(again.taken_over.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_retry_gives_up() {
        let (locks, _) = manager();
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();
        locks.acquire(&store(), &a, LEASE).await.unwrap();

        let policy = LockRetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(10));
        let result = locks.acquire_with_retry(&store(), &b, LEASE, &policy).await;
        assert!(matches!(result, Err(MigrationError::LockHeld { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_retry_succeeds_after_release() {
        let (locks, _) = manager();
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();
        locks.acquire(&store(), &a, LEASE).await.unwrap();

        let releaser = {
            let locks = locks.clone();
            let a = a.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(15)).await;
                locks.release(&store(), &a).await.unwrap();
            })
        };

        let policy = LockRetryPolicy::default()
            .with_max_attempts(5)
            .with_initial_backoff(Duration::from_millis(10));
        let grant = locks
            .acquire_with_retry(&store(), &b, LEASE, &policy)
            .await
            .unwrap();
        assert_eq!(grant.record.holder, b);
        releaser.await.unwrap();
    }
}
