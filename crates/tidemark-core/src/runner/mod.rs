//! Migration runner.
//!
//! Drives one store through the run state machine:
//!
//! ```text
//! Idle -> LockAcquired -> Validating -> Applying(v) -> Recording(v) -> Advancing | RolledBack(v) -> ... -> Done
//!                              \              \               \
//!                               +--------------+---------------+--> Failed
//! ```
//!
//! Migrations run one at a time. Each is recorded in the ledger as soon as
//! its operations succeed, and the lock is released on every exit path.

mod lease;
mod report;
mod state;

pub use report::{RunReport, RunWarning, StepOutcome};
pub use state::RunState;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn, Instrument};

use crate::adapter::{with_transaction, StoreAdapter};
use crate::clock::{Clock, SystemClock};
use crate::config::{ChecksumPolicy, RunnerConfig};
use crate::error::{AdapterError, MigrationError};
use crate::ledger::{LedgerBackend, MigrationLedger};
use crate::lock::{LockBackend, LockManager};
use crate::migration::Migration;
use crate::registry::MigrationRegistry;
use crate::status::{AppliedMigration, StatusReport};
use crate::types::{Direction, ExecutionId, StoreId, Version};

use lease::LeaseHeartbeat;
use state::StateTracker;

/// What the caller asked for.
#[derive(Debug, Clone, Copy)]
enum Request {
    Up(Option<Version>),
    Down(Version),
    Last,
}

impl Request {
    fn direction(self) -> Direction {
        match self {
            Request::Up(_) => Direction::Up,
            Request::Down(_) | Request::Last => Direction::Down,
        }
    }
}

/// Migrations selected for a run, in execution order.
struct Plan {
    direction: Direction,
    migrations: Vec<Arc<dyn Migration>>,
    projected: Option<Version>,
}

/// Per-run mutable context.
struct RunContext {
    store: StoreId,
    execution_id: ExecutionId,
    tracker: StateTracker,
    warnings: Vec<RunWarning>,
}

/// Applies and reverts the migrations of one registry against one store.
pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    adapter: Arc<dyn StoreAdapter>,
    ledger: Arc<dyn LedgerBackend>,
    locks: LockManager,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
}

impl MigrationRunner {
    /// Create a runner over a store that is its own ledger and lock backend.
    pub fn new<S>(
        registry: MigrationRegistry,
        store: Arc<S>,
        config: RunnerConfig,
    ) -> Result<Self, MigrationError>
    where
        S: StoreAdapter + LedgerBackend + LockBackend + 'static,
    {
        Self::from_parts(registry, store.clone(), store.clone(), store, config)
    }

    /// Create a runner from separate adapter, ledger and lock backends.
    pub fn from_parts(
        registry: MigrationRegistry,
        adapter: Arc<dyn StoreAdapter>,
        ledger: Arc<dyn LedgerBackend>,
        locks: Arc<dyn LockBackend>,
        config: RunnerConfig,
    ) -> Result<Self, MigrationError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            registry: Arc::new(registry),
            adapter,
            ledger,
            locks: LockManager::new(locks, Arc::clone(&clock)),
            clock,
            config,
        })
    }

    /// Use a different time source for leases and ledger timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.locks = self.locks.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// The registry this runner drives.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The runner's configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Apply pending migrations up to `target`, or all of them.
    pub async fn migrate_up(&self, target: Option<Version>) -> Result<RunReport, MigrationError> {
        self.run(Request::Up(target), self.config.dry_run).await
    }

    /// Revert applied migrations above `target`, newest first. `Version::ZERO` reverts all.
    pub async fn migrate_down(&self, target: Version) -> Result<RunReport, MigrationError> {
        self.run(Request::Down(target), self.config.dry_run).await
    }

    /// Revert only the newest applied migration.
    pub async fn rollback_last(&self) -> Result<RunReport, MigrationError> {
        self.run(Request::Last, self.config.dry_run).await
    }

    /// Compute what a run would do, under the lock, without touching the store.
    ///
    /// `target` is required for [`Direction::Down`]; `None` means `Version::ZERO`.
    pub async fn plan(
        &self,
        direction: Direction,
        target: Option<Version>,
    ) -> Result<RunReport, MigrationError> {
        let request = match direction {
            Direction::Up => Request::Up(target),
            Direction::Down => Request::Down(target.unwrap_or(Version::ZERO)),
        };
        self.run(request, true).await
    }

    /// Report applied and pending migrations and the lock holder. Does not take the lock.
    pub async fn status(&self) -> Result<StatusReport, MigrationError> {
        let store = self.registry.store().clone();
        self.ledger.ensure_ledger().await?;
        self.locks.ensure().await?;

        let ledger = MigrationLedger::open(
            Arc::clone(&self.ledger),
            store.clone(),
            Arc::clone(&self.clock),
        )
        .await?;
        let view = ledger.snapshot(&self.registry)?;

        let applied = view
            .applied
            .into_iter()
            .map(|entry| {
                let checksum_matches = entry.checksum.as_ref().and_then(|recorded| {
                    self.registry
                        .migration_at(entry.version)
                        .map(|m| m.checksum() == *recorded)
                });
                AppliedMigration {
                    version: entry.version,
                    name: entry.name,
                    applied_at: entry.applied_at,
                    execution_id: entry.execution_id,
                    checksum_matches,
                }
            })
            .collect();

        let pending = self
            .registry
            .pending_after(view.current_version, None)
            .iter()
            .map(|m| m.version())
            .collect();

        Ok(StatusReport {
            store: store.clone(),
            current_version: view.current_version,
            latest_version: self.registry.latest_version(),
            applied,
            pending,
            lock: self.locks.inspect(&store).await?,
        })
    }

    async fn run(&self, request: Request, dry_run: bool) -> Result<RunReport, MigrationError> {
        let execution_id = ExecutionId::generate();
        let span = tracing::info_span!(
            "migration_run",
            store = %self.registry.store(),
            execution_id = %execution_id,
            direction = %request.direction(),
            dry_run
        );
        self.run_with_lock(execution_id, request, dry_run)
            .instrument(span)
            .await
    }

    async fn run_with_lock(
        &self,
        execution_id: ExecutionId,
        request: Request,
        dry_run: bool,
    ) -> Result<RunReport, MigrationError> {
        let store = self.registry.store().clone();
        self.ledger.ensure_ledger().await?;
        self.locks.ensure().await?;

        let grant = self
            .locks
            .acquire_with_retry(
                &store,
                &execution_id,
                self.config.lease_duration,
                &self.config.lock_retry,
            )
            .await?;

        let mut ctx = RunContext {
            store: store.clone(),
            execution_id: execution_id.clone(),
            tracker: StateTracker::new(store.clone(), execution_id.clone()),
            warnings: Vec::new(),
        };
        ctx.tracker.transition(RunState::LockAcquired);
        if let Some(previous) = grant.taken_over {
            ctx.warnings.push(RunWarning::LockExpiredTakeover {
                previous_holder: previous.holder,
                expired_at: previous.expires_at,
            });
        }

        let result = self.run_locked(&mut ctx, request, dry_run).await;
        if let Err(e) = &result {
            ctx.tracker.fail();
            warn!(error = %e, state = %ctx.tracker.state(), "Migration run failed");
        }

        if let Err(e) = self.locks.release(&store, &execution_id).await {
            warn!(error = %e, "Failed to release migration lock");
        }

        result
    }

    async fn run_locked(
        &self,
        ctx: &mut RunContext,
        request: Request,
        dry_run: bool,
    ) -> Result<RunReport, MigrationError> {
        ctx.tracker.transition(RunState::Validating);

        let mut ledger = MigrationLedger::open(
            Arc::clone(&self.ledger),
            ctx.store.clone(),
            Arc::clone(&self.clock),
        )
        .await?;
        let current = ledger.current_version(&self.registry)?;
        self.check_checksums(&ledger, &mut ctx.warnings)?;

        let plan = self.plan_for(request, current)?;
        let planned: Vec<Version> = plan.migrations.iter().map(|m| m.version()).collect();

        let mut report = RunReport {
            store: ctx.store.clone(),
            execution_id: ctx.execution_id.clone(),
            direction: plan.direction,
            dry_run,
            from_version: current,
            to_version: if dry_run { plan.projected } else { current },
            planned,
            steps: Vec::new(),
            warnings: Vec::new(),
            final_state: RunState::Validating,
        };

        if dry_run || plan.migrations.is_empty() {
            if dry_run {
                info!(current = ?current, planned = ?report.planned, "Dry run planned");
            } else {
                info!(current = ?current, "No migrations to run");
            }
            ctx.tracker.transition(RunState::Done);
            report.warnings = std::mem::take(&mut ctx.warnings);
            report.final_state = ctx.tracker.state();
            return Ok(report);
        }

        let heartbeat = LeaseHeartbeat::spawn(
            self.locks.clone(),
            ctx.store.clone(),
            ctx.execution_id.clone(),
            self.config.lease_duration,
            self.config.renew_interval,
        );

        let mut confirmed = current;
        for migration in &plan.migrations {
            let version = migration.version();
            ctx.tracker.transition(RunState::Applying(version));

            if heartbeat.is_lost() {
                return Err(MigrationError::LockLost {
                    store: ctx.store.clone(),
                    execution_id: ctx.execution_id.clone(),
                });
            }

            let m: &dyn Migration = migration.as_ref();
            let direction = plan.direction;
            let started = Instant::now();
            let outcome = with_transaction(self.adapter.as_ref(), move |a| match direction {
                Direction::Up => m.up(a),
                Direction::Down => m.down(a),
            })
            .await;
            let elapsed = started.elapsed();

            if let Err(source) = outcome {
                return Err(MigrationError::MigrationFailed {
                    direction,
                    version,
                    name: m.name().to_string(),
                    confirmed_version: confirmed,
                    source,
                });
            }

            ctx.tracker.transition(RunState::Recording(version));
            if let Err(source) = self.confirm_lock(ctx, &heartbeat).await {
                return Err(MigrationError::LedgerWriteAfterApply {
                    version,
                    name: m.name().to_string(),
                    direction,
                    attempts: 0,
                    source,
                });
            }
            self.record(&mut ledger, direction, m, &ctx.execution_id, elapsed)
                .await?;

            match direction {
                Direction::Up => {
                    confirmed = Some(version);
                    ctx.tracker.transition(RunState::Advancing);
                }
                Direction::Down => {
                    confirmed = self.registry.version_before(version);
                    ctx.tracker.transition(RunState::RolledBack(version));
                }
            }

            info!(
                version = %version,
                name = m.name(),
                direction = %direction,
                elapsed_ms = elapsed.as_millis() as u64,
                "Migration complete"
            );
            report.steps.push(StepOutcome {
                version,
                name: m.name().to_string(),
                direction,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        drop(heartbeat);
        ctx.tracker.transition(RunState::Done);
        report.to_version = confirmed;
        report.warnings = std::mem::take(&mut ctx.warnings);
        report.final_state = ctx.tracker.state();
        Ok(report)
    }

    fn plan_for(&self, request: Request, current: Option<Version>) -> Result<Plan, MigrationError> {
        let registry = &self.registry;
        match request {
            Request::Up(target) => {
                if let Some(t) = target {
                    if !registry.contains(t) {
                        return Err(MigrationError::InvalidTarget {
                            target: t,
                            reason: "not a registered version".to_string(),
                        });
                    }
                    if let Some(c) = current.filter(|c| t < *c) {
                        return Err(MigrationError::InvalidTarget {
                            target: t,
                            reason: format!("below current version {c}; use migrate_down"),
                        });
                    }
                }
                let migrations = registry.pending_after(current, target);
                let projected = migrations.last().map(|m| m.version()).or(current);
                Ok(Plan {
                    direction: Direction::Up,
                    migrations,
                    projected,
                })
            }
            Request::Down(target) => {
                if !target.is_zero() && !registry.contains(target) {
                    return Err(MigrationError::InvalidTarget {
                        target,
                        reason: "neither 0 nor a registered version".to_string(),
                    });
                }
                let migrations = registry.revertible(current, target);
                let projected = match migrations.last() {
                    Some(lowest) => registry.version_before(lowest.version()),
                    None => current,
                };
                Ok(Plan {
                    direction: Direction::Down,
                    migrations,
                    projected,
                })
            }
            Request::Last => {
                let migrations: Vec<_> = current
                    .and_then(|c| registry.migration_at(c))
                    .cloned()
                    .into_iter()
                    .collect();
                let projected = current.and_then(|c| registry.version_before(c));
                Ok(Plan {
                    direction: Direction::Down,
                    migrations,
                    projected,
                })
            }
        }
    }

    fn check_checksums(
        &self,
        ledger: &MigrationLedger,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<(), MigrationError> {
        if self.config.checksum_policy == ChecksumPolicy::Ignore {
            return Ok(());
        }

        for (version, entry) in ledger.applied() {
            let (Some(recorded), Some(migration)) =
                (entry.checksum.as_ref(), self.registry.migration_at(version))
            else {
                continue;
            };
            let current = migration.checksum();
            if *recorded == current {
                continue;
            }

            if self.config.checksum_policy == ChecksumPolicy::Fail {
                return Err(MigrationError::ChecksumMismatch {
                    version,
                    name: migration.name().to_string(),
                    recorded: recorded.clone(),
                    current,
                });
            }
            warn!(
                version = %version,
                name = migration.name(),
                recorded = %recorded,
                current = %current,
                "Applied migration changed since it was recorded"
            );
            warnings.push(RunWarning::ChecksumDrift {
                version,
                name: migration.name().to_string(),
                recorded: recorded.clone(),
                current,
            });
        }
        Ok(())
    }

    /// Check that this execution still holds the lock before writing the ledger.
    ///
    /// Renewal errors other than a lost lock are left to the ledger write.
    async fn confirm_lock(
        &self,
        ctx: &RunContext,
        heartbeat: &LeaseHeartbeat,
    ) -> Result<(), AdapterError> {
        let lost = || {
            AdapterError::LedgerConflict(format!(
                "lock on {} is no longer held by {}",
                ctx.store, ctx.execution_id
            ))
        };
        if heartbeat.is_lost() {
            return Err(lost());
        }
        match self
            .locks
            .renew(&ctx.store, &ctx.execution_id, self.config.lease_duration)
            .await
        {
            Ok(_) => Ok(()),
            Err(MigrationError::LockLost { .. }) => Err(lost()),
            Err(e) => {
                warn!(error = %e, "Lease check before ledger write failed");
                Ok(())
            }
        }
    }

    async fn record(
        &self,
        ledger: &mut MigrationLedger,
        direction: Direction,
        migration: &dyn Migration,
        execution_id: &ExecutionId,
        elapsed: Duration,
    ) -> Result<(), MigrationError> {
        let version = migration.version();
        let attempts = self.config.ledger_write_attempts;
        let mut attempt = 1;

        loop {
            let result = match direction {
                Direction::Up => {
                    ledger
                        .record_applied(
                            version,
                            migration.name(),
                            execution_id,
                            Some(migration.checksum()),
                            elapsed,
                        )
                        .await
                }
                Direction::Down => {
                    ledger
                        .record_reverted(version, migration.name(), execution_id, elapsed)
                        .await
                }
            };

            let err = match result {
                Ok(()) => return Ok(()),
                Err(MigrationError::Storage(e)) => e,
                Err(other) => AdapterError::Backend(other.to_string()),
            };

            // Another execution owns the slot; retrying cannot succeed.
            let conflict = matches!(err, AdapterError::LedgerConflict(_));
            if conflict || attempt >= attempts {
                return Err(MigrationError::LedgerWriteAfterApply {
                    version,
                    name: migration.name().to_string(),
                    direction,
                    attempts: attempt,
                    source: err,
                });
            }

            warn!(
                version = %version,
                attempt,
                error = %err,
                "Ledger write failed, retrying"
            );
            tokio::time::sleep(self.config.ledger_retry_delay).await;
            attempt += 1;
        }
    }
}
