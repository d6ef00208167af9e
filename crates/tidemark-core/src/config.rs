//! Runner configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Default lease length for the per-store lock.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Default number of ledger write attempts after a successful apply.
pub const DEFAULT_LEDGER_WRITE_ATTEMPTS: u32 = 3;

/// Default pause between ledger write attempts.
pub const DEFAULT_LEDGER_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Prefix reserved for the engine's own tables and collections.
pub const RESERVED_PREFIX: &str = "_tidemark";

/// Whether `name` falls in the engine's reserved namespace.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// What to do when an applied migration's checksum no longer matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Do not compare checksums.
    Ignore,
    /// Log and report drift, then continue.
    #[default]
    Warn,
    /// Refuse to run with `ChecksumMismatch`.
    Fail,
}

impl fmt::Display for ChecksumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumPolicy::Ignore => write!(f, "ignore"),
            ChecksumPolicy::Warn => write!(f, "warn"),
            ChecksumPolicy::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for ChecksumPolicy {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(ChecksumPolicy::Ignore),
            "warn" => Ok(ChecksumPolicy::Warn),
            "fail" => Ok(ChecksumPolicy::Fail),
            other => Err(MigrationError::InvalidConfig(format!(
                "unknown checksum policy: {other}"
            ))),
        }
    }
}

/// Bounded exponential backoff for lock contention.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRetryPolicy {
    /// Total acquisition attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl LockRetryPolicy {
    /// A single attempt with no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the first delay.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the delay ceiling.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Set the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Names of the engine's bookkeeping tables or collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    /// Ledger table or collection.
    pub ledger_name: String,
    /// Lock table or collection.
    pub lock_name: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            ledger_name: format!("{RESERVED_PREFIX}_ledger"),
            lock_name: format!("{RESERVED_PREFIX}_locks"),
        }
    }
}

impl StoreLayout {
    /// Use a custom ledger name.
    pub fn with_ledger_name(mut self, name: impl Into<String>) -> Self {
        self.ledger_name = name.into();
        self
    }

    /// Use a custom lock name.
    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }
}

/// Configuration for a [`MigrationRunner`](crate::runner::MigrationRunner).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Lease length requested on acquire and on every renewal.
    pub lease_duration: Duration,
    /// How often the background heartbeat renews the lease.
    pub renew_interval: Duration,
    /// Backoff for lock contention.
    pub lock_retry: LockRetryPolicy,
    /// Attempts for the ledger write that follows a successful apply.
    pub ledger_write_attempts: u32,
    /// Pause between ledger write attempts.
    pub ledger_retry_delay: Duration,
    /// Handling of checksum drift on applied migrations.
    pub checksum_policy: ChecksumPolicy,
    /// Compute the plan under the lock without touching the store.
    pub dry_run: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_interval: DEFAULT_LEASE_DURATION / 3,
            lock_retry: LockRetryPolicy::default(),
            ledger_write_attempts: DEFAULT_LEDGER_WRITE_ATTEMPTS,
            ledger_retry_delay: DEFAULT_LEDGER_RETRY_DELAY,
            checksum_policy: ChecksumPolicy::default(),
            dry_run: false,
        }
    }
}

impl RunnerConfig {
    /// Set the lease length. The renewal interval follows at one third.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self.renew_interval = lease / 3;
        self
    }

    /// Set the renewal interval explicitly.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Set the lock retry policy.
    pub fn with_lock_retry(mut self, policy: LockRetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    /// Set ledger write attempts and the delay between them.
    pub fn with_ledger_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.ledger_write_attempts = attempts;
        self.ledger_retry_delay = delay;
        self
    }

    /// Set the checksum policy.
    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check the configuration once, before any store access.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.lease_duration.is_zero() {
            return Err(MigrationError::InvalidConfig(
                "lease_duration must be positive".to_string(),
            ));
        }
        if self.renew_interval.is_zero() || self.renew_interval >= self.lease_duration {
            return Err(MigrationError::InvalidConfig(format!(
                "renew_interval ({:?}) must be positive and shorter than lease_duration ({:?})",
                self.renew_interval, self.lease_duration
            )));
        }
        if self.lock_retry.max_attempts == 0 {
            return Err(MigrationError::InvalidConfig(
                "lock_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lock_retry.multiplier.is_nan() || self.lock_retry.multiplier < 1.0 {
            return Err(MigrationError::InvalidConfig(
                "lock_retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.ledger_write_attempts == 0 {
            return Err(MigrationError::InvalidConfig(
                "ledger_write_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
