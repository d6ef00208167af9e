//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tidemark_core::{
    ChecksumPolicy, LockRetryPolicy, MigrationError, RunnerConfig, StoreId, StoreKind, Version,
};

/// Versioned schema migrations
#[derive(Parser, Debug, Clone)]
#[command(name = "tidemark")]
#[command(version, about = "Versioned schema migrations for relational and document stores")]
pub struct Cli {
    /// Store timeline to operate on, e.g. analytics-service/postgres
    #[arg(long, global = true, env = "TIDEMARK_STORE")]
    pub store: Option<String>,

    /// Lock lease length in seconds
    #[arg(long, global = true, default_value_t = 60)]
    pub lease_secs: u64,

    /// Attempts to take the lock before giving up
    #[arg(long, global = true, default_value_t = 10)]
    pub lock_attempts: u32,

    /// Plan under the lock without touching the store
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// What to do when an applied migration changed
    #[arg(long, global = true, value_enum, default_value_t = ChecksumArg::Warn)]
    pub checksums: ChecksumArg,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply pending migrations
    Up {
        /// Stop at this version instead of the latest
        #[arg(long)]
        to: Option<u64>,
    },

    /// Revert migrations above a version (0 reverts everything)
    Down {
        /// Version to return to
        #[arg(long)]
        to: u64,
    },

    /// Revert the newest applied migration
    Rollback,

    /// Show applied and pending migrations
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show what up or down would run
    Plan {
        /// Plan a revert instead of an apply
        #[arg(long)]
        down: bool,

        /// Target version
        #[arg(long)]
        to: Option<u64>,
    },

    /// Write a new migration skeleton
    Create(CreateArgs),
}

/// Arguments of `create`.
#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Migration name, e.g. add-user-indexes
    pub name: String,

    /// Directory to write into
    #[arg(long, default_value = "migrations")]
    pub dir: PathBuf,

    /// Store family the skeleton targets
    #[arg(long, value_enum, default_value_t = KindArg::Relational)]
    pub kind: KindArg,
}

/// `--checksums` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChecksumArg {
    /// Do not compare checksums
    Ignore,
    /// Report changed migrations and continue
    Warn,
    /// Refuse to run when a migration changed
    Fail,
}

impl From<ChecksumArg> for ChecksumPolicy {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Ignore => ChecksumPolicy::Ignore,
            ChecksumArg::Warn => ChecksumPolicy::Warn,
            ChecksumArg::Fail => ChecksumPolicy::Fail,
        }
    }
}

/// `--kind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Tables and SQL DDL
    Relational,
    /// Collections and document updates
    Document,
}

impl From<KindArg> for StoreKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Relational => StoreKind::Relational,
            KindArg::Document => StoreKind::Document,
        }
    }
}

impl Cli {
    /// Apply the global flags on top of `base`.
    pub fn into_config(&self, base: RunnerConfig) -> Result<RunnerConfig, MigrationError> {
        let lock_retry = LockRetryPolicy {
            max_attempts: self.lock_attempts,
            ..base.lock_retry.clone()
        };
        let config = base
            .with_lease_duration(Duration::from_secs(self.lease_secs))
            .with_lock_retry(lock_retry)
            .with_checksum_policy(self.checksums.into())
            .with_dry_run(self.dry_run);
        config.validate()?;
        Ok(config)
    }

    /// The `--store` flag as a validated id.
    pub fn store_id(&self) -> Result<Option<StoreId>, MigrationError> {
        self.store.as_deref().map(StoreId::new).transpose()
    }

    /// Whether the command needs a connected runner.
    pub fn requires_runner(&self) -> bool {
        !matches!(self.command, Command::Create(_))
    }
}

pub(crate) fn version(value: u64) -> Version {
    Version::new(value)
}
