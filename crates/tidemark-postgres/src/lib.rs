//! Tidemark Postgres - relational store adapter for PostgreSQL and TimescaleDB.
//!
//! [`PgAdapter`] implements the core `StoreAdapter`, `LedgerBackend` and
//! `LockBackend` traits over a `sqlx::PgPool`. Each migration runs inside one
//! transaction; the ledger and lock tables are written outside it.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidemark_core::{MigrationRunner, RunnerConfig};
//! use tidemark_postgres::{PgAdapter, PgConfig};
//!
//! let adapter = PgAdapter::connect(&PgConfig::from_env()).await?;
//! let runner = MigrationRunner::new(registry, Arc::new(adapter), RunnerConfig::default())?;
//! runner.migrate_up(None).await?;
//! ```

pub mod adapter;
pub mod config;
pub mod ddl;
pub mod error;
mod ledger;
mod lock;
pub mod timescale;

pub use adapter::PgAdapter;
pub use config::PgConfig;
pub use error::PgError;
